use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

use portico_core::{
    CollisionError, GatewayError, RegisterRequest, RegisterResponse, Route, RouteCollision,
    RouteEntry, ServiceInstance, ServiceStatus,
};

use crate::collision::collisions_for;

/// Tuning knobs for the registry and its cleanup loop.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long an instance may go without a heartbeat before it is marked
    /// unhealthy; eviction happens beyond twice this value.
    pub heartbeat_ttl: Duration,
    /// Whether pattern-level collision checks run in addition to exact ones.
    pub strict_pattern_matching: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_ttl: Duration::from_secs(30),
            strict_pattern_matching: true,
        }
    }
}

/// The three registry maps, kept consistent as a unit.
///
/// Invariants at rest: every id in `services[s]` is a key in `instances`
/// whose record carries `service_name == s`, and every route entry belongs
/// to a service with at least one live instance.
#[derive(Default)]
struct Tables {
    instances: HashMap<String, ServiceInstance>,
    services: HashMap<String, Vec<String>>,
    routes: HashMap<String, RouteEntry>,
}

/// Concurrency-safe store of service instances, heartbeats, and routes.
///
/// All reads return snapshots; callers never hold references into the maps.
/// Mutations and the periodic cleanup scan each run inside one critical
/// section so observers see either the pre-state or the post-state of an
/// operation, never a torn middle.
pub struct Registry {
    config: RegistryConfig,
    tables: RwLock<Tables>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            tables: RwLock::new(Tables::default()),
            shutdown_tx: Mutex::new(None),
            cleanup_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register an instance together with its routes.
    ///
    /// Validation and collision checks run before any state is written, and
    /// the insertion of the instance, its service-bucket entry, and every
    /// route happens under one write lock, so a failed registration leaves
    /// no partial state behind.
    pub async fn register(
        &self,
        mut req: RegisterRequest,
    ) -> Result<RegisterResponse, GatewayError> {
        req.validate()?;

        let mut tables = self.tables.write().await;

        let collisions = collisions_for(
            &tables.routes,
            &req.service_name,
            &req.base_path,
            &req.routes,
            self.config.strict_pattern_matching,
        );
        if !collisions.is_empty() {
            return Err(CollisionError { collisions }.into());
        }

        let instance_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let instance = ServiceInstance {
            id: instance_id.clone(),
            service_name: req.service_name.clone(),
            host: req.host.clone(),
            port: req.port as u16,
            health_url: req.health_url.clone(),
            version: req.version.clone(),
            status: ServiceStatus::Healthy,
            weight: 1,
            metadata: req.metadata.clone(),
            registered_at: now,
            last_heartbeat: now,
        };

        tables.instances.insert(instance_id.clone(), instance);
        tables
            .services
            .entry(req.service_name.clone())
            .or_default()
            .push(instance_id.clone());

        let mut registered_routes = Vec::with_capacity(req.routes.len());
        for route in &req.routes {
            let key = route.key(&req.base_path);
            tables.routes.insert(
                key.clone(),
                RouteEntry {
                    service_name: req.service_name.clone(),
                    base_path: req.base_path.clone(),
                    route: route.clone(),
                    registered_at: now,
                },
            );
            registered_routes.push(key);
        }

        info!(
            service = %req.service_name,
            instance_id = %instance_id,
            routes = registered_routes.len(),
            "instance registered"
        );

        Ok(RegisterResponse {
            instance_id,
            heartbeat_interval: self.config.heartbeat_ttl.as_secs(),
            heartbeat_url: "/internal/registry/heartbeat".into(),
            registered_routes,
        })
    }

    /// Refresh an instance's liveness stamp.
    ///
    /// Heartbeats never change `status`; only the cleanup loop performs
    /// status transitions.
    pub async fn heartbeat(&self, instance_id: &str) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        let instance = tables
            .instances
            .get_mut(instance_id)
            .ok_or(GatewayError::InstanceNotFound)?;
        instance.last_heartbeat = Utc::now();
        Ok(())
    }

    /// Remove an instance; when it was the last one of its service, drop the
    /// service bucket and every route the service had installed.
    pub async fn deregister(&self, instance_id: &str) -> Result<(), GatewayError> {
        let mut tables = self.tables.write().await;
        if !tables.instances.contains_key(instance_id) {
            return Err(GatewayError::InstanceNotFound);
        }
        remove_instance(&mut tables, instance_id);
        Ok(())
    }

    pub async fn instance(&self, instance_id: &str) -> Option<ServiceInstance> {
        self.tables.read().await.instances.get(instance_id).cloned()
    }

    pub async fn instances(&self, service_name: &str) -> Vec<ServiceInstance> {
        let tables = self.tables.read().await;
        collect_instances(&tables, service_name, |_| true)
    }

    pub async fn healthy_instances(&self, service_name: &str) -> Vec<ServiceInstance> {
        let tables = self.tables.read().await;
        collect_instances(&tables, service_name, ServiceInstance::is_healthy)
    }

    pub async fn route(&self, method: &str, path: &str) -> Option<RouteEntry> {
        let key = format!("{method}:{path}");
        self.tables.read().await.routes.get(&key).cloned()
    }

    /// Snapshot of the full routing table.
    pub async fn all_routes(&self) -> HashMap<String, RouteEntry> {
        self.tables.read().await.routes.clone()
    }

    /// Snapshot of every service and its instances, in registration order.
    pub async fn all_services(&self) -> HashMap<String, Vec<ServiceInstance>> {
        let tables = self.tables.read().await;
        tables
            .services
            .keys()
            .map(|name| (name.clone(), collect_instances(&tables, name, |_| true)))
            .filter(|(_, instances)| !instances.is_empty())
            .collect()
    }

    /// Report the collisions a prospective registration would cause, without
    /// mutating anything.
    pub async fn validate_routes(
        &self,
        service_name: &str,
        base_path: &str,
        routes: &[Route],
    ) -> Vec<RouteCollision> {
        let tables = self.tables.read().await;
        collisions_for(
            &tables.routes,
            service_name,
            base_path,
            routes,
            self.config.strict_pattern_matching,
        )
    }

    /// Spawn the cleanup loop. Ticks every `max(heartbeat_ttl / 2, 1s)`.
    pub async fn start(self: &Arc<Self>) {
        let (tx, mut rx) = mpsc::channel(1);
        *self.shutdown_tx.lock().await = Some(tx);

        let tick_every = (self.config.heartbeat_ttl / 2).max(Duration::from_secs(1));
        let registry = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = interval(tick_every);
            loop {
                tokio::select! {
                    _ = rx.recv() => {
                        info!("registry cleanup loop stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        registry.cleanup().await;
                    }
                }
            }
        });
        *self.cleanup_task.lock().await = Some(task);
    }

    /// Signal the cleanup loop and wait for it to exit.
    pub async fn stop(&self) {
        let tx = self.shutdown_tx.lock().await.take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
        let task = self.cleanup_task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// One cleanup pass: mark instances unhealthy past the TTL, evict them
    /// past twice the TTL. Runs entirely inside one write-lock critical
    /// section so the map invariants hold at every observable point.
    async fn cleanup(&self) {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let ttl =
            chrono::Duration::from_std(self.config.heartbeat_ttl).unwrap_or(chrono::Duration::MAX);

        let mut to_remove = Vec::new();
        for (id, instance) in &mut tables.instances {
            let elapsed = now - instance.last_heartbeat;

            if elapsed > ttl + ttl {
                info!(
                    instance_id = %id,
                    service = %instance.service_name,
                    last_heartbeat = %instance.last_heartbeat,
                    "removing expired instance"
                );
                to_remove.push(id.clone());
            } else if elapsed > ttl && instance.status == ServiceStatus::Healthy {
                warn!(
                    instance_id = %id,
                    service = %instance.service_name,
                    elapsed_ms = elapsed.num_milliseconds(),
                    "marking instance unhealthy"
                );
                instance.status = ServiceStatus::Unhealthy;
            }
        }

        for id in to_remove {
            remove_instance(&mut tables, &id);
        }
    }

    #[cfg(test)]
    async fn run_cleanup_now(&self) {
        self.cleanup().await;
    }

    #[cfg(test)]
    async fn rewind_heartbeat(&self, instance_id: &str, to: chrono::DateTime<Utc>) {
        let mut tables = self.tables.write().await;
        if let Some(instance) = tables.instances.get_mut(instance_id) {
            instance.last_heartbeat = to;
        }
    }
}

fn collect_instances(
    tables: &Tables,
    service_name: &str,
    keep: impl Fn(&ServiceInstance) -> bool,
) -> Vec<ServiceInstance> {
    let Some(ids) = tables.services.get(service_name) else {
        return Vec::new();
    };
    ids.iter()
        .filter_map(|id| tables.instances.get(id))
        .filter(|inst| keep(inst))
        .cloned()
        .collect()
}

/// Remove an instance and, when its service bucket empties, the bucket and
/// every route the service declared. Callers hold the write lock.
fn remove_instance(tables: &mut Tables, instance_id: &str) {
    let Some(instance) = tables.instances.remove(instance_id) else {
        return;
    };
    let service_name = instance.service_name;

    if let Some(ids) = tables.services.get_mut(&service_name) {
        ids.retain(|id| id != instance_id);
        if ids.is_empty() {
            tables
                .routes
                .retain(|_, entry| entry.service_name != service_name);
            tables.services.remove(&service_name);
        }
    }
}
