use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

use portico_core::{RegisterRequest, RegisterResponse};

use crate::client::{Error, RegistryClient};

/// Background heartbeat loop for a registered instance.
///
/// Beats at the interval the gateway returned on registration. If the
/// gateway has forgotten the instance (e.g. it was evicted while this
/// service was partitioned away), the runner re-registers with the original
/// request and continues under the new instance id.
pub struct HeartbeatRunner {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
    client: Arc<RegistryClient>,
    instance_id: Arc<Mutex<String>>,
}

impl HeartbeatRunner {
    /// Spawn the loop for a freshly registered instance.
    pub fn spawn(
        client: RegistryClient,
        request: RegisterRequest,
        registration: RegisterResponse,
    ) -> Self {
        let client = Arc::new(client);
        let instance_id = Arc::new(Mutex::new(registration.instance_id));
        let beat_every = Duration::from_secs(registration.heartbeat_interval.max(1));

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let loop_client = Arc::clone(&client);
        let loop_instance = Arc::clone(&instance_id);

        let task = tokio::spawn(async move {
            let mut ticker = interval(beat_every);
            // The first interval tick fires immediately; registration just
            // happened, so skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        beat(&loop_client, &loop_instance, &request).await;
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            task,
            client,
            instance_id,
        }
    }

    /// The instance id currently registered (it changes after an automatic
    /// re-registration).
    pub async fn instance_id(&self) -> String {
        self.instance_id.lock().await.clone()
    }

    /// Stop the loop, wait for it to exit, and deregister the instance.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;

        let instance_id = self.instance_id.lock().await.clone();
        match self.client.deregister(&instance_id).await {
            Ok(()) => info!(%instance_id, "instance deregistered"),
            Err(Error::InstanceNotFound) => {}
            Err(e) => warn!(%instance_id, error = %e, "deregistration failed"),
        }
    }
}

async fn beat(client: &RegistryClient, instance_id: &Mutex<String>, request: &RegisterRequest) {
    let current = instance_id.lock().await.clone();

    match client.heartbeat(&current).await {
        Ok(()) => {}
        Err(Error::InstanceNotFound) => {
            warn!(
                service = client.service_name(),
                "instance not found, attempting re-registration"
            );
            match client.register(request).await {
                Ok(response) => {
                    info!(
                        instance_id = %response.instance_id,
                        "re-registered after eviction"
                    );
                    *instance_id.lock().await = response.instance_id;
                }
                Err(e) => error!(error = %e, "re-registration failed"),
            }
        }
        Err(e) => warn!(error = %e, "heartbeat failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;

    const PRIVATE_PEM: &str = include_str!("../testdata/rsa_private.pem");

    async fn stub_gateway(heartbeats: Arc<AtomicUsize>) -> SocketAddr {
        let app = Router::new()
            .route(
                "/internal/registry/heartbeat",
                post(move || {
                    heartbeats.fetch_add(1, Ordering::SeqCst);
                    async { Json(serde_json::json!({"status": "ok"})) }
                }),
            )
            .route(
                "/internal/registry/deregister",
                post(|| async { Json(serde_json::json!({"status": "deregistered"})) }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn request() -> RegisterRequest {
        RegisterRequest {
            service_name: "user-service".into(),
            host: "127.0.0.1".into(),
            port: 9001,
            health_url: "/health".into(),
            version: String::new(),
            base_path: "/api/v1".into(),
            routes: vec![],
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn runner_beats_and_shuts_down() {
        let heartbeats = Arc::new(AtomicUsize::new(0));
        let addr = stub_gateway(Arc::clone(&heartbeats)).await;

        let client = RegistryClient::builder(format!("http://{addr}"), "user-service")
            .private_key_pem(PRIVATE_PEM)
            .build()
            .unwrap();

        let runner = HeartbeatRunner::spawn(
            client,
            request(),
            RegisterResponse {
                instance_id: "inst-1".into(),
                heartbeat_interval: 1,
                heartbeat_url: "/internal/registry/heartbeat".into(),
                registered_routes: vec![],
            },
        );
        assert_eq!(runner.instance_id().await, "inst-1");

        tokio::time::sleep(Duration::from_millis(1200)).await;
        runner.shutdown().await;

        assert!(heartbeats.load(Ordering::SeqCst) >= 1);
    }
}
