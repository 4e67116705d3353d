use std::sync::atomic::{AtomicU64, Ordering};

use portico_core::ServiceInstance;

/// Round-robin selection over a slice of instances.
///
/// Holds one process-wide counter, not per-service state: a single
/// fetch-and-add per selection keeps the distribution fair (each instance
/// within one selection of its share) under any number of concurrent
/// callers.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicU64,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the next instance, or `None` when the slice is empty.
    pub fn select<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }

        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let idx = (n % instances.len() as u64) as usize;
        Some(&instances[idx])
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use chrono::Utc;
    use portico_core::ServiceStatus;

    use super::*;

    fn instances(n: usize) -> Vec<ServiceInstance> {
        (0..n)
            .map(|i| ServiceInstance {
                id: format!("inst-{i}"),
                service_name: "svc".into(),
                host: "127.0.0.1".into(),
                port: 9000 + i as u16,
                health_url: "/health".into(),
                version: String::new(),
                status: ServiceStatus::Healthy,
                weight: 1,
                metadata: HashMap::new(),
                registered_at: Utc::now(),
                last_heartbeat: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn empty_slice_selects_nothing() {
        let balancer = RoundRobinBalancer::new();
        assert!(balancer.select(&[]).is_none());
    }

    #[test]
    fn single_instance_is_always_selected() {
        let balancer = RoundRobinBalancer::new();
        let insts = instances(1);
        for _ in 0..10 {
            assert_eq!(balancer.select(&insts).unwrap().id, "inst-0");
        }
    }

    #[test]
    fn serial_selection_cycles_in_order() {
        let balancer = RoundRobinBalancer::new();
        let insts = instances(3);
        let picked: Vec<String> = (0..6)
            .map(|_| balancer.select(&insts).unwrap().id.clone())
            .collect();
        assert_eq!(
            picked,
            vec!["inst-0", "inst-1", "inst-2", "inst-0", "inst-1", "inst-2"]
        );
    }

    #[tokio::test]
    async fn concurrent_selection_is_fair_within_one() {
        const INSTANCES: usize = 4;
        const PER_TASK: usize = 25;
        const TASKS: usize = 8;

        let balancer = Arc::new(RoundRobinBalancer::new());
        let insts = Arc::new(instances(INSTANCES));

        let mut handles = Vec::new();
        for _ in 0..TASKS {
            let balancer = Arc::clone(&balancer);
            let insts = Arc::clone(&insts);
            handles.push(tokio::spawn(async move {
                let mut counts: HashMap<String, usize> = HashMap::new();
                for _ in 0..PER_TASK {
                    let picked = balancer.select(&insts).unwrap();
                    *counts.entry(picked.id.clone()).or_default() += 1;
                }
                counts
            }));
        }

        let mut totals: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for (id, count) in handle.await.unwrap() {
                *totals.entry(id).or_default() += count;
            }
        }

        let expected = TASKS * PER_TASK / INSTANCES;
        for (id, count) in &totals {
            let diff = count.abs_diff(expected);
            assert!(diff <= 1, "instance {id} selected {count} times, expected {expected}±1");
        }
    }
}
