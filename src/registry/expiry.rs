//! Expiry sweeper - background task that removes instances whose heartbeat went stale
//!
//! Runs on every node but only acts while the node is master, so each removal goes
//! through the replicated write path exactly once.

use crate::cluster::ClusterEvent;
use crate::registry::service::RegistryService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct ExpirySweeper {
    service: Arc<RegistryService>,
    timeout_secs: u64,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(service: Arc<RegistryService>, timeout_secs: u64, interval: Duration) -> Self {
        Self {
            service,
            timeout_secs,
            interval,
        }
    }

    /// Spawn the sweep loop. With `events`, a node that just became master sweeps at once.
    pub fn spawn(self, events: Option<broadcast::Receiver<ClusterEvent>>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(events).await })
    }

    async fn run(self, mut events: Option<broadcast::Receiver<ClusterEvent>>) {
        info!(
            "Expiry sweeper started: timeout {}s, interval {:?}",
            self.timeout_secs, self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                event = next_event(&mut events) => match event {
                    Ok(ClusterEvent::BecameMaster) => {
                        info!("Became master, sweeping expired instances now");
                    }
                    Ok(ClusterEvent::MasterChanged(_)) => continue,
                    Err(RecvError::Lagged(n)) => {
                        debug!("Expiry sweeper skipped {} cluster events", n);
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        events = None;
                        continue;
                    }
                },
            }
            self.sweep_once();
        }
    }

    /// Remove every expired instance. Returns how many were removed; always 0 on a slave.
    pub fn sweep_once(&self) -> usize {
        if !self.service.is_master() {
            return 0;
        }

        let expired = self.service.store().expired(self.timeout_secs);
        let mut removed = 0;
        for instance in &expired {
            if self.service.evict(instance, self.timeout_secs) {
                warn!(
                    "Expired {} ({}) at {}:{}, last heartbeat {}",
                    instance.service_id,
                    instance.service_name,
                    instance.ip_address,
                    instance.port,
                    instance.last_heartbeat_gmt_time
                );
                removed += 1;
            }
        }
        removed
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<ClusterEvent>>,
) -> Result<ClusterEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::utils::timestamp_now;
    use crate::registry::instance::ServiceInstance;

    fn stale(id: &str, port: u32, age: i64) -> ServiceInstance {
        let mut ins = ServiceInstance::new("svc", id, "10.0.0.1", port);
        ins.registered_at = timestamp_now() - age;
        ins.last_heartbeat = timestamp_now() - age;
        ins
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let service = Arc::new(RegistryService::standalone());
        service.store().merge_from_sync(stale("old", 1, 120)).unwrap();
        service.store().merge_from_sync(stale("fresh", 2, 5)).unwrap();

        let sweeper = ExpirySweeper::new(service.clone(), 60, Duration::from_secs(10));
        assert_eq!(sweeper.sweep_once(), 1);
        assert!(service.store().get("old").is_none());
        assert!(service.store().get("fresh").is_some());
        assert_eq!(service.metrics().expired_instances.get(), 1);
        assert_eq!(sweeper.sweep_once(), 0);
    }

    #[tokio::test]
    async fn test_became_master_triggers_sweep() {
        let service = Arc::new(RegistryService::standalone());
        let (tx, rx) = broadcast::channel(4);
        let handle = ExpirySweeper::new(service.clone(), 60, Duration::from_secs(3600))
            .spawn(Some(rx));

        // Let the immediate first tick pass before the stale entry exists.
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.store().merge_from_sync(stale("old", 1, 120)).unwrap();
        tx.send(ClusterEvent::BecameMaster).unwrap();

        for _ in 0..50 {
            if service.store().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(service.store().is_empty());
        handle.abort();
    }
}
