//! Role-aware registry operations
//!
//! `RegistryService` is what the HTTP handlers call. On the master it applies a write to
//! the local [`InstanceStore`] and hands the result to the cluster for replication; on a
//! slave it forwards the write to the master and returns the master's answer untouched.
//! The cluster side is reached only through the [`ClusterRoute`] trait.

use crate::common::metrics::RegistryMetrics;
use crate::common::utils::timestamp_now;
use crate::common::{Error, Result};
use crate::registry::instance::{IdentityClaim, ServiceInstance};
use crate::registry::store::{InstanceStore, RegisterOutcome};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Discovery forwarding attempts before giving up with `Unavailable`.
const DISCOVERY_ATTEMPTS: usize = 2;

/// Pause after a failed discovery forward, giving the master recheck time to run.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Write kinds that travel between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Register,
    Unregister,
    Heartbeat,
}

impl SyncAction {
    /// Public endpoint a slave forwards this write to.
    pub fn path(&self) -> &'static str {
        match self {
            SyncAction::Register => "/api/register",
            SyncAction::Unregister => "/api/unregister",
            SyncAction::Heartbeat => "/api/heartbeat",
        }
    }
}

/// Body of `POST /api/internal/sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub action: SyncAction,
    pub instance: ServiceInstance,
}

/// Raw answer from the master, proxied back to the caller unchanged.
#[derive(Debug, Clone)]
pub struct ForwardedResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Either a locally computed result or the master's proxied response.
#[derive(Debug)]
pub enum Routed<T> {
    Local(T),
    Forwarded(ForwardedResponse),
}

/// What the registry needs to know about the cluster.
#[async_trait]
pub trait ClusterRoute: Send + Sync {
    fn is_master(&self) -> bool;

    /// Push a committed write to every other node. Never blocks on the peers.
    fn replicate(&self, action: SyncAction, instance: &ServiceInstance);

    async fn forward_write(
        &self,
        action: SyncAction,
        instance: &ServiceInstance,
    ) -> Result<ForwardedResponse>;

    async fn forward_discovery(&self, service_name: &str) -> Result<ForwardedResponse>;

    /// Schedule an out-of-cycle health check of the master.
    fn request_master_check(&self);
}

/// A node without peers: always master, nothing to replicate.
#[derive(Debug, Default, Clone, Copy)]
pub struct Standalone;

#[async_trait]
impl ClusterRoute for Standalone {
    fn is_master(&self) -> bool {
        true
    }

    fn replicate(&self, _action: SyncAction, _instance: &ServiceInstance) {}

    async fn forward_write(
        &self,
        _action: SyncAction,
        _instance: &ServiceInstance,
    ) -> Result<ForwardedResponse> {
        Err(Error::Internal("standalone node has no master to forward to".into()))
    }

    async fn forward_discovery(&self, _service_name: &str) -> Result<ForwardedResponse> {
        Err(Error::Internal("standalone node has no master to forward to".into()))
    }

    fn request_master_check(&self) {}
}

pub struct RegistryService {
    store: Arc<InstanceStore>,
    route: Arc<dyn ClusterRoute>,
    metrics: Arc<RegistryMetrics>,
    grace_period: Duration,
}

impl RegistryService {
    pub fn new(
        store: Arc<InstanceStore>,
        route: Arc<dyn ClusterRoute>,
        metrics: Arc<RegistryMetrics>,
    ) -> Self {
        Self {
            store,
            route,
            metrics,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Single-node service over a fresh store.
    pub fn standalone() -> Self {
        Self::new(
            Arc::new(InstanceStore::new()),
            Arc::new(Standalone),
            Arc::new(RegistryMetrics::new()),
        )
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn store(&self) -> &Arc<InstanceStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<RegistryMetrics> {
        &self.metrics
    }

    pub fn is_master(&self) -> bool {
        self.route.is_master()
    }

    pub async fn register(&self, instance: ServiceInstance) -> Result<Routed<RegisterOutcome>> {
        if instance.is_heartbeat_shaped() {
            instance.validate_id()?;
        } else {
            instance.validate_for_register()?;
        }

        if !self.route.is_master() {
            return self
                .forward(SyncAction::Register, &instance)
                .await
                .map(Routed::Forwarded);
        }

        let outcome = self.store.register(instance)?;
        match &outcome {
            RegisterOutcome::Registered(ins) => {
                tracing::info!(
                    "Registered {} ({}) at {}:{}",
                    ins.service_id,
                    ins.service_name,
                    ins.ip_address,
                    ins.port
                );
                self.metrics.registrations.inc();
            }
            RegisterOutcome::Refreshed(ins) => {
                tracing::debug!("Register refreshed heartbeat of {}", ins.service_id);
                self.metrics.heartbeats.inc();
            }
        }
        self.route.replicate(SyncAction::Register, outcome.instance());
        Ok(Routed::Local(outcome))
    }

    pub async fn heartbeat(&self, claim: IdentityClaim) -> Result<Routed<ServiceInstance>> {
        validate_claim(&claim)?;

        if !self.route.is_master() {
            return self
                .forward(SyncAction::Heartbeat, &claim_body(&claim))
                .await
                .map(Routed::Forwarded);
        }

        let updated = self.store.heartbeat(&claim)?;
        tracing::debug!("Heartbeat from {}", updated.service_id);
        self.metrics.heartbeats.inc();
        self.route.replicate(SyncAction::Heartbeat, &updated);
        Ok(Routed::Local(updated))
    }

    pub async fn unregister(&self, claim: IdentityClaim) -> Result<Routed<ServiceInstance>> {
        validate_claim(&claim)?;

        if !self.route.is_master() {
            return self
                .forward(SyncAction::Unregister, &claim_body(&claim))
                .await
                .map(Routed::Forwarded);
        }

        let removed = self.store.unregister(&claim)?;
        tracing::info!(
            "Unregistered {} ({}) at {}:{}",
            removed.service_id,
            removed.service_name,
            removed.ip_address,
            removed.port
        );
        self.metrics.unregistrations.inc();
        self.route.replicate(SyncAction::Unregister, &removed);
        Ok(Routed::Local(removed))
    }

    /// All instances for an empty name, one round-robin pick otherwise.
    pub async fn discover(&self, service_name: &str) -> Result<Routed<Vec<ServiceInstance>>> {
        for attempt in 1..=DISCOVERY_ATTEMPTS {
            if self.route.is_master() {
                return self.discover_local(service_name);
            }

            self.metrics.forwarded_requests.inc();
            match self.route.forward_discovery(service_name).await {
                Ok(response) => return Ok(Routed::Forwarded(response)),
                Err(e) => {
                    self.metrics.forward_failures.inc();
                    tracing::warn!(
                        "Discovery forward failed (attempt {}/{}): {}",
                        attempt,
                        DISCOVERY_ATTEMPTS,
                        e
                    );
                    self.route.request_master_check();
                    tokio::time::sleep(self.grace_period).await;
                }
            }
        }

        if self.route.is_master() {
            return self.discover_local(service_name);
        }
        Err(Error::Unavailable("no reachable master".into()))
    }

    /// Remove an instance that is still expired and replicate the removal. Master only.
    pub fn evict(&self, instance: &ServiceInstance, timeout_secs: u64) -> bool {
        if !self.route.is_master() {
            return false;
        }
        match self
            .store
            .remove_if_expired(&instance.service_id, timestamp_now(), timeout_secs)
        {
            Some(removed) => {
                self.metrics.expired_instances.inc();
                self.route.replicate(SyncAction::Unregister, &removed);
                true
            }
            None => false,
        }
    }

    fn discover_local(&self, service_name: &str) -> Result<Routed<Vec<ServiceInstance>>> {
        let found = self.store.discover(service_name)?;
        self.metrics.discoveries.inc();
        Ok(Routed::Local(found))
    }

    async fn forward(
        &self,
        action: SyncAction,
        instance: &ServiceInstance,
    ) -> Result<ForwardedResponse> {
        self.metrics.forwarded_requests.inc();
        match self.route.forward_write(action, instance).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.metrics.forward_failures.inc();
                tracing::warn!("Forwarding {:?} for {} failed: {}", action, instance.service_id, e);
                self.route.request_master_check();
                Err(Error::Unavailable(format!("master unreachable: {}", e)))
            }
        }
    }
}

fn validate_claim(claim: &IdentityClaim) -> Result<()> {
    if claim.service_id.is_empty() {
        return Err(Error::Validation("serviceId is required".into()));
    }
    Ok(())
}

fn claim_body(claim: &IdentityClaim) -> ServiceInstance {
    ServiceInstance::new(
        claim.service_name.clone(),
        claim.service_id.clone(),
        claim.ip_address.clone(),
        claim.port,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Slave route whose master is down; records what the service asked of it.
    #[derive(Default)]
    struct DownMaster {
        promote_on_check: bool,
        master: AtomicBool,
        checks: AtomicUsize,
        forwards: AtomicUsize,
        replicated: Mutex<Vec<SyncAction>>,
    }

    #[async_trait]
    impl ClusterRoute for DownMaster {
        fn is_master(&self) -> bool {
            self.master.load(Ordering::SeqCst)
        }

        fn replicate(&self, action: SyncAction, _instance: &ServiceInstance) {
            self.replicated.lock().unwrap().push(action);
        }

        async fn forward_write(
            &self,
            _action: SyncAction,
            _instance: &ServiceInstance,
        ) -> Result<ForwardedResponse> {
            self.forwards.fetch_add(1, Ordering::SeqCst);
            Err(Error::Peer {
                peer: "http://master".into(),
                reason: "connection refused".into(),
            })
        }

        async fn forward_discovery(&self, _service_name: &str) -> Result<ForwardedResponse> {
            self.forwards.fetch_add(1, Ordering::SeqCst);
            Err(Error::Peer {
                peer: "http://master".into(),
                reason: "connection refused".into(),
            })
        }

        fn request_master_check(&self) {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if self.promote_on_check {
                self.master.store(true, Ordering::SeqCst);
            }
        }
    }

    fn service(route: Arc<DownMaster>) -> RegistryService {
        RegistryService::new(
            Arc::new(InstanceStore::new()),
            route,
            Arc::new(RegistryMetrics::new()),
        )
        .with_grace_period(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_standalone_register_and_discover() {
        let service = RegistryService::standalone();
        let outcome = service
            .register(ServiceInstance::new("svc", "s1", "10.0.0.1", 9000))
            .await
            .unwrap();
        assert!(matches!(outcome, Routed::Local(RegisterOutcome::Registered(_))));

        match service.discover("svc").await.unwrap() {
            Routed::Local(found) => assert_eq!(found[0].service_id, "s1"),
            Routed::Forwarded(_) => panic!("standalone never forwards"),
        }
        assert_eq!(service.metrics().registrations.get(), 1);
    }

    #[tokio::test]
    async fn test_validation_happens_before_forwarding() {
        let route = Arc::new(DownMaster::default());
        let service = service(route.clone());

        let err = service
            .register(ServiceInstance::new("svc", "s1", "10.0.0.1", 70000))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(route.forwards.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_forward_failure_is_unavailable_and_rechecks() {
        let route = Arc::new(DownMaster::default());
        let service = service(route.clone());

        let err = service
            .register(ServiceInstance::new("svc", "s1", "10.0.0.1", 9000))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
        assert_eq!(route.checks.load(Ordering::SeqCst), 1);
        assert!(service.store().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_gives_up_after_bounded_attempts() {
        let route = Arc::new(DownMaster::default());
        let service = service(route.clone());

        let err = service.discover("svc").await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
        assert_eq!(route.forwards.load(Ordering::SeqCst), DISCOVERY_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_discovery_served_locally_after_promotion() {
        let route = Arc::new(DownMaster {
            promote_on_check: true,
            ..Default::default()
        });
        let service = service(route.clone());

        let err = service.discover("svc").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(route.forwards.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_master_replicates_each_write() {
        let route = Arc::new(DownMaster::default());
        route.master.store(true, Ordering::SeqCst);
        let service = service(route.clone());

        let ins = ServiceInstance::new("svc", "s1", "10.0.0.1", 9000);
        service.register(ins.clone()).await.unwrap();
        service.heartbeat(ins.claim()).await.unwrap();
        service.unregister(ins.claim()).await.unwrap();

        assert_eq!(
            *route.replicated.lock().unwrap(),
            vec![
                SyncAction::Register,
                SyncAction::Heartbeat,
                SyncAction::Unregister
            ]
        );
    }

    #[tokio::test]
    async fn test_evict_replicates_unregister() {
        let route = Arc::new(DownMaster::default());
        let service = service(route.clone());

        let mut stale = ServiceInstance::new("svc", "s1", "10.0.0.1", 9000);
        stale.registered_at = timestamp_now() - 120;
        stale.last_heartbeat = timestamp_now() - 120;
        service.store().merge_from_sync(stale.clone()).unwrap();

        // Slaves never evict.
        assert!(!service.evict(&stale, 60));
        assert!(service.store().get("s1").is_some());

        route.master.store(true, Ordering::SeqCst);
        assert!(service.evict(&stale, 60));
        assert!(service.store().is_empty());
        assert_eq!(service.metrics().expired_instances.get(), 1);
        assert_eq!(
            *route.replicated.lock().unwrap(),
            vec![SyncAction::Unregister]
        );

        // Nothing left to remove, nothing replicated.
        assert!(!service.evict(&stale, 60));
        assert_eq!(route.replicated.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_sync_action_wire_form() {
        let req = SyncRequest {
            action: SyncAction::Heartbeat,
            instance: ServiceInstance::new("svc", "s1", "10.0.0.1", 9000),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["action"], "heartbeat");
        assert!(serde_json::from_str::<SyncRequest>(r#"{"action":"explode","instance":{}}"#)
            .is_err());
    }
}
