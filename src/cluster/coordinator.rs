//! Master discovery, health checking and failover
//!
//! There is no consensus here: each node decides on its own who the master is, using the
//! shared candidate order as a tie-breaker. The master pointer lives behind a short-lived
//! lock that is never held across a network call; failovers are serialized by an async
//! mutex so concurrent triggers (health loop, failed forwards) do not race each other.

use crate::cluster::client::PeerClient;
use crate::cluster::membership::Membership;
use crate::cluster::ReplicaStore;
use crate::common::config::RegistryConfig;
use crate::common::metrics::RegistryMetrics;
use crate::common::{Error, Result};
use crate::registry::instance::ServiceInstance;
use crate::registry::service::{ClusterRoute, ForwardedResponse, SyncAction, SyncRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Node role as seen locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initializing,
    Slave,
    Master,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Initializing => "initializing",
            Role::Slave => "slave",
            Role::Master => "master",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    BecameMaster,
    MasterChanged(String),
}

/// Health check period and per-call timeouts.
#[derive(Debug, Clone)]
pub struct ClusterTiming {
    pub check_interval: Duration,
    pub probe_timeout: Duration,
    pub forward_timeout: Duration,
    pub discovery_timeout: Duration,
    pub replicate_timeout: Duration,
    pub sync_timeout: Duration,
    /// Settle time before a freshly started slave pulls state from its master.
    pub sync_delay: Duration,
}

impl Default for ClusterTiming {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(3),
            forward_timeout: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(3),
            replicate_timeout: Duration::from_secs(5),
            sync_timeout: Duration::from_secs(10),
            sync_delay: Duration::from_secs(1),
        }
    }
}

impl ClusterTiming {
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            check_interval: config.cluster_check_interval(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct MasterState {
    master: Option<String>,
    started: bool,
}

pub struct ClusterCoordinator {
    me: Weak<ClusterCoordinator>,
    membership: Membership,
    client: PeerClient,
    store: Arc<dyn ReplicaStore>,
    metrics: Arc<RegistryMetrics>,
    timing: ClusterTiming,
    state: RwLock<MasterState>,
    failover_lock: Mutex<()>,
    events: broadcast::Sender<ClusterEvent>,
}

impl ClusterCoordinator {
    pub fn new(
        membership: Membership,
        store: Arc<dyn ReplicaStore>,
        metrics: Arc<RegistryMetrics>,
        timing: ClusterTiming,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        let client = PeerClient::new(&timing);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            membership,
            client,
            store,
            metrics,
            timing,
            state: RwLock::new(MasterState::default()),
            failover_lock: Mutex::new(()),
            events,
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, MasterState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, MasterState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn self_addr(&self) -> &str {
        self.membership.self_addr()
    }

    pub fn current_master(&self) -> Option<String> {
        self.read_state().master.clone()
    }

    pub fn role(&self) -> Role {
        let state = self.read_state();
        if !state.started {
            return Role::Initializing;
        }
        match &state.master {
            Some(master) if self.membership.is_self(master) => Role::Master,
            _ => Role::Slave,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    /// Resolve the initial master and start the health loop.
    ///
    /// The local HTTP listener must already be serving, since this node probes itself.
    pub async fn start(&self) -> JoinHandle<()> {
        if !self.membership.contains_self() {
            warn!(
                "{} is not in the cluster list, it can never become master",
                self.self_addr()
            );
        }

        let master = self.resolve_initial_master().await;
        {
            let mut state = self.write_state();
            state.master = Some(master.clone());
            state.started = true;
        }

        if self.membership.is_self(&master) {
            info!("{} starts as master", self.self_addr());
            let _ = self.events.send(ClusterEvent::BecameMaster);
        } else {
            info!("{} starts as slave of {}", self.self_addr(), master);
            let _ = self.events.send(ClusterEvent::MasterChanged(master.clone()));
            self.spawn_full_sync(master, self.timing.sync_delay);
        }

        self.spawn_health_loop()
    }

    async fn resolve_initial_master(&self) -> String {
        for peer in self.membership.peers() {
            if self.client.probe(&peer).await {
                info!("Found healthy node {}, adopting it as master", peer);
                return peer;
            }
        }

        if self.client.probe(self.self_addr()).await {
            return self.self_addr().to_string();
        }

        let fallback = self.membership.fallback_master().to_string();
        warn!("No candidate answered, falling back to {}", fallback);
        fallback
    }

    fn spawn_health_loop(&self) -> JoinHandle<()> {
        let me = self.me.clone();
        let period = self.timing.check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(this) = me.upgrade() else {
                    break;
                };
                this.check_master().await;
            }
        })
    }

    /// Probe the master and fail over if it is down. A master does nothing.
    pub async fn check_master(&self) {
        let master = {
            let state = self.read_state();
            if !state.started {
                return;
            }
            state.master.clone()
        };

        match master {
            Some(master) if self.membership.is_self(&master) => {}
            Some(master) => {
                if !self.client.probe(&master).await {
                    warn!("Master {} failed its health check", master);
                    self.failover(Some(master)).await;
                }
            }
            None => {
                debug!("Master unresolved, retrying failover");
                self.failover(None).await;
            }
        }
    }

    /// Pick a new master after `failed` went down (`None`: no master known).
    pub async fn failover(&self, failed: Option<String>) {
        let _guard = self.failover_lock.lock().await;

        if self.current_master() != failed {
            debug!("Master already moved away from {:?}", failed);
            return;
        }

        let failed_addr = failed.as_deref().unwrap_or("");
        for candidate in self.membership.failover_order(failed_addr) {
            if self.membership.is_self(&candidate) {
                self.promote(failed.as_deref());
                return;
            }
            if self.client.probe(&candidate).await {
                self.follow(candidate);
                return;
            }
            debug!("Candidate {} is not healthy", candidate);
        }

        warn!("No healthy master candidate, master is unresolved");
        self.write_state().master = None;
    }

    fn promote(&self, previous: Option<&str>) {
        self.write_state().master = Some(self.self_addr().to_string());
        self.metrics.failovers.inc();
        info!(
            "{} became master (previous: {})",
            self.self_addr(),
            previous.unwrap_or("none")
        );
        let _ = self.events.send(ClusterEvent::BecameMaster);

        // Catch up on round-robin positions if the old master still answers.
        if let Some(previous) = previous {
            let me = self.me.clone();
            let previous = previous.to_string();
            tokio::spawn(async move {
                let Some(this) = me.upgrade() else {
                    return;
                };
                if this.client.probe(&previous).await {
                    this.pull_load_balance(&previous).await;
                }
            });
        }
    }

    fn follow(&self, master: String) {
        self.write_state().master = Some(master.clone());
        self.metrics.failovers.inc();
        info!("{} now follows master {}", self.self_addr(), master);
        let _ = self.events.send(ClusterEvent::MasterChanged(master.clone()));
        self.spawn_full_sync(master, Duration::ZERO);
    }

    fn spawn_full_sync(&self, master: String, delay: Duration) {
        let me = self.me.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(this) = me.upgrade() {
                this.full_sync(&master).await;
            }
        });
    }

    /// Pull every instance and the round-robin cursors from `master`.
    pub async fn full_sync(&self, master: &str) {
        match self.client.fetch_instances(master).await {
            Ok(instances) => {
                let total = instances.len();
                let merged = self.absorb_snapshot(instances);
                info!("Synced {}/{} instances from {}", merged, total, master);
            }
            Err(e) => warn!("Full sync from {} failed: {}", master, e),
        }
        self.pull_load_balance(master).await;
    }

    /// Merge a pulled instance list, skipping records without valid timestamps.
    fn absorb_snapshot(&self, instances: Vec<ServiceInstance>) -> usize {
        let mut merged = 0;
        for instance in instances {
            if instance.registered_at <= 0 || instance.last_heartbeat <= 0 {
                warn!(
                    "Skipping synced instance {} with invalid timestamps (registered {}, heartbeat {})",
                    instance.service_id, instance.registered_at, instance.last_heartbeat
                );
                continue;
            }
            let id = instance.service_id.clone();
            match self.store.merge_from_sync(instance) {
                Ok(()) => merged += 1,
                Err(e) => warn!("Skipping synced instance {}: {}", id, e),
            }
        }
        merged
    }

    async fn pull_load_balance(&self, master: &str) {
        match self.client.fetch_load_balance(master).await {
            Ok(state) => {
                let applied = self.store.import_load_balance_state(&state);
                info!("Imported {} round-robin cursors from {}", applied, master);
            }
            Err(e) => warn!("Load balance sync from {} failed: {}", master, e),
        }
    }

    /// Apply a write pushed by the master.
    pub fn handle_sync(&self, request: SyncRequest) -> Result<()> {
        if self.role() == Role::Master {
            return Err(Error::Internal(format!(
                "{} is master and does not accept pushed syncs",
                self.self_addr()
            )));
        }

        let SyncRequest { action, instance } = request;
        debug!("Applying synced {:?} of {}", action, instance.service_id);
        match action {
            SyncAction::Register => self.store.merge_from_sync(instance),
            SyncAction::Unregister => {
                if self.store.remove_replica(&instance.service_id) {
                    Ok(())
                } else {
                    Err(Error::NotFound(format!("serviceId {}", instance.service_id)))
                }
            }
            SyncAction::Heartbeat => {
                if self.store.touch_replica(
                    &instance.service_id,
                    instance.last_heartbeat,
                    &instance.last_heartbeat_gmt_time,
                ) {
                    Ok(())
                } else {
                    Err(Error::NotFound(format!("serviceId {}", instance.service_id)))
                }
            }
        }
    }

    /// Round-robin cursors, only served by the master.
    pub fn load_balance_state(&self) -> Result<HashMap<String, usize>> {
        if self.role() != Role::Master {
            let master = self
                .current_master()
                .unwrap_or_else(|| "unresolved".to_string());
            return Err(Error::NotMaster(master));
        }
        Ok(self.store.export_load_balance_state())
    }

    fn master_or_unavailable(&self) -> Result<String> {
        self.current_master()
            .ok_or_else(|| Error::Unavailable("master is unresolved".into()))
    }
}

#[async_trait]
impl ClusterRoute for ClusterCoordinator {
    fn is_master(&self) -> bool {
        self.role() == Role::Master
    }

    fn replicate(&self, action: SyncAction, instance: &ServiceInstance) {
        let request = SyncRequest {
            action,
            instance: instance.clone(),
        };
        for peer in self.membership.peers() {
            let client = self.client.clone();
            let metrics = self.metrics.clone();
            let request = request.clone();
            tokio::spawn(async move {
                if let Err(e) = client.push_sync(&peer, &request).await {
                    metrics.replication_failures.inc();
                    warn!(
                        "Replicating {:?} of {} to {} failed: {}",
                        request.action, request.instance.service_id, peer, e
                    );
                }
            });
        }
    }

    async fn forward_write(
        &self,
        action: SyncAction,
        instance: &ServiceInstance,
    ) -> Result<ForwardedResponse> {
        let master = self.master_or_unavailable()?;
        debug!("Forwarding {:?} of {} to {}", action, instance.service_id, master);
        self.client.forward_write(&master, action, instance).await
    }

    async fn forward_discovery(&self, service_name: &str) -> Result<ForwardedResponse> {
        let master = self.master_or_unavailable()?;
        self.client.forward_discovery(&master, service_name).await
    }

    fn request_master_check(&self) {
        let me = self.me.clone();
        tokio::spawn(async move {
            if let Some(this) = me.upgrade() {
                this.check_master().await;
            }
        });
    }
}
