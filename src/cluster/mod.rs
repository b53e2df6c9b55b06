//! Cluster coordination: membership, peer client, master election and replication

pub mod client;
pub mod coordinator;
pub mod membership;

pub use client::PeerClient;
pub use coordinator::{ClusterCoordinator, ClusterEvent, ClusterTiming, Role};
pub use membership::Membership;

use crate::common::Result;
use crate::registry::instance::ServiceInstance;
use std::collections::HashMap;

/// Local table operations the coordinator needs when absorbing master state.
pub trait ReplicaStore: Send + Sync {
    fn merge_from_sync(&self, instance: ServiceInstance) -> Result<()>;

    fn remove_replica(&self, service_id: &str) -> bool;

    fn touch_replica(&self, service_id: &str, last_heartbeat: i64, readable: &str) -> bool;

    fn export_load_balance_state(&self) -> HashMap<String, usize>;

    fn import_load_balance_state(&self, state: &HashMap<String, i64>) -> usize;
}
