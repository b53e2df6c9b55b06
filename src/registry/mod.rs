//! Service registry: instance model, in-memory table, role-aware operations, expiry

pub mod expiry;
pub mod instance;
pub mod service;
pub mod store;

pub use expiry::ExpirySweeper;
pub use instance::{IdentityClaim, InstanceView, ServiceInstance};
pub use service::{
    ClusterRoute, ForwardedResponse, RegistryService, Routed, Standalone, SyncAction,
    SyncRequest,
};
pub use store::{InstanceStore, RegisterOutcome};
