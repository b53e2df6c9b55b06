//! # minireg
//!
//! A replicated service registry:
//! - Services register, heartbeat and unregister instances over HTTP
//! - Discovery hands out instances round-robin per service name
//! - One master takes all writes and replicates them to the other nodes
//! - Slaves forward writes and reads to the master and fail over when it goes silent
//! - Instances that stop heartbeating are expired by the master
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!        clients (register / heartbeat / discovery)
//!                 │
//!   ┌─────────────┼──────────────────────────┐
//!   │             │                          │
//! ┌─▼──────────┐ sync  ┌────────────┐ sync ┌─▼──────────┐
//! │ registry-1 ├──────►│ registry-2 │◄─────┤ registry-3 │
//! │  (master)  │       │  (slave)   │      │  (slave)   │
//! └─────▲──────┘       └─────┬──────┘      └─────┬──────┘
//!       │        forward     │     forward       │
//!       └────────────────────┴───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a node
//! ```bash
//! minireg-node serve \
//!   --config ./registry.yaml \
//!   --port 8180 \
//!   --node-addr http://registry-1:8180 \
//!   --cluster http://registry-1:8180,http://registry-2:8181
//! ```
//!
//! ### Use the CLI
//! ```bash
//! minireg register --name orders --id orders-1 --ip 10.0.0.5 --port 9000
//! minireg heartbeat --name orders --id orders-1 --ip 10.0.0.5 --port 9000
//! minireg discover --name orders
//! minireg health
//! ```

pub mod cluster;
pub mod common;
pub mod node;
pub mod registry;

// Re-export commonly used types
pub use cluster::{ClusterCoordinator, ClusterEvent, Role};
pub use common::{Config, Error, Result};
pub use node::{NodeHandle, RegistryNode};
pub use registry::{InstanceStore, RegistryService, ServiceInstance};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
