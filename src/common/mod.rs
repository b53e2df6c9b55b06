//! Common utilities and types shared across minireg

pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, HeartbeatConfig, RegistryConfig};
pub use error::{Error, Result};
pub use metrics::RegistryMetrics;
pub use utils::{format_timestamp, timestamp_now};
