//! Registry node: HTTP surface and process wiring

pub mod http;
pub mod models;
pub mod server;

pub use server::{NodeHandle, RegistryNode};
