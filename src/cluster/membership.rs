//! Static cluster membership
//!
//! Every node is configured with the same ordered candidate list. The order is the
//! master priority: startup probes peers front to back, and failover walks the list
//! starting right after the failed master.

use crate::common::config::{normalize_addr, RegistryConfig};

#[derive(Debug, Clone)]
pub struct Membership {
    self_addr: String,
    candidates: Vec<String>,
    fallback_master: String,
}

impl Membership {
    pub fn new(
        self_addr: &str,
        candidates: impl IntoIterator<Item = impl AsRef<str>>,
        fallback_master: &str,
    ) -> Self {
        Self {
            self_addr: normalize_addr(self_addr),
            candidates: candidates
                .into_iter()
                .map(|c| normalize_addr(c.as_ref()))
                .collect(),
            fallback_master: normalize_addr(fallback_master),
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(
            &config.self_addr(),
            config.candidates(),
            &config.fallback_master(),
        )
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn fallback_master(&self) -> &str {
        &self.fallback_master
    }

    pub fn is_self(&self, addr: &str) -> bool {
        normalize_addr(addr) == self.self_addr
    }

    pub fn contains_self(&self) -> bool {
        self.candidates.iter().any(|c| *c == self.self_addr)
    }

    /// Every candidate except this node, in priority order.
    pub fn peers(&self) -> Vec<String> {
        self.candidates
            .iter()
            .filter(|c| **c != self.self_addr)
            .cloned()
            .collect()
    }

    /// Candidates to try after `failed`, wrapping around and never including `failed`.
    /// An address outside the list (or an empty one) scans from the top.
    pub fn failover_order(&self, failed: &str) -> Vec<String> {
        let failed = normalize_addr(failed);
        let start = self
            .candidates
            .iter()
            .position(|c| *c == failed)
            .map(|i| i + 1)
            .unwrap_or(0);

        let n = self.candidates.len();
        (0..n)
            .map(|offset| &self.candidates[(start + offset) % n])
            .filter(|c| **c != failed)
            .cloned()
            .collect()
    }
}
