//! Registry and cluster counters, rendered in Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonically increasing counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters shared by the write path, the coordinator and the expiry sweeper.
#[derive(Debug)]
pub struct RegistryMetrics {
    pub registrations: Counter,
    pub heartbeats: Counter,
    pub unregistrations: Counter,
    pub discoveries: Counter,
    pub expired_instances: Counter,
    pub forwarded_requests: Counter,
    pub forward_failures: Counter,
    pub replication_failures: Counter,
    pub failovers: Counter,
    started_at: Instant,
}

impl Default for RegistryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self {
            registrations: Counter::new(),
            heartbeats: Counter::new(),
            unregistrations: Counter::new(),
            discoveries: Counter::new(),
            expired_instances: Counter::new(),
            forwarded_requests: Counter::new(),
            forward_failures: Counter::new(),
            replication_failures: Counter::new(),
            failovers: Counter::new(),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Render all counters plus the gauges supplied by the caller.
    pub fn to_prometheus(&self, is_master: bool, instances: usize) -> String {
        let counters: [(&str, &str, &Counter); 9] = [
            (
                "minireg_registrations_total",
                "Successful local registrations",
                &self.registrations,
            ),
            (
                "minireg_heartbeats_total",
                "Successful local heartbeats",
                &self.heartbeats,
            ),
            (
                "minireg_unregistrations_total",
                "Successful local unregistrations",
                &self.unregistrations,
            ),
            (
                "minireg_discoveries_total",
                "Discovery requests served locally",
                &self.discoveries,
            ),
            (
                "minireg_expired_instances_total",
                "Instances removed by the expiry sweep",
                &self.expired_instances,
            ),
            (
                "minireg_forwarded_requests_total",
                "Requests forwarded to the master",
                &self.forwarded_requests,
            ),
            (
                "minireg_forward_failures_total",
                "Forwarded requests that failed to reach the master",
                &self.forward_failures,
            ),
            (
                "minireg_replication_failures_total",
                "Replication pushes that failed",
                &self.replication_failures,
            ),
            (
                "minireg_failovers_total",
                "Master changes decided by this node",
                &self.failovers,
            ),
        ];

        let mut out = String::new();
        for (name, help, counter) in counters {
            out += &format!("# HELP {} {}\n", name, help);
            out += &format!("# TYPE {} counter\n", name);
            out += &format!("{} {}\n", name, counter.get());
        }

        out += "# HELP minireg_instances Registered instances held by this node\n";
        out += "# TYPE minireg_instances gauge\n";
        out += &format!("minireg_instances {}\n", instances);
        out += "# HELP minireg_is_master Whether this node is currently master\n";
        out += "# TYPE minireg_is_master gauge\n";
        out += &format!("minireg_is_master {}\n", u8::from(is_master));
        out += "# HELP minireg_uptime_seconds Node uptime\n";
        out += "# TYPE minireg_uptime_seconds gauge\n";
        out += &format!("minireg_uptime_seconds {}\n", self.uptime_seconds());
        out
    }
}
