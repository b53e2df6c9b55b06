//! In-memory instance table
//!
//! Holds every registered instance grouped by service name (insertion order is the
//! round-robin order), the per-service round-robin cursors, and two indexes
//! (service id → service name, ip:port → service id) used for uniqueness checks.
//! One `RwLock` guards all of it, so a reader always sees a consistent snapshot and
//! writers are totally ordered.
//!
//! The store knows nothing about cluster roles: routing a write to the master and
//! replicating it afterwards is the job of [`crate::registry::RegistryService`].

use crate::cluster::ReplicaStore;
use crate::common::utils::{format_timestamp, now_stamp, timestamp_now};
use crate::common::{Error, Result};
use crate::registry::instance::{IdentityClaim, ServiceInstance};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Result of a successful [`InstanceStore::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A new instance was added.
    Registered(ServiceInstance),
    /// The service id already existed with the same identity; only the heartbeat moved.
    Refreshed(ServiceInstance),
}

impl RegisterOutcome {
    pub fn instance(&self) -> &ServiceInstance {
        match self {
            RegisterOutcome::Registered(ins) | RegisterOutcome::Refreshed(ins) => ins,
        }
    }

}

#[derive(Debug, Default)]
struct Table {
    services: BTreeMap<String, Vec<ServiceInstance>>,
    cursors: HashMap<String, usize>,
    by_id: HashMap<String, String>,
    by_endpoint: HashMap<(String, u32), String>,
}

impl Table {
    fn position(&self, service_id: &str) -> Option<(&str, usize)> {
        let name = self.by_id.get(service_id)?;
        let idx = self
            .services
            .get(name)?
            .iter()
            .position(|i| i.service_id == service_id)?;
        Some((name.as_str(), idx))
    }

    fn get(&self, service_id: &str) -> Option<&ServiceInstance> {
        let (name, idx) = self.position(service_id)?;
        self.services.get(name).map(|list| &list[idx])
    }

    fn get_mut(&mut self, service_id: &str) -> Option<&mut ServiceInstance> {
        let (name, idx) = self.position(service_id)?;
        let name = name.to_string();
        self.services.get_mut(&name).map(|list| &mut list[idx])
    }

    fn insert(&mut self, ins: ServiceInstance) {
        self.by_id
            .insert(ins.service_id.clone(), ins.service_name.clone());
        self.by_endpoint
            .insert(ins.endpoint(), ins.service_id.clone());
        self.services
            .entry(ins.service_name.clone())
            .or_default()
            .push(ins);
    }

    fn remove(&mut self, service_id: &str) -> Option<ServiceInstance> {
        let (name, idx) = self.position(service_id)?;
        let name = name.to_string();
        let list = self.services.get_mut(&name)?;
        let removed = list.remove(idx);

        if list.is_empty() {
            self.services.remove(&name);
            self.cursors.remove(&name);
        } else {
            self.cursors.insert(name, 0);
        }

        self.by_id.remove(service_id);
        let endpoint = removed.endpoint();
        if self.by_endpoint.get(&endpoint).map(String::as_str) == Some(service_id) {
            self.by_endpoint.remove(&endpoint);
        }
        Some(removed)
    }

    /// Replace an instance in place when its service name is unchanged, so the
    /// round-robin order survives; otherwise move it to the new service.
    fn upsert(&mut self, ins: ServiceInstance) {
        let same_service = self
            .by_id
            .get(&ins.service_id)
            .is_some_and(|name| *name == ins.service_name);

        if !same_service {
            self.remove(&ins.service_id);
            self.insert(ins);
            return;
        }

        let endpoint = ins.endpoint();
        let service_id = ins.service_id.clone();
        if let Some(slot) = self.get_mut(&service_id) {
            let old_endpoint = slot.endpoint();
            *slot = ins;
            if old_endpoint != endpoint {
                self.by_endpoint.remove(&old_endpoint);
            }
            self.by_endpoint.insert(endpoint, service_id);
        }
    }

    fn len(&self) -> usize {
        self.services.values().map(Vec::len).sum()
    }
}

/// Concurrency-safe registry table with round-robin selection.
#[derive(Debug, Default)]
pub struct InstanceStore {
    table: RwLock<Table>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every mutation completes before its guard drops, so a poisoned lock still
    // guards a consistent table.
    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an instance, or refresh its heartbeat when the service id is already
    /// known with the same identity (or the call carries no identity at all).
    pub fn register(&self, ins: ServiceInstance) -> Result<RegisterOutcome> {
        ins.validate_id()?;
        let mut table = self.write();

        if let Some(existing) = table.get_mut(&ins.service_id) {
            if ins.is_heartbeat_shaped() || ins.same_identity(existing) {
                // A client-supplied heartbeat may not run ahead of this node's clock
                // nor move the stored one backwards.
                let now = timestamp_now();
                let secs = if ins.last_heartbeat > 0 {
                    ins.last_heartbeat.min(now).max(existing.last_heartbeat)
                } else {
                    now.max(existing.last_heartbeat)
                };
                existing.set_heartbeat(secs, &format_timestamp(secs));
                return Ok(RegisterOutcome::Refreshed(existing.clone()));
            }
            return Err(Error::Conflict {
                service_id: ins.service_id,
                reason: "serviceId is already registered with a different identity".into(),
            });
        }

        ins.validate_for_register()?;

        if let Some(owner) = table.by_endpoint.get(&ins.endpoint()) {
            return Err(Error::Conflict {
                service_id: ins.service_id.clone(),
                reason: format!(
                    "{}:{} is already used by serviceId {}",
                    ins.ip_address, ins.port, owner
                ),
            });
        }

        let mut ins = ins;
        let (secs, readable) = now_stamp();
        ins.set_registered(secs, &readable);
        ins.set_heartbeat(secs, &readable);
        table.insert(ins.clone());
        tracing::debug!(
            "Registered {} ({}) at {}:{}",
            ins.service_id,
            ins.service_name,
            ins.ip_address,
            ins.port
        );
        Ok(RegisterOutcome::Registered(ins))
    }

    /// Bump the heartbeat of an instance whose identity matches the claim.
    pub fn heartbeat(&self, claim: &IdentityClaim) -> Result<ServiceInstance> {
        let mut table = self.write();
        let existing = table
            .get_mut(&claim.service_id)
            .ok_or_else(|| Error::NotFound(format!("serviceId {}", claim.service_id)))?;
        existing.check_claim(claim)?;

        let (secs, readable) = now_stamp();
        existing.set_heartbeat(secs, &readable);
        Ok(existing.clone())
    }

    /// Remove an instance whose identity matches the claim.
    pub fn unregister(&self, claim: &IdentityClaim) -> Result<ServiceInstance> {
        let mut table = self.write();
        table
            .get(&claim.service_id)
            .ok_or_else(|| Error::NotFound(format!("serviceId {}", claim.service_id)))?
            .check_claim(claim)?;

        table
            .remove(&claim.service_id)
            .ok_or_else(|| Error::Internal(format!("failed to remove {}", claim.service_id)))
    }

    /// Remove an instance without an identity check.
    pub fn remove(&self, service_id: &str) -> Option<ServiceInstance> {
        self.write().remove(service_id)
    }

    /// Remove an instance only if it is still expired at `now`, checked under the write
    /// lock so a heartbeat that arrived after the expiry scan keeps it alive.
    pub fn remove_if_expired(
        &self,
        service_id: &str,
        now: i64,
        timeout_secs: u64,
    ) -> Option<ServiceInstance> {
        let timeout = i64::try_from(timeout_secs).unwrap_or(i64::MAX);
        let mut table = self.write();
        let last_heartbeat = table.get(service_id)?.last_heartbeat;
        if last_heartbeat <= 0 || now - last_heartbeat <= timeout {
            return None;
        }
        table.remove(service_id)
    }

    pub fn get(&self, service_id: &str) -> Option<ServiceInstance> {
        self.read().get(service_id).cloned()
    }

    /// Every instance when `service_name` is empty, otherwise the next instance of
    /// that service in round-robin order.
    pub fn discover(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        if service_name.is_empty() {
            return Ok(self.all());
        }

        let mut table = self.write();
        let len = match table.services.get(service_name) {
            Some(list) if !list.is_empty() => list.len(),
            _ => return Err(Error::NotFound(format!("service {}", service_name))),
        };

        let cursor = table.cursors.entry(service_name.to_string()).or_insert(0);
        let idx = *cursor % len;
        *cursor = (idx + 1) % len;

        let selected = table.services[service_name][idx].clone();
        Ok(vec![selected])
    }

    /// All instances, services in name order and instances in registration order.
    pub fn all(&self) -> Vec<ServiceInstance> {
        self.read().services.values().flatten().cloned().collect()
    }

    /// Instances whose last heartbeat is more than `timeout_secs` old.
    pub fn expired(&self, timeout_secs: u64) -> Vec<ServiceInstance> {
        self.expired_at(timestamp_now(), timeout_secs)
    }

    /// [`Self::expired`] against an explicit clock.
    pub fn expired_at(&self, now: i64, timeout_secs: u64) -> Vec<ServiceInstance> {
        let timeout = i64::try_from(timeout_secs).unwrap_or(i64::MAX);
        let table = self.read();
        table
            .services
            .values()
            .flatten()
            .filter(|ins| {
                if ins.last_heartbeat <= 0 {
                    tracing::warn!(
                        "Instance {} has no valid heartbeat, skipping expiry check",
                        ins.service_id
                    );
                    return false;
                }
                now - ins.last_heartbeat > timeout
            })
            .cloned()
            .collect()
    }

    /// Absorb an instance pushed by the master.
    ///
    /// Non-positive timestamps are treated as missing: an existing record keeps its own,
    /// a new record is stamped with the current time.
    pub fn merge_from_sync(&self, ins: ServiceInstance) -> Result<()> {
        ins.validate_id()?;
        let mut ins = ins;
        let mut table = self.write();

        if let Some(existing) = table.get(&ins.service_id) {
            if ins.registered_at <= 0 {
                ins.registered_at = existing.registered_at;
                ins.registered_gmt_time = existing.registered_gmt_time.clone();
            }
            if ins.last_heartbeat <= 0 {
                ins.last_heartbeat = existing.last_heartbeat;
                ins.last_heartbeat_gmt_time = existing.last_heartbeat_gmt_time.clone();
            }
        } else {
            let (secs, readable) = now_stamp();
            if ins.registered_at <= 0 {
                tracing::warn!(
                    "Synced instance {} has no registration time, using now",
                    ins.service_id
                );
                ins.set_registered(secs, &readable);
            }
            if ins.last_heartbeat <= 0 {
                ins.set_heartbeat(secs, &readable);
            }
        }

        if ins.registered_gmt_time.is_empty() && ins.registered_at > 0 {
            ins.registered_gmt_time = format_timestamp(ins.registered_at);
        }
        if ins.last_heartbeat_gmt_time.is_empty() && ins.last_heartbeat > 0 {
            ins.last_heartbeat_gmt_time = format_timestamp(ins.last_heartbeat);
        }

        // The master owns the endpoint now; drop whatever stale local entry held it.
        if let Some(stale) = table.by_endpoint.get(&ins.endpoint()).cloned() {
            if stale != ins.service_id {
                tracing::warn!(
                    "Dropping stale instance {} that held {}:{}",
                    stale,
                    ins.ip_address,
                    ins.port
                );
                table.remove(&stale);
            }
        }

        table.upsert(ins);
        Ok(())
    }

    /// Set the heartbeat fields to the master's values. Returns false for unknown ids.
    pub fn touch(&self, service_id: &str, last_heartbeat: i64, readable: &str) -> bool {
        let mut table = self.write();
        match table.get_mut(service_id) {
            Some(existing) => {
                if last_heartbeat > 0 {
                    existing.set_heartbeat(last_heartbeat, readable);
                } else {
                    let (secs, readable) = now_stamp();
                    existing.set_heartbeat(secs, &readable);
                }
                true
            }
            None => false,
        }
    }

    pub fn export_load_balance_state(&self) -> HashMap<String, usize> {
        self.read().cursors.clone()
    }

    /// Adopt cursors from another node, clamped to the local list lengths.
    /// Returns the number of services updated.
    pub fn import_load_balance_state(&self, state: &HashMap<String, i64>) -> usize {
        let mut table = self.write();
        let mut applied = 0;
        for (name, index) in state {
            let len = match table.services.get(name) {
                Some(list) if !list.is_empty() => list.len(),
                _ => continue,
            };
            let max = i64::try_from(len - 1).unwrap_or(i64::MAX);
            let clamped = (*index).clamp(0, max) as usize;
            table.cursors.insert(name.clone(), clamped);
            applied += 1;
        }
        applied
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReplicaStore for InstanceStore {
    fn merge_from_sync(&self, instance: ServiceInstance) -> Result<()> {
        InstanceStore::merge_from_sync(self, instance)
    }

    fn remove_replica(&self, service_id: &str) -> bool {
        self.remove(service_id).is_some()
    }

    fn touch_replica(&self, service_id: &str, last_heartbeat: i64, readable: &str) -> bool {
        self.touch(service_id, last_heartbeat, readable)
    }

    fn export_load_balance_state(&self) -> HashMap<String, usize> {
        InstanceStore::export_load_balance_state(self)
    }

    fn import_load_balance_state(&self, state: &HashMap<String, i64>) -> usize {
        InstanceStore::import_load_balance_state(self, state)
    }
}
