//! Service instance model

use crate::common::utils::format_timestamp;
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};

/// A registered service instance.
///
/// This is also the body of the write endpoints and of replication pushes, so every field
/// defaults when absent and the timestamps are omitted when unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceInstance {
    pub service_name: String,
    pub service_id: String,
    pub ip_address: String,
    pub port: u32,

    #[serde(skip_serializing_if = "is_unset")]
    pub registered_at: i64,
    #[serde(skip_serializing_if = "is_unset")]
    pub last_heartbeat: i64,

    #[serde(rename = "registeredGMTTime", skip_serializing_if = "String::is_empty")]
    pub registered_gmt_time: String,
    #[serde(rename = "lastHeartbeatGMTTime", skip_serializing_if = "String::is_empty")]
    pub last_heartbeat_gmt_time: String,
}

fn is_unset(ts: &i64) -> bool {
    *ts == 0
}

impl ServiceInstance {
    pub fn new(
        service_name: impl Into<String>,
        service_id: impl Into<String>,
        ip_address: impl Into<String>,
        port: u32,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            service_id: service_id.into(),
            ip_address: ip_address.into(),
            port,
            ..Default::default()
        }
    }

    /// Check the fields a fresh registration needs.
    pub fn validate_for_register(&self) -> Result<()> {
        self.validate_id()?;
        if self.service_name.is_empty() {
            return Err(Error::Validation("serviceName is required".into()));
        }
        if self.ip_address.is_empty() {
            return Err(Error::Validation("ipAddress is required".into()));
        }
        validate_port(self.port)
    }

    pub fn validate_id(&self) -> Result<()> {
        if self.service_id.is_empty() {
            return Err(Error::Validation("serviceId is required".into()));
        }
        Ok(())
    }

    /// Carries a service id but no identity (the legacy heartbeat-through-register form).
    pub fn is_heartbeat_shaped(&self) -> bool {
        self.service_name.is_empty() && self.ip_address.is_empty() && self.port == 0
    }

    /// Same name, address and port as `other`.
    pub fn same_identity(&self, other: &ServiceInstance) -> bool {
        self.service_name == other.service_name
            && self.ip_address == other.ip_address
            && self.port == other.port
    }

    /// First identity field that disagrees with the claim, in name/ip/port order.
    pub fn check_claim(&self, claim: &IdentityClaim) -> Result<()> {
        let mismatch = |field: &'static str, provided: String| Error::Mismatch {
            service_id: self.service_id.clone(),
            field,
            provided,
        };
        if claim.service_name != self.service_name {
            return Err(mismatch("serviceName", claim.service_name.clone()));
        }
        if claim.ip_address != self.ip_address {
            return Err(mismatch("ipAddress", claim.ip_address.clone()));
        }
        if claim.port != self.port {
            return Err(mismatch("port", claim.port.to_string()));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> (String, u32) {
        (self.ip_address.clone(), self.port)
    }

    pub fn claim(&self) -> IdentityClaim {
        IdentityClaim {
            service_id: self.service_id.clone(),
            service_name: self.service_name.clone(),
            ip_address: self.ip_address.clone(),
            port: self.port,
        }
    }

    /// Set the heartbeat fields, deriving the readable form when it is missing.
    pub(crate) fn set_heartbeat(&mut self, secs: i64, readable: &str) {
        self.last_heartbeat = secs;
        self.last_heartbeat_gmt_time = if readable.is_empty() {
            format_timestamp(secs)
        } else {
            readable.to_string()
        };
    }

    pub(crate) fn set_registered(&mut self, secs: i64, readable: &str) {
        self.registered_at = secs;
        self.registered_gmt_time = if readable.is_empty() {
            format_timestamp(secs)
        } else {
            readable.to_string()
        };
    }
}

fn validate_port(port: u32) -> Result<()> {
    if port == 0 {
        return Err(Error::Validation("port is required".into()));
    }
    if port > u32::from(u16::MAX) {
        return Err(Error::Validation("port must be between 1 and 65535".into()));
    }
    Ok(())
}

/// Identity a caller asserts when heartbeating or unregistering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaim {
    pub service_id: String,
    pub service_name: String,
    pub ip_address: String,
    pub port: u32,
}

/// Instance shape returned by discovery and register responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    pub service_name: String,
    pub service_id: String,
    pub ip_address: String,
    pub port: u32,
    #[serde(default)]
    pub registration_time: i64,
    #[serde(default)]
    pub last_heartbeat_time: i64,
    #[serde(rename = "registrationGMTTime", default)]
    pub registration_gmt_time: String,
    #[serde(rename = "lastHeartbeatGMTTime", default)]
    pub last_heartbeat_gmt_time: String,
}

impl From<&ServiceInstance> for InstanceView {
    fn from(ins: &ServiceInstance) -> Self {
        Self {
            service_name: ins.service_name.clone(),
            service_id: ins.service_id.clone(),
            ip_address: ins.ip_address.clone(),
            port: ins.port,
            registration_time: ins.registered_at,
            last_heartbeat_time: ins.last_heartbeat,
            registration_gmt_time: ins.registered_gmt_time.clone(),
            last_heartbeat_gmt_time: ins.last_heartbeat_gmt_time.clone(),
        }
    }
}

impl From<InstanceView> for ServiceInstance {
    fn from(view: InstanceView) -> Self {
        Self {
            service_name: view.service_name,
            service_id: view.service_id,
            ip_address: view.ip_address,
            port: view.port,
            registered_at: view.registration_time,
            last_heartbeat: view.last_heartbeat_time,
            registered_gmt_time: view.registration_gmt_time,
            last_heartbeat_gmt_time: view.last_heartbeat_gmt_time,
        }
    }
}
