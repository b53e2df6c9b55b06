//! Wire models for the `/api/*` surface

use crate::registry::instance::{IdentityClaim, InstanceView, ServiceInstance};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Envelope wrapping every `/api/*` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub msg: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(msg: impl Into<String>, data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            msg: msg.into(),
            data: Some(data),
        }
    }

    /// Success without a payload.
    pub fn message(msg: impl Into<String>) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            msg: msg.into(),
            data: None,
        }
    }

    pub fn error(status: StatusCode, msg: impl Into<String>, data: Option<T>) -> Self {
        Self {
            code: status.as_u16(),
            msg: msg.into(),
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Identity body of register, unregister and heartbeat calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceRequest {
    pub service_name: String,
    pub service_id: String,
    pub ip_address: String,
    pub port: u32,
}

impl InstanceRequest {
    pub fn into_claim(self) -> IdentityClaim {
        IdentityClaim {
            service_id: self.service_id,
            service_name: self.service_name,
            ip_address: self.ip_address,
            port: self.port,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterConflictData {
    pub conflict_service_id: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub suggestion: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceErrorData {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub field_mismatch: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub suggestion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnregisterData {
    pub service_name: String,
    pub service_id: String,
    pub ip_address: String,
    pub port: u32,
    pub message: String,
    #[serde(rename = "registrationGMTTime", skip_serializing_if = "String::is_empty", default)]
    pub registration_gmt_time: String,
    #[serde(rename = "lastHeartbeatGMTTime", skip_serializing_if = "String::is_empty", default)]
    pub last_heartbeat_gmt_time: String,
}

impl From<&ServiceInstance> for UnregisterData {
    fn from(ins: &ServiceInstance) -> Self {
        Self {
            service_name: ins.service_name.clone(),
            service_id: ins.service_id.clone(),
            ip_address: ins.ip_address.clone(),
            port: ins.port,
            message: format!("{} has been removed from the registry", ins.service_id),
            registration_gmt_time: ins.registered_gmt_time.clone(),
            last_heartbeat_gmt_time: ins.last_heartbeat_gmt_time.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryData {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub service_name: Option<String>,
    pub total_count: usize,
    #[serde(default)]
    pub instances: Vec<InstanceView>,
}

impl DiscoveryData {
    pub fn new(service_name: &str, instances: &[ServiceInstance]) -> Self {
        Self {
            service_name: (!service_name.is_empty()).then(|| service_name.to_string()),
            total_count: instances.len(),
            instances: instances.iter().map(InstanceView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryErrorData {
    pub service_name: String,
    pub suggestion: String,
}

/// `/health` body; not enveloped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthData {
    pub status: String,
    pub role: String,
    pub master: Option<String>,
    pub node: String,
    pub instances: usize,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let data = DiscoveryData::new("", &[ServiceInstance::new("svc", "s1", "10.0.0.1", 1)]);
        let json = serde_json::to_value(ApiResponse::ok("ok", data)).unwrap();
        assert_eq!(json["code"], 200);
        assert_eq!(json["data"]["totalCount"], 1);
        assert!(json["data"].get("serviceName").is_none());
        assert_eq!(json["data"]["instances"][0]["serviceId"], "s1");

        let err: ApiResponse<()> = ApiResponse::error(StatusCode::NOT_FOUND, "missing", None);
        let json = serde_json::to_value(err).unwrap();
        assert!(json["data"].is_null());
    }

    #[test]
    fn test_error_data_omits_empty_fields() {
        let data = InstanceErrorData {
            service_id: "s1".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(data).unwrap();
        assert_eq!(json["serviceId"], "s1");
        assert!(json.get("fieldMismatch").is_none());
    }
}
