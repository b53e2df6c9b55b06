//! HTTP client for node-to-node calls

use crate::cluster::coordinator::ClusterTiming;
use crate::common::{Error, Result};
use crate::node::models::{ApiResponse, DiscoveryData};
use crate::registry::instance::ServiceInstance;
use crate::registry::service::{ForwardedResponse, SyncAction, SyncRequest};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::time::Duration;

/// Talks to other registry nodes. Every call carries its own timeout.
#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    probe_timeout: Duration,
    forward_timeout: Duration,
    discovery_timeout: Duration,
    replicate_timeout: Duration,
    sync_timeout: Duration,
}

impl PeerClient {
    pub fn new(timing: &ClusterTiming) -> Self {
        Self {
            http: reqwest::Client::new(),
            probe_timeout: timing.probe_timeout,
            forward_timeout: timing.forward_timeout,
            discovery_timeout: timing.discovery_timeout,
            replicate_timeout: timing.replicate_timeout,
            sync_timeout: timing.sync_timeout,
        }
    }

    /// `GET /health`; healthy means a 200 within the probe timeout.
    pub async fn probe(&self, addr: &str) -> bool {
        let url = format!("{}/health", addr);
        match self.http.get(&url).timeout(self.probe_timeout).send().await {
            Ok(resp) => resp.status() == StatusCode::OK,
            Err(e) => {
                tracing::debug!("Probe of {} failed: {}", addr, e);
                false
            }
        }
    }

    /// Forward a client write to the master, keeping its raw answer.
    pub async fn forward_write(
        &self,
        master: &str,
        action: SyncAction,
        instance: &ServiceInstance,
    ) -> Result<ForwardedResponse> {
        let url = format!("{}{}", master, action.path());
        let resp = self
            .http
            .post(&url)
            .timeout(self.forward_timeout)
            .json(instance)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.bytes().await?;
        Ok(ForwardedResponse { status, body })
    }

    pub async fn forward_discovery(
        &self,
        master: &str,
        service_name: &str,
    ) -> Result<ForwardedResponse> {
        let url = format!("{}/api/discovery", master);
        let mut req = self.http.get(&url).timeout(self.discovery_timeout);
        if !service_name.is_empty() {
            req = req.query(&[("name", service_name)]);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?;
        Ok(ForwardedResponse { status, body })
    }

    /// Push one committed write to a slave.
    pub async fn push_sync(&self, peer: &str, request: &SyncRequest) -> Result<()> {
        let url = format!("{}/api/internal/sync", peer);
        let resp = self
            .http
            .post(&url)
            .timeout(self.replicate_timeout)
            .json(request)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Peer {
                peer: peer.to_string(),
                reason: format!("sync rejected with status {}", resp.status()),
            });
        }
        Ok(())
    }

    /// Full instance list as seen by `master`.
    pub async fn fetch_instances(&self, master: &str) -> Result<Vec<ServiceInstance>> {
        let url = format!("{}/api/discovery", master);
        let resp = self
            .http
            .get(&url)
            .timeout(self.sync_timeout)
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            return Err(Error::Peer {
                peer: master.to_string(),
                reason: format!("instance list returned status {}", resp.status()),
            });
        }

        let envelope: ApiResponse<DiscoveryData> = resp.json().await?;
        Ok(envelope
            .data
            .map(|d| d.instances.into_iter().map(ServiceInstance::from).collect())
            .unwrap_or_default())
    }

    /// Round-robin cursors of `master`.
    pub async fn fetch_load_balance(&self, master: &str) -> Result<HashMap<String, i64>> {
        let url = format!("{}/api/internal/loadbalance", master);
        let resp = self
            .http
            .get(&url)
            .timeout(self.sync_timeout)
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            return Err(Error::Peer {
                peer: master.to_string(),
                reason: format!("load balance state returned status {}", resp.status()),
            });
        }

        let envelope: ApiResponse<HashMap<String, i64>> = resp.json().await?;
        Ok(envelope.data.unwrap_or_default())
    }
}
