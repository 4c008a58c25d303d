//! Hetzner DNS provider implementation
//!
//! Uses the Hetzner Cloud API (zones and RRsets). RRsets are addressed by
//! their name relative to the zone apex; since an RRset cannot be updated by
//! record id, an upsert deletes the RRset and creates it again.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use urlencoding::encode;

use crate::constants::{HETZNER_API_BASE, USER_AGENT};
use crate::dns_provider::{relative_name, DnsRecordStore, RecordType, ZoneRef};
use crate::error::{ProvisionError, ProvisionResult};

const PROVIDER: &str = "hetzner";

/// Hetzner DNS provider
#[derive(Debug)]
pub struct HetznerClient {
    client: Client,
    token: String,
    base_url: String,
}

impl HetznerClient {
    /// Create a new Hetzner DNS client
    ///
    /// # Arguments
    ///
    /// * `token` - Hetzner API token with DNS write access
    /// * `timeout` - Request timeout
    pub fn new(token: &str, timeout: Duration) -> ProvisionResult<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                ProvisionError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            token: token.to_string(),
            base_url: HETZNER_API_BASE.to_string(),
        })
    }

    /// Points the client at another API endpoint (used by tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn rrset_url(&self, zone: &ZoneRef, name: &str, record_type: RecordType) -> String {
        format!(
            "{}/zones/{}/rrsets/{}/{}",
            self.base_url,
            encode(&zone.name),
            encode(name),
            record_type
        )
    }

    /// Deletes an RRset; an absent RRset counts as deleted
    async fn delete_rrset(
        &self,
        zone: &ZoneRef,
        name: &str,
        record_type: RecordType,
    ) -> ProvisionResult<()> {
        let url = self.rrset_url(zone, name, record_type);

        debug!("DELETE {}", url);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ProvisionError::transport(PROVIDER, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(name = %name, record_type = %record_type, "RRset absent, nothing to delete");
            return Ok(());
        }
        check_status(response, "Delete rrset").await
    }

    async fn create_rrset(
        &self,
        zone: &ZoneRef,
        name: &str,
        record_type: RecordType,
        value: &str,
        ttl: u32,
    ) -> ProvisionResult<()> {
        let url = format!("{}/zones/{}/rrsets", self.base_url, encode(&zone.name));
        let request = CreateRrsetRequest {
            name,
            r#type: record_type.as_str(),
            ttl,
            records: vec![RrsetRecord {
                value: record_value(record_type, value),
            }],
        };

        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProvisionError::transport(PROVIDER, e))?;

        check_status(response, "Create rrset").await
    }
}

#[async_trait]
impl DnsRecordStore for HetznerClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn find_zone(&self, zone_name: &str) -> ProvisionResult<Option<ZoneRef>> {
        let url = format!("{}/zones?name={}", self.base_url, encode(zone_name));

        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ProvisionError::transport(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(status_error(response, "List zones").await);
        }

        let zones: ZonesResponse = response.json().await.map_err(|e| {
            ProvisionError::ProviderApi {
                provider: PROVIDER,
                message: format!("Failed to parse zones response: {}", e),
            }
        })?;

        Ok(zones
            .zones
            .into_iter()
            .find(|z| z.name.eq_ignore_ascii_case(zone_name))
            .map(|z| ZoneRef {
                id: zone_id_string(&z.id),
                name: z.name,
            }))
    }

    async fn upsert(
        &self,
        zone: &ZoneRef,
        record_type: RecordType,
        fqdn: &str,
        value: &str,
        ttl: u32,
    ) -> ProvisionResult<()> {
        let name = relative_name(fqdn, &zone.name);
        debug!(
            zone = %zone.name,
            name = %name,
            record_type = %record_type,
            "Replacing rrset"
        );

        self.delete_rrset(zone, &name, record_type).await?;
        self.create_rrset(zone, &name, record_type, value, ttl).await?;

        info!("Set {} {} -> {} in zone {}", record_type, name, value, zone.name);
        Ok(())
    }
}

/// TXT values must be sent as quoted character-strings
fn record_value(record_type: RecordType, value: &str) -> String {
    if record_type == RecordType::Txt && !value.starts_with('"') {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}

fn zone_id_string(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn check_status(response: reqwest::Response, operation: &str) -> ProvisionResult<()> {
    if response.status().is_success() {
        return Ok(());
    }
    Err(status_error(response, operation).await)
}

async fn status_error(response: reqwest::Response, operation: &str) -> ProvisionError {
    let status = response.status();
    let message = if status == StatusCode::UNAUTHORIZED {
        "Invalid Hetzner API token".to_string()
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        "Rate limited by Hetzner".to_string()
    } else {
        let body = response.text().await.unwrap_or_default();
        format!("{} failed: HTTP {} - {}", operation, status.as_u16(), body)
    };
    ProvisionError::ProviderApi {
        provider: PROVIDER,
        message,
    }
}

// Hetzner API types

#[derive(Debug, Deserialize)]
struct ZonesResponse {
    #[serde(default)]
    zones: Vec<Zone>,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: serde_json::Value,
    name: String,
}

#[derive(Debug, Serialize)]
struct CreateRrsetRequest<'a> {
    name: &'a str,
    r#type: &'static str,
    ttl: u32,
    records: Vec<RrsetRecord>,
}

#[derive(Debug, Serialize)]
struct RrsetRecord {
    value: String,
}
