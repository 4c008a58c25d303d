//! Cloudflare API client for DNS operations
//!
//! Uses reqwest with rustls for HTTP requests. Records are addressed by their
//! fully-qualified name and updated in place by id.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use urlencoding::encode;

use crate::constants::{CLOUDFLARE_API_BASE, USER_AGENT};
use crate::dns_provider::{DnsRecordStore, RecordType, ZoneRef};
use crate::error::{ProvisionError, ProvisionResult};

const PROVIDER: &str = "cloudflare";

//==============================================================================
// Types
//==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub proxied: bool,
    pub ttl: u64,
}

impl fmt::Display for DnsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DNS {} {} -> {} (TTL: {}, Proxied: {})",
            self.record_type, self.name, self.content, self.ttl, self.proxied
        )
    }
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiError>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiError {
    code: u64,
    message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

#[derive(Serialize)]
struct RecordPayload<'a> {
    #[serde(rename = "type")]
    rt: &'static str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
    proxied: bool,
}

//==============================================================================
// Client
//==============================================================================

pub struct CloudflareClient {
    api_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl CloudflareClient {
    pub fn new(api_token: &str, timeout: Duration) -> ProvisionResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                ProvisionError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            api_token: api_token.to_string(),
            base_url: CLOUDFLARE_API_BASE.to_string(),
            client,
        })
    }

    /// Points the client at another API endpoint (used by tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Lists records of one type at one name
    pub async fn get_records(
        &self,
        zone_id: &str,
        record_type: RecordType,
        fqdn: &str,
    ) -> ProvisionResult<Vec<DnsRecord>> {
        let url = format!(
            "{}/zones/{}/dns_records?type={}&name={}",
            self.base_url,
            zone_id,
            record_type,
            encode(fqdn)
        );

        debug!("GET {}", url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ProvisionError::transport(PROVIDER, e))?;

        Ok(parse_response::<Vec<DnsRecord>>(resp, "List records")
            .await?
            .unwrap_or_default())
    }

    async fn create_record(
        &self,
        zone_id: &str,
        record_type: RecordType,
        fqdn: &str,
        value: &str,
        ttl: u32,
    ) -> ProvisionResult<DnsRecord> {
        let url = format!("{}/zones/{}/dns_records", self.base_url, zone_id);
        let payload = RecordPayload {
            rt: record_type.as_str(),
            name: fqdn,
            content: value,
            ttl,
            proxied: false,
        };

        debug!("POST {}", url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProvisionError::transport(PROVIDER, e))?;

        require_result(parse_response(resp, "Create").await?)
    }

    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record_type: RecordType,
        fqdn: &str,
        value: &str,
        ttl: u32,
    ) -> ProvisionResult<DnsRecord> {
        let url = format!("{}/zones/{}/dns_records/{}", self.base_url, zone_id, record_id);
        let payload = RecordPayload {
            rt: record_type.as_str(),
            name: fqdn,
            content: value,
            ttl,
            proxied: false,
        };

        debug!("PUT {}", url);
        let resp = self
            .client
            .put(&url)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProvisionError::transport(PROVIDER, e))?;

        require_result(parse_response(resp, "Update").await?)
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> ProvisionResult<()> {
        let url = format!("{}/zones/{}/dns_records/{}", self.base_url, zone_id, record_id);

        debug!("DELETE {}", url);
        let resp = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ProvisionError::transport(PROVIDER, e))?;

        parse_response::<serde_json::Value>(resp, "Delete").await?;
        Ok(())
    }
}

#[async_trait]
impl DnsRecordStore for CloudflareClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn find_zone(&self, zone_name: &str) -> ProvisionResult<Option<ZoneRef>> {
        let url = format!("{}/zones?name={}", self.base_url, encode(zone_name));

        debug!("GET {}", url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ProvisionError::transport(PROVIDER, e))?;

        let zones = parse_response::<Vec<Zone>>(resp, "List zones")
            .await?
            .unwrap_or_default();
        Ok(zones
            .into_iter()
            .find(|z| z.name.eq_ignore_ascii_case(zone_name))
            .map(|z| ZoneRef { id: z.id, name: z.name }))
    }

    /// Updates the first matching record in place and deletes any duplicates
    async fn upsert(
        &self,
        zone: &ZoneRef,
        record_type: RecordType,
        fqdn: &str,
        value: &str,
        ttl: u32,
    ) -> ProvisionResult<()> {
        let mut records = self.get_records(&zone.id, record_type, fqdn).await?;

        if records.is_empty() {
            let record = self
                .create_record(&zone.id, record_type, fqdn, value, ttl)
                .await?;
            info!("Created {}", record);
            return Ok(());
        }

        let duplicates = records.split_off(1);
        let current = &records[0];
        if current.content == value && current.ttl == u64::from(ttl) && !current.proxied {
            debug!("Record already matches: {}", current);
        } else {
            let record = self
                .update_record(&zone.id, &current.id, record_type, fqdn, value, ttl)
                .await?;
            info!("Updated {}", record);
        }

        for duplicate in duplicates {
            warn!("Removing duplicate {}", duplicate);
            self.delete_record(&zone.id, &duplicate.id).await?;
        }

        Ok(())
    }
}

/// Checks HTTP status and the `success` flag of a Cloudflare envelope
async fn parse_response<T: DeserializeOwned>(
    resp: reqwest::Response,
    operation: &str,
) -> ProvisionResult<Option<T>> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| ProvisionError::transport(PROVIDER, e))?;

    let body: Option<ApiResponse<T>> = serde_json::from_str(&text).ok();
    match body {
        Some(body) if body.success && status.is_success() => Ok(body.result),
        Some(body) => Err(api_error(status, operation, &body.errors)),
        None if status.is_success() => Err(ProvisionError::ProviderApi {
            provider: PROVIDER,
            message: format!("{} failed: unparseable response body", operation),
        }),
        None => Err(api_error(status, operation, &[])),
    }
}

fn api_error(status: StatusCode, operation: &str, errors: &[ApiError]) -> ProvisionError {
    let message = if status == StatusCode::TOO_MANY_REQUESTS {
        "Rate limited by Cloudflare".to_string()
    } else if status.is_server_error() {
        format!("Cloudflare server error: {}", status.as_u16())
    } else if errors.is_empty() {
        format!("{} failed: HTTP {}", operation, status.as_u16())
    } else {
        format!(
            "{} failed: {}",
            operation,
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    };
    ProvisionError::ProviderApi {
        provider: PROVIDER,
        message,
    }
}

fn require_result(result: Option<DnsRecord>) -> ProvisionResult<DnsRecord> {
    result.ok_or_else(|| ProvisionError::ProviderApi {
        provider: PROVIDER,
        message: "API returned success but no result".to_string(),
    })
}

//==============================================================================
// Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_record_display() {
        let record = DnsRecord {
            id: "test123".to_string(),
            record_type: "A".to_string(),
            name: "app.example.com".to_string(),
            content: "203.0.113.10".to_string(),
            proxied: false,
            ttl: 120,
        };

        let s = format!("{}", record);
        assert!(s.contains("app.example.com"));
        assert!(s.contains("203.0.113.10"));
    }

    #[test]
    fn test_api_response_parsing() {
        let json = r#"{
            "success": true,
            "errors": [],
            "messages": [],
            "result": {
                "id": "abc123",
                "type": "AAAA",
                "name": "test.example.com",
                "content": "2606:4700::1",
                "proxied": false,
                "ttl": 120
            }
        }"#;

        let resp: ApiResponse<DnsRecord> = serde_json::from_str(json).unwrap();
        assert!(resp.success);
        assert!(resp.errors.is_empty());
        assert_eq!(resp.result.unwrap().record_type, "AAAA");
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError {
            code: 6003,
            message: "Invalid request headers".to_string(),
        };
        assert_eq!(format!("{}", err), "[6003] Invalid request headers");
    }

    #[test]
    fn test_api_error_messages() {
        let err = api_error(StatusCode::TOO_MANY_REQUESTS, "Create", &[]);
        assert!(err.to_string().contains("Rate limited"));

        let err = api_error(StatusCode::BAD_GATEWAY, "Create", &[]);
        assert!(err.to_string().contains("502"));

        let errors = [ApiError {
            code: 81057,
            message: "Record already exists.".to_string(),
        }];
        let err = api_error(StatusCode::BAD_REQUEST, "Create", &errors);
        assert!(err.to_string().contains("[81057] Record already exists."));
    }

    #[test]
    fn test_with_base_url_trims_slash() {
        let client = CloudflareClient::new("token", Duration::from_secs(5))
            .unwrap()
            .with_base_url("http://127.0.0.1:9999/");
        assert_eq!(client.base_url, "http://127.0.0.1:9999");
    }
}
