//! DNS provider abstraction layer
//!
//! This module defines the contract shared by every DNS provider: resolve the
//! zone owning a name, then create-or-replace exactly one record of a given
//! type at that name. The orchestrator only depends on [`DnsRecordStore`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{ACME_CHALLENGE_LABEL, ZONE_APEX};
use crate::error::{ProvisionError, ProvisionResult};

//==============================================================================
// Types
//==============================================================================

/// Record types this tool manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Txt,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Txt => "TXT",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider's authoritative zone for a domain
///
/// Resolved per operation and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneRef {
    /// Provider-specific opaque identifier
    pub id: String,
    /// Zone apex name, e.g. `example.com`
    pub name: String,
}

impl fmt::Display for ZoneRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// DNS provider selected for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsProviderKind {
    /// Operator creates the records by hand
    None,
    Cloudflare,
    Hetzner,
}

impl DnsProviderKind {
    /// Whether DNS-01 hook units exist for this provider
    pub fn supports_dns01_hooks(&self) -> bool {
        matches!(self, DnsProviderKind::Hetzner)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DnsProviderKind::None => "none",
            DnsProviderKind::Cloudflare => "cloudflare",
            DnsProviderKind::Hetzner => "hetzner",
        }
    }
}

impl fmt::Display for DnsProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//==============================================================================
// Trait
//==============================================================================

/// Zone lookup and idempotent record upsert against one DNS provider
#[async_trait]
pub trait DnsRecordStore: Send + Sync {
    /// Provider name used in logs and errors
    fn name(&self) -> &'static str;

    /// Looks up a zone whose apex is exactly `zone_name`
    ///
    /// Returns `Ok(None)` when the provider has no such zone.
    async fn find_zone(&self, zone_name: &str) -> ProvisionResult<Option<ZoneRef>>;

    /// Resolves the zone owning `domain`
    ///
    /// Queries every candidate from [`zone_candidates`] in order and returns
    /// the first one the provider knows. Not retried.
    async fn resolve_zone(&self, domain: &str) -> ProvisionResult<ZoneRef> {
        for candidate in zone_candidates(domain) {
            debug!("{}: trying zone candidate {}", self.name(), candidate);
            if let Some(zone) = self.find_zone(&candidate).await? {
                debug!("{}: {} resolved to zone {}", self.name(), domain, zone);
                return Ok(zone);
            }
        }
        Err(ProvisionError::ZoneNotFound {
            domain: domain.to_string(),
        })
    }

    /// Creates or replaces the record of `record_type` at `fqdn`
    ///
    /// After success exactly one record of that type exists at the name and it
    /// holds `value`. Calling it again with the same inputs changes nothing.
    async fn upsert(
        &self,
        zone: &ZoneRef,
        record_type: RecordType,
        fqdn: &str,
        value: &str,
        ttl: u32,
    ) -> ProvisionResult<()>;
}

//==============================================================================
// Name helpers
//==============================================================================

/// Candidate zone apexes for `domain`, most specific first
///
/// The candidates are the proper parent suffixes that still have at least two
/// labels: `sub.host.example.co.uk` yields `host.example.co.uk`,
/// `example.co.uk`, `co.uk`. A two-label domain has no such parent and is its
/// own sole candidate.
pub fn zone_candidates(domain: &str) -> Vec<String> {
    let domain = domain.to_ascii_lowercase();
    let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return vec![labels.join(".")];
    }
    (1..labels.len() - 1)
        .map(|start| labels[start..].join("."))
        .collect()
}

/// Converts an absolute name into the form relative to `zone_name`
///
/// The apex itself becomes `@`. Names outside the zone are returned as-is.
pub fn relative_name(fqdn: &str, zone_name: &str) -> String {
    if fqdn == zone_name {
        return ZONE_APEX.to_string();
    }
    match fqdn.strip_suffix(zone_name) {
        Some(host) if host.ends_with('.') => host.trim_end_matches('.').to_string(),
        _ => fqdn.to_string(),
    }
}

/// Relative name of the DNS-01 TXT record validating `domain` in `zone_name`
///
/// `_acme-challenge` at the apex, `_acme-challenge.<host>` below it.
pub fn challenge_record_name(domain: &str, zone_name: &str) -> String {
    let fqdn = format!("{}.{}", ACME_CHALLENGE_LABEL, domain);
    relative_name(&fqdn, zone_name)
}

//==============================================================================
// Tests
//==============================================================================
