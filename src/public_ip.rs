//! Public address discovery
//!
//! The server's public addresses are what the A/AAAA records point at. They
//! are looked up through an external echo service because the host may sit
//! behind NAT. A failed lookup is not an error; it just means that family is
//! unavailable.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::constants::{ADDRESS_LOOKUP_TIMEOUT_SECS, IPIFY_V4_URL, IPIFY_V6_URL, USER_AGENT};
use crate::error::{ProvisionError, ProvisionResult};
use crate::validation::is_public_address;

/// Which address families get DNS records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpMode {
    #[default]
    Ipv4,
    Ipv6,
    Dual,
}

impl IpMode {
    pub fn wants_ipv4(&self) -> bool {
        matches!(self, IpMode::Ipv4 | IpMode::Dual)
    }

    pub fn wants_ipv6(&self) -> bool {
        matches!(self, IpMode::Ipv6 | IpMode::Dual)
    }
}

impl fmt::Display for IpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IpMode::Ipv4 => "ipv4",
            IpMode::Ipv6 => "ipv6",
            IpMode::Dual => "dual",
        })
    }
}

/// Source of the host's public addresses
#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn public_ipv4(&self) -> Option<IpAddr>;
    async fn public_ipv6(&self) -> Option<IpAddr>;
}

/// Addresses resolved for the wanted families
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublicAddresses {
    pub ipv4: Option<IpAddr>,
    pub ipv6: Option<IpAddr>,
}

impl PublicAddresses {
    /// Looks up only the families `mode` asks for, warning about missing ones
    pub async fn resolve(lookup: &dyn AddressLookup, mode: IpMode) -> Self {
        let mut addresses = Self::default();
        if mode.wants_ipv4() {
            addresses.ipv4 = lookup.public_ipv4().await;
            if addresses.ipv4.is_none() {
                warn!("No public IPv4 address found; skipping A record");
            }
        }
        if mode.wants_ipv6() {
            addresses.ipv6 = lookup.public_ipv6().await;
            if addresses.ipv6.is_none() {
                warn!("No public IPv6 address found; skipping AAAA record");
            }
        }
        addresses
    }

    pub fn is_empty(&self) -> bool {
        self.ipv4.is_none() && self.ipv6.is_none()
    }
}

/// ipify-style lookup: GET returns the caller's address as plain text
pub struct IpifyLookup {
    client: reqwest::Client,
    v4_url: String,
    v6_url: String,
}

impl IpifyLookup {
    pub fn new() -> ProvisionResult<Self> {
        let timeout = Duration::from_secs(ADDRESS_LOOKUP_TIMEOUT_SECS);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                ProvisionError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            v4_url: IPIFY_V4_URL.to_string(),
            v6_url: IPIFY_V6_URL.to_string(),
        })
    }

    pub fn with_urls(mut self, v4_url: impl Into<String>, v6_url: impl Into<String>) -> Self {
        self.v4_url = v4_url.into();
        self.v6_url = v6_url.into();
        self
    }

    async fn fetch(&self, url: &str) -> Option<IpAddr> {
        debug!("GET {}", url);
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Address lookup via {} failed: {}", url, e);
                return None;
            }
        };
        if !response.status().is_success() {
            debug!("Address lookup via {} returned {}", url, response.status());
            return None;
        }
        let body = response.text().await.ok()?;
        body.trim().parse().ok()
    }
}

#[async_trait]
impl AddressLookup for IpifyLookup {
    async fn public_ipv4(&self) -> Option<IpAddr> {
        self.fetch(&self.v4_url)
            .await
            .filter(|addr| addr.is_ipv4() && usable(addr))
    }

    async fn public_ipv6(&self) -> Option<IpAddr> {
        // the dual-stack endpoint answers with IPv4 when there is no IPv6 route
        self.fetch(&self.v6_url)
            .await
            .filter(|addr| addr.is_ipv6() && usable(addr))
    }
}

fn usable(addr: &IpAddr) -> bool {
    if is_public_address(addr) {
        true
    } else {
        warn!("Ignoring non-public address {} from lookup", addr);
        false
    }
}
