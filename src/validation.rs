//! Validation utilities for tlsfront
//!
//! This module validates operator input (domains, contact email) and the
//! addresses reported by the public address lookup.

use std::net::IpAddr;

use crate::error::{ProvisionError, ProvisionResult};

/// Validates that a string is usable as the certificate domain
///
/// The domain is used verbatim as a Subject Alternative Name, as the nginx
/// `server_name` and as part of on-disk file names, so the rules are stricter
/// than for arbitrary record names.
///
/// # Validation Rules
///
/// 1. **Length constraints**:
///    - Maximum total length: 253 characters
///    - Maximum label length: 63 characters
///
/// 2. **Syntax rules**:
///    - At least two labels (`example.com`, not `localhost`)
///    - No trailing dot, no empty labels
///    - Labels cannot start or end with hyphens (`-`)
///    - No wildcard labels; wildcard coverage is requested separately
///
/// 3. **Allowed characters**: ASCII letters, digits and hyphens
///
/// # Examples
///
/// ```
/// use tlsfront::validation::validate_domain;
///
/// assert!(validate_domain("example.com").is_ok());
/// assert!(validate_domain("app.example.com").is_ok());
///
/// assert!(validate_domain("").is_err());
/// assert!(validate_domain("localhost").is_err());
/// assert!(validate_domain("example.com.").is_err());
/// assert!(validate_domain("*.example.com").is_err());
/// assert!(validate_domain("-app.example.com").is_err());
/// ```
pub fn validate_domain(domain: &str) -> ProvisionResult<()> {
    if domain.trim().is_empty() {
        return Err(invalid("Domain cannot be empty"));
    }
    if domain.chars().any(char::is_whitespace) {
        return Err(invalid("Domain cannot contain whitespace"));
    }
    if domain.ends_with('.') {
        return Err(invalid("Domain must not end with a dot"));
    }
    if domain.len() > 253 {
        return Err(invalid(format!(
            "Domain too long (max 253 characters, got {})",
            domain.len()
        )));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(invalid(format!(
            "Domain must contain at least two labels, got '{}'",
            domain
        )));
    }

    for label in labels {
        if label.is_empty() {
            return Err(invalid("Domain contains empty label"));
        }
        if label == "*" {
            return Err(invalid(
                "Domain cannot contain a wildcard label (use --wildcard instead)",
            ));
        }
        if label.len() > 63 {
            return Err(invalid(format!(
                "Domain label too long (max 63 characters, got {})",
                label.len()
            )));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("Domain label cannot start or end with hyphen"));
        }
        if let Some(ch) = label
            .chars()
            .find(|ch| !ch.is_ascii_alphanumeric() && *ch != '-')
        {
            return Err(invalid(format!(
                "Domain contains invalid character: '{}' (allowed: letters, digits, '-')",
                ch
            )));
        }
    }

    Ok(())
}

/// Validates the ACME account contact address
///
/// Only the shape `local@domain` is checked; the CA performs its own checks.
pub fn validate_email(email: &str) -> ProvisionResult<()> {
    let Some((local, host)) = email.split_once('@') else {
        return Err(invalid(format!("Invalid email address: '{}'", email)));
    };
    if local.is_empty() || host.contains('@') || email.chars().any(char::is_whitespace) {
        return Err(invalid(format!("Invalid email address: '{}'", email)));
    }
    validate_domain(host).map_err(|_| invalid(format!("Invalid email domain: '{}'", host)))
}

/// Returns `true` if the address is suitable for a public A/AAAA record
///
/// Rejects unspecified, loopback, link-local, multicast, private (IPv4) and
/// documentation ranges. Unique local IPv6 addresses are rejected as well,
/// since the certificate authority must reach the address.
pub fn is_public_address(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            !(v4.is_unspecified()
                || v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_documentation())
        }
        IpAddr::V6(v6) => {
            if v6.is_unspecified() || v6.is_loopback() || v6.is_multicast() {
                return false;
            }
            let segments = v6.segments();
            // fe80::/10 link-local
            if segments[0] & 0xffc0 == 0xfe80 {
                return false;
            }
            // fc00::/7 unique local
            if segments[0] & 0xfe00 == 0xfc00 {
                return false;
            }
            // 2001:db8::/32 documentation
            !(segments[0] == 0x2001 && segments[1] == 0x0db8)
        }
    }
}

/// Identifier-safe form of a domain: everything but `[A-Za-z0-9_]` becomes `_`
///
/// Used for file names and nginx upstream names.
pub fn slug(domain: &str) -> String {
    domain
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn invalid(message: impl Into<String>) -> ProvisionError {
    ProvisionError::Configuration(message.into())
}
