//! Error types for provisioning runs

use std::io;
use std::path::Path;

use thiserror::Error;

/// Result type for provisioning operations
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors that abort a provisioning run
///
/// Every variant terminates the run; nothing is retried or rolled back.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Missing or contradictory input, raised before any side effect
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No candidate suffix of the domain is a zone at the provider
    #[error("Zone not found for domain '{domain}'")]
    ZoneNotFound { domain: String },

    /// The DNS provider answered with a non-success status or the call failed
    #[error("{provider} API error: {message}")]
    ProviderApi {
        provider: &'static str,
        message: String,
    },

    /// The certificate client exited unsuccessfully
    #[error("Certificate issuance failed: {0}")]
    CertificateIssuanceFailed(String),

    /// The proxy rejected the new configuration; the previous one stays active
    #[error("Proxy configuration validation failed: {0}")]
    ProxyValidationFailed(String),

    /// The proxy accepted the configuration but could not be reloaded
    #[error("Proxy reload failed: {0}")]
    ProxyReloadFailed(String),

    /// An external command could not be spawned or exited unsuccessfully
    #[error("Command `{command}` failed: {message}")]
    Command { command: String, message: String },

    /// Local filesystem failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The operator declined a confirmation
    #[error("Aborted: {0}")]
    Aborted(String),
}

impl ProvisionError {
    /// Wraps an I/O error with the path it occurred on
    pub fn io(path: &Path, source: io::Error) -> Self {
        ProvisionError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Builds a provider error from a transport failure
    pub fn transport(provider: &'static str, err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else {
            format!("request failed: {}", err)
        };
        ProvisionError::ProviderApi { provider, message }
    }
}

//==============================================================================
// Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProvisionError::ZoneNotFound {
            domain: "app.example.com".to_string(),
        };
        assert_eq!(err.to_string(), "Zone not found for domain 'app.example.com'");

        let err = ProvisionError::ProviderApi {
            provider: "hetzner",
            message: "HTTP 401 Unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "hetzner API error: HTTP 401 Unauthorized");

        let err = ProvisionError::Configuration("--wildcard requires DNS-01".to_string());
        assert!(err.to_string().starts_with("Configuration error"));
    }

    #[test]
    fn test_io_error_keeps_path() {
        let err = ProvisionError::io(
            Path::new("/etc/nginx/sites-available/app.example.com"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/etc/nginx/sites-available/app.example.com"));
        assert!(msg.contains("denied"));
    }
}
