//! Configuration module for tlsfront
//!
//! This module handles loading and validating configuration from files and environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use zeroize::ZeroizeOnDrop;

use crate::constants::{
    DEFAULT_HOOK_DIR, DEFAULT_LETSENCRYPT_DIR, DEFAULT_PROPAGATION_DELAY_SECS,
    DEFAULT_RECORD_TTL, DEFAULT_SITES_AVAILABLE, DEFAULT_SITES_ENABLED, DEFAULT_TIMEOUT_SECS,
    DEFAULT_WEBROOT_BASE, ENV_CLOUDFLARE_TOKEN, ENV_HETZNER_TOKEN, ENV_PROPAGATION_DELAY,
    ENV_TIMEOUT, ENV_VERBOSE, MAX_PROPAGATION_DELAY_SECS, MAX_RECORD_TTL, MAX_TIMEOUT_SECS,
    MIN_RECORD_TTL, MIN_TIMEOUT_SECS,
};
use crate::dns_provider::DnsProviderKind;
use crate::error::{ProvisionError, ProvisionResult};

//==============================================================================
// Config
//==============================================================================

/// Configuration for a provisioning run
///
/// Holds provider credentials, network timeouts and the filesystem layout of
/// nginx and certbot. API tokens are wrapped in `Zeroizing` so they are
/// cleared from memory when the config is dropped.
///
/// # Configuration Loading Priority
///
/// Configuration is loaded from multiple sources in order of precedence:
/// 1. Environment variables (highest priority)
/// 2. Config file (`/etc/tlsfront/config.toml` or custom path)
/// 3. Defaults (lowest priority)
#[derive(Debug, Clone, ZeroizeOnDrop)]
pub struct Config {
    /// Cloudflare API token with `Zone:DNS:Edit` permission
    #[zeroize(skip)]
    pub cloudflare_api_token: zeroize::Zeroizing<String>,
    /// Hetzner DNS API token
    #[zeroize(skip)]
    pub hetzner_api_token: zeroize::Zeroizing<String>,
    /// HTTP request timeout for DNS provider calls
    ///
    /// Default: 20 seconds
    #[zeroize(skip)]
    pub timeout: Duration,
    /// Time the DNS-01 authorization hook waits before returning
    ///
    /// Default: 20 seconds
    #[zeroize(skip)]
    pub propagation_delay: Duration,
    /// TTL for upserted records in seconds
    #[zeroize(skip)]
    pub record_ttl: u32,
    /// Enable verbose logging
    #[zeroize(skip)]
    pub verbose: bool,
    /// nginx `sites-available` directory
    #[zeroize(skip)]
    pub sites_available: PathBuf,
    /// nginx `sites-enabled` directory
    #[zeroize(skip)]
    pub sites_enabled: PathBuf,
    /// certbot configuration root
    #[zeroize(skip)]
    pub letsencrypt_dir: PathBuf,
    /// Directory for DNS-01 hook units and credential files
    #[zeroize(skip)]
    pub hook_dir: PathBuf,
    /// Parent directory of per-domain ACME webroots
    #[zeroize(skip)]
    pub webroot_base: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cloudflare_api_token: zeroize::Zeroizing::new(String::new()),
            hetzner_api_token: zeroize::Zeroizing::new(String::new()),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            propagation_delay: Duration::from_secs(DEFAULT_PROPAGATION_DELAY_SECS),
            record_ttl: DEFAULT_RECORD_TTL,
            verbose: false,
            sites_available: PathBuf::from(DEFAULT_SITES_AVAILABLE),
            sites_enabled: PathBuf::from(DEFAULT_SITES_ENABLED),
            letsencrypt_dir: PathBuf::from(DEFAULT_LETSENCRYPT_DIR),
            hook_dir: PathBuf::from(DEFAULT_HOOK_DIR),
            webroot_base: PathBuf::from(DEFAULT_WEBROOT_BASE),
        }
    }
}

impl Config {
    /// Loads configuration from file and environment variables
    ///
    /// A missing config file is not an error; every field has a default and
    /// credentials usually arrive through the environment.
    ///
    /// # Environment Variables
    ///
    /// - `CLOUDFLARE_API_TOKEN` - Cloudflare API token
    /// - `HETZNER_DNS_API_TOKEN` - Hetzner DNS API token
    /// - `TLSFRONT_TIMEOUT` - HTTP timeout in seconds
    /// - `TLSFRONT_PROPAGATION_DELAY` - DNS-01 propagation wait in seconds
    /// - `TLSFRONT_VERBOSE` - verbose logging (true/false/1/0/yes/no/on/off)
    pub fn load(config_path: Option<PathBuf>) -> ProvisionResult<Self> {
        let mut config = Self::load_from_file(config_path)?;
        Self::override_with_env(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(config_path: Option<PathBuf>) -> ProvisionResult<Self> {
        let mut config = Self::default();

        let Some(path) = config_path else {
            return Ok(config);
        };
        if !path.exists() {
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&path).map_err(|e| ProvisionError::io(&path, e))?;
        let toml_config: TomlConfig = toml::from_str(&content).map_err(|e| {
            ProvisionError::Configuration(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        if let Some(v) = toml_config.cloudflare_api_token {
            config.cloudflare_api_token = zeroize::Zeroizing::new(v);
        }
        if let Some(v) = toml_config.hetzner_api_token {
            config.hetzner_api_token = zeroize::Zeroizing::new(v);
        }
        if let Some(v) = toml_config.timeout {
            config.timeout = Duration::from_secs(v);
        }
        if let Some(v) = toml_config.propagation_delay {
            config.propagation_delay = Duration::from_secs(v);
        }
        if let Some(v) = toml_config.record_ttl {
            config.record_ttl = v;
        }
        if let Some(v) = toml_config.verbose {
            config.verbose = v;
        }
        if let Some(v) = toml_config.sites_available {
            config.sites_available = v;
        }
        if let Some(v) = toml_config.sites_enabled {
            config.sites_enabled = v;
        }
        if let Some(v) = toml_config.letsencrypt_dir {
            config.letsencrypt_dir = v;
        }
        if let Some(v) = toml_config.hook_dir {
            config.hook_dir = v;
        }
        if let Some(v) = toml_config.webroot_base {
            config.webroot_base = v;
        }

        Ok(config)
    }

    /// Overrides configuration values with non-empty environment variables
    fn override_with_env(config: &mut Self) -> ProvisionResult<()> {
        if let Some(v) = non_empty_env(ENV_CLOUDFLARE_TOKEN) {
            config.cloudflare_api_token = zeroize::Zeroizing::new(v);
        }
        if let Some(v) = non_empty_env(ENV_HETZNER_TOKEN) {
            config.hetzner_api_token = zeroize::Zeroizing::new(v);
        }
        if let Some(v) = non_empty_env(ENV_TIMEOUT) {
            config.timeout = Duration::from_secs(parse_secs(ENV_TIMEOUT, &v)?);
        }
        if let Some(v) = non_empty_env(ENV_PROPAGATION_DELAY) {
            config.propagation_delay =
                Duration::from_secs(parse_secs(ENV_PROPAGATION_DELAY, &v)?);
        }
        if let Some(v) = non_empty_env(ENV_VERBOSE) {
            config.verbose = parse_bool_env(&v).map_err(|e| {
                ProvisionError::Configuration(format!("Invalid {} value: {}", ENV_VERBOSE, e))
            })?;
        }
        Ok(())
    }

    /// Validates ranges and layout paths
    ///
    /// Credentials are not required here; which one is needed depends on the
    /// provider chosen for the run (see [`Config::token_for`]).
    fn validate(&self) -> ProvisionResult<()> {
        let timeout_secs = self.timeout.as_secs();
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&timeout_secs) {
            return Err(ProvisionError::Configuration(format!(
                "timeout must be between {} and {} seconds, got {}",
                MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS, timeout_secs
            )));
        }

        let delay_secs = self.propagation_delay.as_secs();
        if delay_secs > MAX_PROPAGATION_DELAY_SECS {
            return Err(ProvisionError::Configuration(format!(
                "propagation_delay must be at most {} seconds, got {}",
                MAX_PROPAGATION_DELAY_SECS, delay_secs
            )));
        }

        if !(MIN_RECORD_TTL..=MAX_RECORD_TTL).contains(&self.record_ttl) {
            return Err(ProvisionError::Configuration(format!(
                "record_ttl must be between {} and {} seconds, got {}",
                MIN_RECORD_TTL, MAX_RECORD_TTL, self.record_ttl
            )));
        }

        for (name, path) in [
            ("sites_available", &self.sites_available),
            ("sites_enabled", &self.sites_enabled),
            ("letsencrypt_dir", &self.letsencrypt_dir),
            ("hook_dir", &self.hook_dir),
            ("webroot_base", &self.webroot_base),
        ] {
            if !path.is_absolute() {
                return Err(ProvisionError::Configuration(format!(
                    "{} must be an absolute path, got {}",
                    name,
                    path.display()
                )));
            }
        }

        Ok(())
    }

    /// Returns the API token for the given provider
    ///
    /// Fails with a configuration error naming the environment variable when
    /// the provider needs a token and none is configured.
    pub fn token_for(&self, provider: DnsProviderKind) -> ProvisionResult<&str> {
        let (token, var) = match provider {
            DnsProviderKind::None => {
                return Err(ProvisionError::Configuration(
                    "Manual DNS mode has no API token".to_string(),
                ))
            }
            DnsProviderKind::Cloudflare => (&self.cloudflare_api_token, ENV_CLOUDFLARE_TOKEN),
            DnsProviderKind::Hetzner => (&self.hetzner_api_token, ENV_HETZNER_TOKEN),
        };
        if token.trim().is_empty() {
            return Err(ProvisionError::Configuration(format!("{} is not set", var)));
        }
        Ok(token.trim())
    }

    /// Canonical `sites-available` path for a domain
    pub fn site_available_path(&self, domain: &str) -> PathBuf {
        self.sites_available.join(domain)
    }

    /// Canonical `sites-enabled` link path for a domain
    pub fn site_enabled_path(&self, domain: &str) -> PathBuf {
        self.sites_enabled.join(domain)
    }

    /// ACME webroot for a domain
    pub fn webroot_for(&self, domain: &str) -> PathBuf {
        self.webroot_base.join(domain)
    }

    /// Directory certbot stores the live certificate of a domain in
    pub fn live_dir(&self, domain: &str) -> PathBuf {
        self.letsencrypt_dir.join("live").join(domain)
    }

    /// Directory of certbot deploy hooks
    pub fn deploy_hook_dir(&self) -> PathBuf {
        self.letsencrypt_dir.join("renewal-hooks").join("deploy")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_secs(key: &str, value: &str) -> ProvisionResult<u64> {
    value.trim().parse().map_err(|_| {
        ProvisionError::Configuration(format!(
            "Invalid {} value: expected seconds, got '{}'",
            key, value
        ))
    })
}

/// Parses a boolean value from an environment variable
///
/// This function accepts multiple string representations of boolean values:
/// - `true`: "1", "true", "yes", "on"
/// - `false`: "0", "false", "no", "off"
fn parse_bool_env(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err("expected boolean (true/false/1/0/yes/no/on/off)".to_string()),
    }
}

/// TOML configuration file structure
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    cloudflare_api_token: Option<String>,
    hetzner_api_token: Option<String>,
    timeout: Option<u64>,
    propagation_delay: Option<u64>,
    record_ttl: Option<u32>,
    verbose: Option<bool>,
    sites_available: Option<PathBuf>,
    sites_enabled: Option<PathBuf>,
    letsencrypt_dir: Option<PathBuf>,
    hook_dir: Option<PathBuf>,
    webroot_base: Option<PathBuf>,
}

//==============================================================================
// Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            let keys = [
                ENV_CLOUDFLARE_TOKEN,
                ENV_HETZNER_TOKEN,
                ENV_TIMEOUT,
                ENV_PROPAGATION_DELAY,
                ENV_VERBOSE,
            ];
            let mut saved = Vec::with_capacity(keys.len());
            for key in keys {
                saved.push((key, std::env::var(key).ok()));
                std::env::remove_var(key);
            }
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                if let Some(val) = value {
                    std::env::set_var(key, val);
                } else {
                    std::env::remove_var(key);
                }
            }
        }
    }

    fn write_config(contents: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).expect("write config");
        (dir, path)
    }

    #[test]
    #[serial]
    fn config_defaults_without_file() {
        let _env = EnvGuard::new();
        let cfg = Config::load(None).expect("config load");
        assert_eq!(cfg.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(
            cfg.propagation_delay,
            Duration::from_secs(DEFAULT_PROPAGATION_DELAY_SECS)
        );
        assert_eq!(cfg.record_ttl, 120);
        assert_eq!(cfg.sites_available, PathBuf::from("/etc/nginx/sites-available"));
        assert!(!cfg.verbose);
    }

    #[test]
    #[serial]
    fn config_missing_file_is_not_an_error() {
        let _env = EnvGuard::new();
        let dir = TempDir::new().expect("temp dir");
        let cfg = Config::load(Some(dir.path().join("absent.toml"))).expect("config load");
        assert_eq!(cfg.record_ttl, DEFAULT_RECORD_TTL);
    }

    #[test]
    #[serial]
    fn config_load_from_file() {
        let _env = EnvGuard::new();
        let (_dir, path) = write_config(
            r#"
hetzner_api_token = "file_hetzner_token"
timeout = 15
propagation_delay = 45
record_ttl = 300
verbose = true
sites_available = "/srv/nginx/available"
hook_dir = "/srv/hooks"
"#,
        );

        let cfg = Config::load(Some(path)).expect("config load");
        assert_eq!(cfg.hetzner_api_token.as_str(), "file_hetzner_token");
        assert_eq!(cfg.timeout, Duration::from_secs(15));
        assert_eq!(cfg.propagation_delay, Duration::from_secs(45));
        assert_eq!(cfg.record_ttl, 300);
        assert!(cfg.verbose);
        assert_eq!(cfg.sites_available, PathBuf::from("/srv/nginx/available"));
        assert_eq!(cfg.hook_dir, PathBuf::from("/srv/hooks"));
        assert_eq!(cfg.sites_enabled, PathBuf::from("/etc/nginx/sites-enabled"));
    }

    #[test]
    #[serial]
    fn config_env_overrides_file() {
        let _env = EnvGuard::new();
        let (_dir, path) = write_config(
            r#"
cloudflare_api_token = "file_cf_token"
timeout = 15
verbose = false
"#,
        );

        std::env::set_var(ENV_CLOUDFLARE_TOKEN, "env_cf_token");
        std::env::set_var(ENV_TIMEOUT, "10");
        std::env::set_var(ENV_VERBOSE, "yes");

        let cfg = Config::load(Some(path)).expect("config load");
        assert_eq!(cfg.cloudflare_api_token.as_str(), "env_cf_token");
        assert_eq!(cfg.timeout, Duration::from_secs(10));
        assert!(cfg.verbose);
    }

    #[test]
    #[serial]
    fn config_empty_env_values() {
        let _env = EnvGuard::new();
        let (_dir, path) = write_config(
            r#"
hetzner_api_token = "file_hetzner_token"
"#,
        );

        std::env::set_var(ENV_HETZNER_TOKEN, "");
        std::env::set_var(ENV_TIMEOUT, "");

        let cfg = Config::load(Some(path)).expect("config load");
        assert_eq!(cfg.hetzner_api_token.as_str(), "file_hetzner_token");
        assert_eq!(cfg.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    #[serial]
    fn config_timeout_boundary_values() {
        let _env = EnvGuard::new();

        for (value, ok) in [(1, true), (120, true), (0, false), (121, false)] {
            let (_dir, path) = write_config(&format!("timeout = {}\n", value));
            let result = Config::load(Some(path));
            assert_eq!(result.is_ok(), ok, "timeout = {}", value);
            if let Err(err) = result {
                assert!(format!("{err}").contains("timeout"));
            }
        }
    }

    #[test]
    #[serial]
    fn config_record_ttl_boundary_values() {
        let _env = EnvGuard::new();

        for (value, ok) in [(60, true), (86400, true), (59, false), (86401, false)] {
            let (_dir, path) = write_config(&format!("record_ttl = {}\n", value));
            let result = Config::load(Some(path));
            assert_eq!(result.is_ok(), ok, "record_ttl = {}", value);
        }
    }

    #[test]
    #[serial]
    fn config_propagation_delay_limits() {
        let _env = EnvGuard::new();
        std::env::set_var(ENV_PROPAGATION_DELAY, "0");
        assert!(Config::load(None).is_ok());

        std::env::set_var(ENV_PROPAGATION_DELAY, "601");
        let err = Config::load(None).expect_err("delay too high");
        assert!(format!("{err}").contains("propagation_delay"));

        std::env::set_var(ENV_PROPAGATION_DELAY, "soon");
        let err = Config::load(None).expect_err("delay not a number");
        assert!(format!("{err}").contains(ENV_PROPAGATION_DELAY));
    }

    #[test]
    #[serial]
    fn config_relative_path_rejected() {
        let _env = EnvGuard::new();
        let (_dir, path) = write_config(
            r#"
webroot_base = "var/www"
"#,
        );
        let err = Config::load(Some(path)).expect_err("relative path");
        assert!(format!("{err}").contains("webroot_base"));
    }

    #[test]
    #[serial]
    fn config_unknown_key_rejected() {
        let _env = EnvGuard::new();
        let (_dir, path) = write_config("zone_id = \"abc\"\n");
        let err = Config::load(Some(path)).expect_err("unknown key");
        assert!(matches!(err, ProvisionError::Configuration(_)));
    }

    #[test]
    #[serial]
    fn config_verbose_variants() {
        let _env = EnvGuard::new();

        for value in ["1", "true", "yes", "on"] {
            std::env::set_var(ENV_VERBOSE, value);
            assert!(Config::load(None).expect("config load").verbose);
        }
        for value in ["0", "false", "no", "off"] {
            std::env::set_var(ENV_VERBOSE, value);
            assert!(!Config::load(None).expect("config load").verbose);
        }

        std::env::set_var(ENV_VERBOSE, "maybe");
        assert!(Config::load(None).is_err());
    }

    #[test]
    #[serial]
    fn config_token_for_provider() {
        let _env = EnvGuard::new();
        std::env::set_var(ENV_HETZNER_TOKEN, "hz-token");

        let cfg = Config::load(None).expect("config load");
        assert_eq!(cfg.token_for(DnsProviderKind::Hetzner).unwrap(), "hz-token");

        let err = cfg.token_for(DnsProviderKind::Cloudflare).unwrap_err();
        assert!(format!("{err}").contains(ENV_CLOUDFLARE_TOKEN));
        assert!(cfg.token_for(DnsProviderKind::None).is_err());
    }

    #[test]
    fn config_layout_paths() {
        let cfg = Config::default();
        assert_eq!(
            cfg.site_available_path("app.example.com"),
            PathBuf::from("/etc/nginx/sites-available/app.example.com")
        );
        assert_eq!(
            cfg.site_enabled_path("app.example.com"),
            PathBuf::from("/etc/nginx/sites-enabled/app.example.com")
        );
        assert_eq!(
            cfg.live_dir("app.example.com"),
            PathBuf::from("/etc/letsencrypt/live/app.example.com")
        );
        assert_eq!(
            cfg.deploy_hook_dir(),
            PathBuf::from("/etc/letsencrypt/renewal-hooks/deploy")
        );
    }
}
