//! Common constants used throughout the tlsfront application

//==============================================================================
// DNS Provider API Constants
//==============================================================================

/// Cloudflare API base URL
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Hetzner Cloud API base URL (DNS zones and rrsets)
pub const HETZNER_API_BASE: &str = "https://api.hetzner.cloud/v1";

/// User agent string for outbound API requests
pub const USER_AGENT: &str = "tlsfront/1.0";

/// Default TTL for upserted records in seconds
pub const DEFAULT_RECORD_TTL: u32 = 120;

/// Minimum accepted record TTL in seconds
pub const MIN_RECORD_TTL: u32 = 60;

/// Maximum accepted record TTL in seconds
pub const MAX_RECORD_TTL: u32 = 86_400;

/// Record name used for DNS-01 challenges
pub const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

/// Placeholder for the zone apex in relative record names
pub const ZONE_APEX: &str = "@";

//==============================================================================
// Public Address Lookup
//==============================================================================

/// Endpoint returning the public IPv4 address as plain text
pub const IPIFY_V4_URL: &str = "https://api.ipify.org";

/// Endpoint returning the public IPv6 address as plain text (dual stack)
pub const IPIFY_V6_URL: &str = "https://api64.ipify.org";

/// Timeout for public address lookups in seconds
pub const ADDRESS_LOOKUP_TIMEOUT_SECS: u64 = 10;

//==============================================================================
// Timeout and Delay Constants
//==============================================================================

/// Default HTTP request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Minimum HTTP request timeout in seconds
pub const MIN_TIMEOUT_SECS: u64 = 1;

/// Maximum HTTP request timeout in seconds
pub const MAX_TIMEOUT_SECS: u64 = 120;

/// Default time the DNS-01 authorization hook waits for propagation
pub const DEFAULT_PROPAGATION_DELAY_SECS: u64 = 20;

/// Maximum propagation delay in seconds
pub const MAX_PROPAGATION_DELAY_SECS: u64 = 600;

//==============================================================================
// Filesystem Layout Defaults
//==============================================================================

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tlsfront/config.toml";

/// Directory holding every nginx site definition
pub const DEFAULT_SITES_AVAILABLE: &str = "/etc/nginx/sites-available";

/// Directory holding links to the active nginx site definitions
pub const DEFAULT_SITES_ENABLED: &str = "/etc/nginx/sites-enabled";

/// Root of the certbot configuration tree
pub const DEFAULT_LETSENCRYPT_DIR: &str = "/etc/letsencrypt";

/// Directory for DNS-01 hook units and their credential files
pub const DEFAULT_HOOK_DIR: &str = "/etc/letsencrypt/tlsfront";

/// Parent directory of per-domain ACME webroots
pub const DEFAULT_WEBROOT_BASE: &str = "/var/www";

/// File name of the renewal deploy hook
pub const DEPLOY_HOOK_NAME: &str = "tlsfront-reload-nginx.sh";

/// Directories searched for systemd unit files
pub const SYSTEMD_UNIT_DIRS: [&str; 3] = [
    "/etc/systemd/system",
    "/lib/systemd/system",
    "/usr/lib/systemd/system",
];

/// Unit name prefix used when auto-detecting the backend service
pub const DEFAULT_SERVICE_PREFIX: &str = "odoo";

//==============================================================================
// Backend Defaults
//==============================================================================

/// Default backend HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 8069;

/// Default backend host for upstream definitions
pub const DEFAULT_BACKEND_HOST: &str = "127.0.0.1";

/// Directive that makes the backend trust forwarded headers
pub const PROXY_MODE_DIRECTIVE: &str = "proxy_mode = True";

/// Parent of deploy profile build directories when a profile sets none
pub const DEFAULT_DEPLOY_DATA_DIR: &str = "~/odoo_deploy_data";

/// Backend config location inside a deploy profile build directory
pub const DEPLOY_PROFILE_CONFIG: &str = "docker/etc/odoo.conf";

//==============================================================================
// Environment Variable Names
//==============================================================================

/// Environment variable name for the Cloudflare API token
pub const ENV_CLOUDFLARE_TOKEN: &str = "CLOUDFLARE_API_TOKEN";

/// Environment variable name for the Hetzner DNS API token
pub const ENV_HETZNER_TOKEN: &str = "HETZNER_DNS_API_TOKEN";

/// Environment variable name for the HTTP timeout
pub const ENV_TIMEOUT: &str = "TLSFRONT_TIMEOUT";

/// Environment variable name for the DNS-01 propagation delay
pub const ENV_PROPAGATION_DELAY: &str = "TLSFRONT_PROPAGATION_DELAY";

/// Environment variable name for verbose logging
pub const ENV_VERBOSE: &str = "TLSFRONT_VERBOSE";
