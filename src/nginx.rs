//! nginx site configuration for one domain
//!
//! A domain moves through two configurations at one canonical path:
//! the ACME bootstrap (plain HTTP, serves the challenge webroot) and the final
//! HTTPS front (TLS termination, proxying to the backend). Each switch writes
//! the file, validates the whole nginx configuration and only then reloads.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ProvisionError, ProvisionResult};
use crate::system::SystemOps;
use crate::validation::slug;

//==============================================================================
// Rendering
//==============================================================================

/// Headers forwarded to the backend on every proxied location
const FORWARD_HEADERS: &str = "    proxy_set_header Host $host;
    proxy_set_header X-Forwarded-Host $host;
    proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
    proxy_set_header X-Forwarded-Proto $scheme;
    proxy_set_header X-Real-IP $remote_addr;
";

/// Parameters of the final HTTPS site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpsSite {
    pub backend_host: String,
    pub http_port: u16,
    pub longpolling_port: u16,
    /// Route the long-polling and websocket paths to the main upstream
    pub single_upstream: bool,
    /// Directory holding `fullchain.pem` and `privkey.pem`
    pub cert_dir: PathBuf,
}

/// The two site configurations a domain goes through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteConfig {
    Acme { webroot: PathBuf },
    Https(HttpsSite),
}

impl SiteConfig {
    pub fn state(&self) -> ProxyState {
        match self {
            SiteConfig::Acme { .. } => ProxyState::Acme,
            SiteConfig::Https(_) => ProxyState::Https,
        }
    }

    pub fn render(&self, domain: &str) -> String {
        match self {
            SiteConfig::Acme { webroot } => render_acme_config(domain, webroot),
            SiteConfig::Https(site) => render_https_config(domain, site),
        }
    }
}

/// Bootstrap site: serves the challenge path, redirects everything else
pub fn render_acme_config(domain: &str, webroot: &Path) -> String {
    format!(
        "server {{
    listen 80;
    listen [::]:80;
    server_name {domain};

    location /.well-known/acme-challenge/ {{
        root {webroot};
    }}

    location / {{
        return 301 https://$host$request_uri;
    }}
}}
",
        domain = domain,
        webroot = webroot.display(),
    )
}

/// Final site: HTTP redirect plus the TLS-terminating proxy
pub fn render_https_config(domain: &str, site: &HttpsSite) -> String {
    let up = slug(domain);
    let backend = format!("{}_backend", up);
    let longpolling = if site.single_upstream {
        backend.clone()
    } else {
        format!("{}_longpolling", up)
    };

    let mut out = format!(
        "upstream {backend} {{
    server {host}:{port};
}}
",
        backend = backend,
        host = site.backend_host,
        port = site.http_port,
    );
    if !site.single_upstream {
        out.push_str(&format!(
            "
upstream {longpolling} {{
    server {host}:{port};
}}
",
            longpolling = longpolling,
            host = site.backend_host,
            port = site.longpolling_port,
        ));
    }

    out.push_str(&format!(
        "
server {{
    listen 80;
    listen [::]:80;
    server_name {domain};
    return 301 https://$host$request_uri;
}}

server {{
    listen 443 ssl http2;
    listen [::]:443 ssl http2;
    server_name {domain};

    ssl_certificate {cert_dir}/fullchain.pem;
    ssl_certificate_key {cert_dir}/privkey.pem;

    client_max_body_size 500M;
    proxy_read_timeout 720s;
    proxy_connect_timeout 720s;
    proxy_send_timeout 720s;

{headers}
    location / {{
        proxy_pass http://{backend};
        proxy_redirect off;
    }}

    location /longpolling {{
        proxy_pass http://{longpolling};
    }}

    location /websocket {{
        proxy_pass http://{longpolling};
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection \"upgrade\";
{location_headers}    }}

    location ~* /web/static/ {{
        proxy_cache_valid 200 90m;
        expires 864000;
        proxy_pass http://{backend};
    }}

    gzip on;
    gzip_types text/css text/less text/plain text/xml application/xml application/json application/javascript;
}}
",
        domain = domain,
        cert_dir = site.cert_dir.display(),
        headers = FORWARD_HEADERS,
        // a location with its own proxy_set_header does not inherit the server's
        location_headers = indent(FORWARD_HEADERS, "    "),
        backend = backend,
        longpolling = longpolling,
    ));
    out
}

fn indent(block: &str, prefix: &str) -> String {
    block
        .lines()
        .map(|line| format!("{}{}\n", prefix, line))
        .collect()
}

//==============================================================================
// Switcher
//==============================================================================

/// Which configuration currently serves a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProxyState {
    None,
    Acme,
    Https,
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyState::None => f.write_str("none"),
            ProxyState::Acme => f.write_str("acme"),
            ProxyState::Https => f.write_str("https"),
        }
    }
}

/// Installs site configurations for one domain with validate-before-reload
pub struct ProxyConfigSwitcher<'a> {
    system: &'a dyn SystemOps,
    domain: String,
    available: PathBuf,
    enabled: PathBuf,
    sites_enabled: PathBuf,
    state: ProxyState,
}

impl<'a> ProxyConfigSwitcher<'a> {
    pub fn new(system: &'a dyn SystemOps, config: &Config, domain: &str) -> Self {
        Self {
            system,
            domain: domain.to_string(),
            available: config.site_available_path(domain),
            enabled: config.site_enabled_path(domain),
            sites_enabled: config.sites_enabled.clone(),
            state: ProxyState::None,
        }
    }

    pub fn state(&self) -> ProxyState {
        self.state
    }

    pub fn available_path(&self) -> &Path {
        &self.available
    }

    pub fn enabled_path(&self) -> &Path {
        &self.enabled
    }

    /// Creates the site directories and drops the distribution's default site
    pub async fn prepare(&self) -> ProvisionResult<()> {
        if let Some(dir) = self.available.parent() {
            self.system.create_dir_all(dir).await?;
        }
        self.system.create_dir_all(&self.sites_enabled).await?;
        self.system
            .remove_file(&self.sites_enabled.join("default"))
            .await
    }

    /// Switches the domain to `site`
    ///
    /// Writes the canonical file, makes sure the enabled link points at it,
    /// runs `nginx -t` and reloads. When validation fails the previous file
    /// content is put back (or the new file and link are removed if there was
    /// none), so the configuration nginx keeps serving is the one on disk.
    pub async fn apply(&mut self, site: &SiteConfig) -> ProvisionResult<ProxyState> {
        let next = site.state();
        if next < self.state {
            return Err(ProvisionError::Configuration(format!(
                "Refusing to switch {} from {} back to {}",
                self.domain, self.state, next
            )));
        }

        let previous = self.system.read_file(&self.available).await?;
        let content = site.render(&self.domain);

        info!("Writing {} config for {}", next, self.domain);
        self.system.write_file(&self.available, &content, 0o644).await?;
        self.system.symlink(&self.available, &self.enabled).await?;

        if let Err(message) = self.validate().await {
            warn!("nginx rejected the {} config for {}: {}", next, self.domain, message);
            if let Err(e) = self.restore(previous).await {
                warn!("Could not restore the previous config for {}: {}", self.domain, e);
                return Err(ProvisionError::ProxyValidationFailed(format!(
                    "{}; restoring the previous config also failed: {}",
                    message, e
                )));
            }
            return Err(ProvisionError::ProxyValidationFailed(message));
        }

        self.reload().await?;
        self.state = next;
        info!("nginx now serves the {} config for {}", next, self.domain);
        Ok(next)
    }

    async fn validate(&self) -> Result<(), String> {
        match self.system.run("nginx", &["-t"]).await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(output.failure_message()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn reload(&self) -> ProvisionResult<()> {
        let output = self.system.run("systemctl", &["reload", "nginx"]).await?;
        if !output.success() {
            return Err(ProvisionError::ProxyReloadFailed(output.failure_message()));
        }
        debug!("nginx reloaded");
        Ok(())
    }

    async fn restore(&self, previous: Option<String>) -> ProvisionResult<()> {
        match previous {
            Some(content) => {
                self.system
                    .write_file(&self.available, &content, 0o644)
                    .await?;
                debug!("Restored previous config at {}", self.available.display());
            }
            None => {
                self.system.remove_file(&self.enabled).await?;
                self.system.remove_file(&self.available).await?;
                debug!("Removed rejected config at {}", self.available.display());
            }
        }
        Ok(())
    }
}

//==============================================================================
// Tests
//==============================================================================
