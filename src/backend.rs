//! The application server being fronted
//!
//! Detection reads the systemd unit of the backend service to find its config
//! file, then the `[options]` section of that INI file for the ports. The
//! result is a plain [`BackendRuntime`] value; nothing downstream re-detects.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::constants::{
    DEFAULT_DEPLOY_DATA_DIR, DEFAULT_HTTP_PORT, DEFAULT_SERVICE_PREFIX, DEPLOY_PROFILE_CONFIG,
    PROXY_MODE_DIRECTIVE, SYSTEMD_UNIT_DIRS,
};
use crate::error::{ProvisionError, ProvisionResult};
use crate::system::SystemOps;

//==============================================================================
// Runtime descriptor
//==============================================================================

/// Ports and locations of one backend instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRuntime {
    pub http_port: u16,
    /// Port of the long-polling / websocket worker
    pub longpolling_port: u16,
    /// systemd unit name without `.service`
    pub service_name: Option<String>,
    pub config_file: PathBuf,
}

/// Finds backend services and their configuration
#[derive(Debug, Clone)]
pub struct ServiceLocator {
    unit_dirs: Vec<PathBuf>,
}

impl Default for ServiceLocator {
    fn default() -> Self {
        Self::new(SYSTEMD_UNIT_DIRS.iter().map(PathBuf::from).collect())
    }
}

impl ServiceLocator {
    pub fn new(unit_dirs: Vec<PathBuf>) -> Self {
        Self { unit_dirs }
    }

    /// Unit names (without `.service`) starting with `prefix`, sorted and deduplicated
    pub async fn find_services(&self, prefix: &str) -> ProvisionResult<Vec<String>> {
        let mut services = Vec::new();
        for dir in &self.unit_dirs {
            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ProvisionError::io(dir, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| ProvisionError::io(dir, e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                if let Some(service) = name.strip_suffix(".service") {
                    if service.starts_with(prefix) {
                        services.push(service.to_string());
                    }
                }
            }
        }
        services.sort();
        services.dedup();
        Ok(services)
    }

    /// First unit file named `<service>.service` in search order
    pub async fn unit_file(&self, service: &str) -> ProvisionResult<PathBuf> {
        for dir in &self.unit_dirs {
            let candidate = dir.join(format!("{}.service", service));
            if tokio::fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                return Ok(candidate);
            }
        }
        Err(ProvisionError::Configuration(format!(
            "Service file not found for {}",
            service
        )))
    }

    /// Picks the service to front
    ///
    /// An explicit name wins. Otherwise a single detected service is used,
    /// none yields `None`, and several are ambiguous.
    pub async fn select_service(&self, explicit: Option<&str>) -> ProvisionResult<Option<String>> {
        if let Some(name) = explicit {
            return Ok(Some(name.to_string()));
        }
        let mut found = self.find_services(DEFAULT_SERVICE_PREFIX).await?;
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            _ => Err(ProvisionError::Configuration(format!(
                "Several services detected ({}); choose one with --service",
                found.join(", ")
            ))),
        }
    }

    /// Builds the runtime descriptor
    ///
    /// With a service, the config file comes from `config_override` or from
    /// the unit's `-c`/`--config` argument. Without one, `config_override` is
    /// required.
    pub async fn detect(
        &self,
        service: Option<String>,
        config_override: Option<PathBuf>,
    ) -> ProvisionResult<BackendRuntime> {
        let config_file = match (&service, config_override) {
            (_, Some(path)) => path,
            (Some(name), None) => {
                let unit = self.unit_file(name).await?;
                let content = tokio::fs::read_to_string(&unit)
                    .await
                    .map_err(|e| ProvisionError::io(&unit, e))?;
                config_from_unit(&content).ok_or_else(|| {
                    ProvisionError::Configuration(format!(
                        "Could not find a -c/--config argument in {}",
                        unit.display()
                    ))
                })?
            }
            (None, None) => {
                return Err(ProvisionError::Configuration(
                    "No backend service detected; pass --backend-config".to_string(),
                ))
            }
        };

        let content = tokio::fs::read_to_string(&config_file)
            .await
            .map_err(|e| ProvisionError::io(&config_file, e))?;
        let (http_port, longpolling_port) = parse_ports(&content);
        debug!(
            config = %config_file.display(),
            http_port,
            longpolling_port,
            "Detected backend ports"
        );

        Ok(BackendRuntime {
            http_port,
            longpolling_port,
            service_name: service,
            config_file,
        })
    }
}

/// Extracts the config path from a unit's `-c`, `--config` or `--config=` argument
pub fn config_from_unit(unit: &str) -> Option<PathBuf> {
    let mut tokens = unit.split_whitespace();
    while let Some(token) = tokens.next() {
        let value = match token {
            "-c" | "--config" => tokens.next(),
            _ => token.strip_prefix("--config="),
        };
        if let Some(value) = value {
            let value = value.trim_matches(|c| c == '"' || c == '\'');
            if !value.is_empty() {
                return Some(PathBuf::from(value));
            }
        }
    }
    None
}

/// Reads `(http_port, longpolling_port)` from the `[options]` section
///
/// `longpolling_port` falls back to `gevent_port`, then to `http_port + 1`.
/// Unparseable values count as absent.
pub fn parse_ports(ini: &str) -> (u16, u16) {
    let option = |key: &str| -> Option<u16> { options_value(ini, key)?.parse().ok() };

    let http_port = option("http_port").unwrap_or(DEFAULT_HTTP_PORT);
    let longpolling_port = option("longpolling_port")
        .or_else(|| option("gevent_port"))
        .unwrap_or_else(|| http_port.saturating_add(1));
    (http_port, longpolling_port)
}

fn options_value<'a>(ini: &'a str, key: &str) -> Option<&'a str> {
    let mut in_options = false;
    for line in ini.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') {
            in_options = line == "[options]";
            continue;
        }
        if !in_options {
            continue;
        }
        if let Some((k, v)) = line.split_once('=').or_else(|| line.split_once(':')) {
            if k.trim() == key {
                return Some(v.trim());
            }
        }
    }
    None
}

//==============================================================================
// Mutations
//==============================================================================

/// Makes the backend trust the proxy's forwarded headers
///
/// Appends the directive unless a line already sets it; returns whether the
/// file changed.
pub async fn ensure_proxy_mode(system: &dyn SystemOps, config_file: &Path) -> ProvisionResult<bool> {
    let content = system.read_file(config_file).await?.ok_or_else(|| {
        ProvisionError::Configuration(format!(
            "Backend config file not found: {}",
            config_file.display()
        ))
    })?;

    let present = content
        .lines()
        .any(|line| line.split_whitespace().collect::<String>() == "proxy_mode=True");
    if present {
        debug!("proxy_mode already enabled in {}", config_file.display());
        return Ok(false);
    }

    let mut addition = String::new();
    if !content.is_empty() && !content.ends_with('\n') {
        addition.push('\n');
    }
    addition.push_str(PROXY_MODE_DIRECTIVE);
    addition.push('\n');

    system.append_file(config_file, &addition).await?;
    info!("Enabled proxy_mode in {}", config_file.display());
    Ok(true)
}

pub async fn restart_service(system: &dyn SystemOps, service: &str) -> ProvisionResult<()> {
    system.run_checked("systemctl", &["restart", service]).await?;
    info!("Restarted {}", service);
    Ok(())
}

//==============================================================================
// Tests
//==============================================================================

//==============================================================================
// Deploy profiles
//==============================================================================

#[derive(Debug, Deserialize)]
struct DeployProfile {
    profile_name: Option<String>,
    build_dir: Option<String>,
}

/// Backend config generated from a deploy profile
///
/// The profile is YAML with `profile_name` and an optional `build_dir`
/// (default `~/odoo_deploy_data/<profile_name>`). The config must already
/// exist at `<build_dir>/docker/etc/odoo.conf`.
pub async fn config_from_deploy_profile(profile: &Path) -> ProvisionResult<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let profile = expand_home(&profile.to_string_lossy(), home.as_deref());

    let content = tokio::fs::read_to_string(&profile)
        .await
        .map_err(|e| ProvisionError::io(&profile, e))?;
    let parsed: DeployProfile = serde_yaml::from_str(&content).map_err(|e| {
        ProvisionError::Configuration(format!(
            "Invalid deploy profile {}: {}",
            profile.display(),
            e
        ))
    })?;

    let name = parsed
        .profile_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| {
            ProvisionError::Configuration(format!(
                "Missing profile_name in {}",
                profile.display()
            ))
        })?;
    let build_dir = parsed
        .build_dir
        .unwrap_or_else(|| format!("{}/{}", DEFAULT_DEPLOY_DATA_DIR, name));
    let config = expand_home(&build_dir, home.as_deref()).join(DEPLOY_PROFILE_CONFIG);

    match tokio::fs::metadata(&config).await {
        Ok(meta) if meta.is_file() => {
            debug!(profile = %name, config = %config.display(), "Resolved deploy profile");
            Ok(config)
        }
        _ => Err(ProvisionError::Configuration(format!(
            "Config {} of deploy profile {} not found; build the profile first",
            config.display(),
            name
        ))),
    }
}

/// Replaces a leading `~` with `home`
fn expand_home(path: &str, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home.to_path_buf(),
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(&rest[1..]),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::HostSystem;
    use tempfile::TempDir;

    #[test]
    fn test_config_from_unit() {
        let unit = "[Service]\nExecStart=/opt/odoo/odoo-bin -c /etc/odoo/odoo.conf --logfile x\n";
        assert_eq!(config_from_unit(unit), Some(PathBuf::from("/etc/odoo/odoo.conf")));

        let unit = "ExecStart=/usr/bin/odoo --config=\"/etc/odoo19.conf\"";
        assert_eq!(config_from_unit(unit), Some(PathBuf::from("/etc/odoo19.conf")));

        let unit = "ExecStart=/usr/bin/odoo --config /srv/odoo.conf";
        assert_eq!(config_from_unit(unit), Some(PathBuf::from("/srv/odoo.conf")));

        assert_eq!(config_from_unit("ExecStart=/usr/bin/odoo"), None);
    }

    #[test]
    fn test_parse_ports_defaults() {
        assert_eq!(parse_ports(""), (8069, 8070));
        assert_eq!(parse_ports("[options]\nhttp_port = 9000\n"), (9000, 9001));
    }

    #[test]
    fn test_parse_ports_fallback_chain() {
        let ini = "[options]\nhttp_port = 8069\nlongpolling_port = 8072\ngevent_port = 8090\n";
        assert_eq!(parse_ports(ini), (8069, 8072));

        let ini = "[options]\nhttp_port = 8069\ngevent_port = 8090\n";
        assert_eq!(parse_ports(ini), (8069, 8090));

        let ini = "[options]\nlongpolling_port = False\ngevent_port = 8090\n";
        assert_eq!(parse_ports(ini), (8069, 8090));
    }

    #[test]
    fn test_parse_ports_only_options_section() {
        let ini = "[other]\nhttp_port = 1\n; comment\n[options]\nhttp_port: 8080\n";
        assert_eq!(parse_ports(ini), (8080, 8081));
    }

    #[tokio::test]
    async fn test_find_services_and_select() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        std::fs::write(first.path().join("odoo19.service"), "").unwrap();
        std::fs::write(first.path().join("nginx.service"), "").unwrap();
        std::fs::write(second.path().join("odoo19.service"), "").unwrap();

        let locator = ServiceLocator::new(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
            PathBuf::from("/nonexistent/units"),
        ]);
        assert_eq!(locator.find_services("odoo").await.unwrap(), vec!["odoo19"]);
        assert_eq!(
            locator.select_service(None).await.unwrap().as_deref(),
            Some("odoo19")
        );

        std::fs::write(second.path().join("odoo-staging.service"), "").unwrap();
        let err = locator.select_service(None).await.unwrap_err();
        assert!(format!("{err}").contains("odoo-staging, odoo19"));

        assert_eq!(
            locator.select_service(Some("custom")).await.unwrap().as_deref(),
            Some("custom")
        );
    }

    #[tokio::test]
    async fn test_detect_from_unit() {
        let units = TempDir::new().unwrap();
        let conf = units.path().join("odoo.conf");
        std::fs::write(&conf, "[options]\nhttp_port = 8069\ngevent_port = 8072\n").unwrap();
        std::fs::write(
            units.path().join("odoo19.service"),
            format!("[Service]\nExecStart=/usr/bin/odoo -c {}\n", conf.display()),
        )
        .unwrap();

        let locator = ServiceLocator::new(vec![units.path().to_path_buf()]);
        let runtime = locator.detect(Some("odoo19".to_string()), None).await.unwrap();
        assert_eq!(
            runtime,
            BackendRuntime {
                http_port: 8069,
                longpolling_port: 8072,
                service_name: Some("odoo19".to_string()),
                config_file: conf,
            }
        );
    }

    #[tokio::test]
    async fn test_detect_requires_config_without_service() {
        let locator = ServiceLocator::new(vec![]);
        let err = locator.detect(None, None).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Configuration(_)));

        let err = locator
            .detect(Some("missing".to_string()), None)
            .await
            .unwrap_err();
        assert!(format!("{err}").contains("missing"));
    }

    #[tokio::test]
    async fn test_ensure_proxy_mode_idempotent() {
        let dir = TempDir::new().unwrap();
        let conf = dir.path().join("odoo.conf");
        std::fs::write(&conf, "[options]\nhttp_port = 8069").unwrap();
        let system = HostSystem::new(false);

        assert!(ensure_proxy_mode(&system, &conf).await.unwrap());
        assert_eq!(
            std::fs::read_to_string(&conf).unwrap(),
            "[options]\nhttp_port = 8069\nproxy_mode = True\n"
        );
        assert!(!ensure_proxy_mode(&system, &conf).await.unwrap());

        std::fs::write(&conf, "[options]\nproxy_mode=True\n").unwrap();
        assert!(!ensure_proxy_mode(&system, &conf).await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_proxy_mode_missing_file() {
        let dir = TempDir::new().unwrap();
        let system = HostSystem::new(false);
        assert!(ensure_proxy_mode(&system, &dir.path().join("absent.conf"))
            .await
            .is_err());
    }

    #[test]
    fn test_expand_home() {
        let home = Path::new("/home/deploy");
        assert_eq!(
            expand_home("~/odoo_deploy_data/prod", Some(home)),
            PathBuf::from("/home/deploy/odoo_deploy_data/prod")
        );
        assert_eq!(expand_home("~", Some(home)), PathBuf::from("/home/deploy"));
        assert_eq!(expand_home("/srv/build", Some(home)), PathBuf::from("/srv/build"));
        assert_eq!(expand_home("~other/x", Some(home)), PathBuf::from("~other/x"));
        assert_eq!(expand_home("~/x", None), PathBuf::from("~/x"));
    }

    #[tokio::test]
    async fn test_deploy_profile_resolves_config() {
        let dir = TempDir::new().unwrap();
        let build = dir.path().join("build");
        std::fs::create_dir_all(build.join("docker/etc")).unwrap();
        std::fs::write(build.join("docker/etc/odoo.conf"), "[options]\n").unwrap();

        let profile = dir.path().join("profile.yaml");
        std::fs::write(
            &profile,
            format!("profile_name: prod\nbuild_dir: {}\n", build.display()),
        )
        .unwrap();

        assert_eq!(
            config_from_deploy_profile(&profile).await.unwrap(),
            build.join("docker/etc/odoo.conf")
        );
    }

    #[tokio::test]
    async fn test_deploy_profile_errors() {
        let dir = TempDir::new().unwrap();

        let nameless = dir.path().join("nameless.yaml");
        std::fs::write(&nameless, "build_dir: /srv/build\n").unwrap();
        let err = config_from_deploy_profile(&nameless).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Configuration(_)));
        assert!(err.to_string().contains("profile_name"));

        let unbuilt = dir.path().join("unbuilt.yaml");
        std::fs::write(
            &unbuilt,
            format!("profile_name: prod\nbuild_dir: {}\n", dir.path().join("missing").display()),
        )
        .unwrap();
        let err = config_from_deploy_profile(&unbuilt).await.unwrap_err();
        assert!(err.to_string().contains("build the profile first"));

        let err = config_from_deploy_profile(&dir.path().join("absent.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Io { .. }));
    }
}
