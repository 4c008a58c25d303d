//! ufw rules for the proxied host

use tracing::info;

use crate::error::ProvisionResult;
use crate::system::SystemOps;

/// Which backend ports stay reachable without the proxy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirewallOptions {
    pub allow_backend_port: bool,
    pub allow_longpolling_port: bool,
}

/// Installs ufw, opens SSH and nginx, optionally the backend ports, then enables it
pub async fn configure_ufw(
    system: &dyn SystemOps,
    options: FirewallOptions,
    http_port: u16,
    longpolling_port: u16,
) -> ProvisionResult<()> {
    system.run_checked("apt", &["install", "-y", "ufw"]).await?;
    system.run_checked("ufw", &["allow", "22/tcp"]).await?;
    system.run_checked("ufw", &["allow", "Nginx Full"]).await?;

    if options.allow_backend_port {
        let rule = format!("{}/tcp", http_port);
        system.run_checked("ufw", &["allow", &rule]).await?;
    }
    if options.allow_longpolling_port {
        let rule = format!("{}/tcp", longpolling_port);
        system.run_checked("ufw", &["allow", &rule]).await?;
    }

    system.run_checked("ufw", &["--force", "enable"]).await?;
    info!("Firewall enabled");
    Ok(())
}
