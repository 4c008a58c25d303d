//! Certificate issuance through certbot
//!
//! certbot runs non-interactively and keeps an existing valid certificate,
//! so re-running a provisioning is cheap. Renewal is left to certbot's own
//! timer; this module only registers a deploy hook that reloads nginx.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::constants::DEPLOY_HOOK_NAME;
use crate::error::{ProvisionError, ProvisionResult};
use crate::hook::HookPaths;
use crate::system::{display_command, SystemOps};

/// How control of the domain is proven
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeMode {
    /// HTTP-01 served by nginx from the ACME webroot
    Http01 { webroot: PathBuf },
    /// DNS-01 through the manual plugin and generated hook units
    Dns01 { hooks: HookPaths },
}

/// One certbot invocation
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub domain: String,
    pub email: String,
    /// Also request `*.<domain>`; only honoured in DNS-01 mode
    pub wildcard: bool,
    pub mode: ChallengeMode,
}

impl CertificateRequest {
    /// Names the certificate will cover, in request order
    pub fn names(&self) -> Vec<String> {
        let mut names = vec![self.domain.clone()];
        if self.wildcard && matches!(self.mode, ChallengeMode::Dns01 { .. }) {
            names.push(format!("*.{}", self.domain));
        }
        names
    }

    /// certbot argument vector for this request
    pub fn certbot_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["certonly".into()];

        match &self.mode {
            ChallengeMode::Http01 { webroot } => {
                args.extend([
                    "--webroot".into(),
                    "-w".into(),
                    webroot.display().to_string(),
                ]);
            }
            ChallengeMode::Dns01 { hooks } => {
                args.extend([
                    "--manual".into(),
                    "--preferred-challenges".into(),
                    "dns".into(),
                    "--manual-auth-hook".into(),
                    hooks.auth.display().to_string(),
                    "--manual-cleanup-hook".into(),
                    hooks.cleanup.display().to_string(),
                ]);
            }
        }

        args.extend([
            "--non-interactive".into(),
            "--agree-tos".into(),
            "--keep-until-expiring".into(),
            "-m".into(),
            self.email.clone(),
        ]);

        for name in self.names() {
            args.push("-d".into());
            args.push(name);
        }
        args
    }
}

/// Drives certbot for issuance and renewal registration
pub struct CertificateIssuer<'a> {
    system: &'a dyn SystemOps,
}

impl<'a> CertificateIssuer<'a> {
    pub fn new(system: &'a dyn SystemOps) -> Self {
        Self { system }
    }

    /// Runs certbot once for the request
    ///
    /// A non-zero exit becomes [`ProvisionError::CertificateIssuanceFailed`]
    /// carrying certbot's own status and stderr. There is no fallback to the
    /// other challenge type.
    pub async fn issue(&self, request: &CertificateRequest) -> ProvisionResult<()> {
        if request.wildcard && matches!(request.mode, ChallengeMode::Http01 { .. }) {
            warn!("Wildcard ignored for HTTP-01 request of {}", request.domain);
        }

        let args = request.certbot_args();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        info!("Requesting certificate for {}", request.names().join(", "));

        let output = self.system.run("certbot", &args).await?;
        if !output.success() {
            return Err(ProvisionError::CertificateIssuanceFailed(format!(
                "`{}` failed with {}",
                display_command("certbot", &args),
                output.failure_message()
            )));
        }

        info!("Certificate for {} is in place", request.domain);
        Ok(())
    }

    /// Installs the nginx reload deploy hook and enables the renewal timer
    ///
    /// Safe to repeat: the hook file is rewritten with identical content.
    pub async fn ensure_auto_renewal(&self, deploy_hook_dir: &Path) -> ProvisionResult<PathBuf> {
        let hook_path = deploy_hook_dir.join(DEPLOY_HOOK_NAME);
        let hook = "#!/bin/bash\nset -euo pipefail\nsystemctl reload nginx\n";

        self.system.create_dir_all(deploy_hook_dir).await?;
        self.system.write_file(&hook_path, hook, 0o755).await?;
        self.system
            .run_checked("systemctl", &["enable", "--now", "certbot.timer"])
            .await?;

        info!("Auto-renewal enabled (deploy hook {})", hook_path.display());
        Ok(hook_path)
    }
}
