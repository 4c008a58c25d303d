//! End-to-end provisioning of one domain in front of one backend
//!
//! Stages run strictly in order and each must succeed before the next starts:
//! packages, DNS records, ACME bootstrap config, certificate, HTTPS config,
//! auto-renewal, backend proxy mode, backend restart, firewall. A failure
//! leaves the effects of earlier stages in place.

use std::fmt;
use std::io::Write;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::backend::{ensure_proxy_mode, restart_service, BackendRuntime};
use crate::certbot::{CertificateIssuer, CertificateRequest, ChallengeMode};
use crate::cloudflare::CloudflareClient;
use crate::config::Config;
use crate::constants::DEFAULT_BACKEND_HOST;
use crate::dns_provider::{
    challenge_record_name, DnsProviderKind, DnsRecordStore, RecordType, ZoneRef,
};
use crate::error::{ProvisionError, ProvisionResult};
use crate::firewall::{configure_ufw, FirewallOptions};
use crate::hetzner::HetznerClient;
use crate::hook::ChallengeHookGenerator;
use crate::nginx::{HttpsSite, ProxyConfigSwitcher, ProxyState, SiteConfig};
use crate::public_ip::{AddressLookup, IpMode, PublicAddresses};
use crate::system::SystemOps;
use crate::validation::{validate_domain, validate_email};

//==============================================================================
// Operator interaction
//==============================================================================

/// Yes/no questions put to the operator
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Asks `question`; an empty answer means `default`
    async fn confirm(&self, question: &str, default: bool) -> ProvisionResult<bool>;
}

/// Prompts on the terminal
pub struct StdinPrompter;

#[async_trait]
impl Prompter for StdinPrompter {
    async fn confirm(&self, question: &str, default: bool) -> ProvisionResult<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        print!("{} {} ", question, hint);
        std::io::stdout()
            .flush()
            .map_err(|e| ProvisionError::Aborted(format!("cannot prompt: {}", e)))?;

        let mut answer = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut answer)
            .await
            .map_err(|e| ProvisionError::Aborted(format!("cannot read answer: {}", e)))?;

        Ok(match answer.trim().to_ascii_lowercase().as_str() {
            "" => default,
            "y" | "yes" => true,
            _ => false,
        })
    }
}

//==============================================================================
// Run inputs and outputs
//==============================================================================

/// Challenge used to prove control of the domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChallengeType {
    #[default]
    Http01,
    Dns01,
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChallengeType::Http01 => "HTTP-01",
            ChallengeType::Dns01 => "DNS-01",
        })
    }
}

/// Operator choices for one `init` run
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub domain: String,
    pub email: String,
    pub provider: DnsProviderKind,
    pub ip_mode: IpMode,
    pub challenge: ChallengeType,
    /// Also cover `*.<domain>`; DNS-01 only
    pub wildcard: bool,
    pub single_upstream: bool,
    pub backend_host: String,
    /// `None` asks the operator when a service is known
    pub restart_service: Option<bool>,
    /// `None` leaves the firewall alone
    pub firewall: Option<FirewallOptions>,
    pub skip_install: bool,
    pub skip_proxy_mode: bool,
}

impl InitOptions {
    /// Defaults for `domain`: contact `admin@<domain>`, manual DNS, HTTP-01
    ///
    /// The domain is lowercased so certbot, nginx, file names and the DNS-01
    /// hook units all see the same form.
    pub fn new(domain: impl Into<String>) -> Self {
        let domain: String = domain.into();
        let domain = domain.trim().to_ascii_lowercase();
        Self {
            email: format!("admin@{}", domain),
            domain,
            provider: DnsProviderKind::None,
            ip_mode: IpMode::default(),
            challenge: ChallengeType::default(),
            wildcard: false,
            single_upstream: false,
            backend_host: DEFAULT_BACKEND_HOST.to_string(),
            restart_service: None,
            firewall: None,
            skip_install: false,
            skip_proxy_mode: false,
        }
    }
}

/// One A/AAAA record written during the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertedRecord {
    pub record_type: RecordType,
    pub name: String,
    pub value: String,
}

/// What a successful run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub domain: String,
    /// Zone used for records and challenges; `None` in manual DNS mode
    pub zone: Option<ZoneRef>,
    pub records: Vec<UpsertedRecord>,
    /// Relative name of the DNS-01 TXT record inside `zone`
    pub challenge_record: Option<String>,
    pub certificate_names: Vec<String>,
    pub proxy_state: ProxyState,
    pub proxy_mode_changed: bool,
    pub service_restarted: bool,
}

impl RunReport {
    fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            zone: None,
            records: Vec::new(),
            challenge_record: None,
            certificate_names: Vec::new(),
            proxy_state: ProxyState::None,
            proxy_mode_changed: false,
            service_restarted: false,
        }
    }
}

//==============================================================================
// Orchestrator
//==============================================================================

/// Builds the record store for an automated provider
pub fn build_store(
    provider: DnsProviderKind,
    config: &Config,
) -> ProvisionResult<Box<dyn DnsRecordStore>> {
    match provider {
        DnsProviderKind::Cloudflare => Ok(Box::new(CloudflareClient::new(
            config.token_for(provider)?,
            config.timeout,
        )?)),
        DnsProviderKind::Hetzner => Ok(Box::new(HetznerClient::new(
            config.token_for(provider)?,
            config.timeout,
        )?)),
        DnsProviderKind::None => Err(ProvisionError::Configuration(
            "Manual DNS mode has no record store".to_string(),
        )),
    }
}

/// Sequences one provisioning run
pub struct Orchestrator<'a> {
    config: &'a Config,
    system: &'a dyn SystemOps,
    lookup: &'a dyn AddressLookup,
    prompter: &'a dyn Prompter,
    dns_store: Option<Box<dyn DnsRecordStore>>,
    hook_api_base: Option<String>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        system: &'a dyn SystemOps,
        lookup: &'a dyn AddressLookup,
        prompter: &'a dyn Prompter,
    ) -> Self {
        Self {
            config,
            system,
            lookup,
            prompter,
            dns_store: None,
            hook_api_base: None,
        }
    }

    /// Uses `store` instead of building one from the selected provider
    pub fn with_dns_store(mut self, store: Box<dyn DnsRecordStore>) -> Self {
        self.dns_store = Some(store);
        self
    }

    /// API base written into the DNS-01 hook units
    pub fn with_hook_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.hook_api_base = Some(api_base.into());
        self
    }

    /// Runs every stage for `options` against `runtime`
    ///
    /// # Errors
    ///
    /// Precondition failures are [`ProvisionError::Configuration`] or
    /// [`ProvisionError::Aborted`] and happen before any side effect. Later
    /// errors come from the failing stage and leave earlier stages applied.
    pub async fn run(
        &self,
        options: &InitOptions,
        runtime: &BackendRuntime,
    ) -> ProvisionResult<RunReport> {
        let addresses = self.preflight(options).await?;
        let domain = options.domain.as_str();
        let mut report = RunReport::new(domain);

        if options.skip_install {
            info!("Skipping package installation");
        } else {
            self.install_tooling().await?;
        }

        let built;
        let store: Option<&dyn DnsRecordStore> = match (&self.dns_store, options.provider) {
            (_, DnsProviderKind::None) => None,
            (Some(store), _) => Some(store.as_ref()),
            (None, provider) => {
                built = build_store(provider, self.config)?;
                Some(built.as_ref())
            }
        };

        if let Some(store) = store {
            self.provision_records(store, domain, addresses, &mut report)
                .await?;
        }

        let mut switcher = ProxyConfigSwitcher::new(self.system, self.config, domain);
        switcher.prepare().await?;
        let webroot = self.config.webroot_for(domain);
        self.system.create_dir_all(&webroot).await?;
        info!("Installing ACME bootstrap config for {}", domain);
        report.proxy_state = switcher
            .apply(&SiteConfig::Acme {
                webroot: webroot.clone(),
            })
            .await?;

        let mode = match options.challenge {
            ChallengeType::Http01 => ChallengeMode::Http01 { webroot },
            ChallengeType::Dns01 => {
                let zone = report.zone.as_ref().ok_or_else(|| {
                    ProvisionError::Configuration(
                        "DNS-01 requires a DNS provider with hook support".to_string(),
                    )
                })?;
                let record = challenge_record_name(domain, &zone.name);
                info!("DNS-01 challenge record will be {} in zone {}", record, zone.name);
                report.challenge_record = Some(record);

                let mut generator = ChallengeHookGenerator::new(
                    self.system,
                    self.config.hook_dir.clone(),
                    self.config.propagation_delay,
                    self.config.record_ttl,
                );
                if let Some(api_base) = &self.hook_api_base {
                    generator = generator.with_api_base(api_base.clone());
                }
                let token = self.config.token_for(options.provider)?;
                ChallengeMode::Dns01 {
                    hooks: generator.install(domain, token).await?,
                }
            }
        };

        let request = CertificateRequest {
            domain: domain.to_string(),
            email: options.email.clone(),
            wildcard: options.wildcard,
            mode,
        };
        report.certificate_names = request.names();
        let issuer = CertificateIssuer::new(self.system);
        info!("Issuing certificate with {}", options.challenge);
        issuer.issue(&request).await?;

        info!("Installing HTTPS config for {}", domain);
        report.proxy_state = switcher
            .apply(&SiteConfig::Https(HttpsSite {
                backend_host: options.backend_host.clone(),
                http_port: runtime.http_port,
                longpolling_port: runtime.longpolling_port,
                single_upstream: options.single_upstream,
                cert_dir: self.config.live_dir(domain),
            }))
            .await?;

        issuer
            .ensure_auto_renewal(&self.config.deploy_hook_dir())
            .await?;

        if options.skip_proxy_mode {
            info!("Leaving backend config untouched");
        } else {
            report.proxy_mode_changed = ensure_proxy_mode(self.system, &runtime.config_file).await?;
        }

        report.service_restarted = self.maybe_restart(options, runtime).await?;

        if let Some(firewall) = options.firewall {
            info!("Configuring firewall");
            configure_ufw(
                self.system,
                firewall,
                runtime.http_port,
                runtime.longpolling_port,
            )
            .await?;
        }

        info!("Provisioning of {} complete", domain);
        Ok(report)
    }

    /// Checks every precondition before anything is changed
    async fn preflight(&self, options: &InitOptions) -> ProvisionResult<PublicAddresses> {
        validate_domain(&options.domain)?;
        validate_email(&options.email)?;

        if options.wildcard && options.challenge != ChallengeType::Dns01 {
            return Err(ProvisionError::Configuration(
                "--wildcard requires --tls-challenge dns".to_string(),
            ));
        }
        if options.challenge == ChallengeType::Dns01 && !options.provider.supports_dns01_hooks() {
            return Err(ProvisionError::Configuration(format!(
                "DNS-01 automation requires --provider hetzner, got {}",
                options.provider
            )));
        }
        if options.provider != DnsProviderKind::None {
            self.config.token_for(options.provider)?;
        }

        let addresses = PublicAddresses::resolve(self.lookup, options.ip_mode).await;

        if options.provider == DnsProviderKind::None {
            self.confirm_manual_dns(options, addresses).await?;
        } else if addresses.is_empty() {
            return Err(ProvisionError::Configuration(format!(
                "No public address found for ip mode {}",
                options.ip_mode
            )));
        }
        Ok(addresses)
    }

    async fn confirm_manual_dns(
        &self,
        options: &InitOptions,
        addresses: PublicAddresses,
    ) -> ProvisionResult<()> {
        info!("Manual DNS mode selected");
        if options.ip_mode.wants_ipv4() {
            let value = addresses
                .ipv4
                .map_or_else(|| "<server-ipv4>".to_string(), |a| a.to_string());
            info!("Create A record: {} -> {}", options.domain, value);
        }
        if options.ip_mode.wants_ipv6() {
            let value = addresses
                .ipv6
                .map_or_else(|| "<server-ipv6>".to_string(), |a| a.to_string());
            info!("Create AAAA record: {} -> {}", options.domain, value);
        }

        if self
            .prompter
            .confirm("Are the DNS records in place?", true)
            .await?
        {
            Ok(())
        } else {
            Err(ProvisionError::Aborted(
                "DNS records not confirmed".to_string(),
            ))
        }
    }

    async fn install_tooling(&self) -> ProvisionResult<()> {
        info!("Installing nginx, certbot and hook dependencies");
        self.system.run_checked("apt", &["update"]).await?;
        self.system
            .run_checked("apt", &["install", "-y", "nginx", "certbot", "curl", "jq"])
            .await?;
        self.system
            .run_checked("systemctl", &["enable", "--now", "nginx"])
            .await?;
        Ok(())
    }

    async fn provision_records(
        &self,
        store: &dyn DnsRecordStore,
        domain: &str,
        addresses: PublicAddresses,
        report: &mut RunReport,
    ) -> ProvisionResult<()> {
        let zone = store.resolve_zone(domain).await?;
        info!("Using {} zone {} for {}", store.name(), zone.name, domain);

        for (record_type, address) in [
            (RecordType::A, addresses.ipv4),
            (RecordType::Aaaa, addresses.ipv6),
        ] {
            let Some(address) = address else { continue };
            let value = address.to_string();
            store
                .upsert(&zone, record_type, domain, &value, self.config.record_ttl)
                .await?;
            info!("{} {} -> {}", record_type, domain, value);
            report.records.push(UpsertedRecord {
                record_type,
                name: domain.to_string(),
                value,
            });
        }

        report.zone = Some(zone);
        Ok(())
    }

    async fn maybe_restart(
        &self,
        options: &InitOptions,
        runtime: &BackendRuntime,
    ) -> ProvisionResult<bool> {
        let Some(service) = runtime.service_name.as_deref() else {
            if options.restart_service == Some(true) {
                warn!("Skipping service restart: no systemd service configured");
            }
            return Ok(false);
        };

        let restart = match options.restart_service {
            Some(restart) => restart,
            None => {
                self.prompter
                    .confirm(&format!("Restart service {}?", service), false)
                    .await?
            }
        };
        if restart {
            restart_service(self.system, service).await?;
        }
        Ok(restart)
    }
}
