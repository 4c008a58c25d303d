//! tlsfront - put nginx with a Let's Encrypt certificate in front of a local backend
//!
//! Architecture:
//! - One `init` run: packages, DNS, bootstrap config, certificate, HTTPS config
//! - Each stage is validated before the next starts; nothing is rolled back
//! - Runs as root or escalates through sudo

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tlsfront::backend::{config_from_deploy_profile, ServiceLocator};
use tlsfront::constants::{DEFAULT_BACKEND_HOST, DEFAULT_CONFIG_PATH};
use tlsfront::dns_provider::DnsProviderKind;
use tlsfront::firewall::FirewallOptions;
use tlsfront::orchestrator::{ChallengeType, StdinPrompter};
use tlsfront::public_ip::{IpMode, IpifyLookup};
use tlsfront::system::HostSystem;
use tlsfront::{Config, InitOptions, Orchestrator};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

//==============================================================================
// Command line
//==============================================================================

#[derive(Debug, Parser)]
#[command(name = "tlsfront")]
#[command(version = VERSION)]
struct Args {
    /// tlsfront config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Provision DNS, certificate and nginx for one backend instance
    Init(InitArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    None,
    Cloudflare,
    Hetzner,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IpModeArg {
    Ipv4,
    Ipv6,
    Dual,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChallengeArg {
    Http,
    Dns,
}

#[derive(Debug, ClapArgs)]
struct InitArgs {
    /// Public domain of the instance
    #[arg(long)]
    domain: String,

    /// Let's Encrypt contact (default: admin@<domain>)
    #[arg(long)]
    email: Option<String>,

    #[arg(long, value_enum, default_value = "none")]
    provider: ProviderArg,

    #[arg(long, value_enum, default_value = "ipv4")]
    ip_mode: IpModeArg,

    #[arg(long, value_enum, default_value = "http")]
    tls_challenge: ChallengeArg,

    /// Also request *.<domain> (requires --tls-challenge dns)
    #[arg(long)]
    wildcard: bool,

    /// Route long-polling and websocket traffic to the main backend port
    #[arg(long)]
    single_upstream: bool,

    #[arg(long, default_value = DEFAULT_BACKEND_HOST)]
    backend_host: String,

    /// systemd service of the backend (auto-detected when omitted)
    #[arg(long)]
    service: Option<String>,

    /// Backend config file (read from the service unit when omitted)
    #[arg(long)]
    backend_config: Option<PathBuf>,

    /// Deploy profile YAML whose build directory holds the backend config
    #[arg(long, value_name = "PATH", conflicts_with = "backend_config")]
    deploy_profile: Option<PathBuf>,

    /// Restart the backend service at the end
    #[arg(long, overrides_with = "no_restart_service")]
    restart_service: bool,

    #[arg(long)]
    no_restart_service: bool,

    /// Configure ufw
    #[arg(long)]
    ufw: bool,

    /// With --ufw, keep the backend HTTP port reachable directly
    #[arg(long, requires = "ufw")]
    allow_backend_port: bool,

    /// With --ufw, keep the long-polling port reachable directly
    #[arg(long, requires = "ufw")]
    allow_longpolling_port: bool,

    /// Do not apt-install nginx, certbot, curl and jq
    #[arg(long)]
    skip_install: bool,

    /// Do not add proxy_mode to the backend config
    #[arg(long)]
    skip_proxy_mode: bool,
}

impl InitArgs {
    fn to_options(&self) -> InitOptions {
        let mut options = InitOptions::new(self.domain.as_str());
        if let Some(email) = &self.email {
            options.email = email.trim().to_string();
        }
        options.provider = match self.provider {
            ProviderArg::None => DnsProviderKind::None,
            ProviderArg::Cloudflare => DnsProviderKind::Cloudflare,
            ProviderArg::Hetzner => DnsProviderKind::Hetzner,
        };
        options.ip_mode = match self.ip_mode {
            IpModeArg::Ipv4 => IpMode::Ipv4,
            IpModeArg::Ipv6 => IpMode::Ipv6,
            IpModeArg::Dual => IpMode::Dual,
        };
        options.challenge = match self.tls_challenge {
            ChallengeArg::Http => ChallengeType::Http01,
            ChallengeArg::Dns => ChallengeType::Dns01,
        };
        options.wildcard = self.wildcard;
        options.single_upstream = self.single_upstream;
        options.backend_host = self.backend_host.clone();
        options.restart_service = match (self.restart_service, self.no_restart_service) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        options.firewall = self.ufw.then_some(FirewallOptions {
            allow_backend_port: self.allow_backend_port,
            allow_longpolling_port: self.allow_longpolling_port,
        });
        options.skip_install = self.skip_install;
        options.skip_proxy_mode = self.skip_proxy_mode;
        options
    }
}

//==============================================================================
// Main
//==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = Config::load(Some(config_path)).context("Config load failed")?;

    let verbose = args.verbose || config.verbose;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match &args.command {
        Command::Init(init) => run_init(&config, init).await,
    };
    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run_init(config: &Config, args: &InitArgs) -> Result<()> {
    let system = HostSystem::detect();
    if system.escalates() {
        info!("Not running as root; privileged steps go through sudo");
    }

    let locator = ServiceLocator::default();
    let service = locator
        .select_service(args.service.as_deref())
        .await
        .context("Service selection failed")?;
    let backend_config = match &args.deploy_profile {
        Some(profile) => Some(
            config_from_deploy_profile(profile)
                .await
                .context("Deploy profile failed")?,
        ),
        None => args.backend_config.clone(),
    };
    let runtime = locator
        .detect(service, backend_config)
        .await
        .context("Backend detection failed")?;

    let lookup = IpifyLookup::new().context("Address lookup client failed")?;
    let prompter = StdinPrompter;
    let options = args.to_options();

    let report = Orchestrator::new(config, &system, &lookup, &prompter)
        .run(&options, &runtime)
        .await
        .with_context(|| format!("Provisioning {} failed", options.domain))?;

    info!("Done");
    info!("Domain: https://{}", report.domain);
    info!("Certificate names: {}", report.certificate_names.join(", "));
    if let (Some(zone), Some(record)) = (&report.zone, &report.challenge_record) {
        info!("Challenge record: {} in zone {}", record, zone.name);
    }
    info!(
        "Service: {}",
        runtime.service_name.as_deref().unwrap_or("<none>")
    );
    info!("Config: {}", runtime.config_file.display());
    info!("Backend port: {}", runtime.http_port);
    info!("Long-polling port: {}", runtime.longpolling_port);
    Ok(())
}
