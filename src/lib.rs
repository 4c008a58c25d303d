//! tlsfront - TLS reverse-proxy provisioning for a local application server
//!
//! Architecture:
//! - DNS record stores for Cloudflare and Hetzner behind one trait
//! - Generated certbot DNS-01 hook units (Hetzner)
//! - Two-phase nginx configuration with validate-before-reload
//! - All privileged work goes through an explicit `SystemOps` capability

pub mod backend;
pub mod certbot;
pub mod cloudflare;
pub mod config;
pub mod constants;
pub mod dns_provider;
pub mod error;
pub mod firewall;
pub mod hetzner;
pub mod hook;
pub mod nginx;
pub mod orchestrator;
pub mod public_ip;
pub mod system;
pub mod validation;

pub use config::Config;
pub use error::{ProvisionError, ProvisionResult};
pub use orchestrator::{InitOptions, Orchestrator, RunReport};
