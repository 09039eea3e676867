//! Daemon configuration: TOML file, environment secrets, CLI overrides.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use zonegrid_fleet::FleetConfig;
use zonegrid_orchestrator::LaunchProfile;

pub const FLEET_SECRET_ENV: &str = "ZONEGRID_FLEET_SECRET";
pub const ADMIN_SECRET_ENV: &str = "ZONEGRID_ADMIN_SECRET";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub fleet: FleetSection,
    pub launch: LaunchProfile,
    pub reconcile: ReconcileConfig,
    pub idle: IdleConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    /// Empty disables the admin routes.
    pub admin_secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            data_dir: PathBuf::from("/var/lib/zonegrid"),
            admin_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FleetMode {
    #[default]
    Http,
    /// In-process fleet for local development.
    Memory,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FleetSection {
    pub mode: FleetMode,
    pub base_url: String,
    pub secret: String,
    pub timeout_secs: u64,
}

impl Default for FleetSection {
    fn default() -> Self {
        let client = FleetConfig::default();
        Self {
            mode: FleetMode::default(),
            base_url: client.base_url,
            secret: client.secret,
            timeout_secs: client.timeout_secs,
        }
    }
}

impl FleetSection {
    pub fn client_config(&self) -> FleetConfig {
        FleetConfig {
            base_url: self.base_url.clone(),
            secret: self.secret.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Zones untouched for this long are candidates for removal.
    pub stale_after_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            stale_after_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdleConfig {
    pub threshold_secs: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self { threshold_secs: 300 }
    }
}

impl DaemonConfig {
    /// Read the config file (if any) and apply environment secrets.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                Self::parse(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Non-empty secrets from the environment win over the file.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = var(FLEET_SECRET_ENV).filter(|s| !s.is_empty()) {
            self.fleet.secret = secret;
        }
        if let Some(secret) = var(ADMIN_SECRET_ENV).filter(|s| !s.is_empty()) {
            self.server.admin_secret = secret;
        }
    }
}
