//! Configuration handling for the mux node.
//!
//! Settings come from the shared YAML config file, then environment
//! variables, then command-line flags (applied in `main`).

use anyhow::{Context, Result};
use mux_session::SessionConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Mux node configuration
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Address accepted connections arrive on
    pub listen_addr: SocketAddr,
    /// Peer to dial instead of listening
    pub connect_addr: Option<SocketAddr>,
    /// Delay between redial attempts while a session awaits a replacement
    pub redial_interval: Duration,
    /// Session settings
    pub session: SessionConfig,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9400)),
            connect_addr: None,
            redial_interval: Duration::from_secs(1),
            session: SessionConfig::default(),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    mux: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    args: Option<Vec<String>>,
    config: Option<HashMap<String, String>>,
}

impl MuxConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config)?;
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}, using defaults: {}",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            ),
        }

        config.apply_overrides(|key| std::env::var(key).ok())?;

        info!(
            "Final mux configuration: listen={}, connect={:?}, keepalive={} every {:?}, recovery_window={:?}",
            config.listen_addr,
            config.connect_addr,
            config.session.enable_keepalive,
            config.session.keepalive_interval,
            config.session.recovery_window
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) -> Result<()> {
        if let Some(mux_service) = root_config.services.and_then(|services| services.mux) {
            self.apply_service_config(mux_service)?;
        }
        Ok(())
    }

    fn apply_service_config(&mut self, service_config: ServiceConfig) -> Result<()> {
        for arg in service_config.args.unwrap_or_default() {
            if let Some(addr) = arg.strip_prefix("--listen=") {
                self.listen_addr = parse_addr("--listen", addr)?;
            } else if let Some(addr) = arg.strip_prefix("--connect=") {
                self.connect_addr = Some(parse_addr("--connect", addr)?);
            }
        }

        for (key, value) in service_config.config.unwrap_or_default() {
            match key.as_str() {
                "services.mux.listen_addr" => {
                    self.listen_addr = parse_addr(&key, &value)?;
                }
                "services.mux.connect_addr" => {
                    self.connect_addr = Some(parse_addr(&key, &value)?);
                }
                "services.mux.redial_interval" => {
                    self.redial_interval = parse_duration(&key, &value)?;
                }
                "services.mux.enable_keepalive" => {
                    self.session.enable_keepalive = value.to_lowercase() == "true";
                }
                "services.mux.keepalive_interval" => {
                    self.session.keepalive_interval = parse_duration(&key, &value)?;
                }
                "services.mux.recovery_window" => {
                    self.session.recovery_window = parse_duration(&key, &value)?;
                }
                "services.mux.ping_timeout" => {
                    self.session.ping_timeout = parse_duration(&key, &value)?;
                }
                "services.mux.write_timeout" => {
                    self.session.connection_write_timeout = parse_duration(&key, &value)?;
                }
                "services.mux.send_queue_depth" => {
                    self.session.send_queue_depth = value
                        .parse()
                        .with_context(|| format!("invalid {}: {}", key, value))?;
                }
                _ => {
                    // Ignore unknown configuration keys
                }
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides, read through `lookup`
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("MUX_LISTEN_ADDR") {
            self.listen_addr = parse_addr("MUX_LISTEN_ADDR", &addr)?;
            info!("Listen address overridden by environment: {}", self.listen_addr);
        }

        if let Some(interval) = lookup("MUX_KEEPALIVE_INTERVAL") {
            self.session.keepalive_interval = parse_duration("MUX_KEEPALIVE_INTERVAL", &interval)?;
            info!(
                "Keepalive interval overridden by environment: {:?}",
                self.session.keepalive_interval
            );
        }

        if let Some(window) = lookup("MUX_RECOVERY_WINDOW") {
            self.session.recovery_window = parse_duration("MUX_RECOVERY_WINDOW", &window)?;
            info!(
                "Recovery window overridden by environment: {:?}",
                self.session.recovery_window
            );
        }

        if let Some(enabled) = lookup("MUX_ENABLE_KEEPALIVE") {
            self.session.enable_keepalive = enabled.to_lowercase() == "true";
            info!(
                "Keepalive overridden by environment: {}",
                self.session.enable_keepalive
            );
        }

        Ok(())
    }
}

fn parse_addr(key: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .with_context(|| format!("invalid address for {}: {}", key, value))
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .with_context(|| format!("invalid duration for {}: {}", key, value))
}
