use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use relaystats_core::error::{RelayStatsError, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    pub version: u32,

    #[serde(default)]
    pub relay: RelaySection,

    #[serde(default)]
    pub stats: StatsSection,

    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(RelayStatsError::UnsupportedVersion);
        }
        if self.services.is_empty() {
            return Err(RelayStatsError::InvalidConfig("services must not be empty".into()));
        }

        self.relay.validate()?;

        let mut seen = HashSet::new();
        for svc in &self.services {
            if !seen.insert(svc.name.as_str()) {
                return Err(RelayStatsError::InvalidConfig(format!(
                    "duplicate service: {}",
                    svc.name
                )));
            }
            svc.validate()?;
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    /// Caller name recorded on every edge this relay forwards.
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            name: default_name(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl RelaySection {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(RelayStatsError::InvalidConfig("relay.name must not be empty".into()));
        }
        if !(10..=60000).contains(&self.call_timeout_ms) {
            return Err(RelayStatsError::InvalidConfig(
                "relay.call_timeout_ms must be between 10 and 60000".into(),
            ));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn default_name() -> String {
    "relay".into()
}
fn default_call_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatsSection {
    /// When false the relay runs with the no-op backend.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for StatsSection {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub name: String,
    /// `host:port` of every peer serving this service.
    pub peers: Vec<String>,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(RelayStatsError::InvalidConfig("service name must not be empty".into()));
        }
        if self.peers.is_empty() {
            return Err(RelayStatsError::InvalidConfig(format!(
                "service {} must list at least one peer",
                self.name
            )));
        }
        for peer in &self.peers {
            let valid = peer
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(RelayStatsError::InvalidConfig(format!(
                    "service {} peer must be host:port, got {peer:?}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
