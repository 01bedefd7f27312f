//! Agent identity configuration
//!
//! Fixed at agent construction and shared read-only; every session
//! acquisition hands the same values to the native library.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Length of the wallet seed, in bytes.
pub const SEED_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent (and wallet) name.
    pub agent_name: String,
    /// Agency endpoint the mailbox lives at.
    pub agency_url: String,
    /// Wallet seed, exactly 32 bytes.
    pub seed: String,
    /// Where the agency should push new-message notifications.
    pub webhook_url: Option<String>,
    pub use_postgres_wallet: bool,
    /// Polling for the bounded offer wait.
    pub poll: PollPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Delay between two polls of the mailbox.
    pub interval_ms: u64,
    /// Give up waiting for a credential offer after this long.
    pub offer_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: "alice".into(),
            agency_url: "http://localhost:8080".into(),
            seed: "000000000000000000000000Alice000".into(),
            webhook_url: None,
            use_postgres_wallet: false,
            poll: PollPolicy::default(),
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            offer_timeout_ms: 60_000,
        }
    }
}

impl PollPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn offer_timeout(&self) -> Duration {
        Duration::from_millis(self.offer_timeout_ms)
    }
}

impl AgentConfig {
    /// Load config from a TOML file. A missing file yields defaults; a file
    /// that exists but does not parse or validate is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent_name.trim().is_empty() {
            return Err(Error::Config("agent_name must not be empty".into()));
        }
        if self.seed.len() != SEED_LEN {
            return Err(Error::Config(format!(
                "seed must be {} bytes, got {}",
                SEED_LEN,
                self.seed.len()
            )));
        }
        url::Url::parse(&self.agency_url)
            .map_err(|e| Error::Config(format!("agency_url {}: {}", self.agency_url, e)))?;
        if let Some(webhook) = &self.webhook_url {
            url::Url::parse(webhook)
                .map_err(|e| Error::Config(format!("webhook_url {}: {}", webhook, e)))?;
        }
        if self.poll.interval_ms == 0 || self.poll.offer_timeout_ms == 0 {
            return Err(Error::Config("poll interval and timeout must be positive".into()));
        }
        Ok(())
    }

    /// Render the effective config as TOML.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Default webhook for an agent name on the local notification server.
    pub fn with_local_webhook(mut self, port: u16) -> Self {
        self.webhook_url = Some(format!(
            "http://localhost:{}/notifications/{}",
            port, self.agent_name
        ));
        self
    }
}
