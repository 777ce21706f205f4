use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

/// Bounded resend policy: one initial send plus `max_retries` resends,
/// each followed by a wait of `timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(rename = "timeout_ms", deserialize_with = "millis")]
    pub timeout: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
        }
    }

    /// Total number of sends, including the first
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Longest time a full retry cycle can take
    pub fn total_wait(&self) -> Duration {
        self.timeout * self.attempts()
    }

    /// Five handshake attempts, two seconds apart
    pub fn handshake() -> Self {
        Self::new(Duration::from_secs(2), 4)
    }
}

impl Default for RetryPolicy {
    /// ACK policy: five second wait, three resends
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 3)
    }
}

/// Timeouts and identity for one battle session.
///
/// Every field has a default, so a JSON config only needs the values it
/// changes. Durations are given in milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Joiner's HANDSHAKE_REQUEST schedule
    pub handshake: RetryPolicy,

    /// Resend schedule for sequenced messages
    pub ack: RetryPolicy,

    /// Wait for the opponent's BATTLE_SETUP, a confirm or a GAME_OVER
    #[serde(rename = "response_timeout_ms", deserialize_with = "millis")]
    pub response_timeout: Duration,

    /// Wait for the opponent to pick a move
    #[serde(rename = "turn_timeout_ms", deserialize_with = "millis")]
    pub turn_timeout: Duration,

    /// How long a finished defender keeps acknowledging resent GAME_OVERs
    #[serde(rename = "linger_ms", deserialize_with = "millis")]
    pub linger: Duration,

    /// Host-only: fixed battle seed instead of a random one
    pub seed: Option<u64>,

    /// Sender name on chat messages
    pub player_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake: RetryPolicy::handshake(),
            ack: RetryPolicy::default(),
            response_timeout: Duration::from_secs(30),
            turn_timeout: Duration::from_secs(300),
            linger: Duration::from_secs(2),
            seed: None,
            player_name: "Trainer".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse session config")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn with_player_name(mut self, name: impl Into<String>) -> Self {
        self.player_name = name.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

fn millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}
