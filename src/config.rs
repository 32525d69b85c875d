use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::IdentifyProperties;
use crate::core::{GatewayError, GatewayResult};

/// Smallest reassembly buffer the engine will run with, whatever the configuration says.
pub const MIN_BUFFER_SIZE: usize = 1024;

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=8&encoding=json";

/// Bitmask of event categories the server should push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayIntents(pub u64);

impl GatewayIntents {
    pub const GUILDS: Self = Self(1 << 0);
    pub const GUILD_MEMBERS: Self = Self(1 << 1);
    pub const GUILD_MESSAGES: Self = Self(1 << 9);
    pub const GUILD_MESSAGE_REACTIONS: Self = Self(1 << 10);
    pub const DIRECT_MESSAGES: Self = Self(1 << 12);
    pub const DIRECT_MESSAGE_REACTIONS: Self = Self(1 << 13);
    pub const MESSAGE_CONTENT: Self = Self(1 << 15);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for GatewayIntents {
    fn default() -> Self {
        Self::GUILD_MESSAGES
            .union(Self::DIRECT_MESSAGES)
            .union(Self::MESSAGE_CONTENT)
    }
}

impl std::ops::BitOr for GatewayIntents {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Gateway client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub token: String,
    pub intents: GatewayIntents,
    pub url: String,
    /// Reassembly capacity in bytes; see [`GatewayConfig::effective_buffer_size`].
    pub buffer_size: usize,
    pub queue_capacity: usize,
    pub enqueue_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub tick_interval_ms: u64,
    pub client_properties: IdentifyProperties,
    /// Enqueue unrecognised dispatch events as raw payloads instead of dropping them.
    pub forward_unknown_events: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            intents: GatewayIntents::default(),
            url: DEFAULT_GATEWAY_URL.to_string(),
            buffer_size: 64 * 1024,
            queue_capacity: 10,
            enqueue_timeout_ms: 5_000,
            send_timeout_ms: 5_000,
            close_timeout_ms: 5_000,
            tick_interval_ms: 1_000,
            client_properties: IdentifyProperties::default(),
            forward_unknown_events: false,
        }
    }
}

impl GatewayConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> GatewayResult<Self> {
        let config: Self = sonic_rs::from_str(json)
            .map_err(|e| GatewayError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(GatewayError::InvalidConfig(format!(
                "gateway url must use ws:// or wss://, got {}",
                self.url
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(GatewayError::InvalidConfig(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn effective_buffer_size(&self) -> usize {
        self.buffer_size.max(MIN_BUFFER_SIZE)
    }

    #[inline]
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
