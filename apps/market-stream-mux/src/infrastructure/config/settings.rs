//! Multiplexer Configuration Settings
//!
//! Configuration types for the stream multiplexer, loaded from environment
//! variables. Unparseable numeric values fall back to their defaults.

use std::collections::HashSet;
use std::time::Duration;

use crate::infrastructure::connection::DEFAULT_IDLE_TIMEOUT;
use crate::infrastructure::connection::outbound::DEFAULT_OUTBOUND_CAPACITY;
use crate::infrastructure::connection::reconnect::Jitter;

/// Default upstream endpoint.
pub const DEFAULT_URL: &str = "ws://localhost:8899/ws";

/// Upstream wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecKind {
    /// `{kind, symbol, payload, timestamp}` envelopes.
    #[default]
    Envelope,
    /// Binance combined streams.
    Binance,
    /// Relay `{action, channel}` protocol with batched flat messages.
    Relay,
}

impl CodecKind {
    /// Parse codec kind from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "envelope" | "json" => Some(Self::Envelope),
            "binance" => Some(Self::Binance),
            "relay" => Some(Self::Relay),
            _ => None,
        }
    }

    /// Get the codec name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Envelope => "envelope",
            Self::Binance => "binance",
            Self::Relay => "relay",
        }
    }
}

/// Upstream connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Randomization applied to reconnection delays.
    pub reconnect_jitter: Jitter,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Outbound control-frame queue capacity.
    pub outbound_capacity: usize,
    /// Recycle a connection with no inbound traffic for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_initial: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: Jitter::Full,
            max_reconnect_attempts: 0, // Unlimited
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete multiplexer configuration.
#[derive(Debug, Clone)]
pub struct MuxSettings {
    /// Upstream WebSocket URL.
    pub url: String,
    /// Upstream wire format.
    pub codec: CodecKind,
    /// Symbols the binary subscribes to at startup.
    pub symbols: Vec<String>,
    /// Upstream connection settings.
    pub connection: ConnectionSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl Default for MuxSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            codec: CodecKind::default(),
            symbols: Vec::new(),
            connection: ConnectionSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl MuxSettings {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is empty or the codec or jitter mode is unknown.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`MuxSettings::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let defaults = ConnectionSettings::default();

        let url = env.get("STREAM_MUX_URL").unwrap_or_else(|| DEFAULT_URL.to_string());
        if url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("STREAM_MUX_URL".to_string()));
        }

        let codec = match env.get("STREAM_MUX_CODEC") {
            Some(value) => CodecKind::from_str_case_insensitive(&value).ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: "STREAM_MUX_CODEC".to_string(),
                    value,
                }
            })?,
            None => CodecKind::default(),
        };

        let reconnect_jitter = match env.get("STREAM_MUX_RECONNECT_JITTER") {
            Some(value) => Jitter::parse(&value).ok_or_else(|| ConfigError::InvalidValue {
                key: "STREAM_MUX_RECONNECT_JITTER".to_string(),
                value,
            })?,
            None => defaults.reconnect_jitter,
        };

        let symbols = env
            .get("STREAM_MUX_SYMBOLS")
            .map(|list| parse_symbols(&list))
            .unwrap_or_default();

        let idle_timeout = match env.parse::<u64>("STREAM_MUX_IDLE_TIMEOUT_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.idle_timeout,
        };

        let connection = ConnectionSettings {
            reconnect_delay_initial: env
                .parse("STREAM_MUX_RECONNECT_DELAY_INITIAL_MS")
                .map_or(defaults.reconnect_delay_initial, Duration::from_millis),
            reconnect_delay_max: env
                .parse("STREAM_MUX_RECONNECT_DELAY_MAX_SECS")
                .map_or(defaults.reconnect_delay_max, Duration::from_secs),
            reconnect_delay_multiplier: env
                .parse::<f64>("STREAM_MUX_RECONNECT_DELAY_MULTIPLIER")
                .filter(|m| m.is_finite() && *m >= 1.0)
                .unwrap_or(defaults.reconnect_delay_multiplier),
            reconnect_jitter,
            max_reconnect_attempts: env
                .parse("STREAM_MUX_MAX_RECONNECT_ATTEMPTS")
                .unwrap_or(defaults.max_reconnect_attempts),
            outbound_capacity: env
                .parse("STREAM_MUX_OUTBOUND_CAPACITY")
                .unwrap_or(defaults.outbound_capacity),
            idle_timeout,
        };

        let server = ServerSettings {
            health_port: env
                .parse("STREAM_MUX_HEALTH_PORT")
                .unwrap_or(ServerSettings::default().health_port),
        };

        Ok(Self {
            url,
            codec,
            symbols,
            connection,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unrecognized value.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }
}

fn parse_symbols(list: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    list.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}
