use std::path::PathBuf;
use std::time::Duration;

use crate::client::{ConnectionError, Endpoint};
use crate::manager::DEFAULT_CONNECT_TIMEOUT;
use crate::reconnect::ReconnectPolicy;

/// Origin used when `BATCHGEN_ORIGIN` is unset.
pub const DEFAULT_ORIGIN: &str = "http://localhost:3000";

/// How long a stop request waits for the runner's acknowledgment.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(3000);

/// Directory holding the persisted task snapshot.
pub const DEFAULT_STATE_DIR: &str = ".batchgen";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Endpoint(#[from] ConnectionError),
}

/// Client configuration.
///
/// All fields have defaults suitable for a local runner; override via
/// environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    /// Handshake timeout per connection attempt (default: 10 s).
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Stop acknowledgment watchdog (default: 3000 ms).
    pub stop_ack_timeout: Duration,
    /// Where [`FileStorage`](crate::persistence::FileStorage) keeps state.
    pub state_dir: PathBuf,
}

impl ClientConfig {
    /// Defaults for everything but the endpoint.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            stop_ack_timeout: DEFAULT_STOP_TIMEOUT,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                  |
    /// |---------------------------------|--------------------------|
    /// | `BATCHGEN_ORIGIN`               | `http://localhost:3000`  |
    /// | `BATCHGEN_CONNECT_TIMEOUT_SECS` | `10`                     |
    /// | `BATCHGEN_MAX_RECONNECTS`       | `5`                      |
    /// | `BATCHGEN_STOP_TIMEOUT_MS`      | `3000`                   |
    /// | `BATCHGEN_STATE_DIR`            | `.batchgen`              |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable
    /// source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let origin = lookup("BATCHGEN_ORIGIN").unwrap_or_else(|| DEFAULT_ORIGIN.into());
        let mut config = Self::new(Endpoint::from_origin(&origin)?);

        if let Some(secs) = parse_var::<u64>(&lookup, "BATCHGEN_CONNECT_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    var: "BATCHGEN_CONNECT_TIMEOUT_SECS",
                    value: secs.to_string(),
                    reason: "must be greater than zero".into(),
                });
            }
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var::<u32>(&lookup, "BATCHGEN_MAX_RECONNECTS")? {
            config.reconnect.max_attempts = max;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "BATCHGEN_STOP_TIMEOUT_MS")? {
            config.stop_ack_timeout = Duration::from_millis(ms);
        }
        if let Some(dir) = lookup("BATCHGEN_STATE_DIR").filter(|d| !d.trim().is_empty()) {
            config.state_dir = PathBuf::from(dir);
        }

        Ok(config)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value,
            reason: e.to_string(),
        })
}
