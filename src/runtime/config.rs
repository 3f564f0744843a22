use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

#[cfg(feature = "redis-backend")]
use crate::bus::DEFAULT_CHANNEL_PREFIX;
use crate::endpoints::SupervisionConfig;
use crate::state::DEFAULT_KEY_PREFIX;

/// Errors that can occur while resolving runtime configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// Environment variable parsing error.
    #[error("failed to parse environment variable {key}: {message}")]
    #[diagnostic(code(steploom::config::env_parse))]
    EnvParse { key: String, message: String },
}

/// Which transport carries events between steps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusConfig {
    /// Dispatch inside this process. The default.
    InProcess,
    /// Relay through Redis pub/sub so several processes share a topic space.
    #[cfg(feature = "redis-backend")]
    Redis {
        url: String,
        channel_prefix: String,
    },
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::InProcess
    }
}

/// Which backend stores trace-scoped state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateConfig {
    /// Per-process map. The default.
    Memory { key_prefix: String },
    /// Shared Redis keyspace.
    #[cfg(feature = "redis-backend")]
    Redis { url: String, key_prefix: String },
}

impl Default for StateConfig {
    fn default() -> Self {
        Self::Memory {
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
        }
    }
}

/// One worker endpoint in the operator-configured pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointDef {
    pub name: String,
    pub url: String,
    pub runtime_kind: String,
}

/// Everything the runtime builder needs to assemble a [`FlowRuntime`].
///
/// [`FlowRuntime`]: crate::runtime::FlowRuntime
#[derive(Clone, Debug, Default)]
pub struct RuntimeConfig {
    pub bus: BusConfig,
    pub state: StateConfig,
    pub supervision: SupervisionConfig,
    pub endpoints: Vec<EndpointDef>,
}

impl RuntimeConfig {
    /// Resolves configuration from `STEPLOOM_*` environment variables,
    /// loading a `.env` file first when one is present.
    ///
    /// Recognized variables:
    ///
    /// - `STEPLOOM_BUS`: `inprocess` (default) or `redis`
    /// - `STEPLOOM_STATE`: `memory` (default) or `redis`
    /// - `STEPLOOM_REDIS_URL`: shared by both Redis transports
    /// - `STEPLOOM_CHANNEL_PREFIX`, `STEPLOOM_STATE_PREFIX`
    /// - `STEPLOOM_STARTUP_GRACE_MS`, `STEPLOOM_HEALTH_INTERVAL_MS`,
    ///   `STEPLOOM_RETRY_DELAY_MS`, `STEPLOOM_MAX_RETRIES`
    /// - `STEPLOOM_ENDPOINTS`: comma-separated `name|url|kind` entries
    ///   (`kind` optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Ok(bus) = std::env::var("STEPLOOM_BUS") {
            config.bus = match bus.to_lowercase().as_str() {
                "inprocess" | "in-process" | "memory" => BusConfig::InProcess,
                #[cfg(feature = "redis-backend")]
                "redis" => BusConfig::Redis {
                    url: env_or("STEPLOOM_REDIS_URL", "redis://127.0.0.1:6379"),
                    channel_prefix: env_or("STEPLOOM_CHANNEL_PREFIX", DEFAULT_CHANNEL_PREFIX),
                },
                other => {
                    return Err(ConfigError::EnvParse {
                        key: "STEPLOOM_BUS".to_owned(),
                        message: format!("unsupported bus transport {other:?}"),
                    });
                }
            };
        }

        if let Ok(state) = std::env::var("STEPLOOM_STATE") {
            config.state = match state.to_lowercase().as_str() {
                "memory" => StateConfig::Memory {
                    key_prefix: env_or("STEPLOOM_STATE_PREFIX", DEFAULT_KEY_PREFIX),
                },
                #[cfg(feature = "redis-backend")]
                "redis" => StateConfig::Redis {
                    url: env_or("STEPLOOM_REDIS_URL", "redis://127.0.0.1:6379"),
                    key_prefix: env_or("STEPLOOM_STATE_PREFIX", DEFAULT_KEY_PREFIX),
                },
                other => {
                    return Err(ConfigError::EnvParse {
                        key: "STEPLOOM_STATE".to_owned(),
                        message: format!("unsupported state backend {other:?}"),
                    });
                }
            };
        }

        if let Some(grace) = env_duration_ms("STEPLOOM_STARTUP_GRACE_MS")? {
            config.supervision.startup_grace = grace;
        }
        if let Some(interval) = env_duration_ms("STEPLOOM_HEALTH_INTERVAL_MS")? {
            config.supervision.health_interval = interval;
        }
        if let Some(delay) = env_duration_ms("STEPLOOM_RETRY_DELAY_MS")? {
            config.supervision.retry_delay = delay;
        }
        if let Ok(raw) = std::env::var("STEPLOOM_MAX_RETRIES") {
            config.supervision.max_retries =
                raw.trim().parse().map_err(|_| ConfigError::EnvParse {
                    key: "STEPLOOM_MAX_RETRIES".to_owned(),
                    message: "must be a non-negative integer".to_owned(),
                })?;
        }

        if let Ok(raw) = std::env::var("STEPLOOM_ENDPOINTS") {
            config.endpoints = parse_endpoint_list(&raw)?;
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_bus(mut self, bus: BusConfig) -> Self {
        self.bus = bus;
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: StateConfig) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn with_supervision(mut self, supervision: SupervisionConfig) -> Self {
        self.supervision = supervision;
        self
    }

    /// Adds a worker endpoint to the pool.
    #[must_use]
    pub fn with_endpoint(
        mut self,
        name: impl Into<String>,
        url: impl Into<String>,
        runtime_kind: impl Into<String>,
    ) -> Self {
        self.endpoints.push(EndpointDef {
            name: name.into(),
            url: url.into(),
            runtime_kind: runtime_kind.into(),
        });
        self
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_duration_ms(key: &str) -> Result<Option<Duration>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => {
            let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::EnvParse {
                key: key.to_owned(),
                message: "must be an integer number of milliseconds".to_owned(),
            })?;
            Ok(Some(Duration::from_millis(ms)))
        }
        Err(_) => Ok(None),
    }
}

fn parse_endpoint_list(raw: &str) -> Result<Vec<EndpointDef>, ConfigError> {
    let mut endpoints = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut fields = entry.split('|').map(str::trim);
        let name = fields.next().unwrap_or_default();
        let url = fields.next().unwrap_or_default();
        if name.is_empty() || url.is_empty() {
            return Err(ConfigError::EnvParse {
                key: "STEPLOOM_ENDPOINTS".to_owned(),
                message: format!("entry {entry:?} must look like name|url or name|url|kind"),
            });
        }
        let runtime_kind = fields.next().filter(|kind| !kind.is_empty()).unwrap_or("worker");
        endpoints.push(EndpointDef {
            name: name.to_owned(),
            url: url.to_owned(),
            runtime_kind: runtime_kind.to_owned(),
        });
    }
    Ok(endpoints)
}
