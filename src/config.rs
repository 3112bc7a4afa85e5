//! Configuration for agents and the hub.
//!
//! Hub configuration comes from TOML files, environment variables
//! (`PORT` or `HUB_PORT` select the control port) and CLI flags; agent
//! configuration is built programmatically with the `with_*` methods.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FabricError, Result};

/// Default hub control port
pub const DEFAULT_HUB_PORT: u16 = 9700;

/// Default heartbeat interval in milliseconds
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Agent runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// P2P listen port; 0 selects an ephemeral port
    pub port: u16,

    /// Hub control endpoint, `host:port`
    pub hub: String,

    /// Explicit public endpoint override. The hub only trusts the port
    /// component unless it runs in trust-client-address mode.
    pub address: Option<String>,

    /// Capability labels advertised at registration
    pub capabilities: Vec<String>,

    /// Free-form metadata advertised at registration
    pub metadata: Map<String, Value>,

    /// Heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Reconnect to the hub after a dropped control socket
    pub auto_reconnect: bool,

    /// Hub control request deadline in milliseconds
    pub hub_request_timeout_ms: u64,

    /// Application request/response deadline in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

impl AgentConfig {
    /// Configuration with the required P2P port and defaults everywhere
    /// else
    pub fn new(port: u16) -> Self {
        Self {
            port,
            hub: format!("127.0.0.1:{DEFAULT_HUB_PORT}"),
            address: None,
            capabilities: Vec::new(),
            metadata: Map::new(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            auto_reconnect: true,
            hub_request_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
        }
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(self, other: Self) -> Self {
        let defaults = Self::default();
        Self {
            port: if other.port != defaults.port {
                other.port
            } else {
                self.port
            },
            hub: if other.hub != defaults.hub {
                other.hub
            } else {
                self.hub
            },
            address: other.address.or(self.address),
            capabilities: if other.capabilities.is_empty() {
                self.capabilities
            } else {
                other.capabilities
            },
            metadata: if other.metadata.is_empty() {
                self.metadata
            } else {
                other.metadata
            },
            heartbeat_interval_ms: if other.heartbeat_interval_ms
                != defaults.heartbeat_interval_ms
            {
                other.heartbeat_interval_ms
            } else {
                self.heartbeat_interval_ms
            },
            auto_reconnect: if other.auto_reconnect != defaults.auto_reconnect {
                other.auto_reconnect
            } else {
                self.auto_reconnect
            },
            hub_request_timeout_ms: if other.hub_request_timeout_ms
                != defaults.hub_request_timeout_ms
            {
                other.hub_request_timeout_ms
            } else {
                self.hub_request_timeout_ms
            },
            request_timeout_ms: if other.request_timeout_ms != defaults.request_timeout_ms {
                other.request_timeout_ms
            } else {
                self.request_timeout_ms
            },
        }
    }

    /// Set the hub control endpoint
    pub fn with_hub(mut self, hub: impl Into<String>) -> Self {
        self.hub = hub.into();
        self
    }

    /// Set the explicit public endpoint override
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Advertise one capability label
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Advertise a set of capability labels
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Attach one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Override the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Disable automatic reconnection
    pub fn without_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }

    /// Override the application request/response deadline
    pub fn with_request_timeout(mut self, deadline: Duration) -> Self {
        self.request_timeout_ms = deadline.as_millis() as u64;
        self
    }

    /// Heartbeat interval as a [`Duration`]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Hub request deadline as a [`Duration`]
    pub fn hub_request_timeout(&self) -> Duration {
        Duration::from_millis(self.hub_request_timeout_ms)
    }

    /// Application request deadline as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject malformed endpoints before any socket is opened
    pub fn validate(&self) -> Result<()> {
        check_endpoint("hub", &self.hub)?;
        if let Some(address) = &self.address {
            check_endpoint("address override", address)?;
        }
        Ok(())
    }
}

/// Status-decay settings for the hub registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Online records decay to idle after this long without a heartbeat
    pub idle_after_ms: u64,

    /// Idle records decay to offline after this long without a heartbeat
    pub offline_after_ms: u64,

    /// Sweeper cadence
    pub sweep_interval_ms: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            idle_after_ms: 120_000,
            offline_after_ms: 300_000,
            sweep_interval_ms: 30_000,
        }
    }
}

impl RegistrySettings {
    /// Idle decay threshold as a [`Duration`]
    pub fn idle_after(&self) -> Duration {
        Duration::from_millis(self.idle_after_ms)
    }

    /// Offline decay threshold as a [`Duration`]
    pub fn offline_after(&self) -> Duration {
        Duration::from_millis(self.offline_after_ms)
    }

    /// Sweeper cadence as a [`Duration`]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Bind host for both the control socket and the HTTP surface
    #[serde(default = "default_host")]
    pub host: String,

    /// Control socket port
    pub port: u16,

    /// HTTP surface port; control port + 1 when unset
    #[serde(default)]
    pub http_port: Option<u16>,

    /// Accept the agent-supplied address verbatim instead of deriving it
    /// from the observed remote IP. Development only.
    #[serde(default)]
    pub trust_client_address: bool,

    /// Registry decay settings
    #[serde(default)]
    pub registry: RegistrySettings,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_PORT)
    }
}

impl HubConfig {
    /// Configuration with the required control port and defaults
    /// everywhere else
    pub fn new(port: u16) -> Self {
        Self {
            host: default_host(),
            port,
            http_port: None,
            trust_client_address: false,
            registry: RegistrySettings::default(),
        }
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(self, other: Self) -> Self {
        let defaults = Self::default();
        Self {
            host: if other.host != defaults.host {
                other.host
            } else {
                self.host
            },
            port: if other.port != defaults.port {
                other.port
            } else {
                self.port
            },
            http_port: other.http_port.or(self.http_port),
            trust_client_address: other.trust_client_address || self.trust_client_address,
            registry: if other.registry != defaults.registry {
                other.registry
            } else {
                self.registry
            },
        }
    }

    /// Read configuration from the environment. `PORT` takes precedence
    /// over `HUB_PORT`; one of the two is required.
    pub fn from_env() -> Result<Self> {
        let port = std::env::var("PORT")
            .or_else(|_| std::env::var("HUB_PORT"))
            .map_err(|_| {
                FabricError::Config("PORT or HUB_PORT is required".to_string())
            })?;
        let port: u16 = port
            .parse()
            .map_err(|_| FabricError::Config(format!("invalid hub port: {port}")))?;

        let mut config = Self::new(port);
        if let Ok(host) = std::env::var("HUB_HOST") {
            config.host = host;
        }
        if let Ok(http_port) = std::env::var("HUB_HTTP_PORT") {
            config.http_port = Some(http_port.parse().map_err(|_| {
                FabricError::Config(format!("invalid HTTP port: {http_port}"))
            })?);
        }
        if let Ok(trust) = std::env::var("HUB_TRUST_CLIENT_ADDRESS") {
            config.trust_client_address = trust == "1" || trust.eq_ignore_ascii_case("true");
        }

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| FabricError::Config(format!("failed to read config file: {e}")))?;
        Ok(toml::from_str(&content)?)
    }

    /// Set the control socket port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the bind host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the HTTP surface port
    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = Some(port);
        self
    }

    /// Accept agent-supplied addresses verbatim (development only)
    pub fn trusting_client_address(mut self) -> Self {
        self.trust_client_address = true;
        self
    }

    /// Override the registry decay settings
    pub fn with_registry(mut self, registry: RegistrySettings) -> Self {
        self.registry = registry;
        self
    }

    /// Reject inconsistent settings before any socket is opened
    pub fn validate(&self) -> Result<()> {
        if self.registry.idle_after_ms >= self.registry.offline_after_ms {
            return Err(FabricError::Config(format!(
                "idle_after_ms ({}) must be below offline_after_ms ({})",
                self.registry.idle_after_ms, self.registry.offline_after_ms
            )));
        }
        if self.registry.sweep_interval_ms == 0 {
            return Err(FabricError::Config(
                "sweep_interval_ms must be nonzero".to_string(),
            ));
        }
        Ok(())
    }

    /// Control socket bind address
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// HTTP surface bind address
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port.unwrap_or(self.port + 1))
    }
}

fn check_endpoint(label: &str, endpoint: &str) -> Result<()> {
    match endpoint.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(FabricError::Config(format!(
            "malformed {label}: {endpoint} (expected host:port)"
        ))),
    }
}
