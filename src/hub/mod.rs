//! The hub: an authoritative but content-blind agent directory.
//!
//! Agents register over the control socket, heartbeat to stay `online`,
//! and query the directory to find each other; message payloads never
//! touch the hub. Three tasks run per instance:
//!
//! - the control server ([`server`]), one connection per agent;
//! - the sweeper, decaying `online → idle → offline` on the
//!   [`Registry`]'s cadence;
//! - the informational HTTP surface ([`http`]).

pub mod http;
pub mod registry;
pub mod server;

pub use registry::{derive_address, AgentRecord, Registry, RegistryCounts};
pub use server::{ClientHandle, ClientMap};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::HubConfig;
use crate::error::{FabricError, Result};
use crate::wire::HubStats;

/// State shared by the control server and the HTTP surface
pub struct HubState {
    pub registry: Registry,
    pub clients: ClientMap,
    pub trust_client_address: bool,
    started: Instant,
}

impl HubState {
    /// Build the shared state from a hub configuration
    pub fn new(config: &HubConfig) -> Self {
        Self {
            registry: Registry::new(config.registry.clone()),
            clients: ClientMap::default(),
            trust_client_address: config.trust_client_address,
            started: Instant::now(),
        }
    }

    /// Seconds since the hub started
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Aggregate counters for `stats` and `/stats`
    pub async fn stats(&self) -> HubStats {
        let counts = self.registry.counts().await;
        HubStats {
            total: counts.total,
            online: counts.online,
            idle: counts.idle,
            offline: counts.offline,
            connected_sockets: self.clients.len().await,
            uptime_secs: self.uptime_secs(),
            capabilities: counts.capabilities,
        }
    }
}

/// One running hub instance
pub struct Hub {
    state: Arc<HubState>,
    control_addr: SocketAddr,
    http_addr: SocketAddr,
    control_task: JoinHandle<()>,
    http_task: JoinHandle<()>,
    sweeper_task: JoinHandle<()>,
}

impl Hub {
    /// Bind the control socket and HTTP surface and start all hub tasks
    pub async fn start(config: HubConfig) -> Result<Hub> {
        config.validate()?;
        let state = Arc::new(HubState::new(&config));

        let control_listener = TcpListener::bind(config.control_addr())
            .await
            .map_err(|e| {
                FabricError::Transport(format!("bind control {}: {e}", config.control_addr()))
            })?;
        let control_addr = control_listener.local_addr()?;

        // Port 0 picks an ephemeral control port; the HTTP surface must
        // not then try to bind port 1
        let http_bind = match (config.http_port, config.port) {
            (Some(port), _) => format!("{}:{}", config.host, port),
            (None, 0) => format!("{}:0", config.host),
            (None, port) => format!("{}:{}", config.host, port + 1),
        };
        let http_listener = TcpListener::bind(&http_bind)
            .await
            .map_err(|e| FabricError::Transport(format!("bind http {http_bind}: {e}")))?;
        let http_addr = http_listener.local_addr()?;

        let control_task = tokio::spawn(server::serve_control(
            control_listener,
            Arc::clone(&state),
        ));

        let router = http::create_router(Arc::clone(&state));
        let http_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(http_listener, router).await {
                tracing::error!(error = %e, "http surface failed");
            }
        });

        let sweeper_task = tokio::spawn(sweep_loop(Arc::clone(&state)));

        tracing::info!(control = %control_addr, http = %http_addr, "hub started");

        Ok(Hub {
            state,
            control_addr,
            http_addr,
            control_task,
            http_task,
            sweeper_task,
        })
    }

    /// Control socket address actually bound
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    /// Control socket port actually bound
    pub fn control_port(&self) -> u16 {
        self.control_addr.port()
    }

    /// HTTP surface address actually bound
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Shared state, mainly for tests and embedding
    pub fn state(&self) -> &Arc<HubState> {
        &self.state
    }

    /// Run until the control server stops
    pub async fn run(mut self) -> Result<()> {
        (&mut self.control_task)
            .await
            .map_err(|e| FabricError::Transport(format!("control server task: {e}")))?;
        Ok(())
    }

    /// Stop all hub tasks
    pub fn shutdown(&self) {
        self.control_task.abort();
        self.http_task.abort();
        self.sweeper_task.abort();
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn sweep_loop(state: Arc<HubState>) {
    let mut interval = tokio::time::interval(state.registry.sweep_interval());
    interval.tick().await;
    loop {
        interval.tick().await;
        state.registry.sweep().await;
    }
}
