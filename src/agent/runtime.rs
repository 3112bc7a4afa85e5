//! Agent runtime.
//!
//! Composes the listener, the hub link and the pending-request tables
//! into the public [`Agent`] API. Inbound traffic is delivered on typed
//! channels: one mpsc channel for decrypted application messages and one
//! watch channel for hub connection state. There is no untyped event
//! dispatch.
//!
//! The supervision loop owns the hub side of the lifecycle: connect,
//! register, heartbeat, and (unless `auto_reconnect` is off) retry
//! with a fixed 5 second delay when the control socket drops. Every
//! reconnect re-registers; the hub mints a fresh id each time, so peers
//! holding the old one see `agent_not_found` until they rediscover.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use crate::config::AgentConfig;
use crate::error::{FabricError, Result};
use crate::session::{self, Incoming};
use crate::wire::{self, AgentStatus, AgentSummary, DiscoverPage, DiscoverQuery, HubStats};

use super::hub_client::{HubLink, RECONNECT_DELAY};
use super::listener::Listener;
use super::pending::PendingTable;
use super::resolver::AddressCache;

/// Default application request/response deadline
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Suffix appended to a request's message type on the reply
pub const RESPONSE_SUFFIX: &str = ":response";

/// Hub connection state, published on the runtime's state channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dialing or registering
    Connecting,
    /// Registered; the id channel carries the current id
    Connected,
    /// Control socket is down
    Disconnected,
}

/// Per-peer broadcast failure
#[derive(Debug, Clone)]
pub struct BroadcastError {
    pub agent: String,
    pub error: String,
}

/// Aggregate result of a broadcast; partial failure is not an error
#[derive(Debug, Clone)]
pub struct BroadcastReport {
    pub total: usize,
    pub delivered: usize,
    pub failed: usize,
    pub errors: Vec<BroadcastError>,
}

/// Typed inbound channels handed out by [`Agent::start`]
pub struct AgentEvents {
    /// Decrypted application messages
    pub messages: mpsc::Receiver<Incoming>,
    /// Hub connection state
    pub state: watch::Receiver<ConnectionState>,
}

struct AgentInner {
    config: AgentConfig,
    listener: Listener,
    link: RwLock<Option<Arc<HubLink>>>,
    agent_id: RwLock<Option<String>>,
    addresses: AddressCache,
    peer_pending: PendingTable<Incoming>,
    messages_tx: mpsc::Sender<Incoming>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
}

/// One running agent
pub struct Agent {
    inner: Arc<AgentInner>,
    supervisor: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.supervisor.abort();
        self.dispatcher.abort();
    }
}

impl Agent {
    /// Bind the listener, start supervision of the hub link, and hand
    /// back the runtime with its inbound channels. Returns before the
    /// first registration completes; watch the state channel for
    /// [`ConnectionState::Connected`].
    pub async fn start(config: AgentConfig) -> Result<(Agent, AgentEvents)> {
        config.validate()?;

        let (raw_tx, raw_rx) = mpsc::channel(64);
        let listener = Listener::bind(config.port, raw_tx).await?;

        let (messages_tx, messages_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, _) = watch::channel(false);

        let inner = Arc::new(AgentInner {
            config,
            listener,
            link: RwLock::new(None),
            agent_id: RwLock::new(None),
            addresses: AddressCache::new(),
            peer_pending: PendingTable::default(),
            messages_tx,
            state_tx,
            shutdown_tx,
        });

        let dispatcher = tokio::spawn(dispatch_loop(raw_rx, Arc::clone(&inner)));
        let supervisor = tokio::spawn(supervise(Arc::clone(&inner)));

        Ok((
            Agent {
                inner,
                supervisor,
                dispatcher,
            },
            AgentEvents {
                messages: messages_rx,
                state: state_rx,
            },
        ))
    }

    /// Hub-assigned id; `None` until the first registration completes
    pub async fn agent_id(&self) -> Option<String> {
        self.inner.agent_id.read().await.clone()
    }

    /// Actual bound P2P port
    pub fn port(&self) -> u16 {
        self.inner.listener.port()
    }

    /// Deliver one message to a peer by id
    pub async fn send(&self, to: &str, message_type: &str, payload: &Value) -> Result<()> {
        self.send_with_correlation(to, message_type, payload, &wire::correlation_id())
            .await
    }

    /// Application-level RPC: send a message and await the peer's
    /// matching `<type>:response`. `deadline` defaults to 30 seconds.
    pub async fn request(
        &self,
        to: &str,
        message_type: &str,
        payload: &Value,
        deadline: Option<Duration>,
    ) -> Result<Value> {
        let deadline = deadline.unwrap_or_else(|| self.inner.config.request_timeout());
        let correlation_id = wire::correlation_id();

        // Waiter first, so a fast peer cannot race the registration
        let rx = self.inner.peer_pending.register(&correlation_id)?;
        if let Err(e) = self
            .send_with_correlation(to, message_type, payload, &correlation_id)
            .await
        {
            self.inner.peer_pending.cancel(&correlation_id);
            return Err(e);
        }

        let incoming = self
            .inner
            .peer_pending
            .wait(&correlation_id, rx, deadline)
            .await?;
        Ok(incoming.payload)
    }

    /// Answer a received request: a fresh outbound session carrying
    /// `<type>:response` under the original correlation id.
    pub async fn respond(
        &self,
        to: &str,
        message_type: &str,
        correlation_id: &str,
        payload: &Value,
    ) -> Result<()> {
        let response_type = format!("{message_type}{RESPONSE_SUFFIX}");
        self.send_with_correlation(to, &response_type, payload, correlation_id)
            .await
    }

    /// Fan a message out to every online agent matching the capability
    /// filter. Per-peer failures are collected, not raised.
    pub async fn broadcast(
        &self,
        message_type: &str,
        payload: &Value,
        capabilities: &[String],
    ) -> Result<BroadcastReport> {
        let query = DiscoverQuery {
            capabilities: (!capabilities.is_empty()).then(|| capabilities.to_vec()),
            status: Some(AgentStatus::Online),
            ..Default::default()
        };
        let page = self.discover(query).await?;

        let sends = page.agents.iter().map(|agent| {
            let id = agent.id.clone();
            async move {
                let outcome = self.send(&id, message_type, payload).await;
                (id, outcome)
            }
        });
        let outcomes = futures::future::join_all(sends).await;

        let mut report = BroadcastReport {
            total: outcomes.len(),
            delivered: 0,
            failed: 0,
            errors: Vec::new(),
        };
        for (agent, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    report.errors.push(BroadcastError {
                        agent,
                        error: e.to_string(),
                    });
                },
            }
        }
        Ok(report)
    }

    /// Query the hub directory; results refresh the address cache
    pub async fn discover(&self, query: DiscoverQuery) -> Result<DiscoverPage> {
        let link = self.current_link().await?;
        let page = link.discover(query).await?;
        for agent in &page.agents {
            self.inner.addresses.insert(&agent.id, &agent.address);
        }
        Ok(page)
    }

    /// Find online agents advertising one capability; results refresh
    /// the address cache
    pub async fn find(&self, capability: &str) -> Result<Vec<AgentSummary>> {
        let link = self.current_link().await?;
        let page = link.find(capability, None, None).await?;
        for agent in &page.agents {
            self.inner.addresses.insert(&agent.id, &agent.address);
        }
        Ok(page.agents)
    }

    /// Look up one record by id, whatever its status
    pub async fn lookup(&self, id: &str) -> Result<AgentSummary> {
        self.current_link().await?.lookup(id).await
    }

    /// Update own status and/or merge metadata
    pub async fn set_status(
        &self,
        status: Option<AgentStatus>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<()> {
        let link = self.current_link().await?;
        let id = self.require_id().await?;
        link.set_status(&id, status, metadata).await
    }

    /// Aggregate hub counters
    pub async fn hub_stats(&self) -> Result<HubStats> {
        self.current_link().await?.stats().await
    }

    /// Graceful teardown: deregister, cancel every pending waiter with a
    /// transport error, and stop all tasks.
    pub async fn shutdown(self) {
        let _ = self.inner.shutdown_tx.send(true);

        if let Some(link) = self.inner.link.write().await.take() {
            if let Some(id) = self.inner.agent_id.read().await.clone() {
                let _ = link.disconnect(&id).await;
            }
            link.shutdown();
        }

        self.inner.peer_pending.fail_all();
        self.inner.listener.shutdown();
        self.supervisor.abort();
        self.dispatcher.abort();
        let _ = self.inner.state_tx.send(ConnectionState::Disconnected);
        tracing::info!("agent runtime stopped");
    }

    async fn current_link(&self) -> Result<Arc<HubLink>> {
        self.inner
            .link
            .read()
            .await
            .clone()
            .ok_or_else(|| FabricError::Transport("not connected to hub".to_string()))
    }

    async fn require_id(&self) -> Result<String> {
        self.inner
            .agent_id
            .read()
            .await
            .clone()
            .ok_or_else(|| FabricError::Transport("not registered with hub".to_string()))
    }

    /// Resolve a peer address (cache, then hub lookup), dial it, and run
    /// the initiator flow.
    async fn send_with_correlation(
        &self,
        to: &str,
        message_type: &str,
        payload: &Value,
        correlation_id: &str,
    ) -> Result<()> {
        let from = self.require_id().await?;
        let addr = self.resolve(to).await?;
        session::deliver(&addr, &from, message_type, payload, correlation_id).await
    }

    /// Address resolution per the cache contract: fresh entry wins,
    /// otherwise hub lookup; offline peers are refused, idle peers may
    /// still answer.
    async fn resolve(&self, id: &str) -> Result<String> {
        if let Some(addr) = self.inner.addresses.fresh(id) {
            return Ok(addr);
        }

        let link = self.current_link().await?;
        let agent = link.lookup(id).await?;
        if agent.status == AgentStatus::Offline {
            return Err(FabricError::AgentOffline(id.to_string()));
        }

        self.inner.addresses.insert(id, &agent.address);
        Ok(agent.address)
    }
}

/// Route inbound messages: a `*:response` with a registered waiter
/// completes that request; everything else flows to the application
/// channel, including late responses whose waiter already timed out.
async fn dispatch_loop(mut raw_rx: mpsc::Receiver<Incoming>, inner: Arc<AgentInner>) {
    while let Some(incoming) = raw_rx.recv().await {
        let incoming = if incoming.message_type.ends_with(RESPONSE_SUFFIX) {
            match inner
                .peer_pending
                .complete(&incoming.correlation_id.clone(), incoming)
            {
                Ok(()) => continue,
                Err(unclaimed) => unclaimed,
            }
        } else {
            incoming
        };

        if inner.messages_tx.send(incoming).await.is_err() {
            // Application dropped its receiver
            break;
        }
    }
}

/// Own the hub link lifecycle: connect, register, heartbeat, reconnect.
async fn supervise(inner: Arc<AgentInner>) {
    let mut shutdown_rx = inner.shutdown_tx.subscribe();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let _ = inner.state_tx.send(ConnectionState::Connecting);

        match connect_and_register(&inner).await {
            Ok(link) => {
                let _ = inner.state_tx.send(ConnectionState::Connected);
                heartbeat_until_closed(&inner, &link, &mut shutdown_rx).await;
                *inner.link.write().await = None;
                link.shutdown();
            },
            Err(e) => {
                tracing::warn!(hub = %inner.config.hub, error = %e, "hub connection failed");
            },
        }

        let _ = inner.state_tx.send(ConnectionState::Disconnected);
        if !inner.config.auto_reconnect || *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {},
            _ = shutdown_rx.changed() => break,
        }
    }
}

async fn connect_and_register(inner: &Arc<AgentInner>) -> Result<Arc<HubLink>> {
    let link = Arc::new(
        HubLink::connect(&inner.config.hub, inner.config.hub_request_timeout()).await?,
    );

    // The hub replaces the host part with the observed IP; the port is
    // what matters here, and must be the actually bound one
    let address = inner
        .config
        .address
        .clone()
        .unwrap_or_else(|| format!("127.0.0.1:{}", inner.listener.port()));

    let ack = link
        .register(
            Some(address),
            inner.config.capabilities.clone(),
            inner.config.metadata.clone(),
        )
        .await?;

    tracing::info!(id = %ack.id, address = %ack.address, "registered with hub");

    // A fresh id invalidates anything resolved under the old one
    inner.addresses.clear();
    *inner.agent_id.write().await = Some(ack.id);
    *inner.link.write().await = Some(Arc::clone(&link));

    Ok(link)
}

async fn heartbeat_until_closed(
    inner: &Arc<AgentInner>,
    link: &Arc<HubLink>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(inner.config.heartbeat_interval());
    // The first tick fires immediately; registration just refreshed us
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let id = inner.agent_id.read().await.clone();
                if let Some(id) = id {
                    if let Err(e) = link.heartbeat(&id).await {
                        tracing::warn!(error = %e, "heartbeat failed");
                    }
                }
            },
            _ = link.closed() => {
                tracing::warn!("hub control socket closed");
                break;
            },
            _ = shutdown_rx.changed() => break,
        }
    }
}
