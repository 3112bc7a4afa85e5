//! Hub control socket.
//!
//! One TCP connection per agent, carrying newline-delimited JSON control
//! requests. Every request is answered with a reply echoing its
//! `correlationId`; requests are multiplexed and replies are correlated,
//! not ordered. When the socket closes, the record registered on it goes
//! offline immediately.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

use crate::error::FabricError;
use crate::wire::{
    write_frame, Acked, ControlAction, ControlReply, ControlRequest, FrameStream, HeartbeatAck,
    LookupReply, RegisterAck,
};

use super::HubState;

/// Error code for an unparseable control line
pub const ERROR_INVALID_JSON: &str = "invalid_json";

/// Error code for an unknown agent id
pub const ERROR_AGENT_NOT_FOUND: &str = "agent_not_found";

/// Handle to one connected control socket
#[derive(Clone)]
pub struct ClientHandle {
    /// Push channel to the connection's writer task
    pub sender: mpsc::Sender<ControlReply>,
    /// Observed remote endpoint
    pub remote: SocketAddr,
}

/// Process-wide map of connected control sockets, `id → handle`.
///
/// A soft cache for server-push, reconstructed on reconnect; the
/// directory record stays authoritative.
#[derive(Default)]
pub struct ClientMap {
    inner: RwLock<HashMap<String, ClientHandle>>,
}

impl ClientMap {
    pub async fn insert(&self, id: &str, handle: ClientHandle) {
        self.inner.write().await.insert(id.to_string(), handle);
    }

    pub async fn remove(&self, id: &str) {
        self.inner.write().await.remove(id);
    }

    pub async fn get(&self, id: &str) -> Option<ClientHandle> {
        self.inner.read().await.get(id).cloned()
    }

    /// Connected control sockets
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Accept control connections until aborted. Connection tasks live in a
/// `JoinSet` owned here, so stopping the server also drops every open
/// control socket.
pub async fn serve_control(listener: TcpListener, state: Arc<HubState>) {
    let mut connections = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    connections.spawn(handle_connection(stream, peer_addr, Arc::clone(&state)));
                },
                Err(e) => {
                    tracing::warn!(error = %e, "control accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                },
            },
            // Reap finished connection tasks
            Some(_) = connections.join_next(), if !connections.is_empty() => {},
        }
    }
}

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, state: Arc<HubState>) {
    tracing::debug!(peer = %peer_addr, "control socket opened");

    let (read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::channel::<ControlReply>(32);

    // One writer task per connection; handlers and future server-push
    // share the same ordered channel
    let writer = tokio::spawn(async move {
        while let Some(reply) = out_rx.recv().await {
            if write_frame(&mut write_half, &reply).await.is_err() {
                break;
            }
        }
    });

    let mut frames = FrameStream::new(read_half);
    let mut bound_id: Option<String> = None;

    loop {
        let reply = match frames.next().await {
            Ok(Some(value)) => match serde_json::from_value::<ControlRequest>(value.clone()) {
                Ok(request) => {
                    handle_request(request, peer_addr, &state, &mut bound_id, &out_tx).await
                },
                Err(_) => ControlReply::fail(extract_correlation_id(&value), ERROR_INVALID_JSON),
            },
            Ok(None) => break,
            Err(FabricError::Protocol(_)) => ControlReply::fail(None, ERROR_INVALID_JSON),
            Err(_) => break,
        };

        // Any control message from a registered connection refreshes
        // last_seen
        if let Some(id) = &bound_id {
            state.registry.touch(id).await;
        }

        if out_tx.send(reply).await.is_err() {
            break;
        }
    }

    if let Some(id) = bound_id {
        state.registry.mark_offline(&id).await;
        state.clients.remove(&id).await;
        tracing::info!(id = %id, "control socket closed, agent offline");
    }
    writer.abort();
}

async fn handle_request(
    request: ControlRequest,
    peer_addr: SocketAddr,
    state: &Arc<HubState>,
    bound_id: &mut Option<String>,
    out_tx: &mpsc::Sender<ControlReply>,
) -> ControlReply {
    let cid = request.correlation_id;

    match request.action {
        ControlAction::Register {
            address,
            capabilities,
            metadata,
        } => {
            // Re-registering on the same socket abandons the old record
            if let Some(old) = bound_id.take() {
                state.registry.mark_offline(&old).await;
                state.clients.remove(&old).await;
            }

            let derived = super::registry::derive_address(
                peer_addr,
                address.as_deref(),
                state.trust_client_address,
            );
            let summary = state.registry.register(derived, capabilities, metadata).await;

            state
                .clients
                .insert(
                    &summary.id,
                    ClientHandle {
                        sender: out_tx.clone(),
                        remote: peer_addr,
                    },
                )
                .await;
            *bound_id = Some(summary.id.clone());
            tracing::info!(id = %summary.id, address = %summary.address, "agent registered");

            ok_reply(
                cid,
                &RegisterAck {
                    id: summary.id,
                    address: summary.address,
                },
            )
        },

        ControlAction::Heartbeat { id } => match state.registry.heartbeat(&id).await {
            Ok(timestamp) => ok_reply(cid, &HeartbeatAck { timestamp }),
            Err(_) => ControlReply::fail(cid, ERROR_AGENT_NOT_FOUND),
        },

        ControlAction::Discover(query) => {
            let page = state.registry.discover(&query).await;
            ok_reply(cid, &page)
        },

        ControlAction::Find {
            capability,
            limit,
            offset,
        } => {
            let page = state.registry.find(&capability, limit, offset).await;
            ok_reply(cid, &page)
        },

        ControlAction::Lookup { id } => match state.registry.lookup(&id).await {
            Some(agent) => ok_reply(cid, &LookupReply { agent }),
            None => ControlReply::fail(cid, ERROR_AGENT_NOT_FOUND),
        },

        ControlAction::Status {
            id,
            status,
            metadata,
        } => match state.registry.set_status(&id, status, metadata).await {
            Ok(()) => ok_reply(cid, &Acked {}),
            Err(_) => ControlReply::fail(cid, ERROR_AGENT_NOT_FOUND),
        },

        ControlAction::Disconnect { id } => {
            state.registry.mark_offline(&id).await;
            state.clients.remove(&id).await;
            ok_reply(cid, &Acked {})
        },

        ControlAction::Stats => {
            let stats = state.stats().await;
            ok_reply(cid, &stats)
        },
    }
}

fn ok_reply<T: serde::Serialize>(cid: Option<String>, payload: &T) -> ControlReply {
    ControlReply::ok_with(cid.clone(), payload)
        .unwrap_or_else(|_| ControlReply::fail(cid, "internal_error"))
}

fn extract_correlation_id(value: &Value) -> Option<String> {
    value
        .get("correlationId")
        .and_then(Value::as_str)
        .map(str::to_string)
}
