//! Persistent hub control connection.
//!
//! One [`HubLink`] is one live connection: requests go out with fresh
//! correlation ids, a reader task routes each reply to its waiter, and
//! closing the socket fails every request still in flight. Reconnection
//! policy lives above, in the runtime's supervision loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{FabricError, Result};
use crate::wire::{
    self, write_frame, Acked, AgentStatus, AgentSummary, ControlAction, ControlReply,
    ControlRequest, DiscoverPage, DiscoverQuery, FindPage, FrameStream, HeartbeatAck, HubStats,
    LookupReply, RegisterAck,
};

use super::pending::{PendingTable, DEFAULT_PENDING_CAPACITY};

/// Default deadline for one control request
pub const HUB_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed delay between reconnect attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// One live control connection to the hub
pub struct HubLink {
    writer: Mutex<OwnedWriteHalf>,
    pending: Arc<PendingTable<ControlReply>>,
    request_timeout: Duration,
    closed_rx: watch::Receiver<bool>,
    reader_task: JoinHandle<()>,
}

impl HubLink {
    /// Dial the hub control endpoint and start the reply reader
    pub async fn connect(addr: &str, request_timeout: Duration) -> Result<Self> {
        let stream = timeout(request_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| FabricError::Timeout(request_timeout))?
            .map_err(|e| FabricError::Transport(format!("hub connect {addr}: {e}")))?;

        let (read_half, write_half) = stream.into_split();
        let pending = Arc::new(PendingTable::new(DEFAULT_PENDING_CAPACITY));
        let (closed_tx, closed_rx) = watch::channel(false);
        let reader_task = tokio::spawn(read_loop(
            FrameStream::new(read_half),
            Arc::clone(&pending),
            closed_tx,
        ));

        Ok(Self {
            writer: Mutex::new(write_half),
            pending,
            request_timeout,
            closed_rx,
            reader_task,
        })
    }

    /// Issue one correlated control request and await its reply
    pub async fn request(&self, action: ControlAction) -> Result<ControlReply> {
        let cid = wire::correlation_id();
        let rx = self.pending.register(&cid)?;

        let request = ControlRequest {
            correlation_id: Some(cid.clone()),
            action,
        };
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_frame(&mut *writer, &request).await {
                self.pending.cancel(&cid);
                return Err(e);
            }
        }

        self.pending.wait(&cid, rx, self.request_timeout).await
    }

    /// Register this agent; the hub mints a fresh id and derives the
    /// advertised address
    pub async fn register(
        &self,
        address: Option<String>,
        capabilities: Vec<String>,
        metadata: Map<String, serde_json::Value>,
    ) -> Result<RegisterAck> {
        self.request(ControlAction::Register {
            address,
            capabilities,
            metadata,
        })
        .await?
        .decode()
    }

    /// Refresh `last_seen` and force status back to online
    pub async fn heartbeat(&self, id: &str) -> Result<HeartbeatAck> {
        self.request(ControlAction::Heartbeat { id: id.to_string() })
            .await?
            .decode()
    }

    /// Query the directory with AND-ed filters
    pub async fn discover(&self, query: DiscoverQuery) -> Result<DiscoverPage> {
        self.request(ControlAction::Discover(query)).await?.decode()
    }

    /// Find online agents advertising one capability
    pub async fn find(
        &self,
        capability: &str,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<FindPage> {
        self.request(ControlAction::Find {
            capability: capability.to_string(),
            limit,
            offset,
        })
        .await?
        .decode()
    }

    /// Look up one record by id, whatever its status
    pub async fn lookup(&self, id: &str) -> Result<AgentSummary> {
        let reply = self
            .request(ControlAction::Lookup { id: id.to_string() })
            .await?;

        if reply.error_code() == Some("agent_not_found") {
            return Err(FabricError::AgentNotFound(id.to_string()));
        }
        Ok(reply.decode::<LookupReply>()?.agent)
    }

    /// Update status and/or merge metadata
    pub async fn set_status(
        &self,
        id: &str,
        status: Option<AgentStatus>,
        metadata: Option<Map<String, serde_json::Value>>,
    ) -> Result<()> {
        self.request(ControlAction::Status {
            id: id.to_string(),
            status,
            metadata,
        })
        .await?
        .decode::<Acked>()
        .map(|_| ())
    }

    /// Mark this agent offline
    pub async fn disconnect(&self, id: &str) -> Result<()> {
        self.request(ControlAction::Disconnect { id: id.to_string() })
            .await?
            .decode::<Acked>()
            .map(|_| ())
    }

    /// Aggregate hub counters
    pub async fn stats(&self) -> Result<HubStats> {
        self.request(ControlAction::Stats).await?.decode()
    }

    /// True once the socket has gone away
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Resolve when the socket goes away
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Tear the link down, failing every request in flight
    pub fn shutdown(&self) {
        self.reader_task.abort();
        self.pending.fail_all();
    }
}

impl Drop for HubLink {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Route each correlated reply to its waiter; uncorrelated or garbled
/// frames are logged and dropped.
async fn read_loop(
    mut frames: FrameStream<OwnedReadHalf>,
    pending: Arc<PendingTable<ControlReply>>,
    closed_tx: watch::Sender<bool>,
) {
    loop {
        match frames.next().await {
            Ok(Some(value)) => {
                let reply: ControlReply = match serde_json::from_value(value) {
                    Ok(reply) => reply,
                    Err(e) => {
                        tracing::debug!(error = %e, "unparseable hub reply");
                        continue;
                    },
                };
                match reply.correlation_id.clone() {
                    Some(cid) => {
                        if pending.complete(&cid, reply).is_err() {
                            tracing::trace!(correlation_id = %cid, "reply with no waiter");
                        }
                    },
                    None => tracing::debug!("uncorrelated hub frame dropped"),
                }
            },
            Ok(None) => break,
            Err(FabricError::Protocol(e)) => {
                tracing::debug!(error = %e, "bad hub frame skipped");
            },
            Err(e) => {
                tracing::debug!(error = %e, "hub read failed");
                break;
            },
        }
    }

    let _ = closed_tx.send(true);
    pending.fail_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// Minimal scripted hub: answers every request with `responder`
    async fn fake_hub<F>(responder: F) -> String
    where
        F: Fn(ControlRequest) -> Option<serde_json::Value> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut frames = FrameStream::new(read_half);

            while let Ok(Some(value)) = frames.next().await {
                let request: ControlRequest = serde_json::from_value(value).unwrap();
                if let Some(reply) = responder(request) {
                    let mut line = serde_json::to_vec(&reply).unwrap();
                    line.push(b'\n');
                    write_half.write_all(&line).await.unwrap();
                }
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_request_reply_correlation() {
        let addr = fake_hub(|request| {
            Some(json!({
                "correlationId": request.correlation_id,
                "status": "ok",
                "timestamp": 1_700_000_000_000u64,
            }))
        })
        .await;

        let link = HubLink::connect(&addr, Duration::from_secs(1)).await.unwrap();
        let ack = link.heartbeat("some-id").await.unwrap();
        assert_eq!(ack.timestamp, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_request_timeout_when_hub_silent() {
        let addr = fake_hub(|_| None).await;

        let link = HubLink::connect(&addr, Duration::from_millis(50))
            .await
            .unwrap();
        let err = link.heartbeat("some-id").await.unwrap_err();
        assert!(matches!(err, FabricError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_error_reply_maps_to_registry_error() {
        let addr = fake_hub(|request| {
            Some(json!({
                "correlationId": request.correlation_id,
                "status": "error",
                "error": "agent_not_found",
            }))
        })
        .await;

        let link = HubLink::connect(&addr, Duration::from_secs(1)).await.unwrap();
        let err = link.lookup("missing-id").await.unwrap_err();
        assert!(matches!(err, FabricError::AgentNotFound(id) if id == "missing-id"));
    }

    #[tokio::test]
    async fn test_in_flight_requests_fail_on_close() {
        // Hub that drops the connection on first request
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, _write_half) = stream.into_split();
            let mut frames = FrameStream::new(read_half);
            let _ = frames.next().await;
            // Both halves drop here
        });

        let link = HubLink::connect(&addr, Duration::from_secs(5)).await.unwrap();
        let err = link.heartbeat("some-id").await.unwrap_err();
        assert!(err.is_transport());
        assert!(link.is_closed());
    }
}
