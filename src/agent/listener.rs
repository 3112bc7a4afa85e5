//! Inbound peer session listener.
//!
//! Accepts TCP connections on the configured port, runs one responder
//! session per accept, and dispatches decrypted application messages on
//! the runtime's inbound channel. The listener owns no state beyond its
//! accept task and is safe to run alongside outgoing sends.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{FabricError, Result};
use crate::session::{self, Incoming};

/// Accepting half of an agent's peer endpoint
pub struct Listener {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Listener {
    /// Bind the peer port (0 selects an ephemeral port) and start
    /// accepting sessions.
    pub async fn bind(port: u16, incoming_tx: mpsc::Sender<Incoming>) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| FabricError::Transport(format!("bind peer port {port}: {e}")))?;
        let local_addr = listener.local_addr()?;

        tracing::info!(addr = %local_addr, "peer listener started");
        let accept_task = tokio::spawn(accept_loop(listener, incoming_tx));

        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    /// Actual bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Actual bound port; differs from the configured one when binding
    /// port 0
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting new sessions
    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, incoming_tx: mpsc::Sender<Incoming>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let tx = incoming_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        session::respond_loop(stream, &peer_addr.to_string(), tx).await
                    {
                        tracing::debug!(peer = %peer_addr, error = %e, "inbound session ended");
                    }
                });
            },
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            },
        }
    }
}
