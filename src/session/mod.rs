//! Peer-to-peer session engine.
//!
//! One session is one TCP connection carrying one key agreement and at
//! least one application frame. The reference flow is strictly one
//! message per outgoing session:
//!
//! ```text
//!               (accept/connect)
//!                    │
//!                    ▼
//!               ┌─────────┐  handshake / handshake_ack  ┌─────────┐
//!   initiator ─▶│ AWAIT-  │────────────────────────────▶│  KEYED  │
//!   responder ─▶│ HELLO   │                             │         │
//!               └─────────┘                             └─────────┘
//!                    │                                       │
//!                    │ timeout / bad frame                   │ message, ack,
//!                    ▼                                       ▼ ping, pong
//!               ┌─────────┐◀────── close / AEAD ⊥ ──────┌─────────┐
//!               │ CLOSED  │                             │  KEYED  │
//!               └─────────┘                             └─────────┘
//! ```
//!
//! The initiator opens a connection per send, completes the handshake,
//! delivers one sealed `message`, waits for the `ack` and closes. The
//! responder keeps the session until idle timeout and accepts any number
//! of application frames. Session keys are ephemeral per connection and
//! never reused across connections.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::crypto::{self, CryptoError, KeyPair, SessionKey};
use crate::error::{FabricError, Result};
use crate::wire::{
    self, write_frame, FaultFrame, FrameStream, PeerFrame, FAULT_DECRYPTION_FAILED,
};

/// Initiator budget for connect, handshake_ack and the final ack
pub const INITIATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Responder receive-idle timeout
pub const RESPONDER_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Decrypted application message dispatched upward by a listener
#[derive(Debug, Clone)]
pub struct Incoming {
    /// Sender's agent id, learned during the handshake
    pub from: String,
    /// Application message type
    pub message_type: String,
    /// Decrypted payload
    pub payload: Value,
    /// Correlation id carried inside the sealed envelope
    pub correlation_id: String,
    /// Sender's Unix-millisecond timestamp
    pub timestamp: u64,
}

/// Plaintext envelope sealed into a `message` frame's `data` field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(rename = "type")]
    message_type: String,
    payload: Value,
    correlation_id: String,
    timestamp: u64,
}

/// Dial a peer and deliver one message: connect, handshake, seal, send,
/// await the ack, close.
pub async fn deliver(
    addr: &str,
    from_id: &str,
    message_type: &str,
    payload: &Value,
    correlation_id: &str,
) -> Result<()> {
    let stream = timeout(INITIATOR_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| FabricError::Timeout(INITIATOR_TIMEOUT))?
        .map_err(|e| FabricError::Transport(format!("connect {addr}: {e}")))?;

    initiate(stream, from_id, message_type, payload, correlation_id).await
}

/// Initiator side of one session over an established stream.
pub async fn initiate<S>(
    stream: S,
    from_id: &str,
    message_type: &str,
    payload: &Value,
    correlation_id: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut frames = FrameStream::new(read_half);

    let keys = KeyPair::generate();
    write_frame(
        &mut write_half,
        &PeerFrame::Handshake {
            key: keys.public_spki(),
            from: from_id.to_string(),
        },
    )
    .await?;

    let session_key = await_handshake_ack(&mut frames, &keys).await?;

    let envelope = Envelope {
        message_type: message_type.to_string(),
        payload: payload.clone(),
        correlation_id: correlation_id.to_string(),
        timestamp: wire::unix_millis(),
    };
    let data = crypto::seal(&session_key, &serde_json::to_vec(&envelope)?)?;

    write_frame(
        &mut write_half,
        &PeerFrame::Message {
            message_type: message_type.to_string(),
            data,
            correlation_id: correlation_id.to_string(),
        },
    )
    .await?;

    await_ack(&mut frames, &mut write_half, correlation_id).await
}

async fn await_handshake_ack<R>(frames: &mut FrameStream<R>, keys: &KeyPair) -> Result<SessionKey>
where
    R: AsyncRead + Unpin,
{
    let value = timeout(INITIATOR_TIMEOUT, frames.next())
        .await
        .map_err(|_| FabricError::Timeout(INITIATOR_TIMEOUT))??
        .ok_or_else(|| FabricError::Transport("peer closed during handshake".to_string()))?;

    if let Some(code) = FaultFrame::from_value(&value) {
        return Err(fault_to_error(code));
    }

    match decode_typed(&value)? {
        PeerFrame::HandshakeAck { key } => Ok(keys.derive_from_spki(&key)?),
        other => Err(FabricError::Protocol(format!(
            "expected handshake_ack, got {other:?}"
        ))),
    }
}

async fn await_ack<R, W>(
    frames: &mut FrameStream<R>,
    write_half: &mut W,
    correlation_id: &str,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let value = timeout(INITIATOR_TIMEOUT, frames.next())
            .await
            .map_err(|_| FabricError::Timeout(INITIATOR_TIMEOUT))??
            .ok_or_else(|| FabricError::Transport("peer closed before ack".to_string()))?;

        if let Some(code) = FaultFrame::from_value(&value) {
            return Err(fault_to_error(code));
        }

        match decode_typed(&value)? {
            PeerFrame::Ack { correlation_id: cid } if cid == correlation_id => return Ok(()),
            // Stray acks are opaque; liveness frames are answered
            PeerFrame::Ack { .. } | PeerFrame::Pong => {},
            PeerFrame::Ping => write_frame(write_half, &PeerFrame::Pong).await?,
            other => {
                return Err(FabricError::Protocol(format!(
                    "expected ack, got {other:?}"
                )))
            },
        }
    }
}

/// Responder side: run one inbound session to completion, dispatching
/// each decrypted message on `incoming_tx`.
pub async fn respond_loop<S>(
    stream: S,
    peer: &str,
    incoming_tx: mpsc::Sender<Incoming>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut frames = FrameStream::new(read_half);

    // AWAIT-HELLO: anything but a clean handshake closes the session
    let value = match timeout(RESPONDER_IDLE_TIMEOUT, frames.next()).await {
        Err(_) => return Err(FabricError::Timeout(RESPONDER_IDLE_TIMEOUT)),
        Ok(Ok(Some(value))) => value,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => {
            let _ = write_frame(&mut write_half, &FaultFrame::invalid_message()).await;
            return Err(e);
        },
    };

    if FaultFrame::from_value(&value).is_some() {
        return Ok(());
    }

    let (session_key, peer_id) = match decode_typed(&value) {
        Ok(PeerFrame::Handshake { key, from }) => {
            let keys = KeyPair::generate();
            let session_key = keys.derive_from_spki(&key)?;
            write_frame(
                &mut write_half,
                &PeerFrame::HandshakeAck {
                    key: keys.public_spki(),
                },
            )
            .await?;
            (session_key, from)
        },
        _ => {
            let _ = write_frame(&mut write_half, &FaultFrame::invalid_message()).await;
            return Err(FabricError::Protocol(format!(
                "{peer}: expected handshake"
            )));
        },
    };

    tracing::debug!(peer = %peer, from = %peer_id, "session keyed");

    // KEYED: any number of application frames until idle timeout or close
    loop {
        let value = match timeout(RESPONDER_IDLE_TIMEOUT, frames.next()).await {
            Err(_) => return Err(FabricError::Timeout(RESPONDER_IDLE_TIMEOUT)),
            Ok(Ok(Some(value))) => value,
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(FabricError::Protocol(_))) => {
                // Bad line: notify the sender, discard, keep the session
                let _ = write_frame(&mut write_half, &FaultFrame::invalid_message()).await;
                continue;
            },
            Ok(Err(e)) => return Err(e),
        };

        if FaultFrame::from_value(&value).is_some() {
            return Ok(());
        }

        match decode_typed(&value) {
            Ok(PeerFrame::Message {
                data,
                correlation_id,
                ..
            }) => {
                // AEAD failure is not fatal to the responder
                let plaintext = match crypto::open(&session_key, &data) {
                    Ok(plaintext) => plaintext,
                    Err(_) => {
                        write_frame(&mut write_half, &FaultFrame::decryption_failed()).await?;
                        continue;
                    },
                };

                let envelope: Envelope = match serde_json::from_slice(&plaintext) {
                    Ok(envelope) => envelope,
                    Err(_) => {
                        let _ =
                            write_frame(&mut write_half, &FaultFrame::invalid_message()).await;
                        return Err(FabricError::Protocol(format!(
                            "{peer_id}: sealed payload is not an envelope"
                        )));
                    },
                };

                write_frame(&mut write_half, &PeerFrame::Ack { correlation_id }).await?;

                let incoming = Incoming {
                    from: peer_id.clone(),
                    message_type: envelope.message_type,
                    payload: envelope.payload,
                    correlation_id: envelope.correlation_id,
                    timestamp: envelope.timestamp,
                };
                if incoming_tx.send(incoming).await.is_err() {
                    // Runtime is shutting down
                    return Ok(());
                }
            },
            Ok(PeerFrame::Ping) => write_frame(&mut write_half, &PeerFrame::Pong).await?,
            Ok(PeerFrame::Pong) | Ok(PeerFrame::Ack { .. }) => {},
            Ok(PeerFrame::Handshake { .. }) | Ok(PeerFrame::HandshakeAck { .. }) => {
                let _ = write_frame(&mut write_half, &FaultFrame::invalid_message()).await;
                return Err(FabricError::Protocol(format!(
                    "{peer_id}: handshake frame on keyed session"
                )));
            },
            Err(e) => {
                let _ = write_frame(&mut write_half, &FaultFrame::invalid_message()).await;
                return Err(e);
            },
        }
    }
}

fn decode_typed(value: &Value) -> Result<PeerFrame> {
    PeerFrame::decode(value)
        .ok_or_else(|| FabricError::Protocol("unexpected fault frame".to_string()))?
        .map_err(|e| FabricError::Protocol(format!("bad peer frame: {e}")))
}

fn fault_to_error(code: String) -> FabricError {
    if code == FAULT_DECRYPTION_FAILED {
        FabricError::Crypto(CryptoError::DecryptionFailed)
    } else {
        FabricError::Application(code)
    }
}
