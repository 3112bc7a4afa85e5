//! # M2M Fabric - Agent Discovery and Encrypted Transport
//!
//! Discovery-and-transport fabric for independent agent processes: a
//! central hub acts as an authoritative but content-blind phone book,
//! and agents exchange end-to-end-encrypted messages over direct
//! peer-to-peer TCP sessions. The hub never sees a payload.
//!
//! ## Architecture
//!
//! ```text
//!           Agent A                Hub                 Agent B
//!          ┌────────┐          ┌─────────┐           ┌────────┐
//!          │Runtime │──ctrl───▶│Registry │◀────ctrl──│Runtime │
//!          │        │          │         │           │        │
//!          │Listener│◀═══════ P2P session (encrypted) ═══════▶│
//!          └────────┘          └─────────┘           └────────┘
//! ```
//!
//! Both channels carry newline-delimited JSON objects. The control
//! channel registers agents, answers discovery queries and tracks
//! liveness; each peer session is a fresh TCP connection keyed by an
//! ephemeral X25519 exchange, with payloads sealed under AES-256-GCM.
//!
//! ## Peer frames
//!
//! | `type`          | Direction             | Purpose                      |
//! |-----------------|-----------------------|------------------------------|
//! | `handshake`     | initiator → responder | public key + sender id       |
//! | `handshake_ack` | responder → initiator | completes key agreement      |
//! | `message`       | either                | sealed application payload   |
//! | `ack`           | receiver → sender     | delivery acknowledgement     |
//! | `ping` / `pong` | either                | liveness                     |
//! | `{error: ...}`  | either                | fault notice                 |
//!
//! ## Control actions
//!
//! `register`, `heartbeat`, `discover`, `find`, `lookup`, `status`,
//! `disconnect`, `stats`. Each request carries a 16-hex `correlationId`
//! echoed verbatim on its reply. Records decay `online → idle →
//! offline` without heartbeats and leave discovery once offline.
//!
//! ## Quick start
//!
//! ### Hub
//!
//! ```rust,ignore
//! use m2m_fabric::{Hub, HubConfig};
//!
//! let hub = Hub::start(HubConfig::new(9700)).await?;
//! hub.run().await?;
//! ```
//!
//! ### Agent
//!
//! ```rust,ignore
//! use m2m_fabric::{Agent, AgentConfig, DiscoverQuery};
//! use serde_json::json;
//!
//! let config = AgentConfig::new(4000)
//!     .with_hub("127.0.0.1:9700")
//!     .with_capability("chat");
//! let (agent, mut events) = Agent::start(config).await?;
//!
//! // Find peers and talk to them
//! let peers = agent.find("chat").await?;
//! if let Some(peer) = peers.first() {
//!     agent.send(&peer.id, "hello", &json!({"n": 7})).await?;
//!     let reply = agent.request(&peer.id, "sum", &json!({"nums": [1, 2, 3]}), None).await?;
//! }
//!
//! // Inbound messages arrive on a typed channel
//! while let Some(incoming) = events.messages.recv().await {
//!     println!("{}: {} {}", incoming.from, incoming.message_type, incoming.payload);
//! }
//! ```
//!
//! ## Security model
//!
//! Sessions are confidential against a passive network observer: keys
//! are ephemeral per connection and payloads are sealed with an AEAD.
//! Agent ids are hub-assigned and not cryptographically bound to the
//! handshake keys, so there is no mutual authentication; see the
//! project documentation before deploying across trust boundaries.
//!
//! ## Modules
//!
//! - [`agent`]: runtime, listener, hub link, pending tables, resolver
//! - [`hub`]: registry, control server, informational HTTP surface
//! - [`session`]: peer-to-peer session engine
//! - [`crypto`]: X25519 exchange and AES-256-GCM seal/open
//! - [`wire`]: framing and the frame/control schemas
//! - [`config`]: agent and hub configuration
//! - [`error`]: error types and result alias

pub mod agent;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hub;
pub mod session;
pub mod wire;

// Re-exports for convenience
pub use agent::{
    Agent, AgentEvents, BroadcastError, BroadcastReport, ConnectionState, HubLink,
};
pub use config::{AgentConfig, HubConfig, RegistrySettings};
pub use error::{FabricError, Result};
pub use hub::{Hub, HubState, Registry};
pub use session::Incoming;
pub use wire::{AgentStatus, AgentSummary, DiscoverQuery, HubStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
