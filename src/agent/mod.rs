//! Agent runtime: listener, hub link, resolution and request pairing.
//!
//! The runtime composes four pieces:
//!
//! - [`Listener`] accepts inbound peer sessions and emits decrypted
//!   [`crate::session::Incoming`] messages.
//! - [`HubLink`] is the persistent control connection, multiplexed by
//!   correlation id.
//! - [`PendingTable`] holds the one-shot waiters for in-flight requests,
//!   one instance for hub replies and one for peer responses.
//! - [`AddressCache`] keeps resolved peer addresses for 60 seconds.
//!
//! [`Agent`] wires them together and is the crate's main entry point:
//!
//! ```rust,ignore
//! use m2m_fabric::{Agent, AgentConfig};
//!
//! let config = AgentConfig::new(4000).with_capability("chat");
//! let (agent, mut events) = Agent::start(config).await?;
//!
//! agent.send(&peer_id, "hello", &serde_json::json!({"n": 7})).await?;
//! while let Some(incoming) = events.messages.recv().await {
//!     println!("{} says {}", incoming.from, incoming.payload);
//! }
//! ```

mod hub_client;
mod listener;
mod pending;
mod resolver;
mod runtime;

pub use hub_client::{HubLink, HUB_REQUEST_TIMEOUT, RECONNECT_DELAY};
pub use listener::Listener;
pub use pending::{PendingTable, DEFAULT_PENDING_CAPACITY};
pub use resolver::{AddressCache, ADDRESS_TTL};
pub use runtime::{
    Agent, AgentEvents, BroadcastError, BroadcastReport, ConnectionState,
    DEFAULT_REQUEST_TIMEOUT, RESPONSE_SUFFIX,
};
