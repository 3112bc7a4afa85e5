//! Wire format shared by the hub control channel and peer sessions.
//!
//! Both channels carry a stream of UTF-8 JSON objects, each terminated by
//! a single `\n` byte; there is no length prefix. [`codec`] implements the
//! framing, [`frame`] the peer-to-peer frame grammar, and [`control`] the
//! hub control request/response schema.
//!
//! Requests and replies are tied together by opaque `correlationId`
//! tokens: 16 hex characters, 64 bits of entropy, echoed verbatim.

mod codec;
mod control;
mod frame;

pub use codec::{write_frame, FrameDecoder, FrameStream, MAX_FRAME_BYTES};
pub use control::{
    Acked, AgentStatus, AgentSummary, ControlAction, ControlReply, ControlRequest, DiscoverPage,
    DiscoverQuery, FindPage, HeartbeatAck, HubStats, LookupReply, RegisterAck, ReplyStatus,
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
pub use frame::{FaultFrame, PeerFrame, FAULT_DECRYPTION_FAILED, FAULT_INVALID_MESSAGE};

/// Generate a correlation id: 16 hex characters, 64 bits of entropy.
pub fn correlation_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Current time as Unix milliseconds
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
