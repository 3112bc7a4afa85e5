//! Fabric error types.

use std::time::Duration;

use thiserror::Error;

use crate::crypto::CryptoError;

/// Fabric errors
#[derive(Error, Debug)]
pub enum FabricError {
    // === Configuration Errors ===
    #[error("Config error: {0}")]
    Config(String),

    // === Transport Errors ===
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    // === Protocol Errors ===
    #[error("Protocol error: {0}")]
    Protocol(String),

    // === Crypto Errors ===
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    // === Registry Errors ===
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent offline: {0}")]
    AgentOffline(String),

    // === Application Errors ===
    #[error("Peer error: {0}")]
    Application(String),

    // === Standard Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for fabric operations
pub type Result<T> = std::result::Result<T, FabricError>;

impl From<toml::de::Error> for FabricError {
    fn from(err: toml::de::Error) -> Self {
        FabricError::Config(err.to_string())
    }
}

impl FabricError {
    /// True for errors caused by the peer or hub socket going away,
    /// as opposed to a fault in the exchanged data.
    pub fn is_transport(&self) -> bool {
        matches!(self, FabricError::Transport(_) | FabricError::Io(_))
    }
}
