//! Hub control channel schema.
//!
//! Requests are JSON objects tagged by `action`, each carrying a
//! `correlationId` that the hub echoes verbatim on the matching reply.
//! Requests are multiplexed; replies are correlated, not ordered.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FabricError, Result};

/// Default page size for `discover`/`find`
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Hard cap on page size
pub const MAX_PAGE_LIMIT: usize = 500;

/// Registry status of an agent record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Idle,
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Online => write!(f, "online"),
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Wire form of an agent directory record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub status: AgentStatus,
    /// Unix milliseconds
    pub last_seen: u64,
    /// Unix milliseconds
    pub created_at: u64,
}

/// Filters for the `discover` action; all filters are AND-ed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverQuery {
    /// Excluded from the result (self-exclusion)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Any-of capability filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

/// Control actions, tagged by `action`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlAction {
    Register {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
        #[serde(default)]
        capabilities: Vec<String>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    Heartbeat {
        id: String,
    },
    Discover(DiscoverQuery),
    Find {
        capability: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<usize>,
    },
    Lookup {
        id: String,
    },
    Status {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<AgentStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },
    Disconnect {
        id: String,
    },
    Stats,
}

/// One control request: a correlation id plus the action fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    #[serde(
        rename = "correlationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub action: ControlAction,
}

/// Reply status discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// One control reply; `body` holds the action-specific fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlReply {
    #[serde(
        rename = "correlationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl ControlReply {
    /// Successful reply with action-specific fields
    pub fn ok(correlation_id: Option<String>, body: Map<String, Value>) -> Self {
        Self {
            correlation_id,
            status: ReplyStatus::Ok,
            error: None,
            body,
        }
    }

    /// Successful reply from any serializable payload (must be an object)
    pub fn ok_with<T: Serialize>(correlation_id: Option<String>, payload: &T) -> Result<Self> {
        match serde_json::to_value(payload)? {
            Value::Object(body) => Ok(Self::ok(correlation_id, body)),
            _ => Err(FabricError::Protocol(
                "control reply payload must be an object".to_string(),
            )),
        }
    }

    /// Error reply with a machine-readable code
    pub fn fail(correlation_id: Option<String>, code: impl Into<String>) -> Self {
        Self {
            correlation_id,
            status: ReplyStatus::Error,
            error: Some(code.into()),
            body: Map::new(),
        }
    }

    /// Error code, if this is an error reply
    pub fn error_code(&self) -> Option<&str> {
        match self.status {
            ReplyStatus::Error => self.error.as_deref(),
            ReplyStatus::Ok => None,
        }
    }

    /// Deserialize the body of an `ok` reply; error replies are mapped to
    /// the registry/application error taxonomy.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        if self.status == ReplyStatus::Error {
            let code = self.error.unwrap_or_else(|| "unknown".to_string());
            return Err(if code == "agent_not_found" {
                FabricError::AgentNotFound(code)
            } else if code == "agent_offline" {
                FabricError::AgentOffline(code)
            } else {
                FabricError::Application(code)
            });
        }
        Ok(serde_json::from_value(Value::Object(self.body))?)
    }
}

/// Body-less acknowledgement reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acked {}

/// `register` reply body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAck {
    pub id: String,
    pub address: String,
}

/// `heartbeat` reply body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub timestamp: u64,
}

/// `discover` reply body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverPage {
    pub count: usize,
    pub limit: usize,
    pub offset: usize,
    pub agents: Vec<AgentSummary>,
}

/// `find` reply body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindPage {
    pub count: usize,
    pub agents: Vec<AgentSummary>,
}

/// `lookup` reply body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupReply {
    pub agent: AgentSummary,
}

/// `stats` reply body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub total: usize,
    pub online: usize,
    pub idle: usize,
    pub offline: usize,
    /// Control sockets currently connected (soft cache, not authoritative)
    pub connected_sockets: usize,
    pub uptime_secs: u64,
    #[serde(default)]
    pub capabilities: HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_request_wire_form() {
        let req = ControlRequest {
            correlation_id: Some("aabbccdd00112233".to_string()),
            action: ControlAction::Register {
                address: Some("10.0.0.5:4000".to_string()),
                capabilities: vec!["chat".to_string()],
                metadata: Map::new(),
            },
        };

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["action"], "register");
        assert_eq!(value["correlationId"], "aabbccdd00112233");
        assert_eq!(value["address"], "10.0.0.5:4000");
        assert_eq!(value["capabilities"], json!(["chat"]));
    }

    #[test]
    fn test_stats_request_wire_form() {
        let req = ControlRequest {
            correlation_id: Some("0000000000000001".to_string()),
            action: ControlAction::Stats,
        };

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, json!({"action": "stats", "correlationId": "0000000000000001"}));
    }

    #[test]
    fn test_discover_request_parses_inline_filters() {
        let value = json!({
            "action": "discover",
            "correlationId": "0011223344556677",
            "capabilities": ["chat", "search"],
            "status": "online",
            "limit": 10
        });

        let req: ControlRequest = serde_json::from_value(value).unwrap();
        match req.action {
            ControlAction::Discover(q) => {
                assert_eq!(q.capabilities.as_deref(), Some(&["chat".to_string(), "search".to_string()][..]));
                assert_eq!(q.status, Some(AgentStatus::Online));
                assert_eq!(q.limit, Some(10));
                assert_eq!(q.offset, None);
            },
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn test_reply_flattens_body() {
        let reply = ControlReply::ok_with(
            Some("ffee000000000000".to_string()),
            &RegisterAck {
                id: "a".repeat(32),
                address: "10.0.0.5:4000".to_string(),
            },
        )
        .unwrap();

        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["id"], "a".repeat(32));
        assert_eq!(value["address"], "10.0.0.5:4000");
        assert_eq!(value["correlationId"], "ffee000000000000");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_reply_decode_maps_error_codes() {
        let not_found = ControlReply::fail(None, "agent_not_found");
        assert!(matches!(
            not_found.decode::<LookupReply>(),
            Err(FabricError::AgentNotFound(_))
        ));

        let other = ControlReply::fail(None, "rate_limited");
        assert!(matches!(
            other.decode::<LookupReply>(),
            Err(FabricError::Application(code)) if code == "rate_limited"
        ));
    }

    #[test]
    fn test_agent_summary_camel_case() {
        let summary = AgentSummary {
            id: "f".repeat(32),
            address: "127.0.0.1:4001".to_string(),
            capabilities: vec![],
            metadata: Map::new(),
            status: AgentStatus::Idle,
            last_seen: 1_700_000_000_000,
            created_at: 1_699_999_000_000,
        };

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["status"], "idle");
        assert!(value.get("lastSeen").is_some());
        assert!(value.get("createdAt").is_some());
    }
}
