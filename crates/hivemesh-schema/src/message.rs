use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentId, EdgeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Task,
    Response,
    Waggle,
    Vote,
    Heartbeat,
    Topology,
    Insight,
}

/// A message flowing between two agents. The core never interprets the
/// payload; flow records exist to drive edge reinforcement and streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from_agent_id: AgentId,
    pub to_agent_id: AgentId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<EdgeId>,
}

impl Message {
    pub fn new(
        from: impl Into<AgentId>,
        to: impl Into<AgentId>,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from_agent_id: from.into(),
            to_agent_id: to.into(),
            message_type,
            payload,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            edge_id: None,
        }
    }
}
