use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Agent, AgentId, EdgeId};

/// A directed communication path between two agents. Weight is a
/// probability-like quantity clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source_id: AgentId,
    pub target_id: AgentId,
    pub weight: f64,
    pub usage: u64,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Record on the topology stream. Join/leave records are produced by agents;
/// edge records by the topology service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TopologyEvent {
    AgentJoined {
        agent_id: AgentId,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<Agent>,
        timestamp: DateTime<Utc>,
    },
    AgentLeft {
        agent_id: AgentId,
        timestamp: DateTime<Utc>,
    },
    EdgeCreated {
        edge_id: EdgeId,
        #[serde(skip_serializing_if = "Option::is_none")]
        edge: Option<Edge>,
        timestamp: DateTime<Utc>,
    },
    EdgeRemoved {
        edge_id: EdgeId,
        timestamp: DateTime<Utc>,
    },
    EdgeStrengthChanged {
        edge_id: EdgeId,
        #[serde(skip_serializing_if = "Option::is_none")]
        edge: Option<Edge>,
        timestamp: DateTime<Utc>,
    },
}

/// Point-in-time immutable deep copy of the graph plus derived stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub agents: HashMap<AgentId, Agent>,
    pub edges: HashMap<EdgeId, Edge>,
    pub timestamp: DateTime<Utc>,
    pub stats: GraphStats,
}

impl GraphSnapshot {
    /// Snapshot of a graph with no agents, e.g. on a fresh install.
    pub fn empty() -> Self {
        Self {
            agents: HashMap::new(),
            edges: HashMap::new(),
            timestamp: Utc::now(),
            stats: GraphStats::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_agents: usize,
    pub total_edges: usize,
    /// Edges with weight > 0.1.
    pub active_edges: usize,
    pub average_weight: f64,
    pub max_weight: f64,
    pub min_weight: f64,
    /// Actual edges / possible edges in a directed full mesh (n·(n−1)).
    pub density: f64,
    pub reduction_percent: f64,
}
