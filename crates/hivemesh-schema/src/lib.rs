pub mod agent;
pub mod config;
pub mod consensus;
pub mod knowledge;
pub mod message;
pub mod topology;

pub use agent::*;
pub use config::*;
pub use consensus::*;
pub use knowledge::*;
pub use message::*;
pub use topology::*;

/// Opaque agent identifier.
pub type AgentId = String;
/// Edge identifier, always `"<source>-><target>"`.
pub type EdgeId = String;
pub type ProposalId = String;
pub type InsightId = String;

pub fn new_agent_id() -> AgentId {
    uuid::Uuid::new_v4().to_string()
}

pub fn new_proposal_id() -> ProposalId {
    uuid::Uuid::new_v4().to_string()
}

pub fn new_insight_id() -> InsightId {
    format!("insight-{}", uuid::Uuid::new_v4())
}

/// Derives the edge id for a directed `(source, target)` pair. Any producer
/// or consumer can compute this without a lookup.
pub fn edge_id(source: &str, target: &str) -> EdgeId {
    format!("{source}->{target}")
}

/// Splits an edge id back into its `(source, target)` endpoints.
pub fn split_edge_id(id: &str) -> Option<(AgentId, AgentId)> {
    let (source, target) = id.split_once("->")?;
    if source.is_empty() || target.is_empty() {
        return None;
    }
    Some((source.to_string(), target.to_string()))
}
