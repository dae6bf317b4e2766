use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentId, ProposalId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalType {
    Decision,
    Action,
    Topology,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

/// Derived signal-strength descriptor for a proposal. Voters may interpret
/// it; the consensus service only stores and echoes it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WaggleDance {
    /// How strongly the proposer believes, in `[0, 1]`.
    pub intensity: f64,
    pub duration_ms: u64,
    /// Encodes proposal type and quality, in `[0, 360)`.
    pub angle: f64,
    pub repetitions: u32,
}

impl WaggleDance {
    /// Combined strength used when competing descriptors are compared.
    pub fn score(&self) -> f64 {
        self.intensity * f64::from(self.repetitions)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub voter_id: AgentId,
    pub support: bool,
    pub intensity: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub proposer_id: AgentId,
    #[serde(rename = "type")]
    pub proposal_type: ProposalType,
    pub content: serde_json::Value,
    pub waggle: WaggleDance,
    /// Keyed by voter id: resubmission by the same voter overwrites.
    #[serde(default)]
    pub votes: HashMap<AgentId, Vote>,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Payload agents publish on the proposals stream. A producer that supplies
/// its own `id` makes redelivery of the record idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalSubmission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ProposalId>,
    pub proposer_id: AgentId,
    #[serde(rename = "type")]
    pub proposal_type: ProposalType,
    pub content: serde_json::Value,
}

/// Wrapper record on the proposals stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub proposal: ProposalSubmission,
    pub timestamp: DateTime<Utc>,
}

/// Record on the votes stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRecord {
    pub proposal_id: ProposalId,
    pub voter_id: AgentId,
    pub support: bool,
    pub intensity: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusEventType {
    ProposalCreated,
    ProposalAccepted,
    ProposalRejected,
    ProposalExpired,
    VoteReceived,
    QuorumReached,
}

/// Record published on the consensus stream for agents to observe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusEvent {
    #[serde(rename = "type")]
    pub event_type: ConsensusEventType,
    pub proposal_id: ProposalId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal: Option<Proposal>,
    pub timestamp: DateTime<Utc>,
}
