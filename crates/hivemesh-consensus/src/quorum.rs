//! Quorum sensing over a proposal's vote map.

use hivemesh_schema::Proposal;
use serde::Serialize;

/// Detects when the supporting-voter ratio crosses the configured threshold.
#[derive(Debug, Clone, Copy)]
pub struct QuorumSensor {
    threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuorumStatus {
    pub reached: bool,
    pub current_quorum: f64,
    pub required_quorum: f64,
    pub support_count: usize,
    pub reject_count: usize,
    pub total_votes: usize,
    pub total_agents: usize,
    pub average_intensity: f64,
}

impl QuorumSensor {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Supporting voters over registered agents; zero when nobody is
    /// registered.
    pub fn ratio(proposal: &Proposal, total_agents: usize) -> f64 {
        if total_agents == 0 {
            return 0.0;
        }
        let supporting = proposal.votes.values().filter(|v| v.support).count();
        supporting as f64 / total_agents as f64
    }

    pub fn check(&self, proposal: &Proposal, total_agents: usize) -> (bool, f64) {
        let quorum = Self::ratio(proposal, total_agents);
        (quorum >= self.threshold, quorum)
    }

    pub fn status(&self, proposal: &Proposal, total_agents: usize) -> QuorumStatus {
        let (reached, current_quorum) = self.check(proposal, total_agents);
        let support_count = proposal.votes.values().filter(|v| v.support).count();
        let reject_count = proposal.votes.len() - support_count;
        let average_intensity = if proposal.votes.is_empty() {
            0.0
        } else {
            proposal.votes.values().map(|v| v.intensity).sum::<f64>()
                / proposal.votes.len() as f64
        };

        QuorumStatus {
            reached,
            current_quorum,
            required_quorum: self.threshold,
            support_count,
            reject_count,
            total_votes: proposal.votes.len(),
            total_agents,
            average_intensity,
        }
    }
}
