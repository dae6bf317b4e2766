//! Consensus service: tracks proposals and votes from the bus, senses
//! quorum against the registered agent set, finalizes outcomes, and expires
//! stale proposals. Votes are last-writer-wins per voter, so redelivery
//! leaves a proposal in the same state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use hivemesh_bus::MeshBus;
use hivemesh_schema::{
    AgentId, ConsensusEvent, ConsensusEventType, MeshConfig, Proposal, ProposalId,
    ProposalRecord, ProposalStatus, TopologyEvent, Vote, VoteRecord,
};
use hivemesh_store::StateStore;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::quorum::QuorumSensor;
use crate::waggle::derive_waggle;

pub const PROPOSALS_STREAM: &str = "proposals";
pub const VOTES_STREAM: &str = "votes";
pub const TOPOLOGY_STREAM: &str = "topology";
pub const CONSENSUS_STREAM: &str = "consensus";
pub const CONSENSUS_GROUP: &str = "consensus-manager";

const EXPIRATION_INTERVAL: Duration = Duration::from_secs(5);
const STATS_INTERVAL: Duration = Duration::from_secs(15);
const PROPOSAL_TTL_GRACE: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusStats {
    pub total_proposals: usize,
    pub pending: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub expired: usize,
    pub active_agents: usize,
}

#[derive(Default)]
struct ConsensusState {
    proposals: HashMap<ProposalId, Proposal>,
    agents: HashSet<AgentId>,
}

pub struct ConsensusService {
    state: Arc<RwLock<ConsensusState>>,
    bus: MeshBus,
    store: StateStore,
    config: MeshConfig,
    sensor: QuorumSensor,
}

impl ConsensusService {
    pub fn new(bus: MeshBus, store: StateStore, config: MeshConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(ConsensusState::default())),
            bus,
            store,
            sensor: QuorumSensor::new(config.quorum_threshold),
            config,
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let proposals = tokio::spawn({
            let svc = self.clone();
            let cancel = cancel.clone();
            async move { svc.consume_proposals(cancel).await }
        });
        let votes = tokio::spawn({
            let svc = self.clone();
            let cancel = cancel.clone();
            async move { svc.consume_votes(cancel).await }
        });
        let registry = tokio::spawn({
            let svc = self.clone();
            let cancel = cancel.clone();
            async move { svc.consume_topology(cancel).await }
        });
        let expiration = tokio::spawn({
            let svc = self.clone();
            let cancel = cancel.clone();
            async move { svc.expiration_loop(cancel).await }
        });
        let stats = tokio::spawn({
            let svc = self.clone();
            let cancel = cancel.clone();
            async move { svc.stats_loop(cancel).await }
        });

        let _ = tokio::join!(proposals, votes, registry, expiration, stats);
        tracing::info!("consensus service stopped");
        Ok(())
    }

    async fn consume_proposals(&self, cancel: CancellationToken) {
        let result = self
            .bus
            .consume::<ProposalRecord, _, _>(PROPOSALS_STREAM, CONSENSUS_GROUP, cancel, |record| {
                let svc = self;
                async move {
                    svc.handle_proposal(record.value).await;
                    Ok(())
                }
            })
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "proposal consumer exited");
        }
    }

    async fn consume_votes(&self, cancel: CancellationToken) {
        let result = self
            .bus
            .consume::<VoteRecord, _, _>(VOTES_STREAM, CONSENSUS_GROUP, cancel, |record| {
                let svc = self;
                async move {
                    svc.handle_vote(record.value).await;
                    Ok(())
                }
            })
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "vote consumer exited");
        }
    }

    async fn consume_topology(&self, cancel: CancellationToken) {
        let result = self
            .bus
            .consume::<TopologyEvent, _, _>(TOPOLOGY_STREAM, CONSENSUS_GROUP, cancel, |record| {
                let svc = self;
                async move {
                    match record.value {
                        TopologyEvent::AgentJoined { agent_id, .. } => {
                            svc.state.write().await.agents.insert(agent_id);
                        }
                        TopologyEvent::AgentLeft { agent_id, .. } => {
                            svc.state.write().await.agents.remove(&agent_id);
                        }
                        _ => {}
                    }
                    Ok(())
                }
            })
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "topology consumer exited");
        }
    }

    async fn handle_proposal(&self, record: ProposalRecord) {
        let submission = record.proposal;
        let id = submission
            .id
            .unwrap_or_else(hivemesh_schema::new_proposal_id);

        {
            let state = self.state.read().await;
            // Redelivered proposal record: already tracked.
            if state.proposals.contains_key(&id) {
                tracing::debug!(proposal_id = %id, "ignoring duplicate proposal");
                return;
            }
        }

        let now = Utc::now();
        let proposal = Proposal {
            id: id.clone(),
            proposer_id: submission.proposer_id,
            proposal_type: submission.proposal_type,
            waggle: derive_waggle(&submission.content, self.config.waggle_intensity_min),
            content: submission.content,
            votes: HashMap::new(),
            status: ProposalStatus::Pending,
            created_at: now,
            expires_at: now + self.config.proposal_timeout,
        };

        self.state
            .write()
            .await
            .proposals
            .insert(id.clone(), proposal.clone());

        tracing::info!(
            proposal_id = %id,
            proposer_id = %proposal.proposer_id,
            waggle_intensity = proposal.waggle.intensity,
            "proposal created"
        );
        self.publish_event(ConsensusEventType::ProposalCreated, &proposal)
            .await;
        self.persist(&proposal).await;
    }

    async fn handle_vote(&self, record: VoteRecord) {
        let mut state = self.state.write().await;
        let total_agents = state.agents.len();

        let Some(proposal) = state.proposals.get_mut(&record.proposal_id) else {
            tracing::warn!(proposal_id = %record.proposal_id, voter_id = %record.voter_id, "vote for unknown proposal");
            return;
        };
        if proposal.status != ProposalStatus::Pending {
            tracing::debug!(
                proposal_id = %proposal.id,
                status = ?proposal.status,
                "vote on non-pending proposal"
            );
            return;
        }

        proposal.votes.insert(
            record.voter_id.clone(),
            Vote {
                voter_id: record.voter_id.clone(),
                support: record.support,
                intensity: record.intensity,
                timestamp: record.timestamp,
            },
        );

        let (reached, quorum) = self.sensor.check(proposal, total_agents);
        tracing::debug!(
            proposal_id = %proposal.id,
            voter_id = %record.voter_id,
            support = record.support,
            quorum,
            "vote received"
        );

        if !reached {
            return;
        }
        proposal.status = ProposalStatus::Accepted;
        let accepted = proposal.clone();
        let demoted = Self::apply_cross_inhibition(&mut state, &accepted);
        drop(state);

        tracing::info!(proposal_id = %accepted.id, quorum, votes = accepted.votes.len(), "quorum reached, proposal accepted");
        self.publish_event(ConsensusEventType::QuorumReached, &accepted)
            .await;
        self.publish_event(ConsensusEventType::ProposalAccepted, &accepted)
            .await;
        self.persist(&accepted).await;
        for weaker in demoted {
            tracing::info!(
                proposal_id = %weaker.id,
                winner_id = %accepted.id,
                "competing proposal suppressed"
            );
            self.publish_event(ConsensusEventType::ProposalRejected, &weaker)
                .await;
            self.persist(&weaker).await;
        }
    }

    /// A strong accepted signal suppresses weaker pending proposals in the
    /// same content family (matching `content.family` strings). Returns the
    /// demoted proposals.
    fn apply_cross_inhibition(state: &mut ConsensusState, winner: &Proposal) -> Vec<Proposal> {
        let Some(family) = winner.content.get("family").and_then(|v| v.as_str()) else {
            return Vec::new();
        };
        let winner_score = winner.waggle.score();

        let mut demoted = Vec::new();
        for proposal in state.proposals.values_mut() {
            if proposal.id == winner.id || proposal.status != ProposalStatus::Pending {
                continue;
            }
            let same_family = proposal
                .content
                .get("family")
                .and_then(|v| v.as_str())
                .is_some_and(|f| f == family);
            if same_family && proposal.waggle.score() < winner_score {
                proposal.status = ProposalStatus::Rejected;
                demoted.push(proposal.clone());
            }
        }
        demoted
    }

    async fn expiration_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(EXPIRATION_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.expire_once().await;
                }
            }
        }
    }

    /// One expiration pass. Public so tests can drive the tick directly.
    pub async fn expire_once(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<Proposal> = {
            let mut state = self.state.write().await;
            state
                .proposals
                .values_mut()
                .filter(|p| p.status == ProposalStatus::Pending && p.expires_at < now)
                .map(|p| {
                    p.status = ProposalStatus::Expired;
                    p.clone()
                })
                .collect()
        };

        for proposal in &expired {
            tracing::info!(proposal_id = %proposal.id, "proposal expired");
            self.publish_event(ConsensusEventType::ProposalExpired, proposal)
                .await;
            self.persist(proposal).await;
        }
        expired.len()
    }

    async fn publish_event(&self, event_type: ConsensusEventType, proposal: &Proposal) {
        let event = ConsensusEvent {
            event_type,
            proposal_id: proposal.id.clone(),
            proposal: Some(proposal.clone()),
            timestamp: Utc::now(),
        };
        if let Err(err) = self
            .bus
            .publish(CONSENSUS_STREAM, &proposal.id, &event)
            .await
        {
            tracing::warn!(proposal_id = %proposal.id, error = %err, "failed to publish consensus event");
        }
    }

    async fn persist(&self, proposal: &Proposal) {
        let ttl = (proposal.expires_at - Utc::now())
            .to_std()
            .unwrap_or_default()
            + PROPOSAL_TTL_GRACE;
        if let Err(err) = self
            .store
            .set(&format!("proposal:{}", proposal.id), proposal, Some(ttl))
            .await
        {
            tracing::warn!(proposal_id = %proposal.id, error = %err, "failed to persist proposal");
        }
    }

    async fn stats_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let stats = self.stats().await;
                    tracing::info!(
                        total = stats.total_proposals,
                        pending = stats.pending,
                        accepted = stats.accepted,
                        rejected = stats.rejected,
                        expired = stats.expired,
                        active_agents = stats.active_agents,
                        "consensus stats"
                    );
                }
            }
        }
    }

    pub async fn stats(&self) -> ConsensusStats {
        let state = self.state.read().await;
        let mut stats = ConsensusStats {
            total_proposals: state.proposals.len(),
            active_agents: state.agents.len(),
            ..Default::default()
        };
        for proposal in state.proposals.values() {
            match proposal.status {
                ProposalStatus::Pending => stats.pending += 1,
                ProposalStatus::Accepted => stats.accepted += 1,
                ProposalStatus::Rejected => stats.rejected += 1,
                ProposalStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }

    pub async fn proposal(&self, id: &str) -> Option<Proposal> {
        self.state.read().await.proposals.get(id).cloned()
    }

    pub async fn agent_count(&self) -> usize {
        self.state.read().await.agents.len()
    }
}
