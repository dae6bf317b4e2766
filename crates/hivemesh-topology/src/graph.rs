//! In-memory directed weighted multigraph of agents. Paths strengthen with
//! use, evaporate over time, and are pruned once they fall below threshold,
//! so the mesh converges on the routes agents actually talk over.

use std::collections::HashMap;

use chrono::Utc;
use hivemesh_schema::{
    edge_id, split_edge_id, Agent, AgentId, AgentStatus, Edge, EdgeId, GraphSnapshot, GraphStats,
    MeshConfig,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("agent {0} already exists")]
    DuplicateAgent(AgentId),
    #[error("agent {0} not found")]
    UnknownAgent(AgentId),
    #[error("invalid edge id format: {0}")]
    MalformedEdgeId(String),
}

pub struct Graph {
    agents: HashMap<AgentId, Agent>,
    edges: HashMap<EdgeId, Edge>,
    config: MeshConfig,
}

impl Graph {
    pub fn new(config: MeshConfig) -> Self {
        Self {
            agents: HashMap::new(),
            edges: HashMap::new(),
            config,
        }
    }

    /// Inserts an agent and builds its full mesh: directed edges to and from
    /// every existing agent plus a self-loop, all at the configured initial
    /// weight. The self-loop makes the agent visible to snapshot consumers
    /// before it talks to anyone.
    pub fn add_agent(&mut self, agent: Agent) -> Result<(), GraphError> {
        if self.agents.contains_key(&agent.id) {
            return Err(GraphError::DuplicateAgent(agent.id));
        }

        let id = agent.id.clone();
        self.insert_edge(&id, &id);
        for existing in self.agents.keys().cloned().collect::<Vec<_>>() {
            self.insert_edge(&id, &existing);
            self.insert_edge(&existing, &id);
        }
        self.agents.insert(id, agent);
        Ok(())
    }

    fn insert_edge(&mut self, source: &str, target: &str) {
        let now = Utc::now();
        let id = edge_id(source, target);
        self.edges.insert(
            id.clone(),
            Edge {
                id,
                source_id: source.to_string(),
                target_id: target.to_string(),
                weight: self.config.initial_edge_weight,
                usage: 0,
                last_used: now,
                created_at: now,
            },
        );
    }

    /// Deletes the agent and every edge incident on it.
    pub fn remove_agent(&mut self, agent_id: &str) -> Result<(), GraphError> {
        if self.agents.remove(agent_id).is_none() {
            return Err(GraphError::UnknownAgent(agent_id.to_string()));
        }
        self.edges
            .retain(|_, edge| edge.source_id != agent_id && edge.target_id != agent_id);
        Ok(())
    }

    /// Strengthens an edge. An edge that does not exist yet is created on
    /// first use, provided both endpoints are known: agents that join after
    /// the initial mesh was built must still produce observable edges on
    /// their first message. Returns the updated edge and whether it was
    /// freshly created.
    pub fn reinforce_edge(&mut self, id: &str) -> Result<(Edge, bool), GraphError> {
        let mut created = false;
        if !self.edges.contains_key(id) {
            let (source, target) =
                split_edge_id(id).ok_or_else(|| GraphError::MalformedEdgeId(id.to_string()))?;
            if !self.agents.contains_key(&source) {
                return Err(GraphError::UnknownAgent(source));
            }
            if !self.agents.contains_key(&target) {
                return Err(GraphError::UnknownAgent(target));
            }
            self.insert_edge(&source, &target);
            created = true;
        }

        let amount = self.config.reinforcement_amount;
        let edge = self.edges.get_mut(id).expect("edge present after insert");
        edge.weight = (edge.weight + amount).min(1.0);
        edge.usage += 1;
        edge.last_used = Utc::now();
        Ok((edge.clone(), created))
    }

    /// Applies evaporation to every edge, clamped at zero.
    pub fn decay_all(&mut self) {
        let rate = self.config.decay_rate;
        for edge in self.edges.values_mut() {
            edge.weight = (edge.weight - rate).max(0.0);
        }
    }

    /// Removes every edge below the prune threshold (self-loops included)
    /// and returns the removed ids. Agents are never removed here.
    pub fn prune_weak(&mut self) -> Vec<EdgeId> {
        let threshold = self.config.prune_threshold;
        let pruned: Vec<EdgeId> = self
            .edges
            .values()
            .filter(|edge| edge.weight < threshold)
            .map(|edge| edge.id.clone())
            .collect();
        for id in &pruned {
            self.edges.remove(id);
        }
        pruned
    }

    /// Refreshes an agent's liveness after observed activity.
    pub fn touch_agent(&mut self, agent_id: &str) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.last_seen_at = Utc::now();
            agent.status = AgentStatus::Active;
        }
    }

    /// Deep-copies the graph into a serializable snapshot with derived stats.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            agents: self.agents.clone(),
            edges: self.edges.clone(),
            timestamp: Utc::now(),
            stats: self.stats(),
        }
    }

    fn stats(&self) -> GraphStats {
        let total_agents = self.agents.len();
        let total_edges = self.edges.len();
        if total_edges == 0 {
            return GraphStats {
                total_agents,
                ..GraphStats::default()
            };
        }

        let mut total_weight = 0.0;
        let mut max_weight: f64 = 0.0;
        let mut min_weight: f64 = 1.0;
        let mut active_edges = 0;
        for edge in self.edges.values() {
            total_weight += edge.weight;
            max_weight = max_weight.max(edge.weight);
            min_weight = min_weight.min(edge.weight);
            if edge.weight > 0.1 {
                active_edges += 1;
            }
        }

        let possible_edges = total_agents * total_agents.saturating_sub(1);
        let density = if possible_edges > 0 {
            total_edges as f64 / possible_edges as f64
        } else {
            0.0
        };
        let reduction_percent = if possible_edges > 0 {
            (1.0 - density) * 100.0
        } else {
            0.0
        };

        GraphStats {
            total_agents,
            total_edges,
            active_edges,
            average_weight: total_weight / total_edges as f64,
            max_weight,
            min_weight,
            density,
            reduction_percent,
        }
    }

    /// Target ids of outgoing edges at or above `min_weight`.
    pub fn neighbors(&self, agent_id: &str, min_weight: f64) -> Vec<AgentId> {
        self.edges
            .values()
            .filter(|edge| edge.source_id == agent_id && edge.weight >= min_weight)
            .map(|edge| edge.target_id.clone())
            .collect()
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<&Agent> {
        self.agents.get(agent_id)
    }

    pub fn get_edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}
