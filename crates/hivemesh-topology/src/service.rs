//! Topology service: consumes join/leave and message-flow streams, drives
//! the graph, and periodically decays, prunes, and snapshots it. The
//! persisted snapshot is the ground truth; the local event channel is a
//! best-effort notification feed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use hivemesh_bus::MeshBus;
use hivemesh_schema::{
    edge_id, Agent, GraphSnapshot, MeshConfig, Message, TopologyEvent,
};
use hivemesh_store::StateStore;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::graph::{Graph, GraphError};

pub const TOPOLOGY_STREAM: &str = "topology";
pub const MESSAGES_STREAM: &str = "messages";
pub const TOPOLOGY_GROUP: &str = "topology-manager";
pub const REINFORCEMENT_GROUP: &str = "topology-reinforcement";
pub const SNAPSHOT_KEY: &str = "graph:snapshot:latest";

const EVENT_CHANNEL_CAPACITY: usize = 500;
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);
const SNAPSHOT_HISTORY_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const STATS_INTERVAL: Duration = Duration::from_secs(15);

pub struct TopologyService {
    graph: Arc<RwLock<Graph>>,
    bus: MeshBus,
    store: StateStore,
    events_tx: mpsc::Sender<TopologyEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TopologyEvent>>>,
}

impl TopologyService {
    pub fn new(bus: MeshBus, store: StateStore, config: MeshConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            graph: Arc::new(RwLock::new(Graph::new(config))),
            bus,
            store,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Runs every worker until `cancel` fires, then flushes a final
    /// snapshot so restarts pick up from persisted state.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let decay_interval = self.decay_interval().await;

        let topology = tokio::spawn({
            let svc = self.clone();
            let cancel = cancel.clone();
            async move { svc.consume_topology(cancel).await }
        });
        let reinforcement = tokio::spawn({
            let svc = self.clone();
            let cancel = cancel.clone();
            async move { svc.consume_messages(cancel).await }
        });
        let decay = tokio::spawn({
            let svc = self.clone();
            let cancel = cancel.clone();
            async move { svc.decay_loop(decay_interval, cancel).await }
        });
        let snapshots = tokio::spawn({
            let svc = self.clone();
            let cancel = cancel.clone();
            async move { svc.snapshot_loop(cancel).await }
        });
        let forwarder = tokio::spawn({
            let svc = self.clone();
            let cancel = cancel.clone();
            async move { svc.forward_events(cancel).await }
        });
        let stats = tokio::spawn({
            let svc = self.clone();
            let cancel = cancel.clone();
            async move { svc.stats_loop(cancel).await }
        });

        let _ = tokio::join!(topology, reinforcement, decay, snapshots, forwarder, stats);
        self.persist_snapshot().await;
        tracing::info!("topology service stopped");
        Ok(())
    }

    async fn decay_interval(&self) -> Duration {
        self.graph.read().await.config().decay_interval
    }

    async fn consume_topology(&self, cancel: CancellationToken) {
        let result = self
            .bus
            .consume::<TopologyEvent, _, _>(TOPOLOGY_STREAM, TOPOLOGY_GROUP, cancel, |record| {
                let svc = self;
                async move {
                    svc.handle_topology_event(record.value).await;
                    Ok(())
                }
            })
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "topology consumer exited");
        }
    }

    async fn handle_topology_event(&self, event: TopologyEvent) {
        match event {
            TopologyEvent::AgentJoined {
                agent_id, agent, ..
            } => {
                let agent = agent
                    .unwrap_or_else(|| Agent::new(agent_id.clone(), agent_id.clone(), "agent"));
                let mut graph = self.graph.write().await;
                match graph.add_agent(agent.clone()) {
                    Ok(()) => {
                        drop(graph);
                        tracing::info!(agent_id = %agent.id, role = %agent.role, "agent joined mesh");
                        if let Err(err) = self
                            .store
                            .set(&format!("agent:{}", agent.id), &agent, None)
                            .await
                        {
                            tracing::warn!(error = %err, "failed to persist agent");
                        }
                        self.emit(TopologyEvent::AgentJoined {
                            agent_id: agent.id.clone(),
                            agent: Some(agent),
                            timestamp: Utc::now(),
                        });
                    }
                    // Redelivery of a join we already applied.
                    Err(GraphError::DuplicateAgent(id)) => {
                        tracing::debug!(agent_id = %id, "ignoring duplicate join");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "unexpected join failure");
                    }
                }
            }
            TopologyEvent::AgentLeft { agent_id, .. } => {
                let mut graph = self.graph.write().await;
                match graph.remove_agent(&agent_id) {
                    Ok(()) => {
                        drop(graph);
                        tracing::info!(%agent_id, "agent left mesh");
                        if let Err(err) = self.store.delete(&format!("agent:{agent_id}")).await {
                            tracing::warn!(error = %err, "failed to delete persisted agent");
                        }
                        self.emit(TopologyEvent::AgentLeft {
                            agent_id,
                            timestamp: Utc::now(),
                        });
                    }
                    Err(err) => {
                        tracing::debug!(%agent_id, error = %err, "ignoring leave for unknown agent");
                    }
                }
            }
            // Edge records on this stream are our own output; nothing to do.
            TopologyEvent::EdgeCreated { .. }
            | TopologyEvent::EdgeRemoved { .. }
            | TopologyEvent::EdgeStrengthChanged { .. } => {}
        }
    }

    async fn consume_messages(&self, cancel: CancellationToken) {
        let result = self
            .bus
            .consume::<Message, _, _>(MESSAGES_STREAM, REINFORCEMENT_GROUP, cancel, |record| {
                let svc = self;
                async move {
                    svc.handle_message(record.value).await;
                    Ok(())
                }
            })
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "message consumer exited");
        }
    }

    async fn handle_message(&self, message: Message) {
        let id = message
            .edge_id
            .unwrap_or_else(|| edge_id(&message.from_agent_id, &message.to_agent_id));
        let mut graph = self.graph.write().await;
        match graph.reinforce_edge(&id) {
            Ok((edge, created)) => {
                graph.touch_agent(&message.from_agent_id);
                drop(graph);
                if created {
                    self.emit(TopologyEvent::EdgeCreated {
                        edge_id: edge.id.clone(),
                        edge: Some(edge.clone()),
                        timestamp: Utc::now(),
                    });
                }
                self.emit(TopologyEvent::EdgeStrengthChanged {
                    edge_id: edge.id.clone(),
                    edge: Some(edge),
                    timestamp: Utc::now(),
                });
            }
            // Joins and messages race; a missing endpoint is normal here.
            Err(err) => {
                tracing::debug!(edge_id = %id, error = %err, "skipping reinforcement");
            }
        }
    }

    async fn decay_loop(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.decay_and_prune().await;
                }
            }
        }
    }

    /// One decay/prune pass. Public so tests can drive ticks directly.
    pub async fn decay_and_prune(&self) -> usize {
        let pruned = {
            let mut graph = self.graph.write().await;
            graph.decay_all();
            graph.prune_weak()
        };
        let count = pruned.len();
        for edge_id in pruned {
            self.emit(TopologyEvent::EdgeRemoved {
                edge_id,
                timestamp: Utc::now(),
            });
        }
        if count > 0 {
            let remaining = self.graph.read().await.edge_count();
            tracing::debug!(pruned = count, remaining, "pruned weak edges");
        }
        count
    }

    async fn snapshot_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.persist_snapshot().await;
                }
            }
        }
    }

    /// Persists the current snapshot under the latest key plus a time-keyed
    /// history copy. Write failures are logged and retried on the next tick.
    pub async fn persist_snapshot(&self) {
        let snapshot = self.snapshot().await;
        if let Err(err) = self.store.set(SNAPSHOT_KEY, &snapshot, None).await {
            tracing::warn!(error = %err, "failed to persist snapshot");
            return;
        }
        let history_key = format!("graph:snapshot:{}", snapshot.timestamp.timestamp());
        if let Err(err) = self
            .store
            .set(&history_key, &snapshot, Some(SNAPSHOT_HISTORY_TTL))
            .await
        {
            tracing::warn!(error = %err, "failed to persist snapshot history");
        }
    }

    async fn forward_events(&self, cancel: CancellationToken) {
        let mut rx = match self.events_rx.lock().await.take() {
            Some(rx) => rx,
            None => return,
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = rx.recv() => {
                    let Some(event) = event else { return };
                    // Join/leave records are produced by agents themselves;
                    // only edge changes are ours to publish.
                    let key = match &event {
                        TopologyEvent::EdgeCreated { edge_id, .. }
                        | TopologyEvent::EdgeRemoved { edge_id, .. }
                        | TopologyEvent::EdgeStrengthChanged { edge_id, .. } => edge_id.clone(),
                        _ => continue,
                    };
                    if let Err(err) = self.bus.publish(TOPOLOGY_STREAM, &key, &event).await {
                        tracing::warn!(error = %err, "failed to publish topology event");
                    }
                }
            }
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
                    let stats = self.graph.read().await.snapshot().stats;
                    tracing::info!(
                        agents = stats.total_agents,
                        edges = stats.total_edges,
                        active_edges = stats.active_edges,
                        avg_weight = stats.average_weight,
                        density = stats.density,
                        reduction_percent = stats.reduction_percent,
                        "topology stats"
                    );
                }
            }
        }
    }

    fn emit(&self, event: TopologyEvent) {
        if self.events_tx.try_send(event).is_err() {
            // Channel full: drop, the snapshot remains the ground truth.
            tracing::debug!("topology event channel full, dropping event");
        }
    }

    pub async fn snapshot(&self) -> GraphSnapshot {
        self.graph.read().await.snapshot()
    }
}
