use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hivemesh_bus::MeshBus;
use hivemesh_schema::{
    Agent, GraphSnapshot, MeshConfig, Message, MessageType, TopologyEvent,
};
use hivemesh_store::StateStore;
use hivemesh_topology::service::{SNAPSHOT_KEY, TOPOLOGY_STREAM};
use hivemesh_topology::TopologyService;
use tokio_util::sync::CancellationToken;

struct Harness {
    _dir: tempfile::TempDir,
    bus: MeshBus,
    store: StateStore,
    service: Arc<TopologyService>,
    cancel: CancellationToken,
}

impl Harness {
    fn start(config: MeshConfig) -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        let bus = MeshBus::open(&dir.path().join("bus.db"), &config.stream_prefix).unwrap();
        let store = StateStore::open(&dir.path().join("store.db")).unwrap();
        let service = Arc::new(TopologyService::new(bus.clone(), store.clone(), config));
        let cancel = CancellationToken::new();
        tokio::spawn(service.clone().run(cancel.clone()));
        Self {
            _dir: dir,
            bus,
            store,
            service,
            cancel,
        }
    }

    async fn join(&self, id: &str) {
        let agent = Agent::new(id, id.to_uppercase(), "worker");
        self.bus
            .publish(
                TOPOLOGY_STREAM,
                id,
                &TopologyEvent::AgentJoined {
                    agent_id: id.to_string(),
                    agent: Some(agent),
                    timestamp: Utc::now(),
                },
            )
            .await
            .unwrap();
    }

    async fn send_message(&self, from: &str, to: &str) {
        let msg = Message::new(from, to, MessageType::Task, serde_json::json!({}));
        self.bus.publish("messages", &msg.id, &msg).await.unwrap();
    }

    async fn wait_for_snapshot<F>(&self, mut predicate: F) -> GraphSnapshot
    where
        F: FnMut(&GraphSnapshot) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let snapshot = self.service.snapshot().await;
            if predicate(&snapshot) {
                return snapshot;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached; snapshot: {} agents, {} edges",
                snapshot.agents.len(),
                snapshot.edges.len()
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

fn slow_decay_config() -> MeshConfig {
    // Long tick so only explicit decay_and_prune calls mutate weights.
    let mut config = MeshConfig::default();
    config.decay_interval = Duration::from_secs(3600);
    config
}

#[tokio::test]
async fn full_mesh_forms_from_joins() {
    let h = Harness::start(slow_decay_config());
    for id in ["a", "b", "c", "d"] {
        h.join(id).await;
    }

    let snapshot = h
        .wait_for_snapshot(|s| s.agents.len() == 4 && s.edges.len() == 16)
        .await;
    assert_eq!(snapshot.stats.total_agents, 4);
    assert_eq!(snapshot.stats.total_edges, 16);
    assert!(snapshot
        .edges
        .values()
        .all(|edge| (edge.weight - 0.5).abs() < 1e-9));
    h.cancel.cancel();
}

#[tokio::test]
async fn reinforced_path_survives_decay_while_idle_edges_prune() {
    let mut config = slow_decay_config();
    config.decay_rate = 0.15;
    let h = Harness::start(config);

    for id in ["a", "b", "c", "d"] {
        h.join(id).await;
    }
    h.wait_for_snapshot(|s| s.agents.len() == 4).await;

    for _ in 0..20 {
        h.send_message("a", "b").await;
        h.send_message("b", "a").await;
    }
    h.wait_for_snapshot(|s| {
        s.edges.get("a->b").map(|e| e.usage).unwrap_or(0) >= 20
            && s.edges.get("b->a").map(|e| e.usage).unwrap_or(0) >= 20
    })
    .await;

    let mut pruned_total = 0;
    for _ in 0..3 {
        pruned_total += h.service.decay_and_prune().await;
    }

    let snapshot = h.service.snapshot().await;
    assert!(pruned_total > 0, "expected at least one idle edge pruned");
    assert!(snapshot.edges["a->b"].weight >= 0.1);
    assert!(snapshot.edges["b->a"].weight >= 0.1);
    h.cancel.cancel();
}

#[tokio::test]
async fn late_joiner_edge_appears_once_join_is_observed() {
    let h = Harness::start(slow_decay_config());
    h.join("a").await;
    h.wait_for_snapshot(|s| s.agents.contains_key("a")).await;

    // Message races ahead of b's join: silently skipped.
    h.send_message("a", "b").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!h.service.snapshot().await.edges.contains_key("a->b"));

    h.join("b").await;
    h.wait_for_snapshot(|s| s.agents.contains_key("b")).await;
    h.send_message("a", "b").await;

    let snapshot = h
        .wait_for_snapshot(|s| s.edges.get("a->b").map(|e| e.usage >= 1).unwrap_or(false))
        .await;
    assert!(snapshot.edges["a->b"].weight > 0.5);
    h.cancel.cancel();
}

#[tokio::test]
async fn pruned_edges_are_published_to_the_topology_stream() {
    let mut config = slow_decay_config();
    config.decay_rate = 0.5;
    let h = Harness::start(config);

    h.join("a").await;
    h.join("b").await;
    h.wait_for_snapshot(|s| s.agents.len() == 2).await;

    let pruned = h.service.decay_and_prune().await;
    assert_eq!(pruned, 4);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let records: Vec<hivemesh_bus::Record<TopologyEvent>> =
            h.bus.read_all(TOPOLOGY_STREAM).await.unwrap();
        let removed = records
            .iter()
            .filter(|r| matches!(r.value, TopologyEvent::EdgeRemoved { .. }))
            .count();
        if removed == 4 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "edge_removed events never published (saw {removed})"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    h.cancel.cancel();
}

#[tokio::test]
async fn agent_leave_removes_agent_and_persists() {
    let h = Harness::start(slow_decay_config());
    h.join("a").await;
    h.join("b").await;
    h.wait_for_snapshot(|s| s.agents.len() == 2).await;

    let stored: Option<Agent> = h.store.get("agent:a").await.unwrap();
    assert!(stored.is_some());

    h.bus
        .publish(
            TOPOLOGY_STREAM,
            "a",
            &TopologyEvent::AgentLeft {
                agent_id: "a".into(),
                timestamp: Utc::now(),
            },
        )
        .await
        .unwrap();

    h.wait_for_snapshot(|s| !s.agents.contains_key("a")).await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if h.store.get::<Agent>("agent:a").await.unwrap().is_none() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    h.cancel.cancel();
}

#[tokio::test]
async fn final_snapshot_is_flushed_on_shutdown() {
    let h = Harness::start(slow_decay_config());
    h.join("a").await;
    h.wait_for_snapshot(|s| s.agents.contains_key("a")).await;

    h.cancel.cancel();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let snapshot: GraphSnapshot = h.store.get(SNAPSHOT_KEY).await.unwrap().unwrap();
    assert!(snapshot.agents.contains_key("a"));
    assert_eq!(snapshot.stats.total_agents, 1);
}

#[tokio::test]
async fn duplicate_join_redelivery_is_idempotent() {
    let h = Harness::start(slow_decay_config());
    h.join("a").await;
    h.join("a").await;
    h.join("b").await;

    let snapshot = h.wait_for_snapshot(|s| s.agents.len() == 2).await;
    assert_eq!(snapshot.edges.len(), 4);
    h.cancel.cancel();
}
