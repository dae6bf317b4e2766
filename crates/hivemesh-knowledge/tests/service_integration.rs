use std::sync::Arc;
use std::time::Duration;

use hivemesh_bus::MeshBus;
use hivemesh_knowledge::KnowledgeService;
use hivemesh_schema::{Insight, InsightRecord, InsightType, KnowledgeQuery, MeshConfig};
use hivemesh_store::StateStore;
use tokio_util::sync::CancellationToken;

fn insight(id: &str, topic: &str, confidence: f64) -> Insight {
    let mut insight = Insight::new(
        "agent-1",
        "sales",
        InsightType::PricingIssue,
        topic,
        format!("observation about {topic}"),
        confidence,
    );
    insight.id = id.to_string();
    insight
}

struct Harness {
    _dir: tempfile::TempDir,
    bus: MeshBus,
    store: StateStore,
    service: Arc<KnowledgeService>,
    cancel: CancellationToken,
}

impl Harness {
    fn start() -> Self {
        let config = MeshConfig::default();
        let dir = tempfile::TempDir::new().unwrap();
        let bus = MeshBus::open(&dir.path().join("bus.db"), &config.stream_prefix).unwrap();
        let store = StateStore::open(&dir.path().join("store.db")).unwrap();
        let service = Arc::new(KnowledgeService::new(bus.clone(), store.clone()));
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

    async fn publish(&self, insight: Insight) {
        self.bus
            .publish("insights", &insight.id.clone(), &InsightRecord { insight })
            .await
            .unwrap();
    }

    async fn wait_for_count(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if self.service.index().len().await == count {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} insights, have {}",
                self.service.index().len().await
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

#[tokio::test]
async fn consumed_insights_are_indexed_and_queryable() {
    let h = Harness::start();
    h.publish(insight("i-1", "pricing", 0.6)).await;
    h.publish(insight("i-2", "pricing", 0.72)).await;
    h.publish(insight("i-3", "pricing", 0.85)).await;
    h.publish(insight("i-4", "fraud", 0.5)).await;
    h.publish(insight("i-5", "fraud", 0.95)).await;
    h.wait_for_count(5).await;

    let result = h
        .service
        .query(&KnowledgeQuery {
            topics: vec!["pricing".into()],
            min_confidence: 0.7,
            limit: 10,
            ..Default::default()
        })
        .await;
    let ids: Vec<&str> = result.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["i-2", "i-3"]);
    h.cancel.cancel();
}

#[tokio::test]
async fn redelivered_insight_record_is_idempotent() {
    let h = Harness::start();
    let item = insight("i-dup", "latency", 0.8);
    h.publish(item.clone()).await;
    h.publish(item).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.service.index().len().await, 1);
    assert_eq!(
        h.service.index().ids_for_topic("latency").await,
        vec!["i-dup"]
    );
    h.cancel.cancel();
}

#[tokio::test]
async fn persistence_survives_restart() {
    let h = Harness::start();
    h.publish(insight("i-1", "pricing", 0.8)).await;
    h.publish(insight("i-2", "fraud", 0.9)).await;
    h.wait_for_count(2).await;

    h.service.persist_all().await;
    let stored: Option<Insight> = h.store.get("insight:i-1").await.unwrap();
    assert!(stored.is_some());

    h.cancel.cancel();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Cold start against the same store: bulk load rebuilds the index.
    let reborn = Arc::new(KnowledgeService::new(h.bus.clone(), h.store.clone()));
    let cancel = CancellationToken::new();
    tokio::spawn(reborn.clone().run(cancel.clone()));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while reborn.index().len().await < 2 {
        assert!(tokio::time::Instant::now() < deadline, "cold start never loaded");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(reborn.index().get("i-1").await.is_some());
    assert!(reborn.index().get("i-2").await.is_some());
    cancel.cancel();
}

#[tokio::test]
async fn final_flush_persists_on_shutdown() {
    let h = Harness::start();
    h.publish(insight("i-late", "checkout", 0.7)).await;
    h.wait_for_count(1).await;

    h.cancel.cancel();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stored: Option<Insight> = h.store.get("insight:i-late").await.unwrap();
    assert!(stored.is_some());
}
