//! Knowledge aggregator: consumes insight records from the bus, maintains
//! the in-memory indices, and periodically persists everything so a restart
//! can rebuild from the store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use hivemesh_bus::MeshBus;
use hivemesh_schema::{Insight, InsightRecord, KnowledgeQuery};
use hivemesh_store::StateStore;
use tokio_util::sync::CancellationToken;

use crate::index::KnowledgeIndex;

pub const INSIGHTS_STREAM: &str = "insights";
pub const KNOWLEDGE_GROUP: &str = "knowledge-manager";
pub const INSIGHT_KEY_PREFIX: &str = "insight:";

const PERSISTENCE_INTERVAL: Duration = Duration::from_secs(30);
const PATTERN_INTERVAL: Duration = Duration::from_secs(60);
const INSIGHT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub struct KnowledgeService {
    index: Arc<KnowledgeIndex>,
    bus: MeshBus,
    store: StateStore,
}

impl KnowledgeService {
    pub fn new(bus: MeshBus, store: StateStore) -> Self {
        Self {
            index: Arc::new(KnowledgeIndex::new()),
            bus,
            store,
        }
    }

    pub fn index(&self) -> Arc<KnowledgeIndex> {
        self.index.clone()
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        self.load_from_store().await;

        let consumer = tokio::spawn({
            let svc = self.clone();
            let cancel = cancel.clone();
            async move { svc.consume_insights(cancel).await }
        });
        let persistence = tokio::spawn({
            let svc = self.clone();
            let cancel = cancel.clone();
            async move { svc.persistence_loop(cancel).await }
        });
        let patterns = tokio::spawn({
            let svc = self.clone();
            let cancel = cancel.clone();
            async move { svc.pattern_loop(cancel).await }
        });

        let _ = tokio::join!(consumer, persistence, patterns);
        // Final pass so nothing accepted since the last tick is lost.
        self.persist_all().await;
        tracing::info!("knowledge aggregator stopped");
        Ok(())
    }

    /// Best-effort cold-start: whatever the store still holds is loaded,
    /// undecodable rows were already skipped by the store client.
    async fn load_from_store(&self) {
        match self.store.list_prefix::<Insight>(INSIGHT_KEY_PREFIX).await {
            Ok(rows) => {
                let mut loaded = rows;
                loaded.sort_by(|(_, a), (_, b)| a.created_at.cmp(&b.created_at));
                let count = loaded.len();
                for (_, insight) in loaded {
                    self.index.insert(insight).await;
                }
                if count > 0 {
                    tracing::info!(count, "loaded insights from store");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to load insights from store");
            }
        }
    }

    async fn consume_insights(&self, cancel: CancellationToken) {
        let result = self
            .bus
            .consume::<InsightRecord, _, _>(INSIGHTS_STREAM, KNOWLEDGE_GROUP, cancel, |record| {
                let svc = self;
                async move {
                    let insight = record.value.insight;
                    tracing::info!(
                        insight_id = %insight.id,
                        agent_id = %insight.agent_id,
                        topic = %insight.topic,
                        confidence = insight.confidence,
                        "insight received"
                    );
                    svc.index.insert(insight).await;
                    Ok(())
                }
            })
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "insight consumer exited");
        }
    }

    async fn persistence_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(PERSISTENCE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.persist_all().await;
                }
            }
        }
    }

    /// Writes every known insight under its `insight:<id>` key. Public so
    /// tests can force a persistence pass.
    pub async fn persist_all(&self) {
        let insights = self.index.all().await;
        let count = insights.len();
        for insight in insights {
            let key = format!("{INSIGHT_KEY_PREFIX}{}", insight.id);
            if let Err(err) = self.store.set(&key, &insight, Some(INSIGHT_TTL)).await {
                tracing::warn!(insight_id = %insight.id, error = %err, "failed to persist insight");
            }
        }
        if count > 0 {
            tracing::debug!(count, "persisted insights");
        }
    }

    async fn pattern_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(PATTERN_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    for pattern in self.index.detect_repeated_topics().await {
                        tracing::info!(
                            pattern_type = %pattern.pattern_type,
                            description = %pattern.description,
                            frequency = pattern.frequency,
                            "pattern detected"
                        );
                    }
                }
            }
        }
    }

    pub async fn query(&self, query: &KnowledgeQuery) -> Vec<Insight> {
        self.index.query(query).await
    }
}
