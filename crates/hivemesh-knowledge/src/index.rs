//! In-memory insight store with secondary indices. The primary map and the
//! index map sit behind separate locks, always acquired primary-first.

use std::collections::HashMap;

use chrono::Utc;
use hivemesh_schema::{Insight, InsightId, InsightType, KnowledgeQuery, Pattern};
use tokio::sync::RwLock;

#[derive(Default)]
struct SecondaryIndices {
    order: Vec<InsightId>,
    by_topic: HashMap<String, Vec<InsightId>>,
    by_agent: HashMap<String, Vec<InsightId>>,
    by_type: HashMap<InsightType, Vec<InsightId>>,
}

#[derive(Default)]
pub struct KnowledgeIndex {
    insights: RwLock<HashMap<InsightId, Insight>>,
    indices: RwLock<SecondaryIndices>,
}

impl KnowledgeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an insight and registers it in every index. Re-inserting an
    /// already-known id refreshes the stored value without duplicating index
    /// entries, so redelivered records are harmless.
    pub async fn insert(&self, insight: Insight) {
        let mut insights = self.insights.write().await;
        let known = insights.insert(insight.id.clone(), insight.clone()).is_some();
        if known {
            return;
        }
        let mut indices = self.indices.write().await;
        indices.order.push(insight.id.clone());
        indices
            .by_topic
            .entry(insight.topic.clone())
            .or_default()
            .push(insight.id.clone());
        indices
            .by_agent
            .entry(insight.agent_id.clone())
            .or_default()
            .push(insight.id.clone());
        indices
            .by_type
            .entry(insight.insight_type)
            .or_default()
            .push(insight.id);
    }

    /// Runs a filtered query. Candidates come from the narrowest applicable
    /// index; results keep insertion order and respect `limit` (0 = no cap).
    pub async fn query(&self, query: &KnowledgeQuery) -> Vec<Insight> {
        let insights = self.insights.read().await;
        let indices = self.indices.read().await;

        let candidates: Vec<InsightId> = if !query.topics.is_empty() {
            query
                .topics
                .iter()
                .flat_map(|topic| indices.by_topic.get(topic).cloned().unwrap_or_default())
                .collect()
        } else if !query.insight_types.is_empty() {
            query
                .insight_types
                .iter()
                .flat_map(|kind| indices.by_type.get(kind).cloned().unwrap_or_default())
                .collect()
        } else if !query.agent_types.is_empty() {
            // Roles are not indexed directly; scan in insertion order.
            indices.order.clone()
        } else {
            indices.order.clone()
        };

        let mut out = Vec::new();
        for id in candidates {
            let Some(insight) = insights.get(&id) else {
                continue;
            };
            if !matches_query(insight, query) {
                continue;
            }
            out.push(insight.clone());
            if query.limit > 0 && out.len() >= query.limit {
                break;
            }
        }
        out
    }

    pub async fn get(&self, id: &str) -> Option<Insight> {
        self.insights.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.insights.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.insights.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<Insight> {
        let insights = self.insights.read().await;
        let indices = self.indices.read().await;
        indices
            .order
            .iter()
            .filter_map(|id| insights.get(id).cloned())
            .collect()
    }

    /// Ids indexed under a topic, in insertion order.
    pub async fn ids_for_topic(&self, topic: &str) -> Vec<InsightId> {
        self.indices
            .read()
            .await
            .by_topic
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn ids_for_agent(&self, agent_id: &str) -> Vec<InsightId> {
        self.indices
            .read()
            .await
            .by_agent
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn ids_for_type(&self, kind: InsightType) -> Vec<InsightId> {
        self.indices
            .read()
            .await
            .by_type
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Scans for topics reported by three or more insights.
    pub async fn detect_repeated_topics(&self) -> Vec<Pattern> {
        let insights = self.insights.read().await;
        let total = insights.len();
        let mut by_topic: HashMap<&str, Vec<&Insight>> = HashMap::new();
        for insight in insights.values() {
            by_topic.entry(&insight.topic).or_default().push(insight);
        }

        let mut patterns = Vec::new();
        for (topic, members) in by_topic {
            if members.len() < 3 {
                continue;
            }
            patterns.push(Pattern {
                id: uuid::Uuid::new_v4().to_string(),
                pattern_type: "repeated_topic".to_string(),
                description: format!("topic '{topic}' reported {} times", members.len()),
                insights: members.iter().map(|i| i.id.clone()).collect(),
                frequency: members.len(),
                confidence: members.len() as f64 / total as f64,
                detected_at: Utc::now(),
            });
        }
        patterns
    }
}

/// True when an insight passes every filter dimension of the query.
/// Dimensions are AND; values within one dimension are OR.
pub fn matches_query(insight: &Insight, query: &KnowledgeQuery) -> bool {
    if insight.confidence < query.min_confidence {
        return false;
    }
    if let Some(from) = query.time_from {
        if insight.created_at < from {
            return false;
        }
    }
    if let Some(to) = query.time_to {
        if insight.created_at > to {
            return false;
        }
    }
    if !query.topics.is_empty() && !query.topics.iter().any(|t| *t == insight.topic) {
        return false;
    }
    if !query.agent_types.is_empty()
        && !query.agent_types.iter().any(|r| *r == insight.agent_role)
    {
        return false;
    }
    if !query.insight_types.is_empty()
        && !query.insight_types.contains(&insight.insight_type)
    {
        return false;
    }
    if let Some(question) = query.question.as_deref() {
        if !question.trim().is_empty() && !matches_question(insight, question) {
            return false;
        }
    }
    true
}

/// Keyword match for free-text questions: any 3+-character word of the
/// question appearing in the topic, content, or tags counts as a hit.
pub fn matches_question(insight: &Insight, question: &str) -> bool {
    let topic = insight.topic.to_lowercase();
    let content = insight.content.to_lowercase();
    let tags: Vec<String> = insight.tags.iter().map(|t| t.to_lowercase()).collect();

    question
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() >= 3)
        .any(|word| {
            topic.contains(word) || content.contains(word) || tags.iter().any(|t| t.contains(word))
        })
}

/// Applies the query's filters and limit to an already-ordered insight list.
/// The read side of the HTTP API uses this over store-loaded insights.
pub fn filter_insights(insights: &[Insight], query: &KnowledgeQuery) -> Vec<Insight> {
    let mut out = Vec::new();
    for insight in insights {
        if !matches_query(insight, query) {
            continue;
        }
        out.push(insight.clone());
        if query.limit > 0 && out.len() >= query.limit {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use hivemesh_schema::InsightType;

    use super::*;

    fn insight(id: &str, agent: &str, kind: InsightType, topic: &str, confidence: f64) -> Insight {
        let mut insight = Insight::new(agent, "sales", kind, topic, format!("about {topic}"), confidence);
        insight.id = id.to_string();
        insight
    }

    #[tokio::test]
    async fn indices_track_membership_exactly() {
        let index = KnowledgeIndex::new();
        index
            .insert(insight("i-1", "a", InsightType::PricingIssue, "pricing", 0.6))
            .await;
        index
            .insert(insight("i-2", "b", InsightType::FraudPattern, "fraud", 0.9))
            .await;
        index
            .insert(insight("i-3", "a", InsightType::PricingIssue, "pricing", 0.8))
            .await;

        assert_eq!(index.ids_for_topic("pricing").await, vec!["i-1", "i-3"]);
        assert_eq!(index.ids_for_topic("fraud").await, vec!["i-2"]);
        assert_eq!(index.ids_for_agent("a").await, vec!["i-1", "i-3"]);
        assert_eq!(
            index.ids_for_type(InsightType::PricingIssue).await,
            vec!["i-1", "i-3"]
        );
        assert_eq!(index.ids_for_type(InsightType::Anomaly).await.len(), 0);
        assert_eq!(index.len().await, 3);
    }

    #[tokio::test]
    async fn reinsert_does_not_duplicate_index_entries() {
        let index = KnowledgeIndex::new();
        let item = insight("i-1", "a", InsightType::Anomaly, "latency", 0.7);
        index.insert(item.clone()).await;
        index.insert(item).await;
        assert_eq!(index.len().await, 1);
        assert_eq!(index.ids_for_topic("latency").await, vec!["i-1"]);
    }

    #[tokio::test]
    async fn query_filters_by_topic_confidence_and_limit() {
        let index = KnowledgeIndex::new();
        index
            .insert(insight("i-1", "a", InsightType::PricingIssue, "pricing", 0.6))
            .await;
        index
            .insert(insight("i-2", "a", InsightType::PricingIssue, "pricing", 0.72))
            .await;
        index
            .insert(insight("i-3", "a", InsightType::PricingIssue, "pricing", 0.85))
            .await;
        index
            .insert(insight("i-4", "b", InsightType::FraudPattern, "fraud", 0.5))
            .await;
        index
            .insert(insight("i-5", "b", InsightType::FraudPattern, "fraud", 0.95))
            .await;

        let result = index
            .query(&KnowledgeQuery {
                topics: vec!["pricing".into()],
                min_confidence: 0.7,
                limit: 10,
                ..Default::default()
            })
            .await;
        let ids: Vec<&str> = result.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["i-2", "i-3"]);
    }

    #[tokio::test]
    async fn query_is_monotone_under_added_filters() {
        let index = KnowledgeIndex::new();
        for (id, agent, kind, topic, conf) in [
            ("i-1", "a", InsightType::PricingIssue, "pricing", 0.6),
            ("i-2", "b", InsightType::FraudPattern, "fraud", 0.8),
            ("i-3", "a", InsightType::Anomaly, "latency", 0.9),
        ] {
            index.insert(insight(id, agent, kind, topic, conf)).await;
        }

        let unfiltered = index.query(&KnowledgeQuery::default()).await;
        let by_topic = index
            .query(&KnowledgeQuery {
                topics: vec!["pricing".into()],
                ..Default::default()
            })
            .await;
        let by_topic_and_conf = index
            .query(&KnowledgeQuery {
                topics: vec!["pricing".into()],
                min_confidence: 0.9,
                ..Default::default()
            })
            .await;
        assert!(by_topic.len() <= unfiltered.len());
        assert!(by_topic_and_conf.len() <= by_topic.len());
    }

    #[tokio::test]
    async fn cross_dimension_filters_are_anded() {
        let index = KnowledgeIndex::new();
        index
            .insert(insight("i-1", "a", InsightType::PricingIssue, "pricing", 0.9))
            .await;
        index
            .insert(insight("i-2", "a", InsightType::Anomaly, "pricing", 0.9))
            .await;

        let result = index
            .query(&KnowledgeQuery {
                topics: vec!["pricing".into()],
                insight_types: vec![InsightType::Anomaly],
                ..Default::default()
            })
            .await;
        let ids: Vec<&str> = result.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["i-2"]);
    }

    #[tokio::test]
    async fn question_matches_topic_content_and_tags() {
        let mut item = insight("i-1", "a", InsightType::CustomerFeedback, "checkout", 0.8);
        item.content = "Customers abandon carts at the payment step".into();
        item.tags = vec!["mobile".into()];

        assert!(matches_question(&item, "why do customers abandon checkout?"));
        assert!(matches_question(&item, "anything about payment problems?"));
        assert!(matches_question(&item, "MOBILE issues"));
        assert!(!matches_question(&item, "warehouse inventory"));
        // Short words alone never match.
        assert!(!matches_question(&item, "is it ok"));
    }

    #[tokio::test]
    async fn repeated_topics_are_detected_at_three() {
        let index = KnowledgeIndex::new();
        for (id, topic) in [
            ("i-1", "pricing"),
            ("i-2", "pricing"),
            ("i-3", "fraud"),
            ("i-4", "pricing"),
        ] {
            index
                .insert(insight(id, "a", InsightType::PricingIssue, topic, 0.8))
                .await;
        }

        let patterns = index.detect_repeated_topics().await;
        assert_eq!(patterns.len(), 1);
        let pattern = &patterns[0];
        assert_eq!(pattern.pattern_type, "repeated_topic");
        assert_eq!(pattern.frequency, 3);
        assert_eq!(pattern.insights.len(), 3);
        assert!(pattern.description.contains("pricing"));
    }

    #[test]
    fn filter_insights_preserves_input_order() {
        let items = vec![
            insight("i-1", "a", InsightType::PricingIssue, "pricing", 0.72),
            insight("i-2", "a", InsightType::PricingIssue, "pricing", 0.6),
            insight("i-3", "a", InsightType::PricingIssue, "pricing", 0.85),
        ];
        let result = filter_insights(
            &items,
            &KnowledgeQuery {
                min_confidence: 0.7,
                ..Default::default()
            },
        );
        let ids: Vec<&str> = result.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["i-1", "i-3"]);
    }
}
