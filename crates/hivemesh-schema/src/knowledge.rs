use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentId, InsightId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    CustomerFeedback,
    PricingIssue,
    ProductIssue,
    ProcessImprovement,
    FraudPattern,
    InventoryTrend,
    BehaviorPattern,
    Correlation,
    Anomaly,
}

/// Who may read an insight. Enforcement is the consumer's responsibility;
/// the core only tags the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightPrivacy {
    Public,
    Restricted,
    Private,
}

/// Knowledge learned by an agent and shared to the mesh. Append-only from
/// the aggregator's viewpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: InsightId,
    pub agent_id: AgentId,
    pub agent_role: String,
    #[serde(rename = "type")]
    pub insight_type: InsightType,
    pub topic: String,
    pub content: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub privacy: InsightPrivacy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_with: Option<Vec<AgentId>>,
}

impl Insight {
    pub fn new(
        agent_id: impl Into<AgentId>,
        agent_role: impl Into<String>,
        insight_type: InsightType,
        topic: impl Into<String>,
        content: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: crate::new_insight_id(),
            agent_id: agent_id.into(),
            agent_role: agent_role.into(),
            insight_type,
            topic: topic.into(),
            content: content.into(),
            data: serde_json::Value::Null,
            confidence,
            tags: Vec::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            privacy: InsightPrivacy::Public,
            shared_with: None,
        }
    }
}

/// Wrapper record on the insights stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightRecord {
    pub insight: Insight,
}

/// Filters for querying the collective knowledge. Multiple values within a
/// filter are OR; filters across dimensions are AND.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeQuery {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub agent_types: Vec<String>,
    #[serde(default)]
    pub insight_types: Vec<InsightType>,
    #[serde(default)]
    pub min_confidence: f64,
    #[serde(default)]
    pub time_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeQueryResult {
    pub query: KnowledgeQuery,
    pub insights: Vec<Insight>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Emergent pattern detected across multiple insights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    #[serde(rename = "type")]
    pub pattern_type: String,
    pub description: String,
    pub insights: Vec<InsightId>,
    pub frequency: usize,
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
}
