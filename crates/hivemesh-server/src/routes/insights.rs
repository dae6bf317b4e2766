use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use hivemesh_knowledge::filter_insights;
use hivemesh_schema::{Insight, KnowledgeQuery, KnowledgeQueryResult};
use hivemesh_store::StateStore;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 50;
const QUESTION_MIN_CONFIDENCE: f64 = 0.5;
const QUESTION_LIMIT: usize = 10;

/// GET /api/insights with repeatable `topic` / `agent_type` parameters.
pub async fn query_insights(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<KnowledgeQueryResult>, ApiError> {
    let query = parse_query_params(params)?;
    run_query(&state.store, query).await
}

/// POST /api/insights/search with a full query document as the body.
pub async fn search_insights(
    State(state): State<AppState>,
    Json(query): Json<KnowledgeQuery>,
) -> Result<Json<KnowledgeQueryResult>, ApiError> {
    run_query(&state.store, query).await
}

#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    #[serde(default)]
    question: String,
}

/// POST /api/query: free-text question answered by keyword match.
pub async fn natural_language_query(
    State(state): State<AppState>,
    Json(request): Json<QuestionRequest>,
) -> Result<Json<KnowledgeQueryResult>, ApiError> {
    if request.question.trim().is_empty() {
        return Err(ApiError::bad_request("question is required"));
    }
    let query = KnowledgeQuery {
        question: Some(request.question),
        min_confidence: QUESTION_MIN_CONFIDENCE,
        limit: QUESTION_LIMIT,
        ..Default::default()
    };
    run_query(&state.store, query).await
}

fn parse_query_params(params: Vec<(String, String)>) -> Result<KnowledgeQuery, ApiError> {
    let mut query = KnowledgeQuery {
        limit: DEFAULT_LIMIT,
        ..Default::default()
    };
    for (key, value) in params {
        match key.as_str() {
            "topic" => query.topics.push(value),
            "agent_type" => query.agent_types.push(value),
            "min_confidence" => {
                query.min_confidence = value
                    .parse()
                    .map_err(|_| ApiError::bad_request("invalid min_confidence"))?;
            }
            "limit" => {
                query.limit = value
                    .parse()
                    .map_err(|_| ApiError::bad_request("invalid limit"))?;
            }
            _ => {}
        }
    }
    Ok(query)
}

async fn run_query(
    store: &StateStore,
    query: KnowledgeQuery,
) -> Result<Json<KnowledgeQueryResult>, ApiError> {
    let insights = load_insights(store).await?;
    let matched = filter_insights(&insights, &query);
    Ok(Json(KnowledgeQueryResult {
        count: matched.len(),
        insights: matched,
        query,
        timestamp: Utc::now(),
    }))
}

/// Loads every persisted insight, oldest first, so responses keep the
/// aggregator's insertion order.
pub async fn load_insights(store: &StateStore) -> Result<Vec<Insight>, ApiError> {
    let mut insights: Vec<Insight> = store
        .list_prefix::<Insight>("insight:")
        .await?
        .into_iter()
        .map(|(_, insight)| insight)
        .collect();
    insights.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(insights)
}
