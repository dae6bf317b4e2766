use axum::extract::State;
use axum::Json;
use hivemesh_schema::{Agent, AgentStatus, GraphSnapshot};
use serde::Serialize;

use crate::error::ApiError;
use crate::routes::topology::load_snapshot;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AgentsResponse {
    pub agents: Vec<Agent>,
    pub count: usize,
}

/// GET /api/agents: active agents from the latest persisted snapshot.
pub async fn list_agents(
    State(state): State<AppState>,
) -> Result<Json<AgentsResponse>, ApiError> {
    let snapshot: GraphSnapshot = load_snapshot(&state.store).await?;
    let mut agents: Vec<Agent> = snapshot
        .agents
        .into_values()
        .filter(|agent| agent.status == AgentStatus::Active)
        .collect();
    agents.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Json(AgentsResponse {
        count: agents.len(),
        agents,
    }))
}
