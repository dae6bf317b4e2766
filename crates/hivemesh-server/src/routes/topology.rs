use axum::extract::State;
use axum::Json;
use hivemesh_schema::{GraphSnapshot, GraphStats};
use hivemesh_store::StateStore;

use crate::error::ApiError;
use crate::state::AppState;

const SNAPSHOT_KEY: &str = "graph:snapshot:latest";

/// GET /api/topology: the latest persisted snapshot. Fresh installs get an
/// empty graph, not an error.
pub async fn get_topology(
    State(state): State<AppState>,
) -> Result<Json<GraphSnapshot>, ApiError> {
    Ok(Json(load_snapshot(&state.store).await?))
}

/// GET /api/topology/stats: just the derived stats sub-object.
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<GraphStats>, ApiError> {
    Ok(Json(load_snapshot(&state.store).await?.stats))
}

pub async fn load_snapshot(store: &StateStore) -> Result<GraphSnapshot, ApiError> {
    Ok(store
        .get::<GraphSnapshot>(SNAPSHOT_KEY)
        .await?
        .unwrap_or_else(GraphSnapshot::empty))
}
