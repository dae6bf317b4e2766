pub mod agents;
pub mod insights;
pub mod topology;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/insights", get(insights::query_insights))
        .route("/insights/search", post(insights::search_insights))
        .route("/query", post(insights::natural_language_query))
        .route("/agents", get(agents::list_agents))
        .route("/topology", get(topology::get_topology))
        .route("/topology/stats", get(topology::get_stats))
}
