use hivemesh_store::StateStore;

/// Shared application state accessible from all route handlers. The query
/// surface is read-only: everything it serves comes from the state store
/// the owning services persist into.
#[derive(Clone)]
pub struct AppState {
    pub store: StateStore,
}
