pub mod graph;
pub mod service;

pub use graph::{Graph, GraphError};
pub use service::TopologyService;
