pub mod index;
pub mod service;

pub use index::{filter_insights, matches_query, matches_question, KnowledgeIndex};
pub use service::KnowledgeService;
