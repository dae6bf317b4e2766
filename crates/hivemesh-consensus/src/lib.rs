pub mod quorum;
pub mod service;
pub mod waggle;

pub use quorum::{QuorumSensor, QuorumStatus};
pub use service::{ConsensusService, ConsensusStats};
pub use waggle::derive_waggle;
