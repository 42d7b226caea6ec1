pub mod settlement_orchestrator;
pub mod settlement_poller;

pub use settlement_orchestrator::SettlementOrchestrator;
pub use settlement_poller::{PollConfig, PollHandle, PollOutcome, SettlementPoller};
