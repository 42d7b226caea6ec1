// Settlement domain models
pub mod settlement;

pub use settlement::{
    CommitReceipt, CommitRequest, DedupRecord, DedupState, FailureReason, GatewayPaymentStatus,
    OrderId, PaymentProof, ReservationId, SettlementDraft, SettlementOutcome,
};
