use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use http::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use tracing::info;

use crate::errors::ServiceError;
use crate::models::{PaymentProof, SettlementDraft};
use crate::services::PollOutcome;
use crate::AppState;

/// Query string of the gateway success redirect.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackQuery {
    pub payment_key: Option<String>,
    pub order_id: Option<String>,
    pub amount: Option<String>,
}

impl TryFrom<CallbackQuery> for PaymentProof {
    type Error = ServiceError;

    fn try_from(query: CallbackQuery) -> Result<Self, Self::Error> {
        let payment_key = query
            .payment_key
            .ok_or_else(|| ServiceError::ValidationError("paymentKey is required".to_string()))?;
        let order_id = query
            .order_id
            .ok_or_else(|| ServiceError::ValidationError("orderId is required".to_string()))?;
        let raw_amount = query
            .amount
            .ok_or_else(|| ServiceError::ValidationError("amount is required".to_string()))?;
        let amount = Decimal::from_str(raw_amount.trim()).map_err(|_| {
            ServiceError::ValidationError(format!("amount '{}' is not a number", raw_amount))
        })?;

        Ok(PaymentProof::new(payment_key, order_id, amount))
    }
}

fn status_for(outcome: &PollOutcome) -> StatusCode {
    match outcome {
        PollOutcome::Settled { .. } | PollOutcome::Delayed { .. } => StatusCode::OK,
        PollOutcome::Failed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PollOutcome::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// GET /payments/callback?paymentKey=&orderId=&amount=
pub async fn payment_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let proof = PaymentProof::try_from(query)?;
    let cancel = state.shutdown.child_token();

    let outcome = state.poller.run(&proof, &cancel).await;
    info!(order_id = %proof.order_id, outcome = ?outcome, "Payment callback handled");

    Ok((status_for(&outcome), Json(outcome)))
}

// POST /drafts
pub async fn save_draft(
    State(state): State<AppState>,
    Json(draft): Json<SettlementDraft>,
) -> Result<impl IntoResponse, ServiceError> {
    let order_id = draft.order_id.clone();
    state.drafts.save(draft).await?;
    info!(%order_id, "Settlement draft stored");

    Ok((StatusCode::CREATED, Json(json!({ "orderId": order_id }))))
}

// GET /health
pub async fn health() -> &'static str {
    "ok"
}
