//! # Transaction Intake API
//!
//! The coordinator's single HTTP endpoint: external clients POST form
//! data to `/newTransaction` and the resulting transaction enters the
//! mining queue through a bounded channel into the coordinator loop.
//!
//! | Method | Path              | Description                      |
//! |--------|-------------------|----------------------------------|
//! | POST   | `/newTransaction` | Queue a transaction for mining   |
//!
//! Success is a plain-text 200; any validation problem is a 400 whose
//! body is the error message.

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use cinder_protocol::transaction::Transaction;

/// Response body on success. External tooling string-matches this, so
/// it never changes.
const SUCCESS_BODY: &str = "Transaction processed successfully!";

/// Shared state for intake handlers. Cheap to clone.
#[derive(Clone)]
pub struct ApiState {
    /// Feeds the coordinator's transaction queue.
    pub intake: mpsc::Sender<Transaction>,
}

/// Form fields of a new transaction. Everything arrives as strings and
/// is validated in the handler so every failure gets a readable 400.
#[derive(Debug, Deserialize)]
pub struct NewTransactionForm {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub signature: String,
}

/// Builds the intake router.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/newTransaction", post(new_transaction_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn new_transaction_handler(
    State(state): State<ApiState>,
    Form(form): Form<NewTransactionForm>,
) -> (StatusCode, String) {
    if form.from.is_empty() || form.to.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "missing 'from' or 'to' field".to_string(),
        );
    }

    let amount: u64 = match form.amount.trim().parse() {
        Ok(amount) => amount,
        Err(_) => {
            warn!(amount = %form.amount, "rejecting transaction with bad amount");
            return (
                StatusCode::BAD_REQUEST,
                format!("invalid amount: {:?}", form.amount),
            );
        }
    };

    let mut tx = Transaction::new(form.from, form.to, amount);
    tx.signature = form.signature;

    info!(from = %tx.from, to = %tx.to, amount, "transaction received over HTTP");
    match state.intake.try_send(tx) {
        Ok(()) => (StatusCode::OK, SUCCESS_BODY.to_string()),
        Err(_) => {
            warn!("transaction queue unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "transaction queue unavailable, try again".to_string(),
            )
        }
    }
}
