use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    /// Root token; each triggered run gets a child of it.
    pub shutdown: CancellationToken,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/scraping", get(trigger_scraping))
        .with_state(state)
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// GET /scraping
///
/// Starts a run in the background and acknowledges immediately. The response
/// is the same whether or not a run was already in progress.
async fn trigger_scraping(State(state): State<ApiState>) -> Json<MessageResponse> {
    info!("[api] scraping triggered on demand");
    let orchestrator = Arc::clone(&state.orchestrator);
    let cancel = state.shutdown.child_token();
    tokio::spawn(async move {
        orchestrator.run(cancel).await;
    });

    Json(MessageResponse {
        message: "Scraping started",
    })
}
