use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use crate::api::handlers;
use crate::engine::CancellationService;
use crate::protocol::AgentProtocol;
use crate::storage::ElementStore;

#[derive(Clone)]
pub struct AppState {
    pub elements: Arc<dyn ElementStore>,
    pub cancellation: CancellationService,
    pub agents: AgentProtocol,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/elements", post(handlers::enqueue_element))
        .route("/elements/:id", get(handlers::get_element))
        .route(
            "/elements/:id/acknowledge",
            post(handlers::acknowledge_cancellation),
        )
        .route("/elements/:id/complete", post(handlers::complete_element))
        .route("/workflows/:name/cancel", post(handlers::request_cancellation))
        .route(
            "/workflows/:name/cancellation",
            get(handlers::get_cancellation),
        )
        .route("/agents/:agent_id/claim", post(handlers::claim_element))
        .route(
            "/agents/:agent_id/cancellations",
            get(handlers::poll_cancellations),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    log::info!("cancelq API listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;
    Ok(())
}
