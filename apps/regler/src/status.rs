use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::compression::CompressionLayer;
use tracing::info;

use crate::control_loop::LinkState;

/// What the status endpoint can see. Written only by the control loop,
/// after each publication and on every link change.
#[derive(Debug, Default, Clone, Serialize)]
pub struct StatusView {
    pub link: LinkState,
    pub snapshot: Option<serde_json::Value>,
}

pub type SharedStatus = Arc<RwLock<StatusView>>;

pub fn router(view: SharedStatus) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/health", get(health))
        .layer(CompressionLayer::new())
        .with_state(view)
}

pub async fn serve(listener: TcpListener, view: SharedStatus) -> std::io::Result<()> {
    info!("status server on http://{}", listener.local_addr()?);
    axum::serve(listener, router(view)).await
}

async fn get_status(State(view): State<SharedStatus>) -> Response {
    match &view.read().await.snapshot {
        Some(snapshot) => Json(snapshot.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no state published yet" })),
        )
            .into_response(),
    }
}

async fn health(State(view): State<SharedStatus>) -> Json<serde_json::Value> {
    let link = view.read().await.link;
    Json(serde_json::json!({
        "connected": link == LinkState::Running,
        "link": link,
    }))
}
