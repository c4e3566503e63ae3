/// HTTP API for collaborators that would rather poll than hold a socket.
///
///   GET  /captions        current caption text (text/plain)
///   GET  /state           full `CaptionState` as JSON
///   POST /captions/clear  empty the caption window
///   POST /reconnect       drop the link and connect again
///   PUT  /config          replace the encoder session (JSON `EncoderConfig`)
///
/// Every mutating route is forwarded to the SessionCore as a `Command`.
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use caption_proto::config::EncoderConfig;
use caption_proto::protocol::Command;
use caption_proto::state::StateManager;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::core::SessionEvent;

#[derive(Clone)]
pub struct ApiState {
    pub state_manager: Arc<StateManager>,
    pub event_tx: mpsc::Sender<SessionEvent>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/captions", get(get_captions))
        .route("/captions/clear", post(clear_captions))
        .route("/state", get(get_state))
        .route("/reconnect", post(reconnect))
        .route("/config", put(configure))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_captions(State(state): State<ApiState>) -> String {
    state.state_manager.captions().await
}

async fn get_state(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.state_manager.get_state().await)
}

async fn clear_captions(State(state): State<ApiState>) -> Response {
    forward(&state, Command::ClearCaptions).await
}

async fn reconnect(State(state): State<ApiState>) -> Response {
    forward(&state, Command::Reconnect).await
}

async fn configure(State(state): State<ApiState>, Json(encoder): Json<EncoderConfig>) -> Response {
    forward(&state, Command::Configure { encoder }).await
}

async fn forward(state: &ApiState, cmd: Command) -> Response {
    info!("http: command {:?}", cmd);
    match state.event_tx.send(SessionEvent::ClientCommand(cmd)).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(_) => {
            warn!("http: SessionEvent channel closed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<SessionEvent>,
) -> tokio::task::JoinHandle<()> {
    let app = router(ApiState {
        state_manager,
        event_tx,
    });

    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        info!("HTTP API listening on http://{}", addr);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!("Failed to bind HTTP API on {}: {}", addr, e);
                return;
            }
        };
        if let Err(e) = axum::serve(listener, app).await {
            warn!("HTTP API error: {}", e);
        }
    })
}
