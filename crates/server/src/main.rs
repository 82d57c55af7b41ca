use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{State, WebSocketUpgrade},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use coordinator::Coordinator;
use executor::SimExecutor;
use shared::{
    domain::SessionId,
    error::EventError,
    protocol::{ClientRequest, ServerEvent},
};
use storage::FavoritesStore;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

mod config;

use config::load_settings;

#[derive(Clone)]
struct AppState {
    coordinator: Coordinator,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let favorites = FavoritesStore::open(&settings.favorites_path)
        .await
        .map_err(|error| {
            error!(
                path = %settings.favorites_path,
                %error,
                "failed to open favorites store; verify the directory exists and is writable"
            );
            error
        })?;
    let executor = Arc::new(SimExecutor::with_timing(
        Duration::from_millis(settings.feedback_tick_ms),
        settings.time_scale,
    ));
    let (events, _) = broadcast::channel(256);
    let coordinator = Coordinator::new(executor, favorites, events);

    let app = build_router(Arc::new(AppState { coordinator }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/poses/export", get(export_poses))
        .route("/poses/import", post(import_poses))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn export_poses(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state.coordinator.export_poses().await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
}

async fn import_poses(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<EventError>)> {
    let imported = state
        .coordinator
        .import_poses(&body)
        .await
        .map_err(|error| (StatusCode::BAD_REQUEST, Json(error.into())))?;
    Ok(Json(serde_json::json!({ "imported": imported })))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let session_id = SessionId::new();
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before snapshotting so nothing lands in the gap between the
    // snapshot and the first bus event.
    let mut events_rx = state.coordinator.subscribe();
    let snapshot = state.coordinator.snapshot().await;
    let poses = state.coordinator.pose_list().await;
    info!(%session_id, "session connected");

    let initial = [
        ServerEvent::JointPositions(snapshot.positions),
        ServerEvent::RobotStatus {
            is_moving: snapshot.is_moving,
        },
        ServerEvent::PoseList { poses },
    ];
    for event in initial {
        let Ok(text) = serde_json::to_string(&event) else {
            continue;
        };
        if sender.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    let send_task = tokio::spawn(async move {
        loop {
            let outbound = match events_rx.recv().await {
                Ok(outbound) => outbound,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%session_id, skipped, "session fell behind the event bus");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if !outbound.delivers_to(session_id) {
                continue;
            }
            let text = match serde_json::to_string(&outbound.event) {
                Ok(text) => text,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        if let Message::Text(text) = message {
            match serde_json::from_str::<ClientRequest>(&text) {
                Ok(request) => state.coordinator.handle(session_id, request).await,
                Err(parse_error) => {
                    debug!(%session_id, %parse_error, "ignoring unparseable client frame");
                }
            }
        }
    }

    info!(%session_id, "session disconnected");
    send_task.abort();
}
