//! Tandem 시그널링 서버

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tandem_signaling::config::Config;
use tandem_signaling::error::CallError;
use tandem_signaling::handlers;
use tandem_signaling::protocol::{ClientMessage, ServerMessage};
use tandem_signaling::state::AppState;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    // 로깅 초기화
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = Arc::new(AppState::new(config.clone()));

    // 쿨다운/유휴 사용자 정리
    let sweep_state = state.clone();
    let sweep_interval = config.presence.sweep_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            handlers::sweep(&sweep_state);
        }
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/moderation/ban/:user_id", post(ban_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&config.cors_origins)),
        )
        .with_state(state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Tandem signaling server started");
    tracing::info!("Address: {}", addr);
    tracing::info!("WebSocket: ws://{}/ws?user_id=<id>", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

async fn index_handler() -> Html<&'static str> {
    Html("<h1>Tandem Signaling Server</h1><p>WebSocket endpoint: /ws?user_id=&lt;id&gt;</p>")
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "server": "tandem-signaling-rs",
        "online": state.presence.online_count(),
        "invites": state.invites.waiting_count(),
        "rooms": state.rooms.len(),
        "timestamp": std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }))
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    user_id: String,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user_id = params.user_id.trim().to_string();
    if user_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "user_id is required").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn ban_handler(
    Path(user_id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let provided = headers
        .get("x-admin-token")
        .and_then(|value| value.to_str().ok());
    if provided != Some(expected) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let room_ended = handlers::force_terminate(&state, &user_id).await;
    Json(serde_json::json!({ "userId": user_id, "roomEnded": room_ended })).into_response()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // 연결 처리
    let handlers::Connection {
        connection_id,
        closed,
    } = handlers::handle_connection(state.clone(), &user_id, tx.clone()).await;

    // 송신 태스크
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(err) => tracing::error!(error = %err, "Failed to encode server message"),
            }
        }
    });

    // 대기열 변화 구독
    let delta_task = tokio::spawn(handlers::forward_deltas(
        state.clone(),
        user_id.clone(),
        tx.clone(),
    ));

    // 수신 처리
    loop {
        let result = tokio::select! {
            // 새 연결로 교체됨
            _ = closed.cancelled() => break,
            next = ws_receiver.next() => match next {
                Some(result) => result,
                None => break,
            },
        };
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handlers::dispatch(&state, &user_id, &tx, msg).await,
                Err(err) => {
                    tracing::debug!(user_id = %user_id, error = %err, "Malformed client message");
                    let _ = tx.send(ServerMessage::error(&CallError::BadRequest(err.to_string())));
                }
            },
            Ok(Message::Close(_)) => break,
            Err(err) => {
                tracing::debug!(user_id = %user_id, error = %err, "WebSocket receive failed");
                break;
            }
            _ => {}
        }
    }

    // 연결 해제
    handlers::handle_disconnect(state, &user_id, &connection_id).await;
    delta_task.abort();
    drop(tx);

    // 남은 메시지(`superseded` 등)를 내보낼 시간을 잠깐 준다
    let send_abort = send_task.abort_handle();
    if tokio::time::timeout(SEND_DRAIN_TIMEOUT, send_task).await.is_err() {
        send_abort.abort();
    }
}
