use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use campus_api::middleware::require_auth;
use campus_api::state::{AppState, AppStateInner};
use campus_api::{channels, dm, messages, read_state, threads};
use campus_gateway::connection;
use campus_gateway::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campus=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("CAMPUS_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("CAMPUS_DB_PATH").unwrap_or_else(|_| "campus.db".into());
    let host = std::env::var("CAMPUS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("CAMPUS_PORT")
        .unwrap_or_else(|_| "4000".into())
        .parse()?;

    // Init database
    let db = campus_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher,
        jwt_secret,
    });

    // Routes
    let public_routes = Router::new().route("/healthz", get(healthz));

    let protected_routes = Router::new()
        .route("/dm/resolve", post(dm::resolve_dm))
        .route("/channels/create", post(channels::create_channel))
        .route("/channels/detail", post(channels::channel_detail))
        .route("/channels/archive", post(channels::archive_channel))
        .route("/channels/delete", post(channels::delete_channel))
        .route("/channels", get(channels::list_channels))
        .route("/channels/lookup", get(channels::lookup_channel))
        .route("/admin/direct-messages", get(channels::admin_direct_messages))
        .route("/messages/send", post(messages::send_message))
        .route("/messages", get(messages::list_messages))
        .route("/messages/react", post(messages::toggle_reaction))
        .route("/threads", get(threads::list_threads))
        .route("/threads/detail", post(threads::thread_detail))
        .route("/read-states", get(read_state::get_read_states))
        .route("/read-states/mark", post(read_state::mark_read))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(app_state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Campus messaging server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher.clone(), state.jwt_secret.clone())
    })
}
