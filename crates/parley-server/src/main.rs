use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::state::{AppState, AppStateInner};
use parley_api::{conversations, groups, messages, typing, users, webhook};
use parley_gateway::connection;
use parley_gateway::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let webhook_secret =
        std::env::var("PARLEY_WEBHOOK_SECRET").unwrap_or_else(|_| "whsec_ZGV2LXdlYmhvb2stc2VjcmV0".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        dispatcher: dispatcher.clone(),
        jwt_secret,
        webhook_secret,
    });

    // Routes
    let public_routes = Router::new()
        .route("/webhooks/identity", post(webhook::identity_webhook))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/users", get(users::list_users))
        .route("/users/me", get(users::me))
        .route("/users/search", get(users::search_users))
        .route("/users/me/presence", put(users::set_presence))
        .route("/conversations", post(conversations::create_conversation))
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/{conversation_id}", get(conversations::get_conversation))
        .route("/conversations/{conversation_id}/messages", get(messages::list_conversation_messages))
        .route("/conversations/{conversation_id}/messages", post(messages::send_conversation_message))
        .route("/conversations/{conversation_id}/read", post(messages::mark_conversation_read))
        .route("/conversations/{conversation_id}/typing", put(typing::set_conversation_typing))
        .route("/conversations/{conversation_id}/typing", get(typing::get_conversation_typing))
        .route("/groups", post(groups::create_group))
        .route("/groups", get(groups::list_groups))
        .route("/groups/{group_id}", get(groups::get_group))
        .route("/groups/{group_id}/messages", get(messages::list_group_messages))
        .route("/groups/{group_id}/messages", post(messages::send_group_message))
        .route("/groups/{group_id}/read", post(messages::mark_group_read))
        .route("/groups/{group_id}/typing", put(typing::set_group_typing))
        .route("/groups/{group_id}/typing", get(typing::get_group_typing))
        .route("/messages/{message_id}", delete(messages::delete_message))
        .route("/messages/{message_id}/reactions", post(messages::toggle_reaction))
        .layer(middleware::from_fn_with_state(state.clone(), parley_api::middleware::require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}
