mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put},
};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use civicfix_api::middleware::{decode_identity, require_auth};
use civicfix_api::state::{AppState, AppStateInner};
use civicfix_api::{issues, notifications, users, votes};
use civicfix_db::Database;
use civicfix_gateway::connection;
use civicfix_gateway::dispatcher::Dispatcher;
use civicfix_types::models::Identity;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "civicfix=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    let db = Database::open(&config.db_path)?;
    info!("Database ready at {}", config.db_path.display());

    let dispatcher = Dispatcher::with_buffer(config.ws_buffer);
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher: dispatcher.clone(),
        jwt_secret: config.jwt_secret.clone(),
    });

    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/issues", get(issues::list_issues_handler))
        .route("/issues/{issue_id}", get(issues::get_issue_handler))
        .route("/issues/{issue_id}/votes", get(votes::vote_count_handler))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/issues", post(issues::create_issue_handler))
        .route(
            "/issues/{issue_id}",
            put(issues::update_issue_handler).delete(issues::delete_issue_handler),
        )
        .route("/issues/{issue_id}/vote", post(votes::toggle_vote_handler))
        .route("/user/issues", get(issues::list_user_issues_handler))
        .route("/user/stats", get(users::user_stats_handler))
        .route("/admin/dashboard", get(issues::admin_dashboard_handler))
        .route("/admin/issues", get(issues::list_district_issues_handler))
        .route("/admin/issues/{issue_id}", get(issues::issue_details_handler))
        .route("/admin/issues/{issue_id}/status", patch(issues::transition_handler))
        .route("/notifications", get(notifications::list_notifications_handler))
        .route(
            "/notifications/{notification_id}/read",
            patch(notifications::mark_read_handler),
        )
        .route("/account", delete(users::delete_account_handler))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(app_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("CivicFix server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Closing every outbound buffer ends the upgraded sockets too.
            dispatcher.shutdown().await;
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct GatewayParams {
    token: Option<String>,
}

/// The socket is only upgraded for a caller whose token decodes.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<GatewayParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity: Option<Identity> = params
        .token
        .as_deref()
        .and_then(|token| decode_identity(&state.jwt_secret, token));

    let Some(identity) = identity else {
        warn!("Gateway upgrade refused: missing or invalid token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let dispatcher = state.dispatcher.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, identity))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
