pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/commands", post(handlers::handle_submit_command))
        .route("/commands/response", post(handlers::handle_command_response))
        .route("/policies", post(handlers::handle_dispatch_policy))
        .route("/policies/results", post(handlers::handle_policy_result))
        .route("/results/stream", get(handlers::handle_result_stream))
        .route("/agents/{id}/commands", get(handlers::handle_agent_commands))
        .route(
            "/agents/{id}/commands/ack",
            post(handlers::handle_agent_ack),
        )
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

/// Serve on an already bound listener until `shutdown` fires.
pub async fn serve_on(
    listener: TcpListener,
    state: ApiState,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}

pub async fn serve(
    state: ApiState,
    bind_addr: &str,
    port: u16,
    shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("{bind_addr}:{port}")).await?;
    serve_on(listener, state, shutdown).await
}
