//! Server setup.

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::api;
use crate::config::ServeConfig;
use crate::health;
use crate::state::AppState;

/// Build the model host router.
pub fn build_router(config: &ServeConfig) -> Router {
    let state = AppState::new(config.root.clone());
    let router = Router::new()
        .route("/health", get(health::health))
        .route("/v1/models", get(api::list_models))
        .route("/v1/models/:name", get(api::get_model))
        .nest_service("/models", ServeDir::new(&config.root))
        .with_state(state);

    if config.cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Start the server and run until it fails.
pub async fn serve(config: ServeConfig) -> anyhow::Result<()> {
    if !config.root.is_dir() {
        anyhow::bail!("model root {} is not a directory", config.root.display());
    }
    let app = build_router(&config);

    tracing::info!(
        "Serving models from {} on {}",
        config.root.display(),
        config.addr
    );

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
