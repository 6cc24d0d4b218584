use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware as axum_middleware, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod middleware;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use services::{git::GitCli, storage::CheckoutStore, sync::SyncService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gitran_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env();

    let db = db::Database::connect(&config.database_url).await?;
    db.run_migrations().await?;

    // Checkouts are scratch space; anything left from a previous run is junk
    let store = CheckoutStore::new(&config.storage_path);
    store.init().await?;

    let sync = SyncService::new(
        db.pool.clone(),
        Arc::new(GitCli::new(config.git_bin.clone())),
        store,
        config.sync.clone(),
    );

    // Runs that were in flight when the last process died never finish
    let recovered = services::sync::recover_stale(&db.pool, chrono::Utc::now()).await?;
    if recovered > 0 {
        tracing::warn!(count = recovered, "reset syncs interrupted by restart");
    }
    sync.spawn_scheduler();

    let state = AppState {
        db,
        config: config.clone(),
        sync: sync.clone(),
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("waiting for running syncs to stop");
    sync.shutdown().await;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let api_router = Router::new()
        .nest("/auth", routes::auth::router())
        .nest("/languages", routes::languages::router())
        .nest("/users", routes::users::router())
        .nest("/orgs", routes::orgs::router())
        .nest("/projects", routes::projects::router())
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_router)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn health_check() -> &'static str {
    "OK"
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

#[derive(Clone)]
pub struct AppState {
    pub db: db::Database,
    pub config: config::Config,
    pub sync: SyncService,
}
