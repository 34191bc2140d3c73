use anyhow::Context;
use std::sync::Arc;
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cooperative::{
    api,
    config::Settings,
    payments,
    service::ServiceContext,
    workers::{PaymentReconciler, ReconcilerSettings},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cooperative=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::new().context("failed to load configuration")?;

    tracing::info!("Starting cooperative server on {}:{}", settings.server.host, settings.server.port);

    // Initialize database
    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await?;

    // An enabled provider with incomplete credentials stops startup.
    let gateway = payments::gateway_from_config(&settings.momo)?;

    let service_context = Arc::new(ServiceContext::sqlite(
        db_pool.clone(),
        gateway,
        &settings.momo.currency,
        settings.auth.session_duration_hours,
    ));

    match service_context.auth_service.cleanup_expired_sessions().await {
        Ok(removed) if removed > 0 => tracing::info!("Removed {} expired sessions", removed),
        Ok(_) => {}
        Err(e) => tracing::warn!("Session cleanup failed: {}", e),
    }

    let shutdown = CancellationToken::new();

    let reconciler_task = if settings.reconciler.enabled {
        let reconciler = PaymentReconciler::new(
            service_context.payment_service.clone(),
            ReconcilerSettings::from(&settings.reconciler),
        );
        Some(tokio::spawn(reconciler.run(shutdown.clone())))
    } else {
        tracing::info!("Payment reconciler disabled");
        None
    };

    let app = api::create_app(service_context, Arc::new(settings.clone()));

    let listener = tokio::net::TcpListener::bind(
        format!("{}:{}", settings.server.host, settings.server.port)
    ).await?;

    tracing::info!("Server listening on http://{}:{}", settings.server.host, settings.server.port);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(task) = reconciler_task {
        let _ = task.await;
    }

    Ok(())
}
