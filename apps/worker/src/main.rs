//! Passage expiration sweep runtime.

#![forbid(unsafe_code)]

mod config;

use std::sync::Arc;

use chrono::Utc;
use passage_application::{
    AccessRequestRepository, AccessRequestService, AuditSink, CredentialResolver,
    ExpirationSweep, FanoutOrchestrator, UserProfileRepository,
};
use passage_core::{AppError, AppResult};
use passage_infrastructure::{
    MockProviderFactory, PostgresAccessRequestRepository, PostgresAuditSink,
    PostgresUserProfileRepository, StaticCredentialResolver, TracingAuditSink,
    builtin_provider_registry, load_credentials, load_role_catalog,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AuditSinkKind, WorkerConfig};

struct Stores {
    requests: Arc<dyn AccessRequestRepository>,
    profiles: Arc<dyn UserProfileRepository>,
    audit_sink: Arc<dyn AuditSink>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_and_migrate(config.database_url.as_str()).await?;
    let stores = build_stores(pool, config.audit_sink);

    let catalog = Arc::new(load_role_catalog(&config.catalog_path)?);
    let credentials: Arc<dyn CredentialResolver> = match &config.credentials_path {
        Some(path) => Arc::new(load_credentials(path)?),
        None => Arc::new(StaticCredentialResolver::new(Vec::new())),
    };
    let registry = builtin_provider_registry(
        credentials,
        config.provider_timeout,
        MockProviderFactory::new(),
    )?;

    let shutdown = CancellationToken::new();
    let fanout = FanoutOrchestrator::new(Arc::new(registry))
        .with_max_concurrency(config.fanout_max_concurrency);
    let service = AccessRequestService::new(
        stores.requests,
        stores.profiles,
        catalog.clone(),
        fanout,
        stores.audit_sink,
    )
    .with_cancellation(shutdown.child_token());
    let sweep = ExpirationSweep::new(service, config.sweep_principal.as_str());

    info!(
        roles = catalog.roles().len(),
        sweep_interval_seconds = config.sweep_interval.as_secs(),
        fanout_max_concurrency = config.fanout_max_concurrency,
        sweep_principal = %config.sweep_principal,
        "passage-worker started"
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error = %error, "failed to listen for shutdown signal");
        }
        info!("shutdown requested");
        signal_token.cancel();
    });

    let mut interval = tokio::time::interval(config.sweep_interval);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        match sweep.run_once(Utc::now()).await {
            Ok(report) if report.expired > 0 || report.failed > 0 => {
                info!(
                    examined = report.examined,
                    expired = report.expired,
                    partially_failed = report.partially_failed,
                    failed = report.failed,
                    "expiration sweep finished"
                );
            }
            Ok(_) => {}
            Err(error) => {
                warn!(error = %error, "expiration sweep failed");
            }
        }
    }

    info!("passage-worker stopped");
    Ok(())
}

fn build_stores(pool: PgPool, audit_sink: AuditSinkKind) -> Stores {
    Stores {
        requests: Arc::new(PostgresAccessRequestRepository::new(pool.clone())),
        profiles: Arc::new(PostgresUserProfileRepository::new(pool.clone())),
        audit_sink: match audit_sink {
            AuditSinkKind::Database => Arc::new(PostgresAuditSink::new(pool)),
            AuditSinkKind::Console => Arc::new(TracingAuditSink::new()),
        },
    }
}

async fn connect_and_migrate(database_url: &str) -> AppResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))?;

    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    Ok(pool)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
