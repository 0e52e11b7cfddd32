use std::process;

use tagstash::{
    application::error::AppError,
    cache::{CacheConfig, CacheLayer},
    config,
    infra::{cache::connect_backend, db::PostgresStore, error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        config::Command::CacheFlushAll(_) => run_flush_all(&settings).await,
        config::Command::Migrate(_) => run_migrate(&settings).await,
    }
}

async fn run_flush_all(settings: &config::Settings) -> Result<(), AppError> {
    let cache_config = CacheConfig::from_settings(settings);
    if !cache_config.backend.is_shared() {
        return Err(InfraError::configuration(
            "cache:flush-all needs a shared backend; the memory backend only lives inside each process",
        )
        .into());
    }
    let backend = connect_backend(&cache_config).await?;
    let layer = CacheLayer::new(cache_config, backend);

    layer.flush_all().await?;
    info!(
        target = "tagstash::cache",
        tag = layer.policy().global_tag(),
        "Cache flushed"
    );
    Ok(())
}

async fn run_migrate(settings: &config::Settings) -> Result<(), AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let pool = PostgresStore::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;
    PostgresStore::run_migrations(&pool)
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;

    info!(target = "tagstash::migrate", "Migrations applied");
    Ok(())
}
