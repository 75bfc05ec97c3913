use std::sync::Arc;

use clap::Parser;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use objguard_admin::cli::{Cli, Command};
use objguard_admin::commands::run_command;
use objguard_admin::config::{AppConfig, LogFormat};
use objguard_core::PermissionEngine;
use objguard_remote::RemoteUserClient;
use objguard_storage::postgres::migrations;
use objguard_storage::{InMemoryDirectory, PostgresStore};

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output on stdout stays pipeable.
    match config.log.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr);
            registry.with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr);
            registry.with(fmt_layer).init();
        }
    }
}

async fn connect(config: &AppConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&config);

    match cli.command {
        Command::Migrate => run_migrate(&config).await,
        Command::FetchUser { id } => run_fetch_user(&config, &id).await,
        command => run_engine(&config, &command).await,
    }
}

async fn run_migrate(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(namespace = %config.database.namespace, "running migrations");
    let pool = connect(config).await?;
    migrations::create_namespace(&pool, &config.database.namespace).await?;
    println!("namespace '{}' is up to date", config.database.namespace);
    Ok(())
}

async fn run_fetch_user(config: &AppConfig, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = RemoteUserClient::new(config.to_remote_options()?)?;
    let user = client.fetch(id).await?;
    println!("{}", serde_json::to_string_pretty(&user)?);
    Ok(())
}

async fn run_engine(
    config: &AppConfig,
    command: &Command,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = connect(config).await?;
    let store = PostgresStore::new(pool, config.database.namespace.clone())?;
    // No user directory is wired into the admin tool: every user counts as
    // an active, authenticated non-superuser with no platform groups.
    let engine = PermissionEngine::new(
        Arc::new(store),
        Arc::new(InMemoryDirectory::permissive()),
        config.to_engine_config(),
    );

    let mut stdout = std::io::stdout().lock();
    run_command(&engine, command, &mut stdout).await?;
    Ok(())
}
