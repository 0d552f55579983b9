//! sqlgate - Main entry point.
//!
//! Runs one statement, as an update, a query or a batch, through a pooled
//! statement gateway and prints the outcome as JSON.

use clap::Parser;
use serde_json::{Value, json};
use sqlgate::config::Config;
use sqlgate::db::{Gateway, ParamBinder, SqlxPool};
use sqlgate::error::{DbError, DbResult};
use sqlgate::models::SqlValue;
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout carries only results.
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Read a JSON array of rows, each row a JSON array of values.
fn read_batch_file(path: &Path) -> DbResult<Vec<ParamBinder>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DbError::invalid_input(format!("Cannot read batch file {}: {}", path.display(), e))
    })?;
    let rows: Vec<Vec<Value>> = serde_json::from_str(&content).map_err(|e| {
        DbError::invalid_input(format!(
            "Batch file must hold a JSON array of arrays: {}",
            e
        ))
    })?;

    Ok(rows
        .into_iter()
        .map(|row| row.into_iter().map(SqlValue::from_json).collect())
        .collect())
}

async fn run(config: &Config, gateway: &Gateway<SqlxPool>) -> DbResult<()> {
    let params: ParamBinder = config
        .parse_params()
        .into_iter()
        .map(SqlValue::from_json)
        .collect();

    if let Some(path) = &config.batch_file {
        let mut batch = gateway.batch(&config.sql);
        for row in read_batch_file(path)? {
            batch.push_row(row)?;
        }
        let counts = batch.execute_batch().await?;
        println!("{}", json!({ "row_counts": counts }));
    } else if config.query {
        let cursor = gateway
            .query(&config.sql)
            .with_params(params)
            .execute_query()
            .await?;
        let truncated = cursor.has_more();
        for row in cursor.collect_rows() {
            println!("{}", Value::Object(row.to_json_map()));
        }
        if truncated {
            warn!(max_rows = ?config.max_rows, "Result truncated at row limit");
        }
    } else {
        let rows_affected = gateway
            .query(&config.sql)
            .with_params(params)
            .execute_update()
            .await?;
        println!("{}", json!({ "rows_affected": rows_affected }));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    let db_config = config.database_config()?;
    info!(
        release_policy = %db_config.release_policy,
        "Starting sqlgate v{}",
        env!("CARGO_PKG_VERSION")
    );

    let pool = SqlxPool::connect(&db_config).await?;
    let gateway =
        Gateway::with_policy(pool, db_config.release_policy).with_max_rows(config.max_rows);

    let result = run(&config, &gateway).await;

    let stats = gateway.pool().stats();
    info!(
        acquired = stats.acquired(),
        released = stats.released(),
        evicted = stats.evicted(),
        "Connection usage"
    );
    gateway.pool().close().await;

    if let Err(e) = result {
        error!(error = %e, suggestion = ?e.suggestion(), "Execution failed");
        return Err(e.into());
    }
    Ok(())
}
