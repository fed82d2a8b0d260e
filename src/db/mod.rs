pub mod models;
pub mod repository;

use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::info;

use crate::config;

/// Builds the shared connection pool. Sized to absorb probe bursts without
/// starving the incident transactions; the statement cache is disabled so
/// thousands of task fibers do not churn prepared statements.
pub async fn init_pool() -> Result<PgPool, sqlx::Error> {
    let options = PgConnectOptions::from_str(&config::get().database_url())?
        .statement_cache_capacity(0);

    let pool = PgPoolOptions::new()
        .min_connections(5)
        .max_connections(25)
        .connect_with(options)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    info!("database initialized");

    Ok(pool)
}
