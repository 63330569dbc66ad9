//! PostgreSQL connections for the bounded pool.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use service_core::pool::{ManageConnection, Pool, PoolConfig, PoolError};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::str::FromStr;
use std::time::Duration;

use crate::config::DatabaseConfig;

pub type DbPool = Pool<PgConnectionManager>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens `PgConnection`s and probes them with `SELECT 1`.
#[derive(Debug, Clone)]
pub struct PgConnectionManager {
    options: PgConnectOptions,
}

impl PgConnectionManager {
    pub fn new(url: &str) -> Result<Self, sqlx::Error> {
        Ok(Self {
            options: PgConnectOptions::from_str(url)?,
        })
    }
}

#[async_trait]
impl ManageConnection for PgConnectionManager {
    type Connection = PgConnection;
    type Error = sqlx::Error;

    async fn connect(&self) -> Result<PgConnection, sqlx::Error> {
        match tokio::time::timeout(CONNECT_TIMEOUT, PgConnection::connect_with(&self.options)).await
        {
            Ok(result) => result,
            Err(_) => Err(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out connecting to PostgreSQL",
            ))),
        }
    }

    async fn is_valid(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&mut *conn).await?;
        Ok(())
    }
}

/// Build the pool. No connection is opened here; the first acquire connects.
pub fn create_pool(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    let manager = PgConnectionManager::new(config.url.expose_secret())?;

    let pool = Pool::new(
        manager,
        PoolConfig {
            max_connections: config.max_connections,
            max_retries: config.acquire_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            test_on_acquire: config.test_on_acquire,
        },
    );

    tracing::info!(
        max_connections = config.max_connections,
        acquire_retries = config.acquire_retries,
        "PostgreSQL connection pool configured"
    );

    Ok(pool)
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Apply the embedded schema migrations on a pooled connection.
pub async fn run_migrations(pool: &DbPool) -> Result<(), MigrationError> {
    tracing::info!("Running database migrations...");
    let mut conn = pool.acquire().await?;
    sqlx::migrate!("./migrations").run(&mut *conn).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// Round-trip a trivial query through the pool.
pub async fn health_check(pool: &DbPool) -> Result<(), anyhow::Error> {
    let mut conn = pool.acquire().await?;
    sqlx::query("SELECT 1").execute(&mut *conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn config(url: &str) -> DatabaseConfig {
        DatabaseConfig {
            url: Secret::new(url.to_string()),
            max_connections: 3,
            acquire_retries: 1,
            initial_backoff_ms: 5,
            max_backoff_ms: 10,
            test_on_acquire: true,
        }
    }

    #[test]
    fn test_create_pool_is_lazy() {
        let pool = create_pool(&config("postgres://user:pw@localhost:1/disaster")).expect("pool");
        let stats = pool.stats();
        assert_eq!(stats.max, 3);
        assert_eq!(stats.total_created, 0);
        assert_eq!(pool.config().max_retries, 1);
    }

    #[test]
    fn test_bad_url_is_rejected() {
        assert!(create_pool(&config("not a url")).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn test_acquire_and_migrate() {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/disaster_test".to_string());
        let pool = create_pool(&config(&url)).expect("pool");
        run_migrations(&pool).await.expect("migrations");
        health_check(&pool).await.expect("health");
        assert_eq!(pool.stats().idle, 1);
    }
}
