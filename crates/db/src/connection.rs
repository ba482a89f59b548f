use std::time::Duration;

use payflow_core::config::DatabaseConfig;
use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

/// Open a pool sized per the `[database]` config section. Every
/// connection gets the same pragma set: the repositories rely on
/// foreign keys for history/approver cascades, and WAL keeps the
/// scheduler's sweep writes from blocking queue reads.
pub async fn connect(settings: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(settings.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(settings.timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                for pragma in [
                    "PRAGMA foreign_keys = ON",
                    "PRAGMA journal_mode = WAL",
                    "PRAGMA synchronous = NORMAL",
                    "PRAGMA busy_timeout = 5000",
                ] {
                    sqlx::query(pragma).execute(&mut *conn).await?;
                }
                Ok(())
            })
        })
        .connect(&settings.url)
        .await
}

/// Single-connection in-memory database. Used by tests and one-off
/// tooling; the single connection keeps the `:memory:` schema alive for
/// the pool's lifetime.
pub async fn connect_ephemeral() -> Result<DbPool, sqlx::Error> {
    connect(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        timeout_secs: 30,
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::connect_ephemeral;

    #[tokio::test]
    async fn connections_enforce_foreign_keys() {
        let pool = connect_ephemeral().await.expect("connect");
        let (enabled,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("pragma query");
        assert_eq!(enabled, 1);
        pool.close().await;
    }
}
