use sqlx::Row;

use super::{CounterRepository, RepositoryError};
use crate::DbPool;

/// Per-key monotonic counters backing human-readable code generation.
pub struct SqlCounterRepository {
    pool: DbPool,
}

impl SqlCounterRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CounterRepository for SqlCounterRepository {
    async fn next(&self, counter_key: &str) -> Result<u64, RepositoryError> {
        let row = sqlx::query(
            "INSERT INTO code_counters (counter_key, value) VALUES (?, 1)
             ON CONFLICT(counter_key) DO UPDATE SET value = value + 1
             RETURNING value",
        )
        .bind(counter_key)
        .fetch_one(&self.pool)
        .await?;

        let value: i64 =
            row.try_get("value").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        Ok(value as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::SqlCounterRepository;
    use crate::repositories::CounterRepository;
    use crate::{connect_ephemeral, migrations};

    #[tokio::test]
    async fn counters_are_monotonic_and_keyed() {
        let pool = connect_ephemeral().await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        let repo = SqlCounterRepository::new(pool);

        assert_eq!(repo.next("approval:u-1").await.expect("first"), 1);
        assert_eq!(repo.next("approval:u-1").await.expect("second"), 2);
        assert_eq!(repo.next("approval:u-2").await.expect("other key"), 1);
        assert_eq!(repo.next("request:u-1").await.expect("other family"), 1);
    }
}
