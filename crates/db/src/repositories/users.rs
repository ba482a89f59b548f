use sqlx::Row;

use payflow_core::stages::scope::Actor;

use super::{RepositoryError, UserDirectory};
use crate::DbPool;

pub struct SqlUserDirectory {
    pool: DbPool,
}

impl SqlUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn find_actor(&self, user_ref: &str) -> Result<Option<Actor>, RepositoryError> {
        let row = sqlx::query("SELECT user_ref, department, role FROM users WHERE user_ref = ?")
            .bind(user_ref)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };
        let user_ref: String =
            row.try_get("user_ref").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let department: String =
            row.try_get("department").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let role: String =
            row.try_get("role").map_err(|e| RepositoryError::Decode(e.to_string()))?;

        Ok(Some(Actor { user_ref, department, role }))
    }

    async fn upsert_actor(&self, actor: &Actor, name: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO users (user_ref, name, department, role) VALUES (?, ?, ?, ?)
             ON CONFLICT(user_ref) DO UPDATE SET
                 name = excluded.name,
                 department = excluded.department,
                 role = excluded.role",
        )
        .bind(&actor.user_ref)
        .bind(name)
        .bind(&actor.department)
        .bind(&actor.role)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
