use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use shared::AppRole;
use sqlx::Row;

use crate::storage::connection::DbConnection;
use crate::storage::traits::{AuthenticatedUser, SessionStorage};

/// Bearer tokens and the identity they resolve to
#[derive(Clone)]
pub struct SessionRepository {
    db: DbConnection,
}

impl SessionRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStorage for SessionRepository {
    async fn store_session(&self, access_token: &str, user: &AuthenticatedUser) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (access_token, user_id, role)
            VALUES (?, ?, ?)
            ON CONFLICT (access_token) DO UPDATE SET
                user_id = excluded.user_id,
                role = excluded.role
            "#,
        )
        .bind(access_token)
        .bind(&user.user_id)
        .bind(user.role.as_str())
        .execute(self.db.pool())
        .await?;

        debug!("Stored session for user {}", user.user_id);
        Ok(())
    }

    async fn find_session(&self, access_token: &str) -> Result<Option<AuthenticatedUser>> {
        let row = sqlx::query("SELECT user_id, role FROM sessions WHERE access_token = ?")
            .bind(access_token)
            .fetch_optional(self.db.pool())
            .await?;

        let Some(r) = row else {
            return Ok(None);
        };

        let user_id: String = r.get("user_id");
        match r.get::<String, _>("role").parse::<AppRole>() {
            Ok(role) => Ok(Some(AuthenticatedUser { user_id, role })),
            Err(e) => {
                warn!("Ignoring session for {} with bad role: {}", user_id, e);
                Ok(None)
            }
        }
    }

    async fn delete_session(&self, access_token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE access_token = ?")
            .bind(access_token)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
