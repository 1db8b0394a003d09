//! User lookups. Account management lives elsewhere; the workflow only
//! needs names for display and roles for authorization.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Database;
use crate::error::{Result, WorkflowError};
use crate::models::Role;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl Database {
    pub async fn insert_user(&self, name: &str, email: &str, role: Role) -> Result<UserRecord> {
        let user = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (id, name, email, role) VALUES ($1, $2, $3, $4)
             RETURNING id, name, email, role, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(email)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn get_user_role(&self, user_id: Uuid) -> Result<Role> {
        let role: String = sqlx::query_scalar("SELECT role FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("user {}", user_id)))?;
        role.parse()
    }
}
