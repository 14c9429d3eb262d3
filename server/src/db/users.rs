//! Local login identities, keyed by an id that is also the suffix of the user's
//! `usr_<id>` realm.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

pub async fn create_user(pool: &DbPool, username: &str, password_hash: &str) -> anyhow::Result<User> {
    let id = Uuid::new_v4().simple().to_string();
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (id, username, password_hash) VALUES ($1, $2, $3)
         RETURNING id, username, password_hash, created_at",
    )
    .bind(&id)
    .bind(username)
    .bind(password_hash)
    .fetch_one(pool)
    .await?;

    Ok(user)
}

pub async fn get_user_by_username(pool: &DbPool, username: &str) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, created_at FROM users WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}
