//! Lightweight commit records: "this root is notable" markers independent of any named
//! depot pointer. Grounded on the same `db/containers.rs` create-then-seal lifecycle as
//! depots, but with no mutable pointer or history — a commit record never changes once
//! created, only its optional title may be edited.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use tangled_common::realm::Realm;

use crate::db::DbPool;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub id: String,
    pub root: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

pub struct CommitRegistry<'a> {
    pool: &'a DbPool,
}

impl<'a> CommitRegistry<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Keyed on `(realm, root)`: recording the same root again updates the existing entry
    /// in place (new title, new recorder) rather than accumulating duplicates.
    pub async fn create(
        &self,
        realm: &Realm,
        root: &str,
        created_by: &str,
        title: Option<String>,
    ) -> Result<CommitRecord, AppError> {
        let id = Uuid::new_v4().simple().to_string();
        let row: (String, Option<String>, DateTime<Utc>, String) = sqlx::query_as(
            "INSERT INTO commits (id, realm, root, message, created_at, created_by)
             VALUES ($1, $2, $3, $4, now(), $5)
             ON CONFLICT (realm, root) DO UPDATE SET message = EXCLUDED.message, created_by = EXCLUDED.created_by
             RETURNING id, message, created_at, created_by",
        )
        .bind(&id)
        .bind(realm.as_str())
        .bind(root)
        .bind(&title)
        .bind(created_by)
        .fetch_one(self.pool)
        .await?;

        Ok(CommitRecord {
            id: row.0,
            root: root.to_string(),
            title: row.1,
            created_at: row.2,
            created_by: row.3,
        })
    }

    pub async fn get(&self, realm: &Realm, root: &str) -> Result<Option<CommitRecord>, AppError> {
        let row: Option<(String, Option<String>, DateTime<Utc>, String)> = sqlx::query_as(
            "SELECT id, message, created_at, created_by FROM commits WHERE realm = $1 AND root = $2",
        )
        .bind(realm.as_str())
        .bind(root)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(|(id, title, created_at, created_by)| CommitRecord {
            id,
            root: root.to_string(),
            title,
            created_at,
            created_by,
        }))
    }

    pub async fn list(&self, realm: &Realm, limit: i64) -> Result<Vec<CommitRecord>, AppError> {
        let rows: Vec<(String, String, Option<String>, DateTime<Utc>, String)> = sqlx::query_as(
            "SELECT id, root, message, created_at, created_by FROM commits
             WHERE realm = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(realm.as_str())
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, root, title, created_at, created_by)| CommitRecord {
                id,
                root,
                title,
                created_at,
                created_by,
            })
            .collect())
    }

    pub async fn update_title(&self, realm: &Realm, root: &str, title: Option<String>) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE commits SET message = $1 WHERE realm = $2 AND root = $3")
            .bind(&title)
            .bind(realm.as_str())
            .bind(root)
            .execute(self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("no commit record for root {root}")));
        }
        Ok(())
    }

    pub async fn delete(&self, realm: &Realm, root: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM commits WHERE realm = $1 AND root = $2")
            .bind(realm.as_str())
            .bind(root)
            .execute(self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("no commit record for root {root}")));
        }
        Ok(())
    }
}
