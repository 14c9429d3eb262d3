//! Ownership index: the sole source of truth for "may this realm see this key".

use chrono::{DateTime, Utc};
use tangled_common::realm::Realm;

use crate::db::DbPool;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct OwnershipRecord {
    pub realm: String,
    pub key: String,
    pub content_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct CheckOwnershipResult {
    pub found: Vec<String>,
    pub missing: Vec<String>,
}

pub struct ListNodesResult {
    pub nodes: Vec<OwnershipRecord>,
    pub next_cursor: Option<String>,
    pub total: i64,
}

#[async_trait::async_trait]
pub trait OwnershipIndex: Send + Sync {
    async fn has_ownership(&self, realm: &Realm, key: &str) -> Result<bool, AppError>;
    async fn check_ownership(&self, realm: &Realm, keys: &[String]) -> Result<CheckOwnershipResult, AppError>;
    async fn add_ownership(
        &self,
        realm: &Realm,
        key: &str,
        issuer_token_id: &str,
        content_type: &str,
        size: u64,
    ) -> Result<OwnershipRecord, AppError>;
    async fn list_nodes(
        &self,
        realm: &Realm,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<ListNodesResult, AppError>;
}

pub struct PgOwnershipIndex<'a> {
    pool: &'a DbPool,
}

impl<'a> PgOwnershipIndex<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl<'a> OwnershipIndex for PgOwnershipIndex<'a> {
    async fn has_ownership(&self, realm: &Realm, key: &str) -> Result<bool, AppError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM ownership WHERE realm = $1 AND key = $2")
            .bind(realm.as_str())
            .bind(key)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn check_ownership(&self, realm: &Realm, keys: &[String]) -> Result<CheckOwnershipResult, AppError> {
        if keys.is_empty() {
            return Ok(CheckOwnershipResult {
                found: vec![],
                missing: vec![],
            });
        }

        let owned: Vec<(String,)> =
            sqlx::query_as("SELECT key FROM ownership WHERE realm = $1 AND key = ANY($2)")
                .bind(realm.as_str())
                .bind(keys)
                .fetch_all(self.pool)
                .await?;
        let found: std::collections::BTreeSet<String> = owned.into_iter().map(|(k,)| k).collect();

        let mut missing = Vec::new();
        let mut found_list = Vec::new();
        for key in keys {
            if found.contains(key) {
                found_list.push(key.clone());
            } else {
                missing.push(key.clone());
            }
        }

        Ok(CheckOwnershipResult {
            found: found_list,
            missing,
        })
    }

    async fn add_ownership(
        &self,
        realm: &Realm,
        key: &str,
        issuer_token_id: &str,
        content_type: &str,
        size: u64,
    ) -> Result<OwnershipRecord, AppError> {
        let row: (String, String, String, i64, DateTime<Utc>, String) = sqlx::query_as(
            "INSERT INTO ownership (realm, key, content_type, size, created_by)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (realm, key) DO UPDATE SET realm = ownership.realm
             RETURNING realm, key, content_type, size, created_at, created_by",
        )
        .bind(realm.as_str())
        .bind(key)
        .bind(content_type)
        .bind(size as i64)
        .bind(issuer_token_id)
        .fetch_one(self.pool)
        .await?;

        Ok(OwnershipRecord {
            realm: row.0,
            key: row.1,
            content_type: row.2,
            size: row.3 as u64,
            created_at: row.4,
            created_by: row.5,
        })
    }

    async fn list_nodes(
        &self,
        realm: &Realm,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<ListNodesResult, AppError> {
        let rows: Vec<(String, String, String, i64, DateTime<Utc>, String)> = if let Some(cursor_key) = cursor {
            // The cursor is a key (spec contract), but the listing order is (created_at, key);
            // resolve the cursor row's created_at first so the continuation compares the full
            // ordering tuple instead of drifting against the hash-ordered key alone.
            sqlx::query_as(
                "WITH cursor_row AS (
                     SELECT created_at, key FROM ownership WHERE realm = $1 AND key = $2
                 )
                 SELECT o.realm, o.key, o.content_type, o.size, o.created_at, o.created_by
                 FROM ownership o, cursor_row c
                 WHERE o.realm = $1 AND (o.created_at, o.key) < (c.created_at, c.key)
                 ORDER BY o.created_at DESC, o.key DESC
                 LIMIT $3",
            )
            .bind(realm.as_str())
            .bind(cursor_key)
            .bind(limit + 1)
            .fetch_all(self.pool)
            .await?
        } else {
            sqlx::query_as(
                "SELECT realm, key, content_type, size, created_at, created_by FROM ownership
                 WHERE realm = $1
                 ORDER BY created_at DESC, key DESC
                 LIMIT $2",
            )
            .bind(realm.as_str())
            .bind(limit + 1)
            .fetch_all(self.pool)
            .await?
        };

        let (total,): (i64,) = sqlx::query_as("SELECT count(*) FROM ownership WHERE realm = $1")
            .bind(realm.as_str())
            .fetch_one(self.pool)
            .await?;

        let has_more = rows.len() as i64 > limit;
        let mut nodes: Vec<OwnershipRecord> = rows
            .into_iter()
            .take(limit as usize)
            .map(|row| OwnershipRecord {
                realm: row.0,
                key: row.1,
                content_type: row.2,
                size: row.3 as u64,
                created_at: row.4,
                created_by: row.5,
            })
            .collect();

        let next_cursor = if has_more {
            nodes.last().map(|n| n.key.clone())
        } else {
            None
        };
        nodes.truncate(limit as usize);

        Ok(ListNodesResult {
            nodes,
            next_cursor,
            total,
        })
    }
}
