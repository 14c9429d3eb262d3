//! Depots: named mutable pointers into the DAG with append-only history and rollback.
//!
//! Concurrency: `update_root` relies on a conditional `UPDATE ... WHERE version = $expected`
//! so concurrent writers against a single depot serialize through the retry loop rather
//! than racing each other's version bump.

use chrono::{DateTime, Utc};
use tangled_common::realm::Realm;

use crate::db::DbPool;
use crate::error::AppError;

pub const MAIN_DEPOT_NAME: &str = "main";

#[derive(Debug, Clone)]
pub struct Depot {
    pub id: String,
    pub realm: String,
    pub name: String,
    pub root: String,
    pub version: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DepotHistoryEntry {
    pub version: i64,
    pub root: String,
    pub created_at: DateTime<Utc>,
    pub message: Option<String>,
}

pub struct ListDepotsResult {
    pub depots: Vec<Depot>,
    pub next_cursor: Option<String>,
}

pub struct DepotRegistry<'a> {
    pool: &'a DbPool,
}

impl<'a> DepotRegistry<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Idempotent bootstrap: creates the reserved `main` depot the first time a realm's
    /// depots are listed, rooted at the empty collection.
    pub async fn ensure_main_depot(&self, realm: &Realm, empty_collection_key: &str) -> Result<(), AppError> {
        let exists: Option<(String,)> = sqlx::query_as("SELECT name FROM depots WHERE realm = $1 AND name = $2")
            .bind(realm.as_str())
            .bind(MAIN_DEPOT_NAME)
            .fetch_optional(self.pool)
            .await?;
        if exists.is_none() {
            self.create(realm, MAIN_DEPOT_NAME, Some(empty_collection_key.to_string()), None)
                .await?;
        }
        Ok(())
    }

    pub async fn create(
        &self,
        realm: &Realm,
        name: &str,
        root: Option<String>,
        description: Option<String>,
    ) -> Result<Depot, AppError> {
        let existing: Option<(String,)> = sqlx::query_as("SELECT name FROM depots WHERE realm = $1 AND name = $2")
            .bind(realm.as_str())
            .bind(name)
            .fetch_optional(self.pool)
            .await?;
        if existing.is_some() {
            return Err(AppError::Conflict(format!("depot {name} already exists in this realm")));
        }

        let root = root.unwrap_or_else(|| tangled_common::node::CollectionNode::empty().key());
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO depots (realm, name, root, version, description, created_at, updated_at)
             VALUES ($1, $2, $3, 1, $4, $5, $5)",
        )
        .bind(realm.as_str())
        .bind(name)
        .bind(&root)
        .bind(&description)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO depot_history (realm, name, version, root, recorded_at) VALUES ($1, $2, 1, $3, $4)",
        )
        .bind(realm.as_str())
        .bind(name)
        .bind(&root)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Depot {
            id: format!("dpt_{}:{}", realm.as_str(), name),
            realm: realm.as_str().to_string(),
            name: name.to_string(),
            root,
            version: 1,
            description,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_by_name(&self, realm: &Realm, name: &str) -> Result<Option<Depot>, AppError> {
        let row: Option<(String, String, String, i64, Option<String>, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT realm, name, root, version, description, created_at, updated_at
             FROM depots WHERE realm = $1 AND name = $2",
        )
        .bind(realm.as_str())
        .bind(name)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(|(realm, name, root, version, description, created_at, updated_at)| Depot {
            id: format!("dpt_{realm}:{name}"),
            realm,
            name,
            root,
            version,
            description,
            created_at,
            updated_at,
        }))
    }

    pub async fn list(&self, realm: &Realm, cursor: Option<&str>, limit: i64) -> Result<ListDepotsResult, AppError> {
        let rows: Vec<(String, String, String, i64, Option<String>, DateTime<Utc>, DateTime<Utc>)> = if let Some(cursor) = cursor {
            sqlx::query_as(
                "SELECT realm, name, root, version, description, created_at, updated_at FROM depots
                 WHERE realm = $1 AND name > $2 ORDER BY name LIMIT $3",
            )
            .bind(realm.as_str())
            .bind(cursor)
            .bind(limit + 1)
            .fetch_all(self.pool)
            .await?
        } else {
            sqlx::query_as(
                "SELECT realm, name, root, version, description, created_at, updated_at FROM depots
                 WHERE realm = $1 ORDER BY name LIMIT $2",
            )
            .bind(realm.as_str())
            .bind(limit + 1)
            .fetch_all(self.pool)
            .await?
        };

        let has_more = rows.len() as i64 > limit;
        let mut depots: Vec<Depot> = rows
            .into_iter()
            .take(limit as usize)
            .map(|(realm, name, root, version, description, created_at, updated_at)| Depot {
                id: format!("dpt_{realm}:{name}"),
                realm,
                name,
                root,
                version,
                description,
                created_at,
                updated_at,
            })
            .collect();

        let next_cursor = if has_more {
            depots.last().map(|d| d.name.clone())
        } else {
            None
        };
        Ok(ListDepotsResult { depots, next_cursor })
    }

    /// Atomically advances a depot's root, incrementing its version by exactly one and
    /// appending a history entry. Uses a conditional update on the observed version so
    /// two concurrent callers racing on the same depot never skip or duplicate a version
    /// number: the loser's `UPDATE` affects zero rows and retries against the new state.
    pub async fn update_root(
        &self,
        realm: &Realm,
        name: &str,
        new_root: &str,
        message: Option<String>,
    ) -> Result<Depot, AppError> {
        loop {
            let current = self
                .get_by_name(realm, name)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("no such depot: {name}")))?;
            let next_version = current.version + 1;
            let now = Utc::now();

            let mut tx = self.pool.begin().await?;
            let updated = sqlx::query(
                "UPDATE depots SET root = $1, version = $2, updated_at = $3
                 WHERE realm = $4 AND name = $5 AND version = $6",
            )
            .bind(new_root)
            .bind(next_version)
            .bind(now)
            .bind(realm.as_str())
            .bind(name)
            .bind(current.version)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                // Lost the race against a concurrent updater; retry against fresh state.
                continue;
            }

            sqlx::query(
                "INSERT INTO depot_history (realm, name, version, root, message, recorded_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(realm.as_str())
            .bind(name)
            .bind(next_version)
            .bind(new_root)
            .bind(&message)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            return Ok(Depot {
                version: next_version,
                root: new_root.to_string(),
                updated_at: now,
                ..current
            });
        }
    }

    pub async fn rollback(&self, realm: &Realm, name: &str, target_version: i64) -> Result<Depot, AppError> {
        let entry = self
            .get_history_entry(realm, name, target_version)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no history entry at version {target_version}")))?;
        self.update_root(realm, name, &entry.root, Some(format!("Rollback to version {target_version}")))
            .await
    }

    pub async fn delete(&self, realm: &Realm, name: &str) -> Result<(), AppError> {
        if name == MAIN_DEPOT_NAME {
            return Err(AppError::Forbidden("the main depot cannot be deleted".into()));
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM depot_history WHERE realm = $1 AND name = $2")
            .bind(realm.as_str())
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM depots WHERE realm = $1 AND name = $2")
            .bind(realm.as_str())
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("no such depot: {name}")));
        }
        Ok(())
    }

    pub async fn list_history(&self, realm: &Realm, name: &str, limit: i64) -> Result<Vec<DepotHistoryEntry>, AppError> {
        let rows: Vec<(i64, String, Option<String>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT version, root, message, recorded_at FROM depot_history
             WHERE realm = $1 AND name = $2 ORDER BY version LIMIT $3",
        )
        .bind(realm.as_str())
        .bind(name)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(version, root, message, created_at)| DepotHistoryEntry {
                version,
                root,
                created_at,
                message,
            })
            .collect())
    }

    pub async fn get_history_entry(
        &self,
        realm: &Realm,
        name: &str,
        version: i64,
    ) -> Result<Option<DepotHistoryEntry>, AppError> {
        let row: Option<(i64, String, Option<String>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT version, root, message, recorded_at FROM depot_history
             WHERE realm = $1 AND name = $2 AND version = $3",
        )
        .bind(realm.as_str())
        .bind(name)
        .bind(version)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(|(version, root, message, created_at)| DepotHistoryEntry {
            version,
            root,
            created_at,
            message,
        }))
    }
}
