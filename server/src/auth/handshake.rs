//! Delegated-auth handshake: a device-code-like `init` -> `status` -> `complete` flow so
//! a CLI or agent can be authorized by a human without ever seeing the human's password.
//! Uses the same expiry-row-plus-lazy-delete shape as the rest of the token handling,
//! applied here to two dedicated tables instead of JWT claims.

use chrono::{DateTime, Duration, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;

use tangled_common::realm::Realm;

use crate::db::DbPool;
use crate::error::AppError;

const PENDING_TTL_SECS: i64 = 600;
const AUTHORIZED_TTL_DAYS: i64 = 30;
const POLL_INTERVAL_SECS: i64 = 5;

pub struct PendingAuthInit {
    pub verification_code: String,
    pub expires_in: i64,
    pub poll_interval: i64,
}

pub struct StatusResult {
    pub authorized: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct CompleteResult {
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuthorizedClient {
    pub pubkey: String,
    pub client_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct Handshake<'a> {
    pool: &'a DbPool,
}

impl<'a> Handshake<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Starts a new handshake for `pubkey`, returning the verification code a human will
    /// type into the auth page to bind it to their identity.
    pub async fn init(&self, pubkey: &str, client_name: Option<&str>) -> Result<PendingAuthInit, AppError> {
        let code: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        let now = Utc::now();
        let expires_at = now + Duration::seconds(PENDING_TTL_SECS);

        sqlx::query(
            "INSERT INTO pending_auths (code, status, pubkey, client_name, created_at, expires_at)
             VALUES ($1, 'pending', $2, $3, $4, $5)",
        )
        .bind(&code)
        .bind(pubkey)
        .bind(client_name)
        .bind(now)
        .bind(expires_at)
        .execute(self.pool)
        .await?;

        Ok(PendingAuthInit {
            verification_code: code,
            expires_in: PENDING_TTL_SECS,
            poll_interval: POLL_INTERVAL_SECS,
        })
    }

    /// A pubkey is authorized iff a live row exists for it in the authorized-pubkey store.
    pub async fn status(&self, pubkey: &str) -> Result<StatusResult, AppError> {
        let row: Option<(DateTime<Utc>,)> =
            sqlx::query_as("SELECT expires_at FROM authorized_pubkeys WHERE pubkey = $1")
                .bind(pubkey)
                .fetch_optional(self.pool)
                .await?;

        match row {
            Some((expires_at,)) if expires_at > Utc::now() => Ok(StatusResult {
                authorized: true,
                expires_at: Some(expires_at),
            }),
            Some(_) => {
                sqlx::query("DELETE FROM authorized_pubkeys WHERE pubkey = $1")
                    .bind(pubkey)
                    .execute(self.pool)
                    .await?;
                Ok(StatusResult {
                    authorized: false,
                    expires_at: None,
                })
            }
            None => Ok(StatusResult {
                authorized: false,
                expires_at: None,
            }),
        }
    }

    /// Completes a handshake: called by an already-authenticated human session to bind a
    /// device's pubkey to their realm. Consumes the pending entry.
    pub async fn complete(
        &self,
        pubkey: &str,
        verification_code: &str,
        user_realm: &Realm,
    ) -> Result<CompleteResult, AppError> {
        let row: Option<(Option<String>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT client_name, expires_at FROM pending_auths
             WHERE pubkey = $1 AND code = $2 AND status = 'pending'",
        )
        .bind(pubkey)
        .bind(verification_code)
        .fetch_optional(self.pool)
        .await?;

        let Some((client_name, expires_at)) = row else {
            return Err(AppError::InvalidRequest("invalid_or_expired_code".into()));
        };
        if expires_at < Utc::now() {
            return Err(AppError::InvalidRequest("invalid_or_expired_code".into()));
        }

        let now = Utc::now();
        let authorized_expiry = now + Duration::days(AUTHORIZED_TTL_DAYS);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO authorized_pubkeys (pubkey, user_realm, client_name, created_at, expires_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (pubkey) DO UPDATE SET
                 user_realm = EXCLUDED.user_realm,
                 client_name = EXCLUDED.client_name,
                 expires_at = EXCLUDED.expires_at",
        )
        .bind(pubkey)
        .bind(user_realm.as_str())
        .bind(&client_name)
        .bind(now)
        .bind(authorized_expiry)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM pending_auths WHERE pubkey = $1 AND code = $2")
            .bind(pubkey)
            .bind(verification_code)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(CompleteResult {
            expires_at: authorized_expiry,
        })
    }

    /// Lists the devices a user has authorized, lazily dropping expired ones.
    pub async fn list_authorized(&self, user_realm: &Realm) -> Result<Vec<AuthorizedClient>, AppError> {
        sqlx::query("DELETE FROM authorized_pubkeys WHERE user_realm = $1 AND expires_at < now()")
            .bind(user_realm.as_str())
            .execute(self.pool)
            .await?;

        let rows: Vec<(String, Option<String>, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT pubkey, client_name, created_at, expires_at FROM authorized_pubkeys
             WHERE user_realm = $1 ORDER BY created_at DESC",
        )
        .bind(user_realm.as_str())
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(pubkey, client_name, created_at, expires_at)| AuthorizedClient {
                pubkey,
                client_name,
                created_at,
                expires_at,
            })
            .collect())
    }

    /// Revokes a device, scoped to the user that authorized it.
    pub async fn revoke(&self, pubkey: &str, user_realm: &Realm) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM authorized_pubkeys WHERE pubkey = $1 AND user_realm = $2")
            .bind(pubkey)
            .bind(user_realm.as_str())
            .execute(self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("no such authorized client".into()));
        }
        Ok(())
    }
}
