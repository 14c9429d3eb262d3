//! The capability model: user, ticket and agent tokens.
//!
//! JWT remains the bearer encoding for *user* tokens (the JWT carries only the opaque
//! token id as `sub` and is looked up server-side), while tickets and agent tokens are
//! opaque ids resolved directly against the token store, under the `usr_`/`tkt_`/`agt_`
//! realm prefix scheme.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

use tangled_common::realm::Realm;

use crate::db::DbPool;
use crate::error::AppError;

const USER_BEARER_HOURS: i64 = 24;

/// Default ticket TTL.
pub const DEFAULT_TICKET_TTL_SECS: i64 = 3600;
/// Default user-session TTL. The teacher's access/refresh pair used a much shorter
/// access-token life; user tokens here are the long-lived session row a bearer JWT
/// points at, so they get a longer default and the caller can still pass a shorter one.
pub const DEFAULT_USER_TOKEN_TTL_SECS: i64 = 30 * 24 * 3600;

/// Whether a ticket's access is limited to a specific key set or unrestricted (can read
/// anything visible in its owning realm).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Unrestricted,
    Keys(BTreeSet<String>),
}

impl Scope {
    pub fn allows(&self, key: &str) -> bool {
        match self {
            Scope::Unrestricted => true,
            Scope::Keys(keys) => keys.contains(key),
        }
    }
}

/// A ticket's commit rights: absent (read-only), unlimited, or quota-plus-accept-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitRights {
    Unlimited,
    Limited {
        quota: u64,
        accept_list: Option<BTreeSet<String>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketConfig {
    pub node_limit: u64,
    pub max_name_bytes: u32,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            node_limit: 10_000,
            max_name_bytes: 255,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserToken {
    pub id: String,
    pub realm: Realm,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TicketToken {
    pub id: String,
    /// The realm this ticket grants access into.
    pub owner_realm: Realm,
    pub scope: Scope,
    pub commit: Option<CommitRights>,
    /// Pinned depot root. Not currently enforced by the commit admitter — see
    /// DESIGN.md Open Question 3. Carried through creation and serialization only.
    pub commit_root_unused: Option<String>,
    pub config: TicketConfig,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AgentToken {
    pub id: String,
    pub created_by: String,
    pub realm: Realm,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum Token {
    User(UserToken),
    Ticket(TicketToken),
    Agent(AgentToken),
}

impl Token {
    pub fn id(&self) -> &str {
        match self {
            Token::User(t) => &t.id,
            Token::Ticket(t) => &t.id,
            Token::Agent(t) => &t.id,
        }
    }

    /// The realm this token authenticates requests as.
    pub fn realm(&self) -> &Realm {
        match self {
            Token::User(t) => &t.realm,
            Token::Ticket(t) => &t.owner_realm,
            Token::Agent(t) => &t.realm,
        }
    }

    pub fn is_expired(&self) -> bool {
        let now = Utc::now();
        match self {
            Token::User(t) => t.expires_at < now,
            Token::Ticket(t) => t.expires_at < now,
            Token::Agent(t) => t.expires_at.is_some_and(|exp| exp < now),
        }
    }
}

pub struct TokenStore<'a> {
    pool: &'a DbPool,
}

impl<'a> TokenStore<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    pub async fn create_user_token(&self, realm: &Realm, ttl_secs: i64) -> Result<UserToken, AppError> {
        let id = format!("usr_{}", Uuid::new_v4().simple());
        let created_at = Utc::now();
        let expires_at = created_at + Duration::seconds(ttl_secs);
        sqlx::query(
            "INSERT INTO tokens (id, kind, owner_realm, created_at, expires_at) VALUES ($1, 'user', $2, $3, $4)",
        )
        .bind(&id)
        .bind(realm.as_str())
        .bind(created_at)
        .bind(expires_at)
        .execute(self.pool)
        .await?;

        Ok(UserToken {
            id,
            realm: realm.clone(),
            created_at,
            expires_at,
        })
    }

    pub async fn create_ticket(
        &self,
        owner_realm: &Realm,
        scope: Scope,
        commit: Option<CommitRights>,
        config: TicketConfig,
        ttl_secs: i64,
    ) -> Result<TicketToken, AppError> {
        let id = format!("tkt_{}", Uuid::new_v4().simple());
        let created_at = Utc::now();
        let expires_at = created_at + Duration::seconds(ttl_secs);
        let scope_json = serde_json::to_string(&scope).map_err(|e| anyhow::anyhow!(e))?;
        let commit_json = commit
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| anyhow::anyhow!(e))?;

        sqlx::query(
            "INSERT INTO tokens (id, kind, owner_realm, scope, commit_rights, node_limit, max_name_bytes, created_at, expires_at)
             VALUES ($1, 'ticket', $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&id)
        .bind(owner_realm.as_str())
        .bind(&scope_json)
        .bind(&commit_json)
        .bind(config.node_limit as i64)
        .bind(config.max_name_bytes as i32)
        .bind(created_at)
        .bind(expires_at)
        .execute(self.pool)
        .await?;

        Ok(TicketToken {
            id,
            owner_realm: owner_realm.clone(),
            scope,
            commit,
            commit_root_unused: None,
            config,
            created_at,
            expires_at,
        })
    }

    pub async fn create_agent_token(
        &self,
        created_by: &str,
        realm: &Realm,
        label: Option<String>,
    ) -> Result<AgentToken, AppError> {
        let id = format!("agt_{}", Uuid::new_v4().simple());
        let created_at = Utc::now();

        sqlx::query(
            "INSERT INTO tokens (id, kind, owner_realm, created_by, label, created_at)
             VALUES ($1, 'agent', $2, $3, $4, $5)",
        )
        .bind(&id)
        .bind(realm.as_str())
        .bind(created_by)
        .bind(&label)
        .bind(created_at)
        .execute(self.pool)
        .await?;

        Ok(AgentToken {
            id,
            created_by: created_by.to_string(),
            realm: realm.clone(),
            label,
            created_at,
            expires_at: None,
        })
    }

    /// Looks up a token by id. Expired tokens (any kind with a past `expires_at`) are
    /// lazily deleted and reported as missing: callers check expiry on every lookup
    /// rather than relying on a background sweep.
    pub async fn get_token(&self, id: &str) -> Result<Option<Token>, AppError> {
        let row = sqlx::query(
            "SELECT id, kind, owner_realm, scope, commit_rights, commit_root, node_limit,
                    max_name_bytes, created_by, label, created_at, expires_at
             FROM tokens WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let Some(token) = Self::row_to_token(row)? else { return Ok(None) };

        if token.is_expired() {
            self.delete_token(id).await?;
            return Ok(None);
        }
        Ok(Some(token))
    }

    fn row_to_token(row: sqlx::postgres::PgRow) -> Result<Option<Token>, AppError> {
        let kind: String = row.try_get("kind")?;
        let id: String = row.try_get("id")?;
        let owner_realm_str: String = row.try_get("owner_realm")?;
        let owner_realm = Realm::parse(&owner_realm_str)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("bad realm in token row: {e}")))?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        let expires_at_col: Option<DateTime<Utc>> = row.try_get("expires_at")?;

        let token = match kind.as_str() {
            "user" => Token::User(UserToken {
                id,
                realm: owner_realm,
                created_at,
                expires_at: expires_at_col.unwrap_or(created_at),
            }),
            "ticket" => {
                let scope_json: String = row.try_get("scope")?;
                let scope: Scope = serde_json::from_str(&scope_json).map_err(|e| anyhow::anyhow!(e))?;
                let commit_json: Option<String> = row.try_get("commit_rights")?;
                let commit = commit_json
                    .map(|s| serde_json::from_str::<CommitRights>(&s))
                    .transpose()
                    .map_err(|e| anyhow::anyhow!(e))?;
                let node_limit: i64 = row.try_get("node_limit")?;
                let max_name_bytes: i32 = row.try_get("max_name_bytes")?;
                let commit_root_unused: Option<String> = row.try_get("commit_root")?;

                Token::Ticket(TicketToken {
                    id,
                    owner_realm,
                    scope,
                    commit,
                    commit_root_unused,
                    config: TicketConfig {
                        node_limit: node_limit as u64,
                        max_name_bytes: max_name_bytes as u32,
                    },
                    created_at,
                    expires_at: expires_at_col.unwrap_or(created_at),
                })
            }
            "agent" => {
                let created_by: String = row.try_get("created_by")?;
                let label: Option<String> = row.try_get("label")?;
                Token::Agent(AgentToken {
                    id,
                    created_by,
                    realm: owner_realm,
                    label,
                    created_at,
                    expires_at: expires_at_col,
                })
            }
            other => {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "unknown token kind in store: {other}"
                )))
            }
        };

        Ok(Some(token))
    }

    pub async fn delete_token(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM tokens WHERE id = $1")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether `id` names a token owned by (created by) `owner_token_id`. Used to check
    /// a user is allowed to revoke one of their own agent tokens.
    pub async fn verify_token_ownership(&self, id: &str, owner_token_id: &str) -> Result<bool, AppError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT created_by FROM tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(matches!(row, Some((created_by,)) if created_by == owner_token_id))
    }

    pub async fn list_agent_tokens_by_user(&self, user_token_id: &str) -> Result<Vec<AgentToken>, AppError> {
        let rows = sqlx::query(
            "SELECT id, kind, owner_realm, scope, commit_rights, commit_root, node_limit,
                    max_name_bytes, created_by, label, created_at, expires_at
             FROM tokens WHERE kind = 'agent' AND created_by = $1 ORDER BY created_at",
        )
        .bind(user_token_id)
        .fetch_all(self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(Token::Agent(agent)) = Self::row_to_token(row)? {
                out.push(agent);
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct UserClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Wraps a user token id in a short-lived bearer JWT.
pub fn create_user_bearer(secret: &str, token_id: &str) -> anyhow::Result<String> {
    let now = Utc::now();
    let claims = UserClaims {
        sub: token_id.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::hours(USER_BEARER_HOURS)).timestamp(),
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Recovers the user token id from a bearer JWT.
pub fn verify_user_bearer(secret: &str, bearer: &str) -> anyhow::Result<String> {
    let data = decode::<UserClaims>(
        bearer,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims.sub)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_round_trips_the_token_id() {
        let secret = "test-secret";
        let bearer = create_user_bearer(secret, "usr_abc123").unwrap();
        assert_eq!(verify_user_bearer(secret, &bearer).unwrap(), "usr_abc123");
    }

    #[test]
    fn scope_unrestricted_allows_any_key() {
        assert!(Scope::Unrestricted.allows("sha256:anything"));
    }

    #[test]
    fn scope_keys_only_allows_listed_keys() {
        let mut keys = BTreeSet::new();
        keys.insert("sha256:aa".to_string());
        let scope = Scope::Keys(keys);
        assert!(scope.allows("sha256:aa"));
        assert!(!scope.allows("sha256:bb"));
    }
}
