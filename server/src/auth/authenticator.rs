//! Credential resolution: bearer JWT, opaque agent/ticket token, or a signed request.
//! Handles the three credential forms this engine supports, plus realm aliasing that is
//! resolved here and nowhere else — storage keys and ownership rows never see `@me`/`~`.

use axum::http::{HeaderMap, Method, Uri};
use chrono::Utc;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use tangled_common::realm::Realm;

use crate::auth::token::{Scope, Token, TokenStore};
use crate::config::Config;
use crate::db::DbPool;
use crate::error::AppError;

/// The resolved authorization context of an inbound request:
/// `{ userId, realm, canRead, canWrite, canIssueTicket, tokenId, allowedKey? }`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub token_id: String,
    /// Present when the credential is a user or agent token; tickets act on behalf of a
    /// realm, not necessarily a single known user.
    pub user_id: Option<String>,
    pub realm: Realm,
    pub can_read: bool,
    pub can_write: bool,
    pub can_issue_ticket: bool,
    /// Set only for a scoped ticket with exactly a single-key (or narrower) scope; callers
    /// needing full scope membership should go through `Authenticator::ticket_allows`.
    pub allowed_key: Option<String>,
}

impl AuthContext {
    fn from_token(token: Token) -> Self {
        match token {
            Token::User(user) => AuthContext {
                token_id: user.id,
                user_id: user.realm.as_str().strip_prefix("usr_").map(str::to_string),
                realm: user.realm,
                can_read: true,
                can_write: true,
                can_issue_ticket: true,
                allowed_key: None,
            },
            Token::Agent(agent) => AuthContext {
                token_id: agent.id,
                user_id: agent.realm.as_str().strip_prefix("usr_").map(str::to_string),
                realm: agent.realm,
                can_read: true,
                can_write: true,
                can_issue_ticket: true,
                allowed_key: None,
            },
            Token::Ticket(ticket) => {
                let allowed_key = match &ticket.scope {
                    Scope::Keys(keys) => keys.iter().next().cloned(),
                    Scope::Unrestricted => None,
                };
                AuthContext {
                    token_id: ticket.id,
                    user_id: None,
                    realm: ticket.owner_realm,
                    can_read: true,
                    can_write: ticket.commit.is_some(),
                    can_issue_ticket: false,
                    allowed_key,
                }
            }
        }
    }
}

/// The exact bytes a signed request's signature covers: `<ts>.<METHOD>.<path?query>.<bodyHash>`.
/// `bodyHash` is a plain lowercase-hex SHA-256 digest, not a `sha256:`-prefixed CAS key.
fn signing_payload(timestamp: i64, method: &Method, uri: &Uri, body: &[u8]) -> String {
    let body_hash = hex::encode(Sha256::digest(body));
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or_else(|| uri.path());
    format!("{timestamp}.{method}.{path_and_query}.{body_hash}")
}

pub struct Authenticator<'a> {
    pool: &'a DbPool,
    config: &'a Config,
}

impl<'a> Authenticator<'a> {
    pub fn new(pool: &'a DbPool, config: &'a Config) -> Self {
        Self { pool, config }
    }

    /// Resolves the caller's authorization context from request headers and (for the
    /// signed-request path) the request method, URI, and raw body.
    pub async fn authenticate(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<AuthContext, AppError> {
        if let Some(auth_header) = headers.get(axum::http::header::AUTHORIZATION) {
            let value = auth_header
                .to_str()
                .map_err(|_| AppError::Unauthorized("authorization header is not valid UTF-8".into()))?;

            if let Some(ticket_id) = value.strip_prefix("Ticket ") {
                return self.authenticate_ticket(ticket_id).await;
            }
            if let Some(bearer) = value.strip_prefix("Bearer ") {
                return self.authenticate_bearer(bearer).await;
            }
        }

        if let (Some(pubkey), Some(signature), Some(timestamp)) = (
            headers.get("x-tangled-pubkey"),
            headers.get("x-tangled-signature"),
            headers.get("x-tangled-timestamp"),
        ) {
            return self
                .authenticate_signed_request(
                    pubkey
                        .to_str()
                        .map_err(|_| AppError::Unauthorized("invalid pubkey header".into()))?,
                    signature
                        .to_str()
                        .map_err(|_| AppError::Unauthorized("invalid signature header".into()))?,
                    timestamp
                        .to_str()
                        .map_err(|_| AppError::Unauthorized("invalid timestamp header".into()))?,
                    method,
                    uri,
                    body,
                )
                .await;
        }

        Err(AppError::Unauthorized("missing credentials".into()))
    }

    /// Resolves a ticket id used as a path element, e.g. `/cas/tkt_<id>/...`.
    pub async fn authenticate_path_realm(&self, realm_segment: &str) -> Result<Option<AuthContext>, AppError> {
        if let Some(ticket_id) = realm_segment.strip_prefix("tkt_") {
            return Ok(Some(self.authenticate_ticket(&format!("tkt_{ticket_id}")).await?));
        }
        Ok(None)
    }

    /// A bearer value is either an opaque agent token id (`agt_...`) or a JWT wrapping a
    /// user token id — agent/ticket tokens are never JWT-wrapped, only user sessions are.
    async fn authenticate_bearer(&self, bearer: &str) -> Result<AuthContext, AppError> {
        if bearer.starts_with("agt_") {
            let token = TokenStore::new(self.pool)
                .get_token(bearer)
                .await?
                .ok_or_else(|| AppError::Unauthorized("unknown or expired agent token".into()))?;
            return match token {
                Token::Agent(_) => Ok(AuthContext::from_token(token)),
                _ => Err(AppError::Unauthorized("bearer is not an agent token".into())),
            };
        }
        self.authenticate_user_bearer(bearer).await
    }

    async fn authenticate_user_bearer(&self, jwt: &str) -> Result<AuthContext, AppError> {
        let token_id = super::token::verify_user_bearer(&self.config.jwt_secret, jwt)
            .map_err(|_| AppError::Unauthorized("invalid or expired bearer token".into()))?;
        let token = TokenStore::new(self.pool)
            .get_token(&token_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized("token revoked or expired".into()))?;

        match token {
            Token::User(_) => Ok(AuthContext::from_token(token)),
            _ => Err(AppError::Unauthorized("bearer token is not a user token".into())),
        }
    }

    async fn authenticate_ticket(&self, ticket_id: &str) -> Result<AuthContext, AppError> {
        let token = TokenStore::new(self.pool)
            .get_token(ticket_id)
            .await?
            .ok_or_else(|| AppError::Gone("ticket unknown or expired".into()))?;

        match token {
            Token::Ticket(_) => Ok(AuthContext::from_token(token)),
            _ => Err(AppError::Unauthorized("not a ticket".into())),
        }
    }

    async fn authenticate_signed_request(
        &self,
        pubkey_hex: &str,
        signature_hex: &str,
        timestamp: &str,
        method: &Method,
        uri: &Uri,
        body: &[u8],
    ) -> Result<AuthContext, AppError> {
        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| AppError::Unauthorized("invalid timestamp".into()))?;
        let now = Utc::now().timestamp();
        if (now - timestamp).abs() > self.config.signed_request_skew_secs {
            return Err(AppError::Unauthorized("signed request timestamp out of window".into()));
        }

        let user_realm_str: Option<(String,)> = sqlx::query_as(
            "SELECT user_realm FROM authorized_pubkeys WHERE pubkey = $1 AND expires_at > now()",
        )
        .bind(pubkey_hex)
        .fetch_optional(self.pool)
        .await?;
        let (user_realm_str,) = user_realm_str.ok_or_else(|| AppError::Unauthorized("unauthorized pubkey".into()))?;

        let pubkey_bytes = hex::decode(pubkey_hex).map_err(|_| AppError::Unauthorized("bad pubkey encoding".into()))?;
        let pubkey_bytes: [u8; 32] = pubkey_bytes
            .try_into()
            .map_err(|_| AppError::Unauthorized("pubkey must be 32 bytes".into()))?;
        let verifying_key = VerifyingKey::from_bytes(&pubkey_bytes)
            .map_err(|_| AppError::Unauthorized("invalid pubkey".into()))?;

        let sig_bytes = hex::decode(signature_hex).map_err(|_| AppError::Unauthorized("bad signature encoding".into()))?;
        let sig_bytes: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| AppError::Unauthorized("signature must be 64 bytes".into()))?;
        let signature = Signature::from_bytes(&sig_bytes);

        let signed_payload = signing_payload(timestamp, method, uri, body);

        verifying_key
            .verify(signed_payload.as_bytes(), &signature)
            .map_err(|_| AppError::Unauthorized("signature verification failed".into()))?;

        let realm = Realm::parse(&user_realm_str)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("bad realm for authorized pubkey: {e}")))?;

        Ok(AuthContext {
            token_id: format!("pubkey:{pubkey_hex}"),
            user_id: realm.as_str().strip_prefix("usr_").map(str::to_string),
            realm,
            can_read: true,
            can_write: true,
            can_issue_ticket: true,
            allowed_key: None,
        })
    }

    /// Resolves a path realm segment against the caller's context: `@me` and `~` both
    /// mean "the context's own realm". A `tkt_<id>` segment must match a ticket
    /// credential already resolved to that same realm (tickets authenticate directly to
    /// their own realm, so this just re-validates consistency). Any other literal must
    /// equal the context's realm exactly — cross-realm access only ever happens through a
    /// ticket, which already carries its target realm as the context's realm.
    pub fn resolve_realm(context: &AuthContext, path_realm: &str) -> Result<Realm, AppError> {
        if path_realm == "@me" || path_realm == "~" {
            return Ok(context.realm.clone());
        }
        let parsed = Realm::parse(path_realm)
            .map_err(|_| AppError::InvalidRequest(format!("malformed realm: {path_realm}")))?;
        if parsed != context.realm {
            return Err(AppError::Forbidden("not authorized for this realm".into()));
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_context() -> AuthContext {
        AuthContext {
            token_id: "usr_1".into(),
            user_id: Some("1".into()),
            realm: Realm::user("1"),
            can_read: true,
            can_write: true,
            can_issue_ticket: true,
            allowed_key: None,
        }
    }

    #[test]
    fn signing_payload_joins_timestamp_method_path_and_body_hash() {
        let uri: Uri = "/cas/usr_1/commit?foo=bar".parse().unwrap();
        let payload = signing_payload(1700000000, &Method::POST, &uri, b"hello");
        let expected_hash = hex::encode(Sha256::digest(b"hello"));
        assert_eq!(payload, format!("1700000000.POST./cas/usr_1/commit?foo=bar.{expected_hash}"));
    }

    #[test]
    fn signing_payload_differs_for_different_bodies() {
        let uri: Uri = "/auth/ticket".parse().unwrap();
        let a = signing_payload(1, &Method::GET, &uri, b"one");
        let b = signing_payload(1, &Method::GET, &uri, b"two");
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_realm_aliases_to_context_realm() {
        let ctx = user_context();
        assert_eq!(Authenticator::resolve_realm(&ctx, "@me").unwrap(), Realm::user("1"));
        assert_eq!(Authenticator::resolve_realm(&ctx, "~").unwrap(), Realm::user("1"));
    }

    #[test]
    fn resolve_realm_rejects_foreign_realm() {
        let ctx = user_context();
        assert!(Authenticator::resolve_realm(&ctx, "usr_2").is_err());
    }

    #[test]
    fn ticket_context_has_restricted_capabilities() {
        let mut keys = std::collections::BTreeSet::new();
        keys.insert("sha256:aa".to_string());
        let ticket = Token::Ticket(crate::auth::token::TicketToken {
            id: "tkt_1".into(),
            owner_realm: Realm::user("1"),
            scope: Scope::Keys(keys),
            commit: None,
            commit_root_unused: None,
            config: Default::default(),
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        });
        let ctx = AuthContext::from_token(ticket);
        assert!(ctx.can_read);
        assert!(!ctx.can_write);
        assert!(!ctx.can_issue_ticket);
        assert_eq!(ctx.allowed_key.as_deref(), Some("sha256:aa"));
    }
}
