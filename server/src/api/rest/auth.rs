//! Auth routes: local login, the delegated-auth handshake, and ticket issuance.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use tangled_common::realm::Realm;

use crate::api::rest::types::TicketResponse;
use crate::api::AppState;
use crate::auth::authenticator::Authenticator;
use crate::auth::handshake::Handshake;
use crate::auth::token::{create_user_bearer, CommitRights, Scope, TicketConfig, TokenStore, DEFAULT_TICKET_TTL_SECS};
use crate::auth::{hash_password, verify_password};
use crate::db::users;
use crate::error::AppError;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/clients/init", post(handshake_init))
        .route("/auth/clients/status", get(handshake_status))
        .route("/auth/clients/complete", post(handshake_complete))
        .route("/auth/clients", get(list_clients))
        .route("/auth/clients/:pubkey", axum::routing::delete(revoke_client))
        .route("/auth/ticket", post(create_ticket))
        .route("/auth/ticket/:id", axum::routing::delete(revoke_ticket))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    bearer: String,
    realm: String,
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let password_hash = hash_password(&request.password).map_err(AppError::Internal)?;
    let user = users::create_user(&state.db, &request.username, &password_hash)
        .await
        .map_err(|e| AppError::Conflict(format!("could not create user: {e}")))?;

    issue_login_bearer(&state, &user.id).await
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let user = users::get_user_by_username(&state.db, &request.username)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::Unauthorized("invalid username or password".into()))?;

    let ok = verify_password(&request.password, &user.password_hash).map_err(AppError::Internal)?;
    if !ok {
        return Err(AppError::Unauthorized("invalid username or password".into()));
    }

    issue_login_bearer(&state, &user.id).await
}

async fn issue_login_bearer(state: &AppState, user_id: &str) -> Result<Json<LoginResponse>, AppError> {
    let realm = Realm::user(user_id);
    let token = TokenStore::new(&state.db)
        .create_user_token(&realm, crate::auth::token::DEFAULT_USER_TOKEN_TTL_SECS)
        .await?;
    let bearer = create_user_bearer(&state.config.jwt_secret, &token.id).map_err(AppError::Internal)?;
    Ok(Json(LoginResponse {
        bearer,
        realm: realm.as_str().to_string(),
    }))
}

#[derive(Debug, Deserialize)]
struct HandshakeInitRequest {
    pubkey: String,
    client_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct HandshakeInitResponse {
    auth_url: String,
    verification_code: String,
    expires_in: i64,
    poll_interval: i64,
}

async fn handshake_init(
    State(state): State<AppState>,
    Json(request): Json<HandshakeInitRequest>,
) -> Result<Json<HandshakeInitResponse>, AppError> {
    let init = Handshake::new(&state.db)
        .init(&request.pubkey, request.client_name.as_deref())
        .await?;
    let auth_url = format!(
        "https://{}/authorize?code={}",
        state.config.server_name, init.verification_code
    );
    Ok(Json(HandshakeInitResponse {
        auth_url,
        verification_code: init.verification_code,
        expires_in: init.expires_in,
        poll_interval: init.poll_interval,
    }))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    pubkey: String,
}

#[derive(Debug, Serialize)]
struct HandshakeStatusResponse {
    authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn handshake_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<HandshakeStatusResponse>, AppError> {
    let status = Handshake::new(&state.db).status(&query.pubkey).await?;
    Ok(Json(HandshakeStatusResponse {
        authorized: status.authorized,
        expires_at: status.expires_at,
    }))
}

#[derive(Debug, Deserialize)]
struct CompleteRequest {
    pubkey: String,
    verification_code: String,
}

#[derive(Debug, Serialize)]
struct CompleteResponse {
    success: bool,
    expires_at: chrono::DateTime<chrono::Utc>,
}

async fn handshake_complete(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<CompleteResponse>, AppError> {
    let authenticator = Authenticator::new(&state.db, &state.config);
    let ctx = authenticator.authenticate(&method, &uri, &headers, &[]).await?;
    if !ctx.realm.is_user() {
        return Err(AppError::Forbidden(
            "only a logged-in human session may authorize a device".into(),
        ));
    }
    let result = Handshake::new(&state.db)
        .complete(&request.pubkey, &request.verification_code, &ctx.realm)
        .await?;
    Ok(Json(CompleteResponse {
        success: true,
        expires_at: result.expires_at,
    }))
}

#[derive(Debug, Serialize)]
struct ClientResponse {
    pubkey: String,
    client_name: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    expires_at: chrono::DateTime<chrono::Utc>,
}

async fn list_clients(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<Vec<ClientResponse>>, AppError> {
    let authenticator = Authenticator::new(&state.db, &state.config);
    let ctx = authenticator.authenticate(&method, &uri, &headers, &[]).await?;
    if !ctx.realm.is_user() {
        return Err(AppError::Forbidden("only a logged-in human session may list devices".into()));
    }
    let clients = Handshake::new(&state.db).list_authorized(&ctx.realm).await?;
    Ok(Json(
        clients
            .into_iter()
            .map(|c| ClientResponse {
                pubkey: c.pubkey,
                client_name: c.client_name,
                created_at: c.created_at,
                expires_at: c.expires_at,
            })
            .collect(),
    ))
}

async fn revoke_client(
    State(state): State<AppState>,
    Path(pubkey): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<axum::http::StatusCode, AppError> {
    let authenticator = Authenticator::new(&state.db, &state.config);
    let ctx = authenticator.authenticate(&method, &uri, &headers, &[]).await?;
    if !ctx.realm.is_user() {
        return Err(AppError::Forbidden("only a logged-in human session may revoke a device".into()));
    }
    Handshake::new(&state.db).revoke(&pubkey, &ctx.realm).await?;
    Ok(axum::http::StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct TicketCommitWire {
    #[serde(default)]
    quota: Option<u64>,
    #[serde(default)]
    accept: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct CreateTicketRequest {
    #[serde(default)]
    scope: Option<Vec<String>>,
    #[serde(default)]
    commit: Option<TicketCommitWire>,
    #[serde(default, rename = "expiresIn")]
    expires_in: Option<i64>,
}

async fn create_ticket(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<(axum::http::StatusCode, Json<TicketResponse>), AppError> {
    let authenticator = Authenticator::new(&state.db, &state.config);
    let ctx = authenticator.authenticate(&method, &uri, &headers, &body).await?;
    if !ctx.can_issue_ticket {
        return Err(AppError::Forbidden("this token cannot issue tickets".into()));
    }
    let request: CreateTicketRequest = if body.is_empty() {
        CreateTicketRequest {
            scope: None,
            commit: None,
            expires_in: None,
        }
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::InvalidRequest(format!("malformed request: {e}")))?
    };

    let scope = match request.scope {
        Some(keys) => Scope::Keys(keys.into_iter().collect()),
        None => Scope::Unrestricted,
    };
    // commit absent => read-only; commit = {} => unlimited; commit.quota set => limited.
    let commit = request.commit.map(|c| match c.quota {
        Some(quota) => CommitRights::Limited {
            quota,
            accept_list: c.accept.map(|v| v.into_iter().collect()),
        },
        None => CommitRights::Unlimited,
    });
    let config = TicketConfig::default();

    let ticket = TokenStore::new(&state.db)
        .create_ticket(
            &ctx.realm,
            scope,
            commit,
            config,
            request.expires_in.unwrap_or(DEFAULT_TICKET_TTL_SECS),
        )
        .await?;

    let endpoint = format!("/cas/{}", ticket.id);
    Ok((
        axum::http::StatusCode::CREATED,
        Json(TicketResponse {
            id: ticket.id,
            endpoint,
            expires_at: ticket.expires_at,
            realm: ticket.owner_realm.as_str().to_string(),
            scope: ticket.scope,
            commit: ticket.commit,
            config: ticket.config,
        }),
    ))
}

async fn revoke_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<axum::http::StatusCode, AppError> {
    let authenticator = Authenticator::new(&state.db, &state.config);
    let ctx = authenticator.authenticate(&method, &uri, &headers, &[]).await?;
    let store = TokenStore::new(&state.db);
    let ticket = store
        .get_token(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("unknown ticket".into()))?;
    if ticket.realm() != &ctx.realm {
        return Err(AppError::Forbidden("not the owner of this ticket".into()));
    }
    store.delete_token(&id).await?;
    Ok(axum::http::StatusCode::OK)
}
