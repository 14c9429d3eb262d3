//! Commit-record routes: lightweight "this root is notable" markers, independent of any
//! depot pointer. Grounded on the same handler shape as `depots.rs`.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::api::rest::types::{CommitRecordResponse, CreateCommitRequest, UpdateCommitTitleRequest};
use crate::api::AppState;
use crate::auth::authenticator::Authenticator;
use crate::cas::commit_record::CommitRegistry;
use crate::error::AppError;
use crate::storage::ownership::{OwnershipIndex, PgOwnershipIndex};

pub fn commit_routes() -> Router<AppState> {
    Router::new()
        .route("/realm/:realm/commits", get(list_commits).post(create_commit))
        .route(
            "/realm/:realm/commits/:root",
            get(get_commit).patch(update_commit).delete(delete_commit),
        )
        // Singular alias, body `{ tree | root, title? }` — shorthand for "create a commit
        // record for this tree" alongside the plural collection route above.
        .route("/realm/:realm/commit", axum::routing::post(create_commit))
}

async fn resolve(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
    realm_segment: &str,
) -> Result<(crate::auth::AuthContext, tangled_common::realm::Realm), AppError> {
    let authenticator = Authenticator::new(&state.db, &state.config);
    let ctx = authenticator.authenticate(method, uri, headers, body).await?;
    let realm = Authenticator::resolve_realm(&ctx, realm_segment)?;
    Ok((ctx, realm))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

async fn list_commits(
    State(state): State<AppState>,
    Path(realm_segment): Path<String>,
    Query(query): Query<ListQuery>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<Vec<CommitRecordResponse>>, AppError> {
    let (ctx, realm) = resolve(&state, &method, &uri, &headers, &[], &realm_segment).await?;
    if !ctx.can_read {
        return Err(AppError::Forbidden("token does not grant read access".into()));
    }
    let records = CommitRegistry::new(&state.db)
        .list(&realm, query.limit.unwrap_or(50))
        .await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

async fn create_commit(
    State(state): State<AppState>,
    Path(realm_segment): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<CommitRecordResponse>, AppError> {
    let (ctx, realm) = resolve(&state, &method, &uri, &headers, &body, &realm_segment).await?;
    if !ctx.can_write {
        return Err(AppError::Forbidden("token does not grant write access".into()));
    }
    let request: CreateCommitRequest =
        serde_json::from_slice(&body).map_err(|e| AppError::InvalidRequest(format!("malformed request: {e}")))?;

    let ownership = PgOwnershipIndex::new(&state.db);
    if !ownership.has_ownership(&realm, &request.root).await? {
        return Err(AppError::InvalidNode(format!(
            "root {} is not a node owned by this realm",
            request.root
        )));
    }

    let record = CommitRegistry::new(&state.db)
        .create(&realm, &request.root, &ctx.token_id, request.title)
        .await?;
    Ok(Json(record.into()))
}

async fn get_commit(
    State(state): State<AppState>,
    Path((realm_segment, root)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<CommitRecordResponse>, AppError> {
    let (ctx, realm) = resolve(&state, &method, &uri, &headers, &[], &realm_segment).await?;
    if !ctx.can_read {
        return Err(AppError::Forbidden("token does not grant read access".into()));
    }
    let record = CommitRegistry::new(&state.db)
        .get(&realm, &root)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no commit record for root {root}")))?;
    Ok(Json(record.into()))
}

async fn update_commit(
    State(state): State<AppState>,
    Path((realm_segment, root)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<axum::http::StatusCode, AppError> {
    let (ctx, realm) = resolve(&state, &method, &uri, &headers, &body, &realm_segment).await?;
    if !ctx.can_write {
        return Err(AppError::Forbidden("token does not grant write access".into()));
    }
    let request: UpdateCommitTitleRequest =
        serde_json::from_slice(&body).map_err(|e| AppError::InvalidRequest(format!("malformed request: {e}")))?;
    CommitRegistry::new(&state.db)
        .update_title(&realm, &root, request.title)
        .await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn delete_commit(
    State(state): State<AppState>,
    Path((realm_segment, root)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<axum::http::StatusCode, AppError> {
    let (ctx, realm) = resolve(&state, &method, &uri, &headers, &[], &realm_segment).await?;
    if !ctx.can_write {
        return Err(AppError::Forbidden("token does not grant write access".into()));
    }
    CommitRegistry::new(&state.db).delete(&realm, &root).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
