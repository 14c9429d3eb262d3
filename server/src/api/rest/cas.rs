//! The CAS data-plane routes: chunk upload, commit, tree reads, raw reads.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;

use tangled_common::digest::is_well_formed_key;
use tangled_common::node::NodeKind;

use crate::api::rest::types::{ChunkUploadResponse, CommitRequestBody, CommitResponseBody, TreeResponseBody};
use crate::api::AppState;
use crate::auth::authenticator::Authenticator;
use crate::auth::token::{Token, TokenStore};
use crate::cas::admitter::{self, CommitOutcome};
use crate::error::AppError;
use crate::storage::ownership::{OwnershipIndex, PgOwnershipIndex};
use crate::storage::tree_walker;

const DEFAULT_NODE_BUDGET: usize = 1000;

pub fn cas_routes() -> Router<AppState> {
    Router::new()
        .route("/cas/:realm/chunk/:key", put(put_chunk))
        .route("/cas/:realm/commit", post(commit))
        .route("/cas/:realm/tree/:root", get(get_tree))
        .route("/cas/:realm/raw/:key", get(get_raw))
        .route("/cas/:realm/nodes", get(list_nodes))
}

async fn resolve_context_and_realm(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
    realm_segment: &str,
) -> Result<(crate::auth::AuthContext, tangled_common::realm::Realm), AppError> {
    let authenticator = Authenticator::new(&state.db, &state.config);
    if let Some(ctx) = authenticator.authenticate_path_realm(realm_segment).await? {
        let realm = ctx.realm.clone();
        return Ok((ctx, realm));
    }
    let ctx = authenticator.authenticate(method, uri, headers, body).await?;
    let realm = Authenticator::resolve_realm(&ctx, realm_segment)?;
    Ok((ctx, realm))
}

async fn put_chunk(
    State(state): State<AppState>,
    Path((realm_segment, key)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ChunkUploadResponse>, AppError> {
    if !is_well_formed_key(&key) {
        return Err(AppError::InvalidRequest(format!("malformed key: {key}")));
    }
    let (ctx, _realm) = resolve_context_and_realm(&state, &method, &uri, &headers, &body, &realm_segment).await?;
    if !ctx.can_write {
        return Err(AppError::Forbidden("token does not grant write access".into()));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    match state.blob_store.put_with_key(&key, &body, &content_type).await? {
        Ok(result) => Ok(Json(ChunkUploadResponse { key, size: result.size })),
        Err(mismatch) => Err(AppError::HashMismatch(format!(
            "expected {}, got {}",
            mismatch.expected, mismatch.actual
        ))),
    }
}

async fn commit(
    State(state): State<AppState>,
    Path(realm_segment): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CommitResponseBody>, AppError> {
    let (ctx, realm) = resolve_context_and_realm(&state, &method, &uri, &headers, &body, &realm_segment).await?;
    let request: CommitRequestBody =
        serde_json::from_slice(&body).map_err(|e| AppError::InvalidRequest(format!("malformed commit body: {e}")))?;

    let token = TokenStore::new(&state.db).get_token(&ctx.token_id).await?;
    let ownership = PgOwnershipIndex::new(&state.db);

    let outcome = admitter::commit(
        &ownership,
        state.blob_store.as_ref(),
        &ctx,
        token.as_ref(),
        &realm,
        request.into(),
    )
    .await?;

    match outcome {
        CommitOutcome::Success { root, committed } => Ok(Json(CommitResponseBody {
            success: true,
            root,
            committed,
        })),
        CommitOutcome::MissingNodes(missing) => Err(AppError::MissingNodes(missing)),
    }
}

#[derive(Debug, Deserialize)]
struct TreeQuery {
    budget: Option<usize>,
}

async fn get_tree(
    State(state): State<AppState>,
    Path((realm_segment, root)): Path<(String, String)>,
    Query(query): Query<TreeQuery>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<TreeResponseBody>, AppError> {
    let (ctx, realm) = resolve_context_and_realm(&state, &method, &uri, &headers, &[], &realm_segment).await?;
    if !ctx.can_read {
        return Err(AppError::Forbidden("token does not grant read access".into()));
    }

    let ownership = PgOwnershipIndex::new(&state.db);
    let result = tree_walker::get_tree(
        &ownership,
        state.blob_store.as_ref(),
        &realm,
        &root,
        query.budget.unwrap_or(DEFAULT_NODE_BUDGET),
    )
    .await?;

    Ok(Json(result.into()))
}

async fn get_raw(
    State(state): State<AppState>,
    Path((realm_segment, key)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (ctx, realm) = resolve_context_and_realm(&state, &method, &uri, &headers, &[], &realm_segment).await?;
    if !ctx.can_read {
        return Err(AppError::Forbidden("token does not grant read access".into()));
    }

    if ctx.token_id.starts_with("tkt_") {
        let token = TokenStore::new(&state.db)
            .get_token(&ctx.token_id)
            .await?
            .ok_or_else(|| AppError::Gone("ticket expired".into()))?;
        if let Token::Ticket(ticket) = token {
            if !ticket.scope.allows(&key) {
                return Err(AppError::Forbidden("key is outside ticket scope".into()));
            }
        }
    }

    let ownership = PgOwnershipIndex::new(&state.db);
    if !ownership.has_ownership(&realm, &key).await? {
        return Err(AppError::NotFound(format!("no such key in this realm: {key}")));
    }

    let Some((bytes, meta)) = state.blob_store.get(&key).await? else {
        return Err(AppError::NotFound(format!("no such key: {key}")));
    };

    let node_kind = NodeKind::from_content_type(&meta.content_type);
    // An inline file's stored label (CONTENT_TYPE_INLINE_FILE) is a dispatch tag, not a
    // content type a client should ever see — both headers report the logical type the
    // committer declared for the file, same as a plain chunk would if it weren't wrapped
    // in a manifest.
    let (display_content_type, wire_content_type) = if node_kind == NodeKind::InlineFile {
        let logical = meta
            .logical_content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        (logical.clone(), logical)
    } else if node_kind.is_manifest() {
        ("application/json".to_string(), meta.content_type.clone())
    } else {
        (meta.content_type.clone(), meta.content_type.clone())
    };

    let mut response = (
        [
            (header::CONTENT_TYPE, display_content_type),
            ("x-cas-content-type".to_string().parse().unwrap(), wire_content_type),
            ("x-cas-size".parse().unwrap(), meta.size.to_string()),
        ],
        bytes,
    )
        .into_response();
    *response.status_mut() = axum::http::StatusCode::OK;
    Ok(response)
}

#[derive(Debug, Deserialize)]
struct ListNodesQuery {
    cursor: Option<String>,
    limit: Option<i64>,
}

async fn list_nodes(
    State(state): State<AppState>,
    Path(realm_segment): Path<String>,
    Query(query): Query<ListNodesQuery>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let (ctx, realm) = resolve_context_and_realm(&state, &method, &uri, &headers, &[], &realm_segment).await?;
    if !ctx.can_read {
        return Err(AppError::Forbidden("token does not grant read access".into()));
    }

    let ownership = PgOwnershipIndex::new(&state.db);
    let result = ownership
        .list_nodes(&realm, query.limit.unwrap_or(100), query.cursor.as_deref())
        .await?;

    Ok(Json(serde_json::json!({
        "nodes": result.nodes.iter().map(|n| serde_json::json!({
            "key": n.key,
            "contentType": n.content_type,
            "size": n.size,
            "createdAt": n.created_at,
            "createdBy": n.created_by,
        })).collect::<Vec<_>>(),
        "nextCursor": result.next_cursor,
        "total": result.total,
    })))
}
