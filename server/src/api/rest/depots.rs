//! Depot routes: named mutable pointers into the DAG, with list/rollback handlers.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use tangled_common::node::CollectionNode;

use crate::api::rest::types::{
    CreateDepotRequest, DepotHistoryResponse, DepotResponse, ListDepotsResponse, RollbackRequest, UpdateRootRequest,
};
use crate::api::AppState;
use crate::auth::authenticator::Authenticator;
use crate::cas::depot::DepotRegistry;
use crate::error::AppError;

pub fn depot_routes() -> Router<AppState> {
    Router::new()
        .route("/realm/:realm/depots", get(list_depots).post(create_depot))
        .route(
            "/realm/:realm/depots/:name",
            get(get_depot).put(update_root).delete(delete_depot),
        )
        .route("/realm/:realm/depots/:name/history", get(list_history))
        .route("/realm/:realm/depots/:name/rollback", post(rollback))
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
    cursor: Option<String>,
    limit: Option<i64>,
}

async fn list_depots(
    State(state): State<AppState>,
    Path(realm_segment): Path<String>,
    Query(query): Query<ListQuery>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<ListDepotsResponse>, AppError> {
    let (ctx, realm) = resolve(&state, &method, &uri, &headers, &[], &realm_segment).await?;
    if !ctx.can_read {
        return Err(AppError::Forbidden("token does not grant read access".into()));
    }

    let registry = DepotRegistry::new(&state.db);
    registry
        .ensure_main_depot(&realm, &CollectionNode::empty().key())
        .await?;

    let result = registry
        .list(&realm, query.cursor.as_deref(), query.limit.unwrap_or(50))
        .await?;

    Ok(Json(ListDepotsResponse {
        depots: result.depots.into_iter().map(Into::into).collect(),
        next: result.next_cursor,
    }))
}

async fn create_depot(
    State(state): State<AppState>,
    Path(realm_segment): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<DepotResponse>, AppError> {
    let (ctx, realm) = resolve(&state, &method, &uri, &headers, &body, &realm_segment).await?;
    if !ctx.can_write {
        return Err(AppError::Forbidden("token does not grant write access".into()));
    }
    let request: CreateDepotRequest =
        serde_json::from_slice(&body).map_err(|e| AppError::InvalidRequest(format!("malformed request: {e}")))?;

    let registry = DepotRegistry::new(&state.db);
    let depot = registry
        .create(&realm, &request.name, request.root, request.description)
        .await?;
    Ok(Json(depot.into()))
}

async fn get_depot(
    State(state): State<AppState>,
    Path((realm_segment, name)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<DepotResponse>, AppError> {
    let (ctx, realm) = resolve(&state, &method, &uri, &headers, &[], &realm_segment).await?;
    if !ctx.can_read {
        return Err(AppError::Forbidden("token does not grant read access".into()));
    }

    let registry = DepotRegistry::new(&state.db);
    let depot = registry
        .get_by_name(&realm, &name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no such depot: {name}")))?;
    Ok(Json(depot.into()))
}

async fn delete_depot(
    State(state): State<AppState>,
    Path((realm_segment, name)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<axum::http::StatusCode, AppError> {
    let (ctx, realm) = resolve(&state, &method, &uri, &headers, &[], &realm_segment).await?;
    if !ctx.can_write {
        return Err(AppError::Forbidden("token does not grant write access".into()));
    }
    DepotRegistry::new(&state.db).delete(&realm, &name).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn update_root(
    State(state): State<AppState>,
    Path((realm_segment, name)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<DepotResponse>, AppError> {
    let (ctx, realm) = resolve(&state, &method, &uri, &headers, &body, &realm_segment).await?;
    if !ctx.can_write {
        return Err(AppError::Forbidden("token does not grant write access".into()));
    }
    let request: UpdateRootRequest =
        serde_json::from_slice(&body).map_err(|e| AppError::InvalidRequest(format!("malformed request: {e}")))?;

    let ownership = crate::storage::ownership::PgOwnershipIndex::new(&state.db);
    if !crate::storage::ownership::OwnershipIndex::has_ownership(&ownership, &realm, &request.root).await? {
        return Err(AppError::InvalidNode(format!(
            "root {} is not a node owned by this realm",
            request.root
        )));
    }

    let depot = DepotRegistry::new(&state.db)
        .update_root(&realm, &name, &request.root, request.message)
        .await?;
    Ok(Json(depot.into()))
}

async fn list_history(
    State(state): State<AppState>,
    Path((realm_segment, name)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<Vec<DepotHistoryResponse>>, AppError> {
    let (ctx, realm) = resolve(&state, &method, &uri, &headers, &[], &realm_segment).await?;
    if !ctx.can_read {
        return Err(AppError::Forbidden("token does not grant read access".into()));
    }

    let entries = DepotRegistry::new(&state.db)
        .list_history(&realm, &name, query.limit.unwrap_or(100))
        .await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

async fn rollback(
    State(state): State<AppState>,
    Path((realm_segment, name)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<DepotResponse>, AppError> {
    let (ctx, realm) = resolve(&state, &method, &uri, &headers, &body, &realm_segment).await?;
    if !ctx.can_write {
        return Err(AppError::Forbidden("token does not grant write access".into()));
    }
    let request: RollbackRequest =
        serde_json::from_slice(&body).map_err(|e| AppError::InvalidRequest(format!("malformed request: {e}")))?;

    let depot = DepotRegistry::new(&state.db)
        .rollback(&realm, &name, request.version)
        .await?;
    Ok(Json(depot.into()))
}
