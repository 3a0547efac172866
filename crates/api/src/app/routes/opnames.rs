use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use stockledger_infra::services::{NewOpname, OpnamePatch};
use stockledger_opname::OpnameId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ActorContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_opname).get(list_opnames))
        .route("/process", post(bulk_process_opnames))
        .route("/:id", get(get_opname).patch(update_opname))
        .route("/:id/process", post(process_opname))
}

fn parse_opname_id(id: &str) -> Result<OpnameId, axum::response::Response> {
    id.parse().map_err(|_| errors::invalid_id("opname"))
}

pub async fn create_opname(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<NewOpname>,
) -> axum::response::Response {
    match services.engine.opname.create(tenant.tenant_id(), body, actor.user_id()) {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn list_opnames(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::ListOpnamesQuery>,
) -> axum::response::Response {
    let sessions = services.engine.opname.list(tenant.tenant_id(), query.processed);
    (StatusCode::OK, Json(sessions)).into_response()
}

pub async fn get_opname(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let opname_id = match parse_opname_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine.opname.get(tenant.tenant_id(), opname_id) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn update_opname(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<OpnamePatch>,
) -> axum::response::Response {
    let opname_id = match parse_opname_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine.opname.update(tenant.tenant_id(), opname_id, body) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn process_opname(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let opname_id = match parse_opname_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .engine
        .opname
        .process(tenant.tenant_id(), opname_id, actor.user_id())
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn bulk_process_opnames(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::BulkProcessRequest>,
) -> axum::response::Response {
    let results: Vec<serde_json::Value> = services
        .engine
        .opname
        .bulk_process(tenant.tenant_id(), &body.opname_ids, actor.user_id())
        .into_iter()
        .map(|(id, result)| dto::bulk_result_to_json(id, result))
        .collect();
    (StatusCode::OK, Json(serde_json::json!({ "results": results }))).into_response()
}
