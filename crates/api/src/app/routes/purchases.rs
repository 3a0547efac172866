use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use stockledger_infra::services::{NewPurchaseOrder, PurchaseOrderPatch};
use stockledger_purchasing::PurchaseOrderId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ActorContext, TenantContext};

pub fn router() -> Router {
    Router::new().nest("/orders", orders_router())
}

fn orders_router() -> Router {
    Router::new()
        .route("/", post(create_purchase_order).get(list_purchase_orders))
        .route("/:id", get(get_purchase_order).patch(update_purchase_order))
        .route("/:id/submit", post(submit_purchase_order))
        .route("/:id/receive", post(receive_purchase_order_goods))
        .route("/:id/cancel", post(cancel_purchase_order))
}

fn parse_order_id(id: &str) -> Result<PurchaseOrderId, axum::response::Response> {
    id.parse().map_err(|_| errors::invalid_id("purchase order"))
}

pub async fn create_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<NewPurchaseOrder>,
) -> axum::response::Response {
    match services
        .engine
        .purchasing
        .create(tenant.tenant_id(), body, actor.user_id())
    {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn list_purchase_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::ListPurchaseOrdersQuery>,
) -> axum::response::Response {
    let orders = services.engine.purchasing.list(tenant.tenant_id(), query.status);
    (StatusCode::OK, Json(orders)).into_response()
}

pub async fn get_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let po_id = match parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine.purchasing.get(tenant.tenant_id(), po_id) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn update_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<PurchaseOrderPatch>,
) -> axum::response::Response {
    let po_id = match parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine.purchasing.update(tenant.tenant_id(), po_id, body) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn submit_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let po_id = match parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine.purchasing.submit(tenant.tenant_id(), po_id) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn receive_purchase_order_goods(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReceiveGoodsRequest>,
) -> axum::response::Response {
    let po_id = match parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .engine
        .purchasing
        .receive(tenant.tenant_id(), po_id, body.lines, actor.user_id())
    {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn cancel_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::CancelPurchaseOrderRequest>>,
) -> axum::response::Response {
    let po_id = match parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let reason = body.and_then(|Json(b)| b.reason);

    match services.engine.purchasing.cancel(tenant.tenant_id(), po_id, reason) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
