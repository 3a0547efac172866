use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use stockledger_infra::services::MovementFilter;
use stockledger_inventory::ProductId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ActorContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/movements", post(append_movement))
        .route("/products/:id", get(get_product_stock))
        .route("/products/:id/movements", get(list_movements))
}

pub async fn append_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::AppendMovementRequest>,
) -> axum::response::Response {
    match services
        .engine
        .ledger
        .append_movement(tenant.tenant_id(), body.into_request(actor.user_id()))
    {
        Ok(movement) => (StatusCode::CREATED, Json(movement)).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn get_product_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::invalid_id("product"),
    };

    match services.engine.ledger.get_current_state(tenant.tenant_id(), product_id) {
        Some(state) => (StatusCode::OK, Json(state)).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "product has no stock movements"),
    }
}

pub async fn list_movements(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Query(filter): Query<MovementFilter>,
) -> axum::response::Response {
    let product_id: ProductId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::invalid_id("product"),
    };

    let page = services
        .engine
        .ledger
        .get_movement_history(tenant.tenant_id(), product_id, &filter);
    (StatusCode::OK, Json(page)).into_response()
}
