use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::put,
};

use stockledger_inventory::ProductId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

/// Threshold registration against the in-memory catalog used by the dev server.
pub fn router() -> Router {
    Router::new().route("/products/:id", put(upsert_product))
}

pub async fn upsert_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpsertCatalogProductRequest>,
) -> axum::response::Response {
    let product_id: ProductId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::invalid_id("product"),
    };

    match services
        .catalog
        .upsert(tenant.tenant_id(), product_id, body.min_stock_threshold)
    {
        Ok(product) => (StatusCode::OK, Json(product)).into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}
