use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    response::IntoResponse,
    routing::get,
};

use crate::app::dto;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/low-stock", get(low_stock))
        .route("/dead-stock", get(dead_stock))
        .route("/valuation", get(valuation))
}

pub async fn low_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> impl IntoResponse {
    Json(services.engine.analytics.low_stock(tenant.tenant_id()))
}

pub async fn dead_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::DeadStockQuery>,
) -> impl IntoResponse {
    let analytics = &services.engine.analytics;
    let window_days = query.window_days.unwrap_or(analytics.default_window_days());
    Json(serde_json::json!({
        "window_days": window_days,
        "items": analytics.dead_stock(tenant.tenant_id(), Some(window_days)),
    }))
}

pub async fn valuation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> impl IntoResponse {
    Json(services.engine.analytics.valuation_report(tenant.tenant_id()))
}
