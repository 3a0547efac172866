use axum::Router;

pub mod analytics;
pub mod catalog;
pub mod ledger;
pub mod opnames;
pub mod purchases;
pub mod system;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/ledger", ledger::router())
        .nest("/catalog", catalog::router())
        .nest("/purchases", purchases::router())
        .nest("/opnames", opnames::router())
        .nest("/analytics", analytics::router())
}
