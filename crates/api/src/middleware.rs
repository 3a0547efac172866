use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use stockledger_core::{TenantId, UserId};

use crate::app::errors;
use crate::context::{ActorContext, TenantContext};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";

/// Resolve tenant and actor from the identity headers set by the gateway.
pub async fn identity_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let (tenant_id, user_id) = match (
        header_id::<TenantId>(req.headers(), TENANT_HEADER),
        header_id::<UserId>(req.headers(), USER_HEADER),
    ) {
        (Some(t), Some(u)) => (t, u),
        _ => {
            return errors::json_error(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                format!("{TENANT_HEADER} and {USER_HEADER} headers must carry valid UUIDs"),
            );
        }
    };

    req.extensions_mut().insert(TenantContext::new(tenant_id));
    req.extensions_mut().insert(ActorContext::new(user_id));

    next.run(req).await
}

fn header_id<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}
