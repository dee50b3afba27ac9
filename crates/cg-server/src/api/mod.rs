//! HTTP routes served next to the WebSocket endpoints.

mod health;
mod internal;
pub mod middleware;

use std::sync::Arc;

use axum::Router;

use crate::ws::Gateway;

/// Build the API router. The internal routes are only mounted when a token
/// is configured.
pub fn router(gateway: Arc<Gateway>, internal_token: Option<String>) -> Router {
    let api = Router::new().merge(health::router(gateway.clone()));

    let api = match internal_token {
        Some(token) => api.nest("/internal", internal::router(gateway, token)),
        None => api,
    };

    Router::new().nest("/api/v1", api)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::services::error_log::TracingErrorLog;
    use crate::testing::{gateway_config, hasher, seeded_store, StaticValidator};

    fn gateway() -> Arc<Gateway> {
        Arc::new(Gateway::new(
            &gateway_config(),
            seeded_store(),
            Arc::new(StaticValidator::Reject),
            hasher(),
            Arc::new(TracingErrorLog),
        ))
    }

    #[tokio::test]
    async fn internal_routes_absent_without_token() {
        let app = router(gateway(), None);

        let res = app
            .clone()
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["connections"]["sdk"], 0);

        let res = app
            .oneshot(
                Request::get("/api/v1/internal/ws-summary")
                    .header("authorization", "Bearer anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
