//! API server lifecycle.
//!
//! A component serves two things on one socket: its own routes under `/api`,
//! wrapped in the CORS policy, and the process metrics under `/metrics`.

use crate::cors::cors_layer;
use crate::error::ServeError;
use crate::handlers::metrics;
use axum::Router;
use axum::routing::get;
use plinth_runtime::PrometheusHandle;
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Pick the address to bind: a non-empty `bind` wins, otherwise `listen`.
///
/// `listen` is where siblings reach the component; `bind` overrides it when
/// the process must bind somewhere else (all interfaces inside a container).
#[must_use]
pub fn resolve_bind_address<'a>(bind: &'a str, listen: &'a str) -> &'a str {
    if bind.is_empty() { listen } else { bind }
}

/// Assemble the served application from a component router.
#[must_use]
pub fn build_app(api: Router, metrics_handle: PrometheusHandle) -> Router {
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .nest("/api", api.layer(cors_layer()))
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
}

/// Bind the listen socket.
///
/// # Errors
///
/// Returns [`ServeError::Bind`] if the address is invalid or in use.
pub async fn bind(address: &str) -> Result<TcpListener, ServeError> {
    TcpListener::bind(address)
        .await
        .map_err(|e| ServeError::Bind {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Serve `app` on `listener` until the accept loop fails.
///
/// # Errors
///
/// Returns [`ServeError::Serve`] when the server stops.
pub async fn serve(component: &str, listener: TcpListener, app: Router) -> Result<(), ServeError> {
    serve_with_shutdown(component, listener, app, std::future::pending()).await
}

/// Serve `app` on `listener` until `shutdown` resolves or the accept loop fails.
///
/// # Errors
///
/// Returns [`ServeError::Serve`] if the accept loop fails.
pub async fn serve_with_shutdown<F>(
    component: &str,
    listener: TcpListener,
    app: Router,
    shutdown: F,
) -> Result<(), ServeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = listener
        .local_addr()
        .map_or_else(|_| "unknown".to_string(), |a| a.to_string());

    tracing::info!("Starting {component} server on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServeError::Serve {
            address: address.clone(),
            reason: e.to_string(),
        })?;

    tracing::info!(component, %address, "Server stopped");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use axum::routing::post;
    use proptest::prelude::*;
    use tower::ServiceExt;

    fn app() -> Router {
        let api = Router::new().route("/roomserver/ping", post(|| async { "pong" }));
        build_app(api, plinth_runtime::prometheus_handle().unwrap())
    }

    proptest! {
        #[test]
        fn bind_wins_when_present(bind in "[a-z0-9.:]{1,20}", listen in "[a-z0-9.:]{0,20}") {
            prop_assert_eq!(resolve_bind_address(&bind, &listen), bind.as_str());
        }

        #[test]
        fn listen_is_used_when_bind_is_empty(listen in "[a-z0-9.:]{0,20}") {
            prop_assert_eq!(resolve_bind_address("", &listen), listen.as_str());
        }
    }

    #[tokio::test]
    async fn component_routes_are_under_api() {
        let response = app()
            .oneshot(
                Request::post("/api/roomserver/ping")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app()
            .oneshot(Request::post("/roomserver/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn preflight_is_permissive() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/roomserver/ping")
                    .header(header::ORIGIN, "https://console.example.org")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap();
        for method in ["POST", "GET", "OPTIONS", "PUT", "DELETE"] {
            assert!(methods.contains(method), "{method} missing from {methods}");
        }
        let allowed = headers[header::ACCESS_CONTROL_ALLOW_HEADERS]
            .to_str()
            .unwrap()
            .to_ascii_lowercase();
        assert!(allowed.contains("authorization"));
        assert!(allowed.contains("x-requested-with"));
    }

    #[tokio::test]
    async fn metrics_are_rendered_as_prometheus_text() {
        let response = app()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            metrics::PROMETHEUS_CONTENT_TYPE
        );
    }

    #[tokio::test]
    async fn binding_a_taken_port_fails() {
        let taken = bind("127.0.0.1:0").await.unwrap();
        let address = taken.local_addr().unwrap().to_string();
        let err = bind(&address).await.unwrap_err();
        assert!(matches!(err, ServeError::Bind { .. }));
    }

    #[tokio::test]
    async fn graceful_shutdown_returns_ok() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let result = serve_with_shutdown("test", listener, app(), async {}).await;
        assert_eq!(result, Ok(()));
    }
}
