//! Operator HTTP surface.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::operator::OperatorAuthorizer;
use crate::reconcile::Reconciler;

pub mod api;

pub use api::{AppState, SharedState};

pub fn app_state(
    reconciler: Arc<Reconciler>,
    authorizer: Arc<dyn OperatorAuthorizer>,
) -> SharedState {
    Arc::new(AppState {
        reconciler,
        authorizer,
    })
}

/// Build the full application router.
pub fn build_router(state: SharedState, cors_permissive: bool) -> Router {
    let mut app = api::api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if cors_permissive {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Serve on `addr` until `shutdown` resolves.
pub async fn start_server<F>(addr: &str, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "Operator API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    info!("Operator API shut down");
    Ok(())
}

/// Resolves on Ctrl+C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::TokenAuthorizer;
    use crate::test_support::reconciler_with_store;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_via_full_router() {
        let (_, reconciler) = reconciler_with_store();
        let state = app_state(reconciler, Arc::new(TokenAuthorizer::default()));
        let app = build_router(state, true);
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (_, reconciler) = reconciler_with_store();
        let app = build_router(
            app_state(reconciler, Arc::new(TokenAuthorizer::default())),
            false,
        );
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
