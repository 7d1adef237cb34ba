// SPDX-License-Identifier: PMPL-1.0-or-later
//! Tank API
//!
//! HTTP surface of a [`Store`]: a streaming watch endpoint that speaks the
//! watch wire protocol understood by `tank-watch-client`.

pub mod error;
mod watch;

use axum::{routing::post, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tank_store::Store;

pub use error::{ApiError, ErrorResponse};

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// API version prefix
    pub version_prefix: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            version_prefix: "/api/v1".to_string(),
        }
    }
}

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
}

impl AppState {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

/// Build the API router
pub fn build_router(config: &ApiConfig, state: AppState) -> Router {
    let prefix = config.version_prefix.trim_end_matches('/');
    Router::new()
        .route(&format!("{prefix}/watch/{{resource}}"), post(watch::watch_handler))
        .with_state(state)
}

/// Install the global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Setting
/// `TANK_LOG_FORMAT=json` switches to JSON lines. Calling this twice is
/// harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("TANK_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    let result = if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Serve the API on `config.host:config.port` until the process stops.
pub async fn serve(config: ApiConfig, store: Store) -> Result<(), std::io::Error> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    serve_on(listener, &config, store).await
}

/// Serve the API on an already bound listener.
pub async fn serve_on(listener: TcpListener, config: &ApiConfig, store: Store) -> Result<(), std::io::Error> {
    let app = build_router(config, AppState::new(store));
    info!(addr = %listener.local_addr()?, prefix = %config.version_prefix, "Starting Tank API server");
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use tank_hierarchy::{HierarchyConfig, HierarchyDriver, InMemoryNodeTree};
    use tank_store::StoreConfig;

    fn hierarchy_store() -> Store {
        let driver = HierarchyDriver::new(
            "zk",
            "cluster",
            Arc::new(InMemoryNodeTree::new()),
            HierarchyConfig::default(),
        );
        Store::with_driver(driver, StoreConfig::default())
    }

    fn watch_request(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_bad_selector_is_400() {
        let app = build_router(&ApiConfig::default(), AppState::new(hierarchy_store()));
        let response = app
            .oneshot(watch_request("/api/v1/watch/nodes", r#"{"selector":"a=1,dangling"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unsupported_backend_is_500() {
        let app = build_router(&ApiConfig::default(), AppState::new(hierarchy_store()));
        let response = app
            .oneshot(watch_request("/api/v1/watch/nodes", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_custom_prefix() {
        let config = ApiConfig {
            version_prefix: "/v2/".to_string(),
            ..ApiConfig::default()
        };
        let app = build_router(&config, AppState::new(hierarchy_store()));
        let response = app
            .clone()
            .oneshot(watch_request("/api/v1/watch/nodes", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = app
            .oneshot(watch_request("/v2/watch/nodes", r#"{"selector":"=x"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
