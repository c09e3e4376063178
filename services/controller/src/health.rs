//! Health check endpoints.
//!
//! Probes for whatever supervises the controller process.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::model::Service;
use crate::store::ResourceStore;

/// Shared state for the health routes.
#[derive(Clone)]
pub struct HealthState {
    store: Arc<dyn ResourceStore<Service>>,
}

impl HealthState {
    pub fn new(store: Arc<dyn ResourceStore<Service>>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// "ok" or "degraded".
    pub status: String,

    pub service: String,

    pub version: String,

    /// RFC 3339.
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<ComponentStatus>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentStatus {
    /// "ok" or "unavailable".
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Build the health router.
pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn response(status: &str, store: Option<ComponentStatus>) -> HealthResponse {
    HealthResponse {
        status: status.to_string(),
        service: "pac-controller".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        store,
    }
}

/// The process is up. Dependencies are not checked.
async fn healthz() -> impl IntoResponse {
    Json(response("ok", None))
}

/// The resource store answers. 503 otherwise.
async fn readyz(State(state): State<HealthState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(response(
                "ok",
                Some(ComponentStatus {
                    status: "ok".to_string(),
                    message: None,
                }),
            )),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(response(
                "degraded",
                Some(ComponentStatus {
                    status: "unavailable".to_string(),
                    message: Some(e.to_string()),
                }),
            )),
        ),
    }
}

async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::store::{MemoryStore, StoreError, StoreResult};

    struct Unavailable;

    #[async_trait]
    impl ResourceStore<Service> for Unavailable {
        async fn create(&self, _: Service) -> StoreResult<Service> {
            Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
        }
        async fn get(&self, _: &str) -> StoreResult<Option<Service>> {
            Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
        }
        async fn list(&self) -> StoreResult<Vec<Service>> {
            Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
        }
        async fn update(&self, _: Service) -> StoreResult<Option<Service>> {
            Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
        }
        async fn delete(&self, _: &str) -> StoreResult<()> {
            Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
        }
    }

    async fn get(app: Router, path: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_healthz_and_livez() {
        let app = router(HealthState::new(Arc::new(MemoryStore::<Service>::new())));

        let (status, body) = get(app.clone(), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.service, "pac-controller");

        let (status, _) = get(app, "/livez").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_reports_store() {
        let app = router(HealthState::new(Arc::new(MemoryStore::<Service>::new())));
        let (status, body) = get(app, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.store.unwrap().status, "ok");

        let app = router(HealthState::new(Arc::new(Unavailable)));
        let (status, body) = get(app, "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "degraded");
        assert!(health.store.unwrap().message.is_some());
    }
}
