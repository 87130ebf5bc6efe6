//! HTTP surface for the lifecycle manager.
//!
//! Thin JSON handlers over the core operations. The interesting part is the
//! error mapping: capacity exhaustion is distinguishable from a generic
//! server failure so the front end can implement backoff, and a session whose
//! sandbox vanished out-of-band is reported as 410 rather than 404, since the
//! caller's reference existed and is simply no longer valid.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use berth::{Error, Provisioner, SandboxRuntime, SandboxState, Session, SessionRegistry};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub provisioner: Arc<Provisioner>,
    pub registry: Arc<SessionRegistry>,
    pub runtime: Arc<dyn SandboxRuntime>,
    pub stop_grace: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/api/container", post(provision))
        .route("/api/containers", get(list))
        .route("/api/container/{id}", get(status).delete(destroy))
        .with_state(state)
}

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::CapacityExceeded => StatusCode::SERVICE_UNAVAILABLE,
            Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Error::SandboxGone(_) => StatusCode::GONE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionResponse {
    session_id: String,
    workspace_path: String,
}

#[derive(Serialize)]
struct ListResponse {
    count: usize,
    sessions: Vec<Session>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    session_id: String,
    sandbox_name: String,
    workspace_path: String,
    status: SandboxState,
    created_at: i64,
    last_active: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DestroyResponse {
    message: String,
    session_id: String,
}

async fn banner() -> &'static str {
    concat!("berth ", env!("CARGO_PKG_VERSION"), "\n")
}

async fn provision(State(state): State<AppState>) -> Result<Json<ProvisionResponse>, ApiError> {
    let session = state.provisioner.provision().await?;
    Ok(Json(ProvisionResponse {
        session_id: session.session_id,
        workspace_path: session.workspace_path,
    }))
}

async fn list(State(state): State<AppState>) -> Result<Json<ListResponse>, ApiError> {
    let sessions = state.registry.list_all().await?;
    Ok(Json(ListResponse {
        count: sessions.len(),
        sessions,
    }))
}

async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let session = state
        .registry
        .get(&id)
        .await?
        .ok_or_else(|| Error::SessionNotFound(id.clone()))?;

    let status = state
        .runtime
        .inspect(&session.sandbox_name)
        .await?
        .ok_or_else(|| Error::SandboxGone(session.session_id.clone()))?;

    // Reading a session is user activity as seen from the front end; a
    // failure to record it is not worth failing the read over.
    if let Err(e) = state.registry.touch(&id).await {
        warn!(session_id = %id, error = %e, "failed to record session activity");
    }

    Ok(Json(StatusResponse {
        session_id: session.session_id,
        sandbox_name: session.sandbox_name,
        workspace_path: session.workspace_path,
        status,
        created_at: session.created_at,
        last_active: session.last_active,
    }))
}

async fn destroy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DestroyResponse>, ApiError> {
    let session = state
        .registry
        .get(&id)
        .await?
        .ok_or_else(|| Error::SessionNotFound(id.clone()))?;

    // A non-tolerated stop failure leaves the record in place so the client
    // can retry the delete.
    state
        .runtime
        .stop(&session.sandbox_name, state.stop_grace)
        .await?;
    state.registry.delete(&id).await?;

    Ok(Json(DestroyResponse {
        message: "sandbox destroyed".to_string(),
        session_id: id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use berth::{
        AdmissionController, LaunchSpec, LifecycleConfig, MemoryStore, Result as CoreResult,
        StateStore,
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeRuntime {
        gone: Mutex<HashSet<String>>,
    }

    impl FakeRuntime {
        fn mark_gone(&self, name: &str) {
            self.gone.lock().unwrap().insert(name.to_string());
        }
    }

    #[async_trait]
    impl SandboxRuntime for FakeRuntime {
        async fn create(&self, _name: &str, _spec: &LaunchSpec) -> CoreResult<()> {
            Ok(())
        }

        async fn start(&self, _name: &str) -> CoreResult<()> {
            Ok(())
        }

        async fn inspect(&self, name: &str) -> CoreResult<Option<SandboxState>> {
            if self.gone.lock().unwrap().contains(name) {
                return Ok(None);
            }
            Ok(Some(SandboxState::Running))
        }

        async fn stop(&self, _name: &str, _grace: Duration) -> CoreResult<()> {
            Ok(())
        }

        async fn remove(&self, _name: &str) -> CoreResult<()> {
            Ok(())
        }

        async fn wait_exit(&self, _name: &str) -> CoreResult<()> {
            std::future::pending().await
        }
    }

    fn make_app(max_sandboxes: i64) -> (Router, Arc<FakeRuntime>) {
        let config = LifecycleConfig {
            max_sandboxes,
            ..LifecycleConfig::default()
        };
        let runtime = Arc::new(FakeRuntime::default());
        let store = Arc::new(MemoryStore::new()) as Arc<dyn StateStore>;
        let admission = Arc::new(AdmissionController::new(store.clone(), max_sandboxes));
        let registry = Arc::new(SessionRegistry::new(store, admission.clone()));
        let provisioner = Arc::new(Provisioner::new(
            registry.clone(),
            admission,
            runtime.clone() as Arc<dyn SandboxRuntime>,
            config.clone(),
        ));
        let state = AppState {
            provisioner,
            registry,
            runtime: runtime.clone() as Arc<dyn SandboxRuntime>,
            stop_grace: config.stop_grace,
        };
        (router(state), runtime)
    }

    async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    #[tokio::test]
    async fn provision_returns_session_id_and_workspace() {
        let (app, _) = make_app(10);
        let (status, body) = send(&app, "POST", "/api/container").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessionId"].as_str().unwrap().len(), 32);
        assert_eq!(body["workspacePath"], "/workspace");
    }

    #[tokio::test]
    async fn provision_at_capacity_returns_503() {
        let (app, _) = make_app(1);
        let (status, _) = send(&app, "POST", "/api/container").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "POST", "/api/container").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "sandbox capacity exceeded");
    }

    #[tokio::test]
    async fn list_reports_all_active_sessions() {
        let (app, _) = make_app(10);
        send(&app, "POST", "/api/container").await;
        send(&app, "POST", "/api/container").await;

        let (status, body) = send(&app, "GET", "/api/containers").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["sessions"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn status_of_unknown_session_returns_404() {
        let (app, _) = make_app(10);
        let (status, _) = send(&app, "GET", "/api/container/deadbeef").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_of_live_session_includes_runtime_state() {
        let (app, _) = make_app(10);
        let (_, created) = send(&app, "POST", "/api/container").await;
        let id = created["sessionId"].as_str().unwrap();

        let (status, body) = send(&app, "GET", &format!("/api/container/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessionId"], *id);
        assert_eq!(body["sandboxName"], format!("sbx-{id}"));
        assert_eq!(body["status"], "running");
        assert!(body["createdAt"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn status_of_vanished_sandbox_returns_410() {
        let (app, runtime) = make_app(10);
        let (_, created) = send(&app, "POST", "/api/container").await;
        let id = created["sessionId"].as_str().unwrap();
        runtime.mark_gone(&format!("sbx-{id}"));

        let (status, _) = send(&app, "GET", &format!("/api/container/{id}")).await;
        assert_eq!(status, StatusCode::GONE);
    }

    #[tokio::test]
    async fn destroy_removes_the_session() {
        let (app, _) = make_app(10);
        let (_, created) = send(&app, "POST", "/api/container").await;
        let id = created["sessionId"].as_str().unwrap();

        let (status, body) = send(&app, "DELETE", &format!("/api/container/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessionId"], *id);

        let (status, _) = send(&app, "GET", &format!("/api/container/{id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn destroy_of_unknown_session_returns_404() {
        let (app, _) = make_app(10);
        let (status, _) = send(&app, "DELETE", "/api/container/deadbeef").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
