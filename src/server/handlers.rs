use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use crate::api::{CniInfo, ErrorResponse, ACTIVE_PODS_URL, ADD_POD_URL, DEL_POD_URL};
use crate::orchestrator::PodNetworkError;
use crate::reconciler::ReconcilerError;
use crate::server::state::AppState;
use crate::store::PodIdentity;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Handler failure rendered as `{error, kind}` with a matching status
#[derive(Debug)]
pub struct ApiFailure {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiFailure {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<PodNetworkError> for ApiFailure {
    fn from(e: PodNetworkError) -> Self {
        let status = match &e {
            PodNetworkError::Validation(_) => StatusCode::BAD_REQUEST,
            PodNetworkError::NotFound(_) => StatusCode::NOT_FOUND,
            PodNetworkError::Conflict(_) => StatusCode::CONFLICT,
            PodNetworkError::RemoteCall { .. }
            | PodNetworkError::PartialSetup { .. }
            | PodNetworkError::Teardown { .. } => StatusCode::BAD_GATEWAY,
            PodNetworkError::Unrecorded { source, .. } if source.is_conflict() => {
                StatusCode::CONFLICT
            }
            PodNetworkError::Unrecorded { .. } | PodNetworkError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            body: ErrorResponse {
                error: e.to_string(),
                kind: e.kind().to_string(),
            },
        }
    }
}

impl From<ReconcilerError> for ApiFailure {
    fn from(e: ReconcilerError) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            body: ErrorResponse {
                error: e.to_string(),
                kind: "cluster".to_string(),
            },
        }
    }
}

/// A body that is not valid JSON or not a `CniInfo`
impl From<JsonRejection> for ApiFailure {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse {
                error: rejection.body_text(),
                kind: "validation".to_string(),
            },
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Request id from the caller, or a fresh one
fn request_id(headers: &HeaderMap) -> Uuid {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4)
}

fn with_request_id(request_id: Uuid, response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Provision the pod network; replays return the stored ids
pub async fn add_pod(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CniInfo>, JsonRejection>,
) -> Response {
    let request_id = request_id(&headers);
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(%request_id, "AddPod rejected: {}", rejection.body_text());
            return with_request_id(request_id, ApiFailure::from(rejection));
        }
    };
    let span = info_span!("add_pod", %request_id, container_id = %request.container_id);

    let result = state.orchestrator.setup(&request).instrument(span).await;
    match result {
        Ok(setup) => with_request_id(request_id, Json(setup)),
        Err(e) => {
            warn!(%request_id, "AddPod failed: {}", e);
            with_request_id(request_id, ApiFailure::from(e))
        }
    }
}

/// Release the pod network
pub async fn del_pod(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CniInfo>, JsonRejection>,
) -> Response {
    let request_id = request_id(&headers);
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(%request_id, "DelPod rejected: {}", rejection.body_text());
            return with_request_id(request_id, ApiFailure::from(rejection));
        }
    };
    let span = info_span!("del_pod", %request_id, container_id = %request.container_id);

    let result = state.orchestrator.teardown(&request).instrument(span).await;
    match result {
        Ok(()) => with_request_id(request_id, Json(json!({}))),
        Err(e) => {
            warn!(%request_id, "DelPod failed: {}", e);
            with_request_id(request_id, ApiFailure::from(e))
        }
    }
}

/// Sandboxes of the running pods on this node
pub async fn active_pods(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let request_id = request_id(&headers);
    let span = info_span!("active_pods", %request_id);

    match state.reconciler.list_active().instrument(span).await {
        Ok(active) => with_request_id(request_id, Json(active)),
        Err(e) => {
            warn!(%request_id, "ActivePods failed: {}", e);
            with_request_id(request_id, ApiFailure::from(e))
        }
    }
}

/// Stored record for one pod
pub async fn get_pod(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Response, ApiFailure> {
    let identity = PodIdentity::new(name, namespace);
    match state.orchestrator.lookup(&identity).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Err(PodNetworkError::NotFound(format!(
            "no network record for pod {}",
            identity
        ))
        .into()),
    }
}

/// Create the Axum router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(ADD_POD_URL, post(add_pod))
        .route(DEL_POD_URL, post(del_pod))
        .route(ACTIVE_PODS_URL, get(active_pods))
        .route("/v1/pods/{namespace}/{name}", get(get_pod))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SetupResult;
    use crate::cache::IdentityCache;
    use crate::cluster::mock::{workload, StaticLister};
    use crate::engine::mock::MockEngine;
    use crate::engine::EngineStep;
    use crate::orchestrator::{OrchestratorConfig, PodNetworkOrchestrator};
    use crate::reconciler::ActiveWorkloadReconciler;
    use crate::store::MemoryStore;
    use axum::{body::Body, http::Request};
    use std::sync::Arc;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        engine: Arc<MockEngine>,
        lister: Arc<StaticLister>,
        netns: NamedTempFile,
    }

    fn create_test_app() -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(MockEngine::new());
        let lister = Arc::new(StaticLister::new(vec![workload("web-0", "Running", false)]));
        let orchestrator = PodNetworkOrchestrator::new(
            store.clone(),
            engine.clone(),
            IdentityCache::new(),
            OrchestratorConfig::default(),
        );
        let reconciler = ActiveWorkloadReconciler::new(store, lister.clone());
        TestApp {
            router: create_router(AppState::new(orchestrator, reconciler)),
            engine,
            lister,
            netns: NamedTempFile::new().unwrap(),
        }
    }

    fn cni_body(app: &TestApp, name: &str) -> String {
        serde_json::json!({
            "container_id": format!("infra-{}", name),
            "netns": app.netns.path().display().to_string(),
            "if_name": "eth0",
            "metadata": {
                "K8S_POD_NAME": name,
                "K8S_POD_NAMESPACE": "default",
            }
        })
        .to_string()
    }

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app();

        let response = app
            .router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_add_pod_then_active_then_del() {
        let app = create_test_app();

        let response = app
            .router
            .clone()
            .oneshot(post_json(ADD_POD_URL, cni_body(&app, "web-0")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        let setup: SetupResult = body_json(response).await;

        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri(ACTIVE_PODS_URL).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let active: serde_json::Map<String, serde_json::Value> = body_json(response).await;
        assert!(active.contains_key(&setup.sandbox_id));

        let response = app
            .router
            .clone()
            .oneshot(post_json(DEL_POD_URL, cni_body(&app, "web-0")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(app.engine.count(EngineStep::DeleteSandbox), 1);
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let app = create_test_app();
        let id = Uuid::new_v4();

        let mut request = post_json(ADD_POD_URL, cni_body(&app, "web-0"));
        request
            .headers_mut()
            .insert(REQUEST_ID_HEADER, id.to_string().parse().unwrap());
        let response = app.router.clone().oneshot(request).await.unwrap();

        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            id.to_string().as_str()
        );
    }

    #[tokio::test]
    async fn test_missing_pod_name_is_bad_request() {
        let app = create_test_app();
        let body = serde_json::json!({
            "container_id": "infra",
            "netns": app.netns.path().display().to_string(),
        })
        .to_string();

        let response = app
            .router
            .clone()
            .oneshot(post_json(ADD_POD_URL, body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse = body_json(response).await;
        assert_eq!(error.kind, "validation");
        assert_eq!(app.engine.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_validation_error() {
        let app = create_test_app();

        for (uri, body) in [
            (ADD_POD_URL, "{}".to_string()),
            (DEL_POD_URL, "not json".to_string()),
        ] {
            let response = app
                .router
                .clone()
                .oneshot(post_json(uri, body))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
            assert!(response.headers().contains_key(REQUEST_ID_HEADER));
            let error: ErrorResponse = body_json(response).await;
            assert_eq!(error.kind, "validation");
            assert!(!error.error.is_empty());
        }
        assert_eq!(app.engine.total_calls(), 0);
    }

    #[test]
    fn test_unrecorded_setup_status_follows_store_error() {
        use crate::orchestrator::CreatedResource;
        use crate::store::StoreError;

        let conflict = ApiFailure::from(PodNetworkError::Unrecorded {
            source: StoreError::Conflict("cni/web-0/default".to_string()),
            created: vec![CreatedResource::Sandbox("sb-1".to_string())],
            compensation_failures: vec![],
        });
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        assert_eq!(conflict.body.kind, "conflict");

        let failed = ApiFailure::from(PodNetworkError::Unrecorded {
            source: StoreError::Task("cancelled".to_string()),
            created: vec![],
            compensation_failures: vec![],
        });
        assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failed.body.kind, "store");
    }

    #[tokio::test]
    async fn test_del_unknown_pod_is_not_found() {
        let app = create_test_app();

        let response = app
            .router
            .clone()
            .oneshot(post_json(DEL_POD_URL, cni_body(&app, "ghost")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let error: ErrorResponse = body_json(response).await;
        assert_eq!(error.kind, "not-found");
    }

    #[tokio::test]
    async fn test_engine_failure_is_bad_gateway() {
        let app = create_test_app();
        app.engine.fail_on(EngineStep::CreateEndpoint);

        let response = app
            .router
            .clone()
            .oneshot(post_json(ADD_POD_URL, cni_body(&app, "web-0")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let error: ErrorResponse = body_json(response).await;
        assert_eq!(error.kind, "partial-setup");
    }

    #[tokio::test]
    async fn test_active_pods_lister_failure() {
        let app = create_test_app();
        app.lister.set_failing(true);

        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri(ACTIVE_PODS_URL).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_get_pod_record() {
        let app = create_test_app();
        app.router
            .clone()
            .oneshot(post_json(ADD_POD_URL, cni_body(&app, "web-0")))
            .await
            .unwrap();

        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/pods/default/web-0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let record: serde_json::Value = body_json(response).await;
        assert_eq!(record["pod_name"], "web-0");
        assert_eq!(record["infra_container_id"], "infra-web-0");

        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/pods/default/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
