//! API routes.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::handlers::{create_submission, health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_logging, security_headers, ClientRateLimiter,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let rate_limiter = Arc::new(ClientRateLimiter::new(
        state.config.rate_limit_rps,
        state.config.rate_limit_burst,
    ));

    let api_routes = Router::new()
        .route("/submissions", post(create_submission))
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_logging))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use reel_media::{MediaError, MediaResult, ToolInvocation, ToolOutput, ToolRunner};
    use reel_queue::NoopSink;
    use reel_storage::{MemoryStore, StageStores, StorageLayout};
    use reel_worker::{PipelineConfig, PipelineContext};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::config::ApiConfig;

    /// Writes `clip.mp4` into the fetch output dir, or fails every run.
    struct StubFetcher {
        fail: bool,
    }

    #[async_trait]
    impl ToolRunner for StubFetcher {
        async fn run(&self, invocation: &ToolInvocation) -> MediaResult<ToolOutput> {
            if self.fail {
                return Err(MediaError::tool_failed(
                    invocation.tool_name(),
                    invocation.args.clone(),
                    "ERROR: video unavailable",
                    Some(1),
                ));
            }
            let template = invocation
                .args
                .iter()
                .position(|a| a == "-o")
                .and_then(|i| invocation.args.get(i + 1))
                .cloned()
                .unwrap_or_default();
            let dir = PathBuf::from(template)
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_default();
            tokio::fs::write(dir.join("stub-clip.mp4"), b"video").await?;
            Ok(ToolOutput::default())
        }
    }

    fn app(fail_fetch: bool, work_dir: &TempDir) -> Router {
        let stores = StageStores::new(Arc::new(MemoryStore::new()), StorageLayout::default());
        let pipeline = PipelineContext::new(
            stores,
            Arc::new(StubFetcher { fail: fail_fetch }),
            Arc::new(NoopSink),
            PipelineConfig::default().with_work_dir(work_dir.path()),
        );
        let state = AppState::with_pipeline(ApiConfig::default(), Arc::new(pipeline));
        create_router(state, None)
    }

    fn submit(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/submissions")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_submission_queued_then_already_present() {
        let work_dir = TempDir::new().unwrap();
        let app = app(false, &work_dir);
        let body = json!({"url": "https://videos.example.com/v/1", "replyTarget": {"channel": "c1"}});

        let response = app.clone().oneshot(submit(body.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = json_body(response).await;
        assert_eq!(json["status"], "queued");
        assert_eq!(json["key"], "stub-clip.mp4");
        assert_eq!(json["stage"], "quarantine");
        assert_eq!(json["replyTarget"]["channel"], "c1");

        let response = app.oneshot(submit(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "already_present");
    }

    #[tokio::test]
    async fn test_invalid_url_is_bad_request() {
        let work_dir = TempDir::new().unwrap();
        let response = app(false, &work_dir)
            .oneshot(submit(json!({"url": "file:///etc/passwd"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "invalid_submission");
    }

    #[tokio::test]
    async fn test_fetch_failure_is_bad_gateway_with_output() {
        let work_dir = TempDir::new().unwrap();
        let response = app(true, &work_dir)
            .oneshot(submit(json!({"url": "https://videos.example.com/v/gone"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = json_body(response).await;
        assert_eq!(json["code"], "fetch_failure");
        assert!(json["detail"].as_str().unwrap().contains("video unavailable"));
    }

    #[tokio::test]
    async fn test_health_ready_and_headers() {
        let work_dir = TempDir::new().unwrap();
        let app = app(false, &work_dir);

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert!(response.headers().contains_key("x-request-id"));

        let response = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "ready");
        assert_eq!(json["buckets"]["reel-normalized"]["status"], "ok");
        assert!(json.get("queue").is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_per_client() {
        let work_dir = TempDir::new().unwrap();
        let mut config = ApiConfig::default();
        config.rate_limit_rps = 1;
        config.rate_limit_burst = 1;
        let stores = StageStores::new(Arc::new(MemoryStore::new()), StorageLayout::default());
        let pipeline = PipelineContext::new(
            stores,
            Arc::new(StubFetcher { fail: false }),
            Arc::new(NoopSink),
            PipelineConfig::default().with_work_dir(work_dir.path()),
        );
        let app = create_router(AppState::with_pipeline(config, Arc::new(pipeline)), None);

        let request = || {
            Request::builder()
                .method("POST")
                .uri("/api/submissions")
                .header("content-type", "application/json")
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::from(json!({"url": "https://videos.example.com/v/1"}).to_string()))
                .unwrap()
        };

        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let second = app.oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
