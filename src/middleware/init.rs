//! Tower layer placing an [`InitGate`] in front of the API.
//!
//! # Request Flow
//!
//! ```text
//! gate open (disabled or initialized) ──────────────────────► inner service
//! bypass path (/health, /ready) ────────────────────────────► inner service
//! api_action=APIBox.Init ──► apply settings, open gate ──────► 200 {"CODE":"ok","DATA":null}
//! anything else ─────────────────────────────────────────────► 503 {"CODE":"ModuleInitWaiting",...}
//! ```
//!
//! Once the gate is open the layer costs one atomic load per request. While
//! it is waiting the body is buffered (up to the configured limit) to read
//! the action, and handed on intact if the request ends up passing through.
//!
//! Post-init callbacks ride on the body of the init response: they start
//! when that body has been streamed out, or when it is dropped unread.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::CONTENT_LENGTH;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use futures_util::{StreamExt, future, stream};
use tower::{Layer, Service};
use tracing::debug;

use super::params::ApiParams;
use crate::config::Config;
use crate::error::{ApiError, AppError, GateError, Lang};
use crate::gate::{Decision, InitGate, PendingCallbacks};
use crate::metrics;
use crate::models::ApiResponse;

/// Default limit for buffered request bodies (1MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Initialization gate layer.
#[derive(Clone)]
pub struct InitGateLayer {
    gate: Arc<InitGate>,
    bypass_paths: Arc<Vec<String>>,
    default_lang: Lang,
    max_body_size: usize,
}

impl InitGateLayer {
    /// Gate every path, answer in English, buffer up to 1MB.
    pub fn new(gate: Arc<InitGate>) -> Self {
        Self {
            gate,
            bypass_paths: Arc::new(Vec::new()),
            default_lang: Lang::default(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Take bypass paths, default language and body limit from `config`.
    pub fn from_config(gate: Arc<InitGate>, config: &Config) -> Self {
        Self::new(gate)
            .with_bypass_paths(config.init_bypass_paths.clone())
            .with_default_lang(config.default_lang)
            .with_max_body_size(config.max_request_body_size)
    }

    /// Paths served even while the gate is waiting (exact match).
    pub fn with_bypass_paths(mut self, paths: Vec<String>) -> Self {
        self.bypass_paths = Arc::new(paths);
        self
    }

    pub fn with_default_lang(mut self, lang: Lang) -> Self {
        self.default_lang = lang;
        self
    }

    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }
}

impl<S> Layer<S> for InitGateLayer {
    type Service = InitGateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InitGateService {
            inner,
            gate: self.gate.clone(),
            bypass_paths: self.bypass_paths.clone(),
            default_lang: self.default_lang,
            max_body_size: self.max_body_size,
        }
    }
}

/// Initialization gate service wrapper.
#[derive(Clone)]
pub struct InitGateService<S> {
    inner: S,
    gate: Arc<InitGate>,
    bypass_paths: Arc<Vec<String>>,
    default_lang: Lang,
    max_body_size: usize,
}

impl<S> Service<Request<Body>> for InitGateService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let gate = self.gate.clone();
        let bypass_paths = self.bypass_paths.clone();
        let default_lang = self.default_lang;
        let max_body_size = self.max_body_size;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if gate.is_open() {
                metrics::record_decision(Decision::PassThrough.as_str());
                return inner.call(req).await;
            }

            let path = req.uri().path();
            if bypass_paths.iter().any(|p| p == path) {
                debug!(path, "Bypassing initialization gate");
                metrics::record_decision("bypass");
                return inner.call(req).await;
            }

            if declared_length(&req).is_some_and(|len| len > max_body_size) {
                return Ok(AppError::PayloadTooLarge(format!(
                    "declared body exceeds {max_body_size} bytes"
                ))
                .into_response());
            }

            let (parts, body) = req.into_parts();
            let bytes = match axum::body::to_bytes(body, max_body_size).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    return Ok(
                        AppError::BadRequest(format!("Failed to read request body: {e}"))
                            .into_response(),
                    );
                }
            };

            let params = ApiParams::from_parts(&parts, &bytes).await;
            let lang = params.lang().unwrap_or(default_lang);
            let decision = gate.decide(params.action());
            metrics::record_decision(decision.as_str());

            match decision {
                Decision::PassThrough => inner.call(Request::from_parts(parts, Body::from(bytes))).await,
                Decision::HandleInit => match gate.initialize(params.as_map()) {
                    Ok(initialized) => Ok(init_response(initialized.callbacks)),
                    Err(GateError::AlreadyInitialized) => {
                        inner.call(Request::from_parts(parts, Body::from(bytes))).await
                    }
                    Err(GateError::InitInProgress) => {
                        debug!("Initialization already running, asking caller to wait");
                        Ok(ApiError::ModuleInitWaiting.localized(lang).into_response())
                    }
                },
                Decision::Reject => {
                    debug!(
                        path = %parts.uri.path(),
                        action = params.action().unwrap_or(""),
                        "Rejecting request, gateway is waiting for initialization"
                    );
                    Ok(ApiError::ModuleInitWaiting.localized(lang).into_response())
                }
            }
        })
    }
}

/// `{"CODE":"ok","DATA":null}` whose body starts `callbacks` after its last
/// chunk.
fn init_response(callbacks: PendingCallbacks) -> Response<Body> {
    let response = ApiResponse::empty().into_response();
    if callbacks.is_empty() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let chunks = body.into_data_stream().map(Some);
    let trailer = stream::once(async move {
        callbacks.dispatch();
        None
    });

    Response::from_parts(
        parts,
        Body::from_stream(chunks.chain(trailer).filter_map(future::ready)),
    )
}

fn declared_length<B>(req: &Request<B>) -> Option<usize> {
    req.headers()
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::http::StatusCode;
    use tower::ServiceExt;
    use tower::service_fn;

    use super::*;
    use crate::gate::INIT_ACTION;
    use crate::targets::{APISIGN, MiddlewareRegistry, SignValidator};

    async fn echo(req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let body = axum::body::to_bytes(req.into_body(), usize::MAX)
            .await
            .unwrap();
        Ok(Response::new(Body::from(body)))
    }

    fn service(
        gate: Arc<InitGate>,
    ) -> InitGateService<
        impl Service<Request<Body>, Response = Response<Body>, Error = Infallible, Future: Send>
        + Clone
        + Send
        + 'static,
    > {
        InitGateLayer::new(gate)
            .with_bypass_paths(vec!["/health".to_string()])
            .with_max_body_size(64)
            .layer(service_fn(echo))
    }

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_before_init() {
        let gate = Arc::new(InitGate::new(false, MiddlewareRegistry::new()));
        let req = Request::builder()
            .uri("/?api_action=User.List&api_lang=zh_cn")
            .body(Body::empty())
            .unwrap();

        let response = service(gate).oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["CODE"], "ModuleInitWaiting");
        assert_eq!(json["MESSAGE"], "模块正在等待初始化！");
    }

    #[tokio::test]
    async fn test_bypass_path_passes() {
        let gate = Arc::new(InitGate::new(false, MiddlewareRegistry::new()));
        let req = Request::builder()
            .uri("/health")
            .body(Body::from("alive"))
            .unwrap();

        let response = service(gate).oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_init_then_pass_through_with_body() {
        let sign = Arc::new(SignValidator::new("", true));
        let gate = Arc::new(InitGate::new(
            false,
            MiddlewareRegistry::new().with(APISIGN, Arc::clone(&sign)),
        ));
        let svc = service(Arc::clone(&gate));

        let init = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(format!(
                "api_action={INIT_ACTION}&apisign.sign_key=abc"
            )))
            .unwrap();
        let response = svc.clone().oneshot(init).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["CODE"], "ok");
        assert!(json["DATA"].is_null());
        assert_eq!(sign.sign_key(), "abc");

        let req = Request::builder()
            .method("POST")
            .uri("/?api_action=User.List")
            .body(Body::from("payload"))
            .unwrap();
        let response = svc.oneshot(req).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"payload");
    }

    fn gate_with_counter() -> (Arc<InitGate>, Arc<AtomicUsize>) {
        let gate = Arc::new(InitGate::new(false, MiddlewareRegistry::new()));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        gate.add_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        (gate, runs)
    }

    fn init_request() -> Request<Body> {
        Request::builder()
            .uri(format!("/?api_action={INIT_ACTION}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_callbacks_start_after_response_body() {
        let (gate, runs) = gate_with_counter();

        let response = service(Arc::clone(&gate))
            .oneshot(init_request())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(gate.is_initialized());
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        let json = body_json(response).await;
        assert_eq!(json["CODE"], "ok");
        gate.shutdown().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_callbacks_start_when_response_dropped() {
        let (gate, runs) = gate_with_counter();

        let response = service(Arc::clone(&gate))
            .oneshot(init_request())
            .await
            .unwrap();
        drop(response);
        gate.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_gate_never_intercepts() {
        let gate = Arc::new(InitGate::new(true, MiddlewareRegistry::new()));
        let req = Request::builder()
            .uri(format!("/?api_action={INIT_ACTION}"))
            .body(Body::from("untouched"))
            .unwrap();

        let response = service(Arc::clone(&gate)).oneshot(req).await.unwrap();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"untouched");
        assert!(!gate.is_initialized());
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let gate = Arc::new(InitGate::new(false, MiddlewareRegistry::new()));
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-length", "1000")
            .body(Body::from(vec![b'a'; 1000]))
            .unwrap();

        let response = service(Arc::clone(&gate)).oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!gate.is_initialized());
    }
}
