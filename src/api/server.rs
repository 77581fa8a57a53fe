use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::api::middleware::verify::verify_canva_request;
use crate::api::publish::{AssetFailure, PublishResponse, upload_resources};
use crate::auth::{AuthError, VerificationSecret};
use crate::constants::PUBLISH_UPLOAD_ROUTE;
use crate::media::{Cloudinary, MediaHost};
use crate::util::env::Config;

/// Read-only state shared by every request.
pub struct AppState {
    /// `None` when the Canva secret is missing or undecodable; every request is then rejected.
    pub secret: Option<VerificationSecret>,
    pub media: Arc<dyn MediaHost>,
}

impl AppState {
    pub fn new(secret: Option<VerificationSecret>, media: Arc<dyn MediaHost>) -> Self {
        Self { secret, media }
    }

    pub fn from_config(config: &Config) -> Self {
        let secret = match config.canva_client_secret.as_deref() {
            Some(encoded) => match VerificationSecret::decode(encoded) {
                Ok(secret) => Some(secret),
                Err(e) => {
                    tracing::error!(error = %e, "canva client secret unusable; all requests will be rejected");
                    None
                }
            },
            None => {
                tracing::error!("canva client secret not configured; all requests will be rejected");
                None
            }
        };

        Self::new(secret, Arc::new(Cloudinary::from_config(config)))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    // canva publish callbacks; nothing on these routes runs before verification
    let publish_routes = Router::new()
        .route(PUBLISH_UPLOAD_ROUTE, post(upload_resources))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            verify_canva_request,
        ));

    Router::new()
        .merge(publish_routes)
        .route("/", get(|| async { Response::new(Body::empty()) }))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .with_state(state)
}

#[instrument(skip(state))]
pub async fn serve(state: Arc<AppState>, port: u16) -> std::io::Result<()> {
    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    tracing::info!(
        server_url = %format!("http://127.0.0.1:{}", listener.local_addr()?.port()),
        "server ready"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = ?e, "unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    tracing::info!("shutdown signal received");
}

/// Logs any `RouteError` attached to an outgoing response. Rejected callers are logged at warn.
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    match res.extensions().get::<Arc<RouteError>>() {
        Some(err) if err.is_rejection() => {
            tracing::warn!(reason = %err, status = %res.status(), "rejected canva request");
        }
        Some(err) => {
            tracing::error!(error = ?err, status = %res.status(), "error occurred inside route handler");
        }
        None => {}
    }

    res
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("authentication failed: {0}")]
    Unauthorized(AuthError),

    #[error("unable to read request body")]
    UnreadableBody,

    #[error("malformed request payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("{} asset upload(s) failed", .0.len())]
    UploadFailed(Vec<AssetFailure>),
}

impl RouteError {
    /// The caller failed authentication. Anyone can cause this, so it isn't a server error.
    pub fn is_rejection(&self) -> bool {
        matches!(self, RouteError::Unauthorized(_))
    }
}

pub const INVALID_REQUEST_MESSAGE: &str = "Invalid request";
pub const UPLOAD_FAILED_CODE: &str = "UPLOAD_FAILED";

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let mut response = match &self {
            // the rejection reason stays in our logs; the caller only learns it was rejected
            RouteError::Unauthorized(_) => {
                (StatusCode::UNAUTHORIZED, INVALID_REQUEST_MESSAGE).into_response()
            }

            RouteError::UnreadableBody => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    message: self.to_string(),
                }),
            )
                .into_response(),

            RouteError::MalformedPayload(err) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    message: format!("malformed request payload: {err}"),
                }),
            )
                .into_response(),

            RouteError::UploadFailed(failures) => (
                StatusCode::BAD_GATEWAY,
                Json(PublishResponse::Error {
                    error_code: UPLOAD_FAILED_CODE,
                    failures: failures.clone(),
                }),
            )
                .into_response(),
        };

        response.extensions_mut().insert(Arc::new(self));
        response
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::media::{MediaError, MediaResult, UploadParams, UploadedAsset};

    struct NoUploads;

    #[async_trait::async_trait]
    impl MediaHost for NoUploads {
        async fn upload(&self, _: &UploadParams) -> MediaResult<UploadedAsset> {
            Err(MediaError::InvalidUrl("unused".into()))
        }
    }

    fn config(canva_secret: &str) -> Config {
        Config::from_iter([
            ("CLOUDINARY_KEY".to_string(), "1234".to_string()),
            ("CLOUDINARY_SECRET".to_string(), "shh".to_string()),
            ("CANVA_CLIENT_SECRET".to_string(), canva_secret.to_string()),
        ])
        .unwrap()
    }

    #[test]
    fn test_undecodable_secret_from_config() {
        let state = AppState::from_config(&config("not base64!!"));
        assert!(state.secret.is_none());

        let state = AppState::from_config(&config("c2VjcmV0"));
        assert!(state.secret.is_some());
    }

    #[test]
    fn test_unset_secret_from_config() {
        let state = AppState::from_config(&config(""));
        assert!(state.secret.is_none());
    }

    #[test]
    fn test_only_auth_failures_are_rejections() {
        assert!(RouteError::Unauthorized(AuthError::SignatureMismatch).is_rejection());
        assert!(RouteError::Unauthorized(AuthError::MissingSecret).is_rejection());

        assert!(!RouteError::UnreadableBody.is_rejection());
        assert!(!RouteError::UploadFailed(Vec::new()).is_rejection());
        let malformed = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!RouteError::MalformedPayload(malformed).is_rejection());
    }

    #[tokio::test]
    async fn test_config_with_undecodable_secret_rejects_requests() {
        use tower::ServiceExt;

        let state = AppState::from_config(&config("not base64!!"));
        let app = router(Arc::new(AppState::new(state.secret, Arc::new(NoUploads))));

        let req = axum::http::Request::builder()
            .method("POST")
            .uri(PUBLISH_UPLOAD_ROUTE)
            .header(crate::constants::CANVA_TIMESTAMP_HEADER, "1700000000")
            .header(crate::constants::CANVA_SIGNATURES_HEADER, "abc")
            .body(Body::from(r#"{"assets":[]}"#))
            .unwrap();

        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
