use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{FromRequestParts, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::request::Parts;
use http::{HeaderMap, StatusCode};

use crate::api::server::{AppState, RouteError};
use crate::auth::{AuthError, AuthResult, SignedRequest};
use crate::constants::{CANVA_SIGNATURES_HEADER, CANVA_TIMESTAMP_HEADER, MAX_BODY_BYTES};

/// Raw request body that has passed signature verification. Only inserted by
/// [`verify_canva_request`], so handlers taking this extractor never see unverified bytes.
#[derive(Clone, Debug)]
pub struct VerifiedBody(pub Bytes);

impl VerifiedBody {
    pub fn as_json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(&self.0)
    }
}

/// Authenticates a Canva request before anything parses its body.
///
/// The body is buffered and verified byte-for-byte as received, then handed on through the
/// request extensions.
pub async fn verify_canva_request(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, RouteError> {
    let body = extract_body(&mut req).await?;

    // logged once, by `log_route_errors`
    authenticate(&state, req.headers(), req.uri().path(), &body)
        .map_err(RouteError::Unauthorized)?;

    tracing::debug!(body_len = body.len(), "canva request verified");

    req.extensions_mut().insert(VerifiedBody(body));
    Ok(next.run(req).await)
}

async fn extract_body(req: &mut Request) -> Result<Bytes, RouteError> {
    let body = std::mem::replace(req.body_mut(), Body::empty());
    axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| RouteError::UnreadableBody)
}

fn authenticate(state: &AppState, headers: &HeaderMap, path: &str, body: &Bytes) -> AuthResult<()> {
    let (timestamp, signatures) = get_message_parts(headers)?;

    SignedRequest {
        raw_body: body,
        path,
        timestamp,
        signatures,
    }
    .authenticate(state.secret.as_ref(), chrono::Utc::now().timestamp_millis())
}

type MessageParts<'a> = (&'a str, &'a str);
fn get_message_parts(headers: &HeaderMap) -> AuthResult<MessageParts<'_>> {
    let timestamp = headers
        .get(CANVA_TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingHeader(CANVA_TIMESTAMP_HEADER))?;

    let signatures = headers
        .get(CANVA_SIGNATURES_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingHeader(CANVA_SIGNATURES_HEADER))?;

    Ok((timestamp, signatures))
}

impl<S> FromRequestParts<S> for VerifiedBody
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        // missing here means the route was mounted without the verification layer
        parts
            .extensions
            .get::<VerifiedBody>()
            .cloned()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_message_parts() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            get_message_parts(&headers),
            Err(AuthError::MissingHeader(CANVA_TIMESTAMP_HEADER))
        );

        headers.insert("x-canva-timestamp", HeaderValue::from_static("1700000000"));
        assert_eq!(
            get_message_parts(&headers),
            Err(AuthError::MissingHeader(CANVA_SIGNATURES_HEADER))
        );

        headers.insert("x-canva-signatures", HeaderValue::from_static("abc,def"));
        assert_eq!(get_message_parts(&headers), Ok(("1700000000", "abc,def")));
    }

    #[test]
    fn test_non_ascii_header_is_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-canva-timestamp",
            HeaderValue::from_bytes(b"17\xff00").unwrap(),
        );
        headers.insert("x-canva-signatures", HeaderValue::from_static("abc"));

        assert_eq!(
            get_message_parts(&headers),
            Err(AuthError::MissingHeader(CANVA_TIMESTAMP_HEADER))
        );
    }
}
