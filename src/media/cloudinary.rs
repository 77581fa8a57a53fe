use async_trait::async_trait;
use ring::digest;
use serde::Deserialize;
use tracing::instrument;

use super::{MediaError, MediaHost, MediaResult, UploadParams, UploadedAsset};
use crate::constants::CLOUDINARY_CLOUD_NAME;
use crate::util::env::Config;

/// Signed-upload client for the Cloudinary REST API.
#[derive(Clone)]
pub struct Cloudinary {
    client: reqwest::Client,
    api_url: String,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl Cloudinary {
    pub fn new(
        api_url: impl Into<String>,
        cloud_name: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            cloud_name: cloud_name.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.cloudinary_api_url.as_str(),
            CLOUDINARY_CLOUD_NAME,
            config.cloudinary_key.as_str(),
            config.cloudinary_secret.as_str(),
        )
    }

    fn upload_url(&self) -> MediaResult<reqwest::Url> {
        let raw = format!(
            "{}/v1_1/{}/image/upload",
            self.api_url.trim_end_matches('/'),
            self.cloud_name
        );

        reqwest::Url::parse(&raw).map_err(|_| MediaError::InvalidUrl(raw))
    }

    /// Cloudinary request signature: SHA-1 over the `&`-joined, name-sorted parameters with the
    /// API secret appended, as lowercase hex.
    pub fn sign_params(params: &[(&str, &str)], api_secret: &str) -> String {
        let mut sorted = params.to_vec();
        sorted.sort_by(|(a, _), (b, _)| a.cmp(b));

        let joined = sorted
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let mut ctx = digest::Context::new(&digest::SHA1_FOR_LEGACY_USE_ONLY);
        ctx.update(joined.as_bytes());
        ctx.update(api_secret.as_bytes());

        hex::encode(ctx.finish())
    }

    #[instrument(skip(self, params), fields(public_id = %params.public_id))]
    pub(crate) async fn upload_at(
        &self,
        params: &UploadParams,
        timestamp: i64,
    ) -> MediaResult<UploadedAsset> {
        let timestamp = timestamp.to_string();

        // blank params are neither signed nor sent; cloudinary then picks the public id itself
        let signed: Vec<(&str, &str)> = [
            ("folder", params.folder.as_str()),
            ("public_id", params.public_id.as_str()),
            ("timestamp", timestamp.as_str()),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect();

        let signature = Self::sign_params(&signed, &self.api_secret);

        let mut form = vec![("file", params.source_url.as_str())];
        form.extend(signed.iter().copied());
        form.push(("api_key", self.api_key.as_str()));
        form.push(("signature", signature.as_str()));

        let res = self
            .client
            .post(self.upload_url()?)
            .form(&form)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            // cloudinary puts a human-readable reason in `error.message`; fall back to the
            // status text if the body is something else
            let message = match res.json::<ErrorResponse>().await {
                Ok(body) => body.error.message,
                Err(_) => status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string(),
            };

            tracing::warn!(%status, reason = %message, "upload rejected by media host");
            return Err(MediaError::Rejected { status, message });
        }

        let body = res.json::<UploadResponse>().await?;
        tracing::debug!(public_id = %body.public_id, "upload complete");

        Ok(UploadedAsset {
            public_id: body.public_id,
            secure_url: body.secure_url,
        })
    }
}

#[async_trait]
impl MediaHost for Cloudinary {
    async fn upload(&self, params: &UploadParams) -> MediaResult<UploadedAsset> {
        self.upload_at(params, chrono::Utc::now().timestamp()).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const UPLOAD_PATH: &str = "/v1_1/albaongaro/image/upload";

    fn params() -> UploadParams {
        UploadParams {
            source_url: "https://x/a.png".into(),
            folder: "thumbnails".into(),
            public_id: "a".into(),
        }
    }

    #[test]
    fn test_sign_params() {
        let signature = Cloudinary::sign_params(
            &[
                ("timestamp", "1700000000"),
                ("public_id", "a"),
                ("folder", "thumbnails"),
            ],
            "shh",
        );

        assert_eq!(signature, "1a90feecf070685cc7c9f8616fb5348c13d23762");
    }

    #[tokio::test]
    async fn test_upload_sends_signed_form() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(UPLOAD_PATH))
            .and(body_string_contains("file=https%3A%2F%2Fx%2Fa.png"))
            .and(body_string_contains("folder=thumbnails"))
            .and(body_string_contains("public_id=a&"))
            .and(body_string_contains("timestamp=1700000000"))
            .and(body_string_contains("api_key=1234"))
            .and(body_string_contains(
                "signature=1a90feecf070685cc7c9f8616fb5348c13d23762",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "public_id": "thumbnails/a",
                "secure_url": "https://res.cloudinary.com/albaongaro/image/upload/thumbnails/a.png",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = Cloudinary::new(server.uri(), "albaongaro", "1234", "shh");
        let uploaded = client.upload_at(&params(), 1_700_000_000).await.unwrap();

        assert_eq!(uploaded.public_id, "thumbnails/a");
        assert!(uploaded.secure_url.unwrap().ends_with("thumbnails/a.png"));
    }

    #[tokio::test]
    async fn test_blank_public_id_is_not_signed_or_sent() {
        let server = MockServer::start().await;

        let expected = Cloudinary::sign_params(
            &[("folder", "thumbnails"), ("timestamp", "1700000000")],
            "shh",
        );

        Mock::given(method("POST"))
            .and(path(UPLOAD_PATH))
            .and(body_string_contains("folder=thumbnails"))
            .and(body_string_contains(format!("signature={expected}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "public_id": "thumbnails/qx81lo",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = Cloudinary::new(server.uri(), "albaongaro", "1234", "shh");
        let blank = UploadParams {
            public_id: String::new(),
            ..params()
        };
        let uploaded = client.upload_at(&blank, 1_700_000_000).await.unwrap();
        assert_eq!(uploaded.public_id, "thumbnails/qx81lo");

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        assert!(!body.contains("public_id"), "unexpected form: {body}");
    }

    #[tokio::test]
    async fn test_upload_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(UPLOAD_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "message": "Invalid Signature" }
            })))
            .mount(&server)
            .await;

        let client = Cloudinary::new(server.uri(), "albaongaro", "1234", "wrong");
        let err = client.upload(&params()).await.unwrap_err();

        match err {
            MediaError::Rejected { status, message } => {
                assert_eq!(status, http::StatusCode::UNAUTHORIZED);
                assert_eq!(message, "Invalid Signature");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_rejected_without_json_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(UPLOAD_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let client = Cloudinary::new(format!("{}/", server.uri()), "albaongaro", "1234", "shh");
        let err = client.upload(&params()).await.unwrap_err();

        assert!(matches!(
            err,
            MediaError::Rejected { status, ref message }
                if status == http::StatusCode::SERVICE_UNAVAILABLE
                    && message == "Service Unavailable"
        ));
    }

    #[tokio::test]
    async fn test_invalid_api_url() {
        let client = Cloudinary::new("not a url", "albaongaro", "1234", "shh");
        let err = client.upload(&params()).await.unwrap_err();

        assert!(matches!(err, MediaError::InvalidUrl(_)));
    }
}
