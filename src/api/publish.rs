use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::middleware::verify::VerifiedBody;
use crate::api::server::{AppState, RouteError};
use crate::constants::UPLOAD_FOLDER;
use crate::media::{MediaHost, UploadParams};

#[derive(Debug, Clone, Deserialize)]
pub struct AssetUploadRequest {
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub url: String,
    pub name: String,
}

/// Body returned to Canva once every upload has settled.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishResponse {
    Success,

    #[serde(rename_all = "camelCase")]
    Error {
        error_code: &'static str,
        failures: Vec<AssetFailure>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AssetFailure {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { name: String, public_id: String },
    Failed(AssetFailure),
}

/// Storage name for an asset: `name` minus a trailing extension of three or more characters.
///
/// `"photo.jpeg"` becomes `"photo"`, while `"logo.ai"` is left alone.
pub fn derive_public_id(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if ext.chars().count() >= 3 => stem,
        _ => name,
    }
}

/// Uploads every asset concurrently and returns one outcome per asset, in request order.
#[instrument(skip(media, assets), fields(asset_count = assets.len()))]
pub async fn relay_assets(media: &dyn MediaHost, assets: &[Asset]) -> Vec<UploadOutcome> {
    let uploads = assets.iter().map(|asset| async move {
        let params = UploadParams {
            source_url: asset.url.clone(),
            folder: UPLOAD_FOLDER.to_string(),
            public_id: derive_public_id(&asset.name).to_string(),
        };

        match media.upload(&params).await {
            Ok(uploaded) => {
                tracing::info!(
                    name = %asset.name,
                    public_id = %uploaded.public_id,
                    secure_url = ?uploaded.secure_url,
                    "asset uploaded"
                );
                UploadOutcome::Uploaded {
                    name: asset.name.clone(),
                    public_id: uploaded.public_id,
                }
            }
            Err(e) => {
                tracing::error!(name = %asset.name, error = ?e, "asset upload failed");
                UploadOutcome::Failed(AssetFailure {
                    name: asset.name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    });

    join_all(uploads).await
}

/// Handles `POST /publish/resources/upload`. Responds once, after all uploads have settled.
#[instrument(skip(state, body))]
pub async fn upload_resources(
    State(state): State<Arc<AppState>>,
    body: VerifiedBody,
) -> Result<Json<PublishResponse>, RouteError> {
    let request: AssetUploadRequest = body.as_json()?;
    tracing::debug!(asset_count = request.assets.len(), "parsed upload request");

    let mut uploaded = Vec::new();
    let mut failures = Vec::new();
    for outcome in relay_assets(state.media.as_ref(), &request.assets).await {
        match outcome {
            UploadOutcome::Uploaded { name, public_id } => uploaded.push((name, public_id)),
            UploadOutcome::Failed(failure) => failures.push(failure),
        }
    }

    tracing::info!(
        uploaded = ?uploaded,
        failed = failures.len(),
        "upload request settled"
    );

    if !failures.is_empty() {
        return Err(RouteError::UploadFailed(failures));
    }

    Ok(Json(PublishResponse::Success))
}
