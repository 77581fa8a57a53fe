pub mod cloudinary;

use async_trait::async_trait;
use thiserror::Error;

pub use cloudinary::Cloudinary;

/// Parameters for a single asset upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadParams {
    pub source_url: String,
    pub folder: String,
    pub public_id: String,
}

/// What the media host reports back for a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAsset {
    pub public_id: String,
    pub secure_url: Option<String>,
}

#[async_trait]
pub trait MediaHost: Send + Sync {
    async fn upload(&self, params: &UploadParams) -> MediaResult<UploadedAsset>;
}

pub type MediaResult<T> = core::result::Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    #[error("media host responded with {status}: {message}")]
    Rejected {
        status: http::StatusCode,
        message: String,
    },

    #[error("invalid media host url: {0}")]
    InvalidUrl(String),
}
