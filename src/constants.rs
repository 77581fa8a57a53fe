pub const SERVER_PORT: u16 = 3000;
pub const PUBLISH_UPLOAD_ROUTE: &str = "/publish/resources/upload";

pub const CANVA_TIMESTAMP_HEADER: &str = "X-Canva-Timestamp";
pub const CANVA_SIGNATURES_HEADER: &str = "X-Canva-Signatures";
pub const SIGNATURE_VERSION: &str = "v1";
pub const TIMESTAMP_LENIENCY_SECS: i64 = 300;

// raw bodies are buffered in full before verification
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

pub const CLOUDINARY_API_URL: &str = "https://api.cloudinary.com";
pub const CLOUDINARY_CLOUD_NAME: &str = "albaongaro";
pub const UPLOAD_FOLDER: &str = "thumbnails";

pub const SERVICE_NAME: &str = "canva-thumbnail-relay";
pub const TRACER_NAME: &str = "canva-relay-tracer";
