//! Canva request authentication.
//!
//! A request is authentic when one of the signatures in `X-Canva-Signatures` equals the
//! HMAC-SHA256 (hex) of `v1:<timestamp>:<path>:<raw body>`, keyed with the base64url-decoded
//! client secret, and the timestamp is within the leniency window of our clock.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use ring::hmac;
use thiserror::Error;

use crate::constants::{SIGNATURE_VERSION, TIMESTAMP_LENIENCY_SECS};
use crate::util::constant_time_cmp;

/// Canva hands out secrets both with and without `=` padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

pub type AuthResult<T> = core::result::Result<T, AuthError>;

/// Reasons a request was rejected. These are only ever logged; callers see a generic 401.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no verification secret configured")]
    MissingSecret,

    #[error("verification secret is not valid url-safe base64")]
    SecretEncoding,

    #[error("missing or unreadable header '{0}'")]
    MissingHeader(&'static str),

    #[error("timestamp '{0}' is not a whole number of seconds")]
    MalformedTimestamp(String),

    #[error("timestamp {sent_at} outside leniency window (received at {received_at_ms} ms)")]
    StaleTimestamp { sent_at: i64, received_at_ms: i64 },

    #[error("no signature matched")]
    SignatureMismatch,
}

/// HMAC key shared with Canva.
pub struct VerificationSecret {
    key: hmac::Key,
}

impl VerificationSecret {
    pub fn decode(encoded: &str) -> AuthResult<Self> {
        let raw = URL_SAFE_LENIENT
            .decode(encoded)
            .map_err(|_| AuthError::SecretEncoding)?;

        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, &raw),
        })
    }

    /// Lowercase hex HMAC of the canonical signing payload.
    pub fn sign(&self, timestamp: &str, path: &str, raw_body: &[u8]) -> String {
        let payload = signing_payload(timestamp, path, raw_body);
        hex::encode(hmac::sign(&self.key, &payload))
    }

    /// Whether `signatures` (comma separated, untrimmed) contains the expected signature.
    pub fn verify(&self, signatures: &str, timestamp: &str, path: &str, raw_body: &[u8]) -> bool {
        let expected = self.sign(timestamp, path, raw_body);

        // every candidate is compared so the position of a match isn't observable
        signatures
            .split(',')
            .fold(false, |found, candidate| {
                constant_time_cmp(candidate, &expected) | found
            })
    }
}

impl std::fmt::Debug for VerificationSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VerificationSecret(<redacted>)")
    }
}

fn signing_payload(timestamp: &str, path: &str, raw_body: &[u8]) -> Vec<u8> {
    let mut m = Vec::with_capacity(
        SIGNATURE_VERSION.len() + timestamp.len() + path.len() + raw_body.len() + 3,
    );

    m.extend_from_slice(SIGNATURE_VERSION.as_bytes());
    m.push(b':');
    m.extend_from_slice(timestamp.as_bytes());
    m.push(b':');
    m.extend_from_slice(path.as_bytes());
    m.push(b':');
    m.extend_from_slice(raw_body);

    m
}

/// Both instants and `leniency` share one unit. A timestamp exactly `leniency` away in either
/// direction is still accepted.
pub fn verify_timestamp(received_at: i64, sent_at: i64, leniency: i64) -> bool {
    if sent_at.saturating_sub(received_at) > leniency {
        // from the future
        return false;
    }

    if received_at.saturating_sub(sent_at) > leniency {
        // expired
        return false;
    }

    true
}

/// The parts of an inbound request that take part in verification. Borrowed from the request
/// for the duration of the check.
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub raw_body: &'a [u8],
    pub path: &'a str,
    pub timestamp: &'a str,
    pub signatures: &'a str,
}

impl SignedRequest<'_> {
    /// Runs both checks against a receiver clock in unix milliseconds, so a request is stale as
    /// soon as any fraction of a second past the window has elapsed. The signature is checked
    /// even when the timestamp has already failed.
    pub fn authenticate(
        &self,
        secret: Option<&VerificationSecret>,
        received_at_ms: i64,
    ) -> AuthResult<()> {
        let secret = secret.ok_or(AuthError::MissingSecret)?;

        let sent_at = self
            .timestamp
            .parse::<i64>()
            .map_err(|_| AuthError::MalformedTimestamp(self.timestamp.to_string()))?;

        let fresh = verify_timestamp(
            received_at_ms,
            sent_at.saturating_mul(1000),
            TIMESTAMP_LENIENCY_SECS * 1000,
        );
        let signed = secret.verify(self.signatures, self.timestamp, self.path, self.raw_body);

        match (fresh, signed) {
            (_, false) => Err(AuthError::SignatureMismatch),
            (false, true) => Err(AuthError::StaleTimestamp {
                sent_at,
                received_at_ms,
            }),
            (true, true) => Ok(()),
        }
    }
}
