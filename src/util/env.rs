//! Startup configuration, deserialized from a flat key-value store.
//!
//! The store is the process environment (optionally seeded from a `.env` file). Keys are
//! normalized before deserialization so that both the dotted spelling (`cloudinary.key`) and the
//! environment-variable spelling (`CLOUDINARY_KEY`) resolve to the same field.
//!
//! The deserializer follows the approach of the [`envy`] crate, trimmed down to the value types
//! this service needs.
//!
//! [`envy`]: https://github.com/softprops/envy

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use serde::de::value::MapDeserializer;
use serde::de::{self, IntoDeserializer};
use thiserror::Error;

use crate::constants::{CLOUDINARY_API_URL, SERVER_PORT};

#[derive(Clone, Deserialize)]
pub struct Config {
    pub cloudinary_key: String,
    pub cloudinary_secret: String,

    /// URL-safe base64 HMAC key shared with Canva. Left optional so that a missing key fails
    /// requests closed instead of refusing to start.
    pub canva_client_secret: Option<String>,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_cloudinary_url")]
    pub cloudinary_api_url: String,

    pub otel_exporter_endpoint: Option<String>,
}

fn default_port() -> u16 {
    SERVER_PORT
}

fn default_cloudinary_url() -> String {
    CLOUDINARY_API_URL.to_string()
}

impl Config {
    /// Loads the config from the process environment, after applying `env_file` (or `./.env` if
    /// it exists).
    pub fn from_env(env_file: Option<&Path>) -> EnvResult<Self> {
        match env_file {
            Some(path) => {
                dotenvy::from_path(path)?;
            }
            None => match dotenvy::dotenv() {
                Ok(_) => {}
                Err(e) if e.not_found() => {}
                Err(e) => return Err(e.into()),
            },
        }

        Self::from_iter(dotenvy::vars())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_iter<Iter>(iter: Iter) -> EnvResult<Self>
    where
        Iter: IntoIterator<Item = (String, String)>,
    {
        // later keys win when two spellings collide
        let normalized: BTreeMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (normalize_key(&k), v))
            .collect();

        let deserializer =
            MapDeserializer::<_, EnvDeserializeError>::new(normalized.into_iter().map(
                |(key, value)| {
                    let val = Val {
                        key: key.clone(),
                        value,
                    };
                    (key, val)
                },
            ));

        Ok(Config::deserialize(deserializer)?)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("cloudinary_key", &self.cloudinary_key)
            .field("cloudinary_secret", &"<redacted>")
            .field(
                "canva_client_secret",
                &self.canva_client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("server_port", &self.server_port)
            .field("cloudinary_api_url", &self.cloudinary_api_url)
            .field("otel_exporter_endpoint", &self.otel_exporter_endpoint)
            .finish()
    }
}

/// `canva.client_secret` and `CANVA_CLIENT_SECRET` both become `canva_client_secret`.
fn normalize_key(key: &str) -> String {
    key.trim().replace(['.', '-'], "_").to_ascii_lowercase()
}

// ---
//  Deserializer implementation
// ---

struct Val {
    key: String,
    value: String,
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Val {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

macro_rules! forward_parsed_vals {
    ($($ty:ident => $method:ident,)*) => {
        $(
            fn $method<V>(self, visitor: V) -> Result<V::Value, EnvDeserializeError>
            where
                V: de::Visitor<'de>
            {
                match self.value.trim().parse::<$ty>() {
                    Ok(val) => val.into_deserializer().$method(visitor),
                    Err(e) => Err(EnvDeserializeError::Parse {
                        key: self.key,
                        reason: e.to_string(),
                    }),
                }
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for Val {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.value.into_deserializer().deserialize_any(visitor)
    }

    /// Empty values count as unset.
    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        if self.value.is_empty() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_newtype_struct<V>(
        self,
        _: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    forward_parsed_vals! {
        bool => deserialize_bool,
        u16 => deserialize_u16,
        u32 => deserialize_u32,
        u64 => deserialize_u64,
        i64 => deserialize_i64,
    }

    serde::forward_to_deserialize_any! {
        char str string unit bytes byte_buf map seq enum
        unit_struct tuple_struct identifier tuple
        ignored_any struct u8 i8 i16 i32 f32 f64
    }
}

impl de::Error for EnvDeserializeError {
    fn custom<T>(msg: T) -> Self
    where
        T: fmt::Display,
    {
        EnvDeserializeError::Custom(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        EnvDeserializeError::MissingValue(field.into())
    }
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error(transparent)]
    DeserializationError(#[from] EnvDeserializeError),
}

#[derive(Debug, Error)]
pub enum EnvDeserializeError {
    #[error("config deserialization error: {0}")]
    Custom(String),

    #[error("missing required config value '{0}'")]
    MissingValue(String),

    #[error("unable to parse config value '{key}': {reason}")]
    Parse { key: String, reason: String },
}
