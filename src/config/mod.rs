//! Typed configuration with layered lookup.
//!
//! Each key resolves from the first layer that has it: on-device override
//! (the durable store), process environment, bundled manifest, compiled
//! default. Resolution fails fast if a required key is missing so no event
//! is ever built against an empty base URL or SDK id.

pub mod manifest;

use reqwest::Url;
use secrecy::SecretString;
use tracing::debug;

pub use manifest::Manifest;

use crate::error::{Error, Result};
use crate::store::Store;

/// Path of the ingestion endpoint, relative to the base URL.
pub const INGESTION_PATH: &str = "/api/v1/dist-sdk-events/add";

/// A configuration key and where each layer looks for it.
#[derive(Debug, Clone, Copy)]
pub struct ConfigKey {
    /// Manifest key; store key is `config.<name>`.
    pub name: &'static str,
    pub env: &'static str,
    pub default: Option<&'static str>,
}

impl ConfigKey {
    pub fn store_key(&self) -> String {
        format!("config.{}", self.name)
    }
}

pub const BASE_URL: ConfigKey = ConfigKey {
    name: "base_url",
    env: "DIST_TRACKER_BASE_URL",
    default: option_env!("DIST_TRACKER_BASE_URL"),
};
pub const SDK_ID: ConfigKey = ConfigKey {
    name: "sdk_id",
    env: "DIST_TRACKER_SDK_ID",
    default: option_env!("DIST_TRACKER_SDK_ID"),
};
pub const DISTRIBUTOR: ConfigKey = ConfigKey {
    name: "distributor",
    env: "DIST_TRACKER_DISTRIBUTOR",
    default: option_env!("DIST_TRACKER_DISTRIBUTOR"),
};
pub const BENEFITS_API_URL: ConfigKey = ConfigKey {
    name: "benefits_api_url",
    env: "DIST_TRACKER_BENEFITS_API_URL",
    default: option_env!("DIST_TRACKER_BENEFITS_API_URL"),
};
pub const BENEFITS_API_KEY: ConfigKey = ConfigKey {
    name: "benefits_api_key",
    env: "DIST_TRACKER_BENEFITS_API_KEY",
    default: None,
};
pub const OTEL_ENDPOINT: ConfigKey = ConfigKey {
    name: "otel_endpoint",
    env: "OTEL_ENDPOINT",
    default: None,
};
pub const LOG_LEVEL: ConfigKey = ConfigKey {
    name: "log_level",
    env: "LOG_LEVEL",
    default: Some("info"),
};

#[derive(Debug)]
pub struct Config {
    pub base_url: String,
    pub sdk_id: String,
    pub distributor: String,
    pub benefits_api_url: Option<String>,
    pub benefits_api_key: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// The lookup chain used by [`Config::resolve_with`].
pub struct Layers<'a, E> {
    pub overrides: Option<&'a dyn Store>,
    pub env: E,
    pub manifest: Option<&'a Manifest>,
}

impl<E> Layers<'_, E>
where
    E: Fn(&str) -> Option<String>,
{
    /// First non-empty value for `key`, in layer order.
    pub fn lookup(&self, key: &ConfigKey) -> Option<String> {
        let present = |v: &String| !v.trim().is_empty();
        self.overrides
            .and_then(|store| store.get(&key.store_key()).ok().flatten())
            .filter(present)
            .or_else(|| (self.env)(key.env).filter(present))
            .or_else(|| self.manifest.and_then(|m| m.get(key.name)).filter(present))
            .or_else(|| key.default.map(str::to_string).filter(present))
    }
}

impl Config {
    /// Load from environment variables and compiled defaults only.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::resolve(None, None)
    }

    /// Resolve against the process environment plus optional device
    /// overrides and bundled manifest.
    pub fn resolve(overrides: Option<&dyn Store>, manifest: Option<&Manifest>) -> Result<Self> {
        Self::resolve_with(Layers {
            overrides,
            env: |name: &str| std::env::var(name).ok(),
            manifest,
        })
    }

    pub fn resolve_with<E>(layers: Layers<'_, E>) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let config = Self {
            base_url: required(&layers, &BASE_URL)?,
            sdk_id: required(&layers, &SDK_ID)?,
            distributor: required(&layers, &DISTRIBUTOR)?,
            benefits_api_url: layers.lookup(&BENEFITS_API_URL),
            benefits_api_key: layers.lookup(&BENEFITS_API_KEY).map(SecretString::from),
            otel_endpoint: layers.lookup(&OTEL_ENDPOINT),
            log_level: layers
                .lookup(&LOG_LEVEL)
                .unwrap_or_else(|| "info".to_string()),
        };
        config.validate()?;
        debug!(
            base_url = %config.base_url,
            sdk_id = %config.sdk_id,
            distributor = %config.distributor,
            "configuration resolved"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("base_url {:?} is not a URL: {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "base_url must be http or https, got {}",
                url.scheme()
            )));
        }
        self.ingestion_url().map(|_| ())
    }

    /// `{base_url}/api/v1/dist-sdk-events/add?sdkId={sdk_id}`
    pub fn ingestion_url(&self) -> Result<Url> {
        let raw = format!("{}{INGESTION_PATH}", self.base_url.trim_end_matches('/'));
        let mut url = Url::parse(&raw)
            .map_err(|e| Error::Config(format!("bad ingestion url {raw:?}: {e}")))?;
        url.query_pairs_mut().append_pair("sdkId", &self.sdk_id);
        Ok(url)
    }
}

fn required<E>(layers: &Layers<'_, E>, key: &ConfigKey) -> Result<String>
where
    E: Fn(&str) -> Option<String>,
{
    layers.lookup(key).ok_or_else(|| {
        Error::Config(format!(
            "required setting {} is not set (store key {}, env {})",
            key.name,
            key.store_key(),
            key.env
        ))
    })
}
