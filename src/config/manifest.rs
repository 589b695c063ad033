//! Bundled manifest: the TOML file shipped inside the app package.
//!
//! ```toml
//! [tracker]
//! base_url = "https://ingest.example.com"
//! sdk_id = "sdk-123"
//! distributor = "acme"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    tracker: BTreeMap<String, String>,
}

impl Manifest {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read manifest {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.tracker.get(name).cloned()
    }
}
