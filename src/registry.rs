use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// A single registered stream: a stable public name and the upstream player
/// page that has to be driven to make the real playlist URL appear.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    pub filename: String,
    /// Opaque locator; may embed per-stream parameters (device IDs etc.)
    pub source_url: String,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("reading stream registry: {0}")]
    Unreadable(#[from] std::io::Error),
    #[error("parsing stream registry: {0}")]
    Unparsable(#[from] serde_json::Error),
}

/// The identifier → upstream-target mapping, loaded once from a flat JSON
/// document (an array of [`StreamDescriptor`] objects).
#[derive(Debug, Default)]
pub struct Registry {
    streams: Vec<StreamDescriptor>,
}

impl Registry {
    /// Loads the registry document from disk.
    ///
    /// # Errors
    /// * [`RegistryError::Unreadable`] when the file is missing/unreadable
    /// * [`RegistryError::Unparsable`] when it is not a JSON array of streams
    pub async fn load(path: &Path) -> Result<Self, RegistryError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let registry = Self::parse(&raw)?;
        info!("Loaded {} stream(s) from {path:?}", registry.len());
        Ok(registry)
    }

    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        let streams = serde_json::from_str(raw)?;
        Ok(Self { streams })
    }

    /// Pure mapping read; identifier validation happens before this is called.
    #[must_use]
    pub fn lookup(&self, filename: &str) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.filename == filename)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
