//! Persisted figures.
//!
//! Rendered `image/png` payloads arrive base64-encoded in execution results.
//! [`FigureStore`] writes them to disk under a fresh name and hands back the
//! URL path the router serves them from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// MIME type of payloads written to disk.
pub const PNG_MIME: &str = "image/png";

/// URL prefix figures are served under.
pub const FIGURES_ROUTE: &str = "/figures";

/// Figure persistence errors.
#[derive(Error, Debug)]
pub enum FigureError {
    /// The payload was not valid base64.
    #[error("Invalid figure payload: {0}")]
    Decode(#[from] base64::DecodeError),

    /// Reading or writing the figure file failed.
    #[error("Figure IO error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Directory-backed figure storage.
#[derive(Debug, Clone)]
pub struct FigureStore {
    dir: PathBuf,
}

impl FigureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decode and store a base64 PNG, returning its URL path.
    pub async fn save_png(&self, encoded: &str) -> Result<String, FigureError> {
        let bytes = STANDARD.decode(encoded.trim())?;
        let name = format!("{}.png", Uuid::new_v4());
        let path = self.dir.join(&name);

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| io_error(&self.dir, source))?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| io_error(&path, source))?;

        debug!(path = %path.display(), bytes = bytes.len(), "Figure saved");
        Ok(format!("{FIGURES_ROUTE}/{name}"))
    }

    /// Read a stored figure by file name.
    ///
    /// Returns `Ok(None)` for names that could not have been issued by
    /// [`FigureStore::save_png`] and for figures that do not exist.
    pub async fn load(&self, name: &str) -> Result<Option<Vec<u8>>, FigureError> {
        if !is_figure_name(name) {
            return Ok(None);
        }
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_error(&path, source)),
        }
    }

    /// Replace an inline PNG payload with the URL of its stored copy.
    ///
    /// A payload that cannot be stored is left inline.
    pub async fn externalize(&self, display_data: &mut BTreeMap<String, Value>) {
        let Some(Value::String(encoded)) = display_data.get(PNG_MIME) else {
            return;
        };
        match self.save_png(encoded).await {
            Ok(url) => {
                display_data.insert(PNG_MIME.to_string(), Value::String(url));
            }
            Err(err) => warn!(error = %err, "Failed to store figure"),
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> FigureError {
    FigureError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// `<uuid>.png` with no path components.
fn is_figure_name(name: &str) -> bool {
    name.strip_suffix(".png")
        .is_some_and(|stem| Uuid::parse_str(stem).is_ok())
}
