use std::path::Path;

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use tempfile::{Builder, NamedTempFile};
use tracing::debug;
use uuid::Uuid;

/// Mime type used when neither the content nor the client identify the image.
pub const FALLBACK_MIME_TYPE: &str = "image/jpeg";

/// Longest sanitized filename kept in a staged upload name.
pub const MAX_FILENAME_LEN: usize = 128;

/// Base64 image bundled directly into a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    pub fn new(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: STANDARD.encode(bytes),
        }
    }
}

/// Reduces a client supplied filename to a safe single path component.
///
/// Directory parts are discarded and only ASCII alphanumerics, `.`, `-` and
/// `_` are kept, whitespace becoming `_`. Names longer than
/// [`MAX_FILENAME_LEN`] are cut down, keeping a short extension. Returns
/// `image` when nothing is left.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    let cleaned = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect::<String>();
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c == '_');
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        truncate_filename(cleaned)
    }
}

// Input is ASCII by now, so byte offsets are char boundaries.
fn truncate_filename(name: &str) -> String {
    if name.len() <= MAX_FILENAME_LEN {
        return name.to_string();
    }
    let ext = name
        .rfind('.')
        .map(|i| &name[i..])
        .filter(|ext| ext.len() <= 16)
        .unwrap_or_default();
    let stem = &name[..MAX_FILENAME_LEN - ext.len()];
    format!("{stem}{ext}")
}

/// Picks the mime type for an uploaded image.
///
/// Content sniffing wins; otherwise a declared `image/*` content type is
/// trusted, and finally [`FALLBACK_MIME_TYPE`].
pub fn sniff_mime_type(bytes: &[u8], declared: Option<&str>) -> String {
    if let Some(kind) = infer::get(bytes).filter(|k| k.matcher_type() == infer::MatcherType::Image) {
        return kind.mime_type().to_string();
    }
    declared
        .map(str::trim)
        .filter(|ct| ct.starts_with("image/"))
        .unwrap_or(FALLBACK_MIME_TYPE)
        .to_string()
}

/// An uploaded image staged in the upload directory.
///
/// The name is prefixed with a fresh uuid so concurrent uploads of the same
/// filename never collide. The file is removed when this value is dropped.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
}

impl StagedUpload {
    pub async fn write(dir: &Path, filename: &str, bytes: &[u8]) -> anyhow::Result<Self> {
        let prefix = format!("{}_", Uuid::new_v4().as_simple());
        let suffix = format!("_{}", sanitize_filename(filename));
        let file = Builder::new()
            .prefix(&prefix)
            .suffix(&suffix)
            .rand_bytes(0)
            .tempfile_in(dir)
            .with_context(|| format!("failed to create upload file in {}", dir.display()))?;
        tokio::fs::write(file.path(), bytes)
            .await
            .with_context(|| format!("failed to write upload {}", file.path().display()))?;
        debug!(path = %file.path().display(), size = bytes.len(), "Staged upload");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub async fn read(&self) -> anyhow::Result<Vec<u8>> {
        tokio::fs::read(self.path())
            .await
            .with_context(|| format!("failed to read upload {}", self.path().display()))
    }

    /// Removes the staged file now, reporting any failure.
    pub async fn remove(self) -> anyhow::Result<()> {
        let path = self.file.into_temp_path();
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to remove upload {}", path.display()))?;
        // Already gone; keep() stops the guard from deleting it a second time.
        path.keep()
            .map(drop)
            .context("failed to release staged upload")
    }
}
