//! Text extraction for uploaded documents.
//!
//! Uploads are staged to a named temporary file in the configured upload
//! directory and parsed from there. The staged file is owned by a
//! [`StagedUpload`] guard and deleted when the guard drops, so no path
//! through [`extract_upload`] (success, parse failure, panic unwinding) leaves
//! a file behind.
//!
//! Supported inputs: PDF (pages joined with a single space) and plain
//! text or markdown (read as UTF-8).

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("uploaded file is empty")]
    Empty,

    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("text file is not valid UTF-8")]
    NotUtf8,

    #[error("failed to stage upload: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// Errors caused by the upload itself rather than by the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ExtractError::Empty | ExtractError::Unsupported(_) | ExtractError::NotUtf8
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Text,
}

impl DocumentKind {
    /// Decide the kind from the declared content type, falling back to the
    /// file extension for generic or missing types.
    pub fn detect(content_type: Option<&str>, filename: Option<&str>) -> Result<Self, ExtractError> {
        let mime = content_type
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .unwrap_or_default();

        match mime.as_str() {
            MIME_PDF => return Ok(DocumentKind::Pdf),
            MIME_TEXT | MIME_MARKDOWN => return Ok(DocumentKind::Text),
            "" | "application/octet-stream" => {}
            other => return Err(ExtractError::Unsupported(other.to_string())),
        }

        let ext = filename
            .and_then(|f| Path::new(f).extension())
            .map(|e| e.to_string_lossy().to_ascii_lowercase());

        match ext.as_deref() {
            Some("pdf") => Ok(DocumentKind::Pdf),
            Some("txt") | Some("md") => Ok(DocumentKind::Text),
            Some(other) => Err(ExtractError::Unsupported(format!(".{}", other))),
            None => Err(ExtractError::Unsupported(
                content_type.unwrap_or("unknown").to_string(),
            )),
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => ".pdf",
            DocumentKind::Text => ".txt",
        }
    }
}

/// An upload written to disk. The file is removed when this drops.
pub struct StagedUpload {
    file: NamedTempFile,
}

impl StagedUpload {
    pub fn create(dir: &Path, kind: DocumentKind, bytes: &[u8]) -> Result<Self, ExtractError> {
        std::fs::create_dir_all(dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(kind.suffix())
            .tempfile_in(dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Directory used for staged uploads.
pub fn upload_dir(configured: Option<&Path>) -> PathBuf {
    configured
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir)
}

/// Stage `bytes` in `dir` and extract their text. Blocking; call from
/// `spawn_blocking` in async contexts.
pub fn extract_upload(dir: &Path, kind: DocumentKind, bytes: &[u8]) -> Result<String, ExtractError> {
    if bytes.is_empty() {
        return Err(ExtractError::Empty);
    }

    let staged = StagedUpload::create(dir, kind, bytes)?;
    tracing::debug!(path = %staged.path().display(), bytes = bytes.len(), ?kind, "upload staged");

    match kind {
        DocumentKind::Pdf => extract_pdf(staged.path()),
        DocumentKind::Text => extract_plain(staged.path()),
    }
}

/// Extract the text of a local file (used by `vakil analyze`).
pub fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let name = path.file_name().map(|n| n.to_string_lossy().to_string());
    let kind = DocumentKind::detect(None, name.as_deref())?;
    match kind {
        DocumentKind::Pdf => extract_pdf(path),
        DocumentKind::Text => extract_plain(path),
    }
}

fn extract_pdf(path: &Path) -> Result<String, ExtractError> {
    let pages =
        pdf_extract::extract_text_by_pages(path).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages.join(" "))
}

fn extract_plain(path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path)?;
    String::from_utf8(bytes).map_err(|_| ExtractError::NotUtf8)
}
