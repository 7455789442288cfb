//! Input resolution: turn a user-supplied path or URL into a [`Document`].
//!
//! The declared media type is decided here, in priority order: the HTTP
//! `Content-Type` (URLs only), the file extension, then magic bytes. It is
//! **not** validated against the allow-list; an unsupported type becomes a
//! per-document failure later instead of aborting the whole batch. The same
//! holds for an input that cannot be read at all: [`resolve_inputs`] keeps it
//! as a [`Document::unavailable`] placeholder.

use crate::document::{media_type_from_extension, sniff_media_type, Document};
use crate::error::Img2XlsxError;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Fallback media type when nothing identifies the content.
const UNKNOWN_MEDIA_TYPE: &str = "application/octet-stream";

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a [`Document`] with bytes and geometry loaded.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Document, Img2XlsxError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

/// Resolve every input in order.
///
/// Inputs that cannot be read or downloaded do not stop the others; each one
/// becomes a [`Document::unavailable`] at its position, named the way a
/// loaded document would be.
pub async fn resolve_inputs(inputs: &[String], timeout_secs: u64) -> Vec<Document> {
    let mut docs = Vec::with_capacity(inputs.len());
    for input in inputs {
        match resolve_input(input, timeout_secs).await {
            Ok(doc) => docs.push(doc),
            Err(e) => {
                warn!("Skipping unreadable input '{}': {}", input, e);
                let reason = e.to_string().lines().next().unwrap_or_default().to_string();
                docs.push(Document::unavailable(input_name(input), reason));
            }
        }
    }
    docs
}

/// Document name for an input string: the URL's last path segment or the file name.
fn input_name(input: &str) -> String {
    if is_url(input) {
        filename_from_url(input)
    } else {
        file_name(Path::new(input))
    }
}

/// Read a local image file.
async fn read_local(path_str: &str) -> Result<Document, Img2XlsxError> {
    let path = PathBuf::from(path_str);

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Img2XlsxError::PermissionDenied { path: path.clone() },
        _ => Img2XlsxError::FileNotFound { path: path.clone() },
    })?;

    let name = file_name(&path);
    let media_type = decide_media_type(None, &name, &bytes);
    debug!("Resolved local image: {} ({})", path.display(), media_type);

    Ok(Document::from_bytes(name, media_type, bytes))
}

/// Download a URL and return it as a document.
async fn download_url(url: &str, timeout_secs: u64) -> Result<Document, Img2XlsxError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Img2XlsxError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Img2XlsxError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Img2XlsxError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Img2XlsxError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let name = filename_from_url(url);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Img2XlsxError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?
        .to_vec();

    let media_type = decide_media_type(content_type.as_deref(), &name, &bytes);
    info!("Downloaded {} ({} bytes, {})", name, bytes.len(), media_type);

    Ok(Document::from_bytes(name, media_type, bytes))
}

/// Pick the declared media type: image `Content-Type`, then extension, then magic bytes.
pub fn decide_media_type(content_type: Option<&str>, name: &str, bytes: &[u8]) -> String {
    if let Some(ct) = content_type {
        let essence = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        if essence.starts_with("image/") {
            return essence;
        }
    }
    media_type_from_extension(name)
        .or_else(|| sniff_media_type(bytes))
        .unwrap_or(UNKNOWN_MEDIA_TYPE)
        .to_string()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Extract a reasonable file name from the URL path.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded-image".to_string()
}
