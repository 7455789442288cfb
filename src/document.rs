//! Inbound documents and media-type helpers.
//!
//! A [`Document`] is the unit of work for a batch: one uploaded image with its
//! declared media type and pixel geometry. It is created when the document
//! enters the batch and never mutated afterwards.

use crate::pipeline::cost::probe_dimensions;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Media types accepted by the payload encoder, matched exactly.
pub const SUPPORTED_MEDIA_TYPES: [&str; 5] = [
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/webp",
    "image/gif",
];

/// One image submitted for extraction.
#[derive(Clone, PartialEq, Eq)]
pub struct Document {
    /// File name shown to the operator and used to tag every extracted row.
    pub name: String,
    /// Declared media type, e.g. `image/png`.
    pub media_type: String,
    /// Raw image bytes.
    pub bytes: Vec<u8>,
    /// Width in pixels. Zero when the geometry could not be read.
    pub pixel_width: u32,
    /// Height in pixels. Zero when the geometry could not be read.
    pub pixel_height: u32,
    /// Why the input behind this document could not be read, if it could not.
    pub load_error: Option<String>,
}

impl Document {
    /// Build a document whose dimensions are already known to the caller.
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: Vec<u8>,
        pixel_width: u32,
        pixel_height: u32,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes,
            pixel_width,
            pixel_height,
            load_error: None,
        }
    }

    /// Build a document and read its dimensions from the image header.
    ///
    /// Unreadable geometry is stored as `0 × 0`; the cost estimator turns that
    /// into [`crate::error::DocumentError::MalformedImageDimensions`].
    pub fn from_bytes(
        name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        let name = name.into();
        let (pixel_width, pixel_height) = match probe_dimensions(&bytes) {
            Ok(dims) => dims,
            Err(detail) => {
                debug!("{}: geometry unreadable ({})", name, detail);
                (0, 0)
            }
        };
        Self {
            name,
            media_type: media_type.into(),
            bytes,
            pixel_width,
            pixel_height,
            load_error: None,
        }
    }

    /// Placeholder for an input that could not be read or downloaded.
    ///
    /// It keeps its place in the batch and is reported as
    /// [`crate::error::DocumentError::InputUnavailable`] without a remote call.
    pub fn unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            media_type: String::new(),
            bytes: Vec::new(),
            pixel_width: 0,
            pixel_height: 0,
            load_error: Some(reason.into()),
        }
    }

    /// Total pixel count (`width × height`).
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.pixel_width) * u64::from(self.pixel_height)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("pixel_width", &self.pixel_width)
            .field("pixel_height", &self.pixel_height)
            .field("load_error", &self.load_error)
            .finish()
    }
}

/// True when `media_type` is on the allow-list (exact, case-sensitive match).
pub fn is_supported_media_type(media_type: &str) -> bool {
    SUPPORTED_MEDIA_TYPES.contains(&media_type)
}

/// Guess the media type from a file name or URL path extension.
pub fn media_type_from_extension(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "tif" | "tiff" => Some("image/tiff"),
        "bmp" => Some("image/bmp"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

/// Detect the media type from magic bytes.
pub fn sniff_media_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("image/png")
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if data.starts_with(b"RIFF") && data.get(8..12) == Some(b"WEBP") {
        Some("image/webp")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if data.starts_with(b"%PDF") {
        Some("application/pdf")
    } else {
        None
    }
}
