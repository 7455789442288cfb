//! Payload encoding: raw image bytes → base64 inline payload.
//!
//! VLM APIs accept images as base64 data-URIs embedded in the JSON request
//! body. The bytes are forwarded untouched (no re-encoding) so the model sees
//! exactly what the operator uploaded. `detail: "high"` asks GPT-4-class
//! models to use the full tile budget; without it fine print is lost.

use crate::document::is_supported_media_type;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fidelity hint attached to every inline image.
pub const IMAGE_DETAIL: &str = "high";

/// A transport-ready inline image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlinePayload {
    /// Media type, e.g. `image/jpeg`.
    pub media_type: String,
    /// Base64 (standard alphabet, padded) copy of the image bytes.
    pub data: String,
    /// Interpretation hint; always [`IMAGE_DETAIL`].
    pub detail: String,
}

impl InlinePayload {
    /// `data:<media type>;base64,<data>` form used by OpenAI-style APIs.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

impl From<&InlinePayload> for ImageData {
    fn from(p: &InlinePayload) -> Self {
        ImageData::new(p.data.clone(), p.media_type.as_str()).with_detail(IMAGE_DETAIL)
    }
}

/// Result of [`encode`]: either an inline payload or the unsupported marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Inline(InlinePayload),
    Unsupported,
}

/// Encode `bytes` for the inference API if `media_type` is allow-listed.
///
/// Never fails: an unknown media type yields [`Payload::Unsupported`] and the
/// caller decides how to report it.
pub fn encode(bytes: &[u8], media_type: &str) -> Payload {
    if !is_supported_media_type(media_type) {
        debug!("Refusing to encode unsupported media type '{}'", media_type);
        return Payload::Unsupported;
    }

    let data = STANDARD.encode(bytes);
    debug!("Encoded {} → {} bytes base64", media_type, data.len());

    Payload::Inline(InlinePayload {
        media_type: media_type.to_string(),
        data,
        detail: IMAGE_DETAIL.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SUPPORTED_MEDIA_TYPES;

    #[test]
    fn supported_types_always_encode() {
        for mt in SUPPORTED_MEDIA_TYPES {
            match encode(b"abc", mt) {
                Payload::Inline(p) => {
                    assert_eq!(p.media_type, mt);
                    assert_eq!(p.detail, "high");
                    assert_eq!(STANDARD.decode(&p.data).unwrap(), b"abc");
                }
                Payload::Unsupported => panic!("{mt} should be supported"),
            }
        }
    }

    #[test]
    fn unsupported_types_are_marked() {
        for mt in ["image/tiff", "application/pdf", "text/plain", "IMAGE/PNG", ""] {
            assert_eq!(encode(b"abc", mt), Payload::Unsupported, "{mt}");
        }
    }

    #[test]
    fn data_uri_format() {
        let Payload::Inline(p) = encode(&[0xFF, 0xD8, 0xFF], "image/jpeg") else {
            panic!("jpeg must encode");
        };
        assert_eq!(p.data_uri(), "data:image/jpeg;base64,/9j/");
    }

    #[test]
    fn converts_to_llm_image_data() {
        let Payload::Inline(p) = encode(b"xyz", "image/png") else {
            panic!("png must encode");
        };
        let img = ImageData::from(&p);
        assert_eq!(img.mime_type, "image/png");
        assert_eq!(img.data, p.data);
    }
}
