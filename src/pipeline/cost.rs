//! Cost estimation: pixel geometry → megapixels → local-currency estimate.
//!
//! Pure functions only. The batch runs this pass for every document before any
//! network call so the operator sees the total before money is spent.

use crate::config::CostModel;
use crate::document::Document;
use crate::error::DocumentError;
use crate::output::CostEstimate;
use image::ImageReader;
use std::io::Cursor;

/// Estimate cost and size of an image of `width × height` pixels.
///
/// Returns `(cost_estimate, megapixels)` where
/// `megapixels = width × height / 1_000_000` and
/// `cost_estimate = round(megapixels × price × rate, 4)`.
pub fn estimate(
    pixel_width: u32,
    pixel_height: u32,
    usd_to_local_rate: f64,
    price_per_megapixel_usd: f64,
) -> (f64, f64) {
    let pixels = u64::from(pixel_width) * u64::from(pixel_height);
    let megapixels = pixels as f64 / 1_000_000.0;
    let cost = round_to(megapixels * price_per_megapixel_usd * usd_to_local_rate, 4);
    (cost, megapixels)
}

/// Estimate the cost of one document under `model`.
///
/// # Errors
/// [`DocumentError::InputUnavailable`] when the input itself was never loaded;
/// [`DocumentError::MalformedImageDimensions`] when the document has zero area,
/// i.e. its geometry could not be read.
pub fn estimate_document(doc: &Document, model: &CostModel) -> Result<CostEstimate, DocumentError> {
    if let Some(reason) = &doc.load_error {
        return Err(DocumentError::InputUnavailable {
            document: doc.name.clone(),
            reason: reason.clone(),
        });
    }
    if doc.pixel_width == 0 || doc.pixel_height == 0 {
        let detail = match probe_dimensions(&doc.bytes) {
            Err(detail) => detail,
            Ok(_) => format!(
                "zero-area geometry {}x{}",
                doc.pixel_width, doc.pixel_height
            ),
        };
        return Err(DocumentError::MalformedImageDimensions {
            document: doc.name.clone(),
            detail,
        });
    }

    let (cost_estimate, megapixels) = estimate(
        doc.pixel_width,
        doc.pixel_height,
        model.usd_to_local_rate,
        model.price_per_megapixel_usd,
    );

    Ok(CostEstimate {
        document: doc.name.clone(),
        cost_estimate,
        megapixels,
        resolution_label: format!("{}x{}", doc.pixel_width, doc.pixel_height),
    })
}

/// Placeholder estimate for a document whose geometry is unreadable.
pub fn unreadable_estimate(doc: &Document) -> CostEstimate {
    CostEstimate {
        document: doc.name.clone(),
        cost_estimate: 0.0,
        megapixels: 0.0,
        resolution_label: "unreadable".to_string(),
    }
}

/// Read `(width, height)` from the image header without decoding pixels.
pub fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), String> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?
        .into_dimensions()
        .map_err(|e| e.to_string())
}

/// Round half away from zero to `places` decimal places.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
