// Export - saving a generated image locally

use super::error::{GenerationError, Result};
use base64::Engine;
use image::ImageFormat;
use std::path::Path;

/// Filename used when the user does not choose one
pub const DEFAULT_FILENAME: &str = "estilista-ia-imagem.png";

/// Inline `data:` URI for displaying an encoded result
pub fn data_uri(encoded: &str) -> String {
    format!("data:image/png;base64,{}", encoded)
}

/// Decode an encoded image, accepting either bare base64 or a data URI
pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    let payload = match encoded.strip_prefix("data:") {
        Some(uri) => uri
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| GenerationError::Export("malformed data URI".into()))?,
        None => encoded,
    };

    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| GenerationError::Export(format!("invalid base64 image: {}", e)))
}

/// Write an encoded image to `path` as a PNG, whatever raster format it came in
pub fn save_png(encoded: &str, path: &Path) -> Result<()> {
    let bytes = decode(encoded)?;
    let img = image::load_from_memory(&bytes)?;
    img.save_with_format(path, ImageFormat::Png)?;

    tracing::info!(
        "Saved {}x{} image to {}",
        img.width(),
        img.height(),
        path.display()
    );
    Ok(())
}
