// Image encoder - turns binary image resources into base64 text

use super::error::{GenerationError, Result};
use super::types::ImageSource;
use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;

/// Converts one image resource into its transport encoding
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageEncoder: Send + Sync {
    async fn encode(&self, source: &ImageSource) -> Result<String>;
}

/// Standard padded base64 encoder.
///
/// Holds no state, so any number of encodes may run at once.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Encoder;

impl Base64Encoder {
    pub fn new() -> Self {
        Self
    }

    async fn load(&self, source: &ImageSource) -> Result<Arc<[u8]>> {
        match source {
            ImageSource::Memory(bytes) => Ok(Arc::clone(bytes)),
            ImageSource::File(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    GenerationError::Encoding(format!("failed to read {}: {}", path.display(), e))
                })?;
                Ok(Arc::from(bytes))
            }
        }
    }
}

#[async_trait]
impl ImageEncoder for Base64Encoder {
    async fn encode(&self, source: &ImageSource) -> Result<String> {
        let bytes = self.load(source).await?;

        if bytes.is_empty() {
            return Err(GenerationError::Encoding(format!(
                "image contains no data: {}",
                source.describe()
            )));
        }

        tracing::debug!("Encoding {} ({} bytes)", source.describe(), bytes.len());

        // Large images would otherwise stall the runtime thread
        tokio::task::spawn_blocking(move || base64::engine::general_purpose::STANDARD.encode(&bytes))
            .await
            .map_err(|e| GenerationError::Encoding(e.to_string()))
    }
}
