// Request builder - encodes a registry snapshot into a generation request

use super::encoder::ImageEncoder;
use super::error::{GenerationError, Result};
use super::types::{GenerationRequest, RegistrySnapshot};
use futures_util::future::{try_join, try_join_all};
use std::sync::Arc;

/// Assembles `GenerationRequest`s from snapshots
pub struct RequestBuilder {
    encoder: Arc<dyn ImageEncoder>,
}

impl RequestBuilder {
    pub fn new(encoder: Arc<dyn ImageEncoder>) -> Self {
        Self { encoder }
    }

    /// Encode the subject and every item concurrently and assemble the request.
    ///
    /// Item encodings keep the snapshot's order whatever order the encodes
    /// finish in. The first failing encode aborts the whole build.
    pub async fn build(
        &self,
        snapshot: &RegistrySnapshot,
        instruction: &str,
    ) -> Result<GenerationRequest> {
        let person = snapshot
            .person
            .as_ref()
            .ok_or(GenerationError::MissingSubject)?;

        tracing::debug!(
            "Encoding subject {} and {} item image(s)",
            person.id,
            snapshot.items.len()
        );

        let items = try_join_all(
            snapshot
                .items
                .iter()
                .map(|item| self.encoder.encode(&item.source)),
        );
        let (person_encoding, item_encodings) =
            try_join(self.encoder.encode(&person.source), items).await?;

        Ok(GenerationRequest::new(person_encoding, item_encodings, instruction))
    }
}
