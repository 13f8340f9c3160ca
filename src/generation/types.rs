// Core types for the generation pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Stable identifier assigned to an uploaded image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(Uuid);

impl ImageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Raw binary image resource.
///
/// File sources are not read until encoding time. Cloning never copies
/// image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Memory(Arc<[u8]>),
    File(PathBuf),
}

impl ImageSource {
    /// Short label for logs
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Memory(bytes) => format!("<{} bytes in memory>", bytes.len()),
            ImageSource::File(path) => path.display().to_string(),
        }
    }
}

/// A user file selection handed to the registry
#[derive(Debug, Clone)]
pub struct Upload {
    pub id: Option<ImageId>,
    pub source: ImageSource,
}

impl Upload {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id: None,
            source: ImageSource::Memory(Arc::from(bytes.into())),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            id: None,
            source: ImageSource::File(path.into()),
        }
    }

    pub fn with_id(mut self, id: ImageId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Registry entry as seen by a snapshot: identity and binary, no preview
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub id: ImageId,
    pub source: ImageSource,
}

/// Immutable view of the registry at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub person: Option<SnapshotEntry>,
    pub items: Vec<SnapshotEntry>,
}

impl RegistrySnapshot {
    pub fn has_person(&self) -> bool {
        self.person.is_some()
    }
}

/// Payload sent to the generation service. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    person_encoding: String,
    item_encodings: Vec<String>,
    instruction: String,
}

impl GenerationRequest {
    pub fn new(
        person_encoding: impl Into<String>,
        item_encodings: Vec<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            person_encoding: person_encoding.into(),
            item_encodings,
            instruction: instruction.into(),
        }
    }

    pub fn person_encoding(&self) -> &str {
        &self.person_encoding
    }

    pub fn item_encodings(&self) -> &[String] {
        &self.item_encodings
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }
}

/// Lifecycle of the generate action. Exactly one phase is active.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", content = "payload", rename_all = "lowercase")]
pub enum GenerationState {
    #[default]
    Idle,
    Loading,
    Success(String),
    Failed(String),
}

impl GenerationState {
    pub fn is_loading(&self) -> bool {
        matches!(self, GenerationState::Loading)
    }

    /// Encoded result image, present only in `Success`
    pub fn final_image(&self) -> Option<&str> {
        match self {
            GenerationState::Success(image) => Some(image),
            _ => None,
        }
    }

    /// Error message, present only in `Failed`
    pub fn error(&self) -> Option<&str> {
        match self {
            GenerationState::Failed(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            GenerationState::Idle => "idle",
            GenerationState::Loading => "loading",
            GenerationState::Success(_) => "success",
            GenerationState::Failed(_) => "failed",
        }
    }
}
