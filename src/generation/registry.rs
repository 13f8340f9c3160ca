// Image registry - owns the uploaded subject and item images for a session

use super::types::{ImageId, ImageSource, RegistrySnapshot, SnapshotEntry, Upload};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Hands out and takes back display references for uploaded images
pub trait PreviewAllocator: Send + Sync {
    /// Allocate a display reference for an image
    fn acquire(&self, id: ImageId) -> String;

    /// Give a reference back. Called once per acquired reference.
    fn release(&self, reference: &str);
}

/// Ephemeral display handle for one uploaded image.
///
/// Released when dropped. The handle is not `Clone`, so the reference can
/// only be given back once.
pub struct PreviewHandle {
    reference: String,
    allocator: Arc<dyn PreviewAllocator>,
}

impl PreviewHandle {
    fn acquire(allocator: &Arc<dyn PreviewAllocator>, id: ImageId) -> Self {
        Self {
            reference: allocator.acquire(id),
            allocator: Arc::clone(allocator),
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        tracing::trace!("Releasing preview {}", self.reference);
        self.allocator.release(&self.reference);
    }
}

impl fmt::Debug for PreviewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PreviewHandle").field(&self.reference).finish()
    }
}

/// In-process allocator that tracks live and released references
#[derive(Default)]
pub struct PreviewPool {
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    next: u64,
    live: HashSet<String>,
    released: HashMap<String, usize>,
}

impl PreviewPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of references acquired and not yet released
    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// How many times a reference has been released
    pub fn release_count(&self, reference: &str) -> usize {
        self.lock().released.get(reference).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PreviewAllocator for PreviewPool {
    fn acquire(&self, id: ImageId) -> String {
        let mut state = self.lock();
        // Unique per acquisition, even when the same image id comes back
        state.next += 1;
        let reference = format!("preview:{}/{}", id, state.next);
        state.live.insert(reference.clone());
        reference
    }

    fn release(&self, reference: &str) {
        let mut state = self.lock();
        if !state.live.remove(reference) {
            tracing::warn!("Preview {} released while not live", reference);
        }
        *state.released.entry(reference.to_string()).or_insert(0) += 1;
    }
}

/// An uploaded image together with its preview
#[derive(Debug)]
pub struct ImageResource {
    id: ImageId,
    preview: PreviewHandle,
    source: ImageSource,
}

impl ImageResource {
    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn preview(&self) -> &str {
        self.preview.reference()
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    fn snapshot(&self) -> SnapshotEntry {
        SnapshotEntry {
            id: self.id,
            source: self.source.clone(),
        }
    }
}

/// Holds the subject slot and the ordered item collection.
///
/// The registry is the sole owner of every `ImageResource`; removing or
/// replacing an entry drops it, which releases its preview.
pub struct ImageRegistry {
    allocator: Arc<dyn PreviewAllocator>,
    person: Option<ImageResource>,
    items: Vec<ImageResource>,
}

impl ImageRegistry {
    pub fn new(allocator: Arc<dyn PreviewAllocator>) -> Self {
        Self {
            allocator,
            person: None,
            items: Vec::new(),
        }
    }

    /// Put an image in the subject slot, replacing any previous one
    pub fn set_person(&mut self, upload: Upload) -> ImageId {
        let id = self.claim_id(upload.id);
        let resource = self.admit(id, upload.source);
        if let Some(previous) = self.person.replace(resource) {
            tracing::debug!("Replacing subject image {}", previous.id);
        }
        id
    }

    /// Clear the subject slot. No-op when already empty.
    pub fn remove_person(&mut self) {
        if let Some(previous) = self.person.take() {
            tracing::debug!("Removed subject image {}", previous.id);
        }
    }

    /// Append item images in the given order
    pub fn add_items(&mut self, uploads: impl IntoIterator<Item = Upload>) -> Vec<ImageId> {
        let mut added = Vec::new();
        for upload in uploads {
            let id = self.claim_id(upload.id);
            let resource = self.admit(id, upload.source);
            added.push(resource.id);
            self.items.push(resource);
        }
        added
    }

    /// Remove an item by id. Returns false when the id is unknown.
    pub fn remove_item(&mut self, id: ImageId) -> bool {
        match self.items.iter().position(|item| item.id == id) {
            Some(index) => {
                self.items.remove(index);
                tracing::debug!("Removed item image {}", id);
                true
            }
            None => false,
        }
    }

    /// Drop everything, releasing all previews
    pub fn clear(&mut self) {
        self.person = None;
        self.items.clear();
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            person: self.person.as_ref().map(ImageResource::snapshot),
            items: self.items.iter().map(ImageResource::snapshot).collect(),
        }
    }

    pub fn person(&self) -> Option<&ImageResource> {
        self.person.as_ref()
    }

    pub fn items(&self) -> &[ImageResource] {
        &self.items
    }

    pub fn item_ids(&self) -> Vec<ImageId> {
        self.items.iter().map(|item| item.id).collect()
    }

    pub fn has_person(&self) -> bool {
        self.person.is_some()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    fn contains(&self, id: ImageId) -> bool {
        self.person.as_ref().is_some_and(|person| person.id == id)
            || self.items.iter().any(|item| item.id == id)
    }

    /// Requested id if nothing in the registry uses it yet, else a fresh one
    fn claim_id(&self, requested: Option<ImageId>) -> ImageId {
        match requested {
            Some(id) if !self.contains(id) => id,
            Some(id) => {
                tracing::debug!("Image id {} already present, assigning a fresh one", id);
                ImageId::new()
            }
            None => ImageId::new(),
        }
    }

    fn admit(&self, id: ImageId, source: ImageSource) -> ImageResource {
        ImageResource {
            id,
            preview: PreviewHandle::acquire(&self.allocator, id),
            source,
        }
    }
}

impl Default for ImageRegistry {
    fn default() -> Self {
        Self::new(Arc::new(PreviewPool::new()))
    }
}
