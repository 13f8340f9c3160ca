// Lifecycle controller - drives one generate action from snapshot to result

use super::builder::RequestBuilder;
use super::client::GenerationClient;
use super::encoder::ImageEncoder;
use super::error::{GenerationError, MISSING_SUBJECT_MESSAGE, Result};
use super::export;
use super::registry::ImageRegistry;
use super::types::{GenerationState, ImageId, RegistrySnapshot, Upload};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

const INTERRUPTED_MESSAGE: &str = "generation was interrupted";

/// Owns the session's images, the instruction and the generation state.
///
/// State is published on a watch channel; the presentation layer reads it
/// through `state()` or `subscribe()` and can only change it through the
/// methods below. At most one generation runs at a time.
pub struct GenerationController {
    registry: Mutex<ImageRegistry>,
    instruction: Mutex<String>,
    builder: RequestBuilder,
    client: Arc<dyn GenerationClient>,
    state: watch::Sender<GenerationState>,
}

enum Admission {
    Busy,
    NoSubject,
    Started(RegistrySnapshot),
}

impl GenerationController {
    /// Create a controller with an empty registry
    pub fn new(encoder: Arc<dyn ImageEncoder>, client: Arc<dyn GenerationClient>) -> Self {
        Self::with_registry(ImageRegistry::default(), encoder, client)
    }

    pub fn with_registry(
        registry: ImageRegistry,
        encoder: Arc<dyn ImageEncoder>,
        client: Arc<dyn GenerationClient>,
    ) -> Self {
        let (state, _) = watch::channel(GenerationState::Idle);
        Self {
            registry: Mutex::new(registry),
            instruction: Mutex::new(String::new()),
            builder: RequestBuilder::new(encoder),
            client,
            state,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> GenerationState {
        self.state.borrow().clone()
    }

    /// Receive every state change
    pub fn subscribe(&self) -> watch::Receiver<GenerationState> {
        self.state.subscribe()
    }

    pub fn set_person(&self, upload: Upload) -> ImageId {
        self.registry().set_person(upload)
    }

    pub fn remove_person(&self) {
        self.registry().remove_person();
    }

    pub fn add_items(&self, uploads: impl IntoIterator<Item = Upload>) -> Vec<ImageId> {
        self.registry().add_items(uploads)
    }

    pub fn remove_item(&self, id: ImageId) -> bool {
        self.registry().remove_item(id)
    }

    pub fn set_instruction(&self, instruction: impl Into<String>) {
        *self.instruction.lock().unwrap_or_else(PoisonError::into_inner) = instruction.into();
    }

    pub fn instruction(&self) -> String {
        self.instruction
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry().snapshot()
    }

    /// Read-only access to the registry, e.g. for rendering previews
    pub fn inspect_registry<R>(&self, f: impl FnOnce(&ImageRegistry) -> R) -> R {
        f(&*self.registry())
    }

    /// Run one generation.
    ///
    /// Returns `Busy` without touching the state when a generation is already
    /// in flight. Every other outcome is also published as the new state.
    pub async fn generate(&self) -> Result<String> {
        let snapshot = match self.admit() {
            Admission::Busy => {
                tracing::debug!("Generate ignored, a generation is already in flight");
                return Err(GenerationError::Busy);
            }
            Admission::NoSubject => {
                tracing::warn!("Generate requested without a subject image");
                return Err(GenerationError::MissingSubject);
            }
            Admission::Started(snapshot) => snapshot,
        };

        let in_flight = InFlight {
            state: &self.state,
            settled: false,
        };
        let instruction = self.instruction();

        tracing::info!(
            "Generation started with {} item image(s)",
            snapshot.items.len()
        );

        let result = self.run(&snapshot, &instruction).await;

        match &result {
            Ok(image) => {
                tracing::info!("Generation succeeded ({} chars)", image.len());
                in_flight.settle(GenerationState::Success(image.clone()));
            }
            Err(e) => {
                tracing::warn!("Generation failed: {}", e);
                in_flight.settle(GenerationState::Failed(e.user_message()));
            }
        }

        result
    }

    /// Save the current result as a PNG
    pub fn export(&self, path: &Path) -> Result<()> {
        let image = self
            .state
            .borrow()
            .final_image()
            .map(str::to_string)
            .ok_or(GenerationError::NothingToExport)?;
        export::save_png(&image, path)
    }

    /// Check the guards and move to `Loading` in one step.
    ///
    /// Lock order is registry, then state, on every path.
    fn admit(&self) -> Admission {
        let registry = self.registry();
        let mut admission = Admission::Busy;
        self.state.send_if_modified(|state| {
            if state.is_loading() {
                return false;
            }
            if !registry.has_person() {
                admission = Admission::NoSubject;
                *state = GenerationState::Failed(MISSING_SUBJECT_MESSAGE.to_string());
                return true;
            }
            admission = Admission::Started(registry.snapshot());
            *state = GenerationState::Loading;
            true
        });
        admission
    }

    async fn run(&self, snapshot: &RegistrySnapshot, instruction: &str) -> Result<String> {
        let request = self.builder.build(snapshot, instruction).await?;
        self.client.generate(&request).await
    }

    fn registry(&self) -> MutexGuard<'_, ImageRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Leaves `Loading` even if the generate future is dropped mid-flight
struct InFlight<'a> {
    state: &'a watch::Sender<GenerationState>,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(mut self, next: GenerationState) {
        self.settled = true;
        self.state.send_replace(next);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.state
                .send_replace(GenerationState::Failed(INTERRUPTED_MESSAGE.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::client::MockGenerationClient;
    use crate::generation::encoder::{Base64Encoder, MockImageEncoder};
    use crate::generation::types::{GenerationRequest, ImageSource};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Encodes 'P', 'A' and 'B' images deterministically
    fn scenario_encoder() -> MockImageEncoder {
        let mut encoder = MockImageEncoder::new();
        encoder.expect_encode().returning(|source| match source {
            ImageSource::Memory(bytes) => Ok(match bytes[0] {
                b'P' => "p64",
                b'A' => "a64",
                _ => "b64",
            }
            .to_string()),
            ImageSource::File(_) => Err(GenerationError::Encoding("unexpected file".into())),
        });
        encoder
    }

    fn scenario_registry(controller: &GenerationController) {
        controller.set_person(Upload::from_bytes(b"P".to_vec()));
        controller.add_items([
            Upload::from_bytes(b"A".to_vec()),
            Upload::from_bytes(b"B".to_vec()),
        ]);
        controller.set_instruction("put the person on a beach");
    }

    /// Client that blocks until the test opens the gate
    #[derive(Default)]
    struct GatedClient {
        calls: AtomicUsize,
        gate: Notify,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    #[async_trait]
    impl GenerationClient for GatedClient {
        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.clone());
            self.gate.notified().await;
            Ok("result64".to_string())
        }
    }

    async fn wait_for_loading(rx: &mut watch::Receiver<GenerationState>) {
        rx.wait_for(GenerationState::is_loading).await.unwrap();
    }

    #[tokio::test]
    async fn test_successful_generation() {
        let mut client = MockGenerationClient::new();
        client
            .expect_generate()
            .withf(|request| {
                request.person_encoding() == "p64"
                    && request.item_encodings() == ["a64", "b64"]
                    && request.instruction() == "put the person on a beach"
            })
            .times(1)
            .returning(|_| Ok("result64".to_string()));

        let controller = GenerationController::new(Arc::new(scenario_encoder()), Arc::new(client));
        scenario_registry(&controller);

        let result = controller.generate().await;

        assert_eq!(result, Ok("result64".to_string()));
        assert_eq!(controller.state(), GenerationState::Success("result64".into()));
    }

    #[tokio::test]
    async fn test_service_error_becomes_failed_state() {
        let mut client = MockGenerationClient::new();
        client
            .expect_generate()
            .times(1)
            .returning(|_| Err(GenerationError::Service("quota exceeded".into())));

        let controller = GenerationController::new(Arc::new(scenario_encoder()), Arc::new(client));
        scenario_registry(&controller);

        let result = controller.generate().await;

        assert_eq!(result, Err(GenerationError::Service("quota exceeded".into())));
        let state = controller.state();
        assert_eq!(state, GenerationState::Failed("quota exceeded".into()));
        assert_eq!(state.final_image(), None);
    }

    #[tokio::test]
    async fn test_missing_subject_short_circuits() {
        let mut encoder = MockImageEncoder::new();
        encoder.expect_encode().times(0);
        let mut client = MockGenerationClient::new();
        client.expect_generate().times(0);

        let controller = GenerationController::new(Arc::new(encoder), Arc::new(client));
        controller.add_items([Upload::from_bytes(b"A".to_vec())]);
        let mut rx = controller.subscribe();

        let result = controller.generate().await;

        assert_eq!(result, Err(GenerationError::MissingSubject));
        assert_eq!(
            controller.state(),
            GenerationState::Failed("subject image required".into())
        );
        // Exactly one change was published, straight to Failed
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().is_loading());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_encoding_failure_becomes_failed_state() {
        let mut client = MockGenerationClient::new();
        client.expect_generate().times(0);

        let controller = GenerationController::new(Arc::new(Base64Encoder::new()), Arc::new(client));
        controller.set_person(Upload::from_bytes(Vec::new()));

        let result = controller.generate().await;

        assert!(matches!(result, Err(GenerationError::Encoding(_))));
        let state = controller.state();
        assert!(state.error().unwrap().starts_with("failed to encode image"));
    }

    #[tokio::test]
    async fn test_second_trigger_while_loading_is_rejected() {
        let client = Arc::new(GatedClient::default());
        let controller = Arc::new(GenerationController::new(
            Arc::new(scenario_encoder()),
            client.clone(),
        ));
        scenario_registry(&controller);
        let mut rx = controller.subscribe();

        let first = tokio::spawn({
            let controller = controller.clone();
            async move { controller.generate().await }
        });
        wait_for_loading(&mut rx).await;

        assert_eq!(controller.generate().await, Err(GenerationError::Busy));
        assert!(controller.state().is_loading());

        client.gate.notify_one();
        assert_eq!(first.await.unwrap(), Ok("result64".to_string()));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(), GenerationState::Success("result64".into()));
    }

    #[tokio::test]
    async fn test_loading_clears_previous_result() {
        let client = Arc::new(GatedClient::default());
        let controller = Arc::new(GenerationController::new(
            Arc::new(scenario_encoder()),
            client.clone(),
        ));
        scenario_registry(&controller);

        client.gate.notify_one();
        controller.generate().await.unwrap();
        assert!(controller.state().final_image().is_some());

        let mut rx = controller.subscribe();
        let second = tokio::spawn({
            let controller = controller.clone();
            async move { controller.generate().await }
        });
        wait_for_loading(&mut rx).await;

        let state = controller.state();
        assert_eq!(state.final_image(), None);
        assert_eq!(state.error(), None);

        client.gate.notify_one();
        second.await.unwrap().unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_after_failure_clears_error() {
        let mut client = MockGenerationClient::new();
        let mut sequence = mockall::Sequence::new();
        client
            .expect_generate()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Err(GenerationError::Transport("connection reset".into())));
        client
            .expect_generate()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok("result64".to_string()));

        let controller = GenerationController::new(Arc::new(scenario_encoder()), Arc::new(client));
        scenario_registry(&controller);

        assert!(controller.generate().await.is_err());
        assert_eq!(
            controller.state().error(),
            Some("network error: connection reset")
        );

        controller.generate().await.unwrap();
        assert_eq!(controller.state(), GenerationState::Success("result64".into()));
    }

    #[tokio::test]
    async fn test_registry_changes_during_flight_do_not_affect_request() {
        let client = Arc::new(GatedClient::default());
        let controller = Arc::new(GenerationController::new(
            Arc::new(scenario_encoder()),
            client.clone(),
        ));
        scenario_registry(&controller);
        let mut rx = controller.subscribe();

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.generate().await }
        });
        wait_for_loading(&mut rx).await;

        controller.remove_person();
        for id in controller.snapshot().items.iter().map(|item| item.id) {
            controller.remove_item(id);
        }
        controller.set_instruction("something else");

        client.gate.notify_one();
        task.await.unwrap().unwrap();

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].person_encoding(), "p64");
        assert_eq!(seen[0].item_encodings(), ["a64", "b64"]);
        assert_eq!(seen[0].instruction(), "put the person on a beach");
    }

    #[tokio::test]
    async fn test_dropped_generation_leaves_loading() {
        let client = Arc::new(GatedClient::default());
        let controller = Arc::new(GenerationController::new(
            Arc::new(scenario_encoder()),
            client.clone(),
        ));
        scenario_registry(&controller);
        let mut rx = controller.subscribe();

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.generate().await }
        });
        wait_for_loading(&mut rx).await;

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(controller.state().error(), Some(INTERRUPTED_MESSAGE));
    }

    #[test]
    fn test_export_requires_success() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockGenerationClient::new();
        let controller = GenerationController::new(Arc::new(scenario_encoder()), Arc::new(client));

        let result = controller.export(&dir.path().join(export::DEFAULT_FILENAME));
        assert_eq!(result, Err(GenerationError::NothingToExport));
    }

    #[tokio::test]
    async fn test_export_saves_result() {
        use base64::Engine;
        use image::{ImageBuffer, ImageFormat, Rgb};

        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(4, 4, Rgb([10, 20, 30]));
        let mut png = std::io::Cursor::new(Vec::new());
        img.write_to(&mut png, ImageFormat::Png).unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(png.into_inner());

        let mut client = MockGenerationClient::new();
        client
            .expect_generate()
            .returning(move |_| Ok(encoded.clone()));

        let controller = GenerationController::new(Arc::new(scenario_encoder()), Arc::new(client));
        scenario_registry(&controller);
        controller.generate().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(export::DEFAULT_FILENAME);
        controller.export(&path).unwrap();

        assert_eq!(image::open(&path).unwrap().width(), 4);
    }

    #[test]
    fn test_reading_state_while_inspecting_registry_during_generate() {
        use std::sync::mpsc;
        use std::time::Duration;

        let mut client = MockGenerationClient::new();
        client
            .expect_generate()
            .returning(|_| Ok("result64".to_string()));
        let controller = Arc::new(GenerationController::new(
            Arc::new(scenario_encoder()),
            Arc::new(client),
        ));
        scenario_registry(&controller);

        let (inspecting_tx, inspecting_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let viewer = {
            let controller = controller.clone();
            let done_tx = done_tx.clone();
            std::thread::spawn(move || {
                let phase = controller.inspect_registry(|registry| {
                    inspecting_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(200));
                    (registry.item_count(), controller.state())
                });
                done_tx.send("viewer").unwrap();
                phase
            })
        };

        let generator = {
            let controller = controller.clone();
            std::thread::spawn(move || {
                inspecting_rx.recv().unwrap();
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                let result = runtime.block_on(controller.generate());
                done_tx.send("generator").unwrap();
                result
            })
        };

        for _ in 0..2 {
            done_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("viewer and generator must both finish");
        }

        let (items, _) = viewer.join().unwrap();
        assert_eq!(items, 2);
        assert_eq!(generator.join().unwrap(), Ok("result64".to_string()));
        assert_eq!(controller.state(), GenerationState::Success("result64".into()));
    }

    #[test]
    fn test_registry_views() {
        let controller = GenerationController::new(
            Arc::new(MockImageEncoder::new()),
            Arc::new(MockGenerationClient::new()),
        );
        let person = controller.set_person(Upload::from_bytes(b"P".to_vec()));
        let items = controller.add_items([Upload::from_bytes(b"A".to_vec())]);

        let (preview, ids) = controller.inspect_registry(|registry| {
            (
                registry.person().map(|p| p.preview().to_string()),
                registry.item_ids(),
            )
        });

        assert!(preview.unwrap().starts_with(&format!("preview:{}/", person)));
        assert_eq!(ids, items);
        assert!(controller.remove_item(items[0]));
        assert!(controller.snapshot().items.is_empty());
    }
}
