//! Common test infrastructure
//!
//! Provides a controller wired to manually settled readers and adapters over
//! an in-memory document.

#![allow(dead_code)]

use parking_lot::Mutex;
use placeholder_uploadr::controller::{
    AppliedTransition, ControllerOptions, MimeFilter, UploadCommand, UploadController,
};
use placeholder_uploadr::document::{InMemoryDocument, NodeId};
use placeholder_uploadr::notification::{NotificationChannel, Propagation};
use placeholder_uploadr::upload::mock::{ManualAdapter, ManualAdapterFactory, ManualFileReader};
use placeholder_uploadr::upload::{FileHandle, FileRepository, LoaderId, LoaderStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// 1x1 PNG as produced by the data URL reader
pub const BASE64_SAMPLE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNk+A8AAQUBAScY42YAAAAASUVORK5CYII=";

/// How long a test waits for an expected event
pub const WAIT: Duration = Duration::from_secs(2);

pub struct TestEnv {
    pub document: Arc<InMemoryDocument>,
    pub reader: ManualFileReader,
    pub adapters: ManualAdapterFactory,
    pub repository: FileRepository,
    pub notifications: NotificationChannel,
    pub controller: UploadController,
    pub command: UploadCommand,
    pub warnings: Arc<Mutex<Vec<String>>>,
    _watcher: JoinHandle<()>,
}

impl TestEnv {
    /// Environment over a document holding `<paragraph>foo bar</paragraph>`
    pub fn new() -> Self {
        Self::with_options(ControllerOptions::default())
    }

    pub fn with_options(options: ControllerOptions) -> Self {
        Self::build(InMemoryDocument::with_paragraphs(["foo bar"]), options)
    }

    pub fn with_document(document: InMemoryDocument) -> Self {
        Self::build(document, ControllerOptions::default())
    }

    fn build(document: InMemoryDocument, options: ControllerOptions) -> Self {
        let document = Arc::new(document);
        let reader = ManualFileReader::new();
        let adapters = ManualAdapterFactory::new();
        let repository =
            FileRepository::with_adapter_factory(Arc::new(reader.clone()), adapters.clone());

        // Capture warnings and keep them out of the default sink
        let notifications = NotificationChannel::new();
        let warnings = Arc::new(Mutex::new(Vec::new()));
        let captured = warnings.clone();
        notifications.on(100, move |notification| {
            captured.lock().push(notification.message.clone());
            Propagation::Stop
        });

        let controller = UploadController::new(
            repository.clone(),
            document.clone(),
            notifications.clone(),
            options,
        );
        let watcher = controller.watch_document();
        let command = UploadCommand::new(controller.clone(), MimeFilter::default());

        Self {
            document,
            reader,
            adapters,
            repository,
            notifications,
            controller,
            command,
            warnings,
            _watcher: watcher,
        }
    }

    pub fn markup(&self) -> String {
        self.document.to_markup()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }

    pub fn adapter_for(&self, loader_id: &LoaderId) -> ManualAdapter {
        self.adapters
            .adapter_for(loader_id)
            .expect("no adapter created for loader")
    }
}

pub fn image_file() -> FileHandle {
    FileHandle::from_bytes("image.png", "image/png", vec![0x89, b'P', b'N', b'G'])
}

/// Wait for the controller to apply a transition to `status` for `loader_id`
pub async fn applied(
    events: &mut broadcast::Receiver<AppliedTransition>,
    loader_id: &LoaderId,
    status: LoaderStatus,
) -> AppliedTransition {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("controller events closed");
            if &event.loader_id == loader_id && event.status == status {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {} to reach {}", loader_id, status))
}

/// Poll `condition` until it holds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn placeholder_markup(id: &LoaderId) -> String {
    format!(r#"<image uploadId="{}"></image><paragraph>foo bar</paragraph>"#, id)
}

pub fn node_of(env: &TestEnv, index: usize) -> NodeId {
    env.document.elements()[index].id
}
