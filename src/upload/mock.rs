//! Manually driven reader and adapter
//!
//! Test doubles whose outcomes are settled by the caller. An outcome given
//! before the loader asks for it is kept and handed over on request, so tests
//! do not race the spawned loader task.

use super::adapter::{AdapterFactory, ProgressSink, UploadAdapter};
use super::{FileHandle, FileKey, FileLoader, FileReader, LoaderId, Outcome, UploadResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

enum Slot<T> {
    Waiting(oneshot::Sender<Outcome<T>>),
    Ready(Outcome<T>),
}

/// Hand over `outcome` to a waiting request, or keep it for the next one
fn deliver<T>(slot: &mut Option<Slot<T>>, outcome: Outcome<T>) {
    match slot.take() {
        Some(Slot::Waiting(tx)) => {
            let _ = tx.send(outcome);
        }
        _ => *slot = Some(Slot::Ready(outcome)),
    }
}

/// Take a kept outcome, or register a waiter for one
fn request<T>(slot: &mut Option<Slot<T>>) -> Result<Outcome<T>, oneshot::Receiver<Outcome<T>>> {
    match slot.take() {
        Some(Slot::Ready(outcome)) => Ok(outcome),
        _ => {
            let (tx, rx) = oneshot::channel();
            *slot = Some(Slot::Waiting(tx));
            Err(rx)
        }
    }
}

/// File reader settled through `mock_*` calls
#[derive(Clone, Default)]
pub struct ManualFileReader {
    slots: Arc<Mutex<HashMap<FileKey, Option<Slot<String>>>>>,
}

impl ManualFileReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mock_success(&self, file: &FileHandle, data: impl Into<String>) {
        self.settle(file, Outcome::Resolved(data.into()));
    }

    pub fn mock_error(&self, file: &FileHandle, message: impl Into<String>) {
        self.settle(file, Outcome::Failed(message.into()));
    }

    pub fn mock_abort(&self, file: &FileHandle) {
        self.settle(file, Outcome::Aborted);
    }

    /// A read of `file` is waiting for an outcome
    pub fn is_reading(&self, file: &FileHandle) -> bool {
        matches!(
            self.slots.lock().get(&file.key()),
            Some(Some(Slot::Waiting(_)))
        )
    }

    fn settle(&self, file: &FileHandle, outcome: Outcome<String>) {
        let mut slots = self.slots.lock();
        deliver(slots.entry(file.key()).or_insert(None), outcome);
    }
}

#[async_trait]
impl FileReader for ManualFileReader {
    async fn read(&self, file: &FileHandle) -> Outcome<String> {
        let pending = {
            let mut slots = self.slots.lock();
            request(slots.entry(file.key()).or_insert(None))
        };

        match pending {
            Ok(outcome) => outcome,
            Err(rx) => rx.await.unwrap_or(Outcome::Aborted),
        }
    }

    fn abort(&self, file: &FileHandle) {
        self.slots.lock().remove(&file.key());
    }
}

struct ManualAdapterInner {
    loader_id: Option<LoaderId>,
    slot: Mutex<Option<Slot<UploadResponse>>>,
    started: watch::Sender<bool>,
    aborted: AtomicBool,
    progress: Mutex<Option<ProgressSink>>,
}

/// Upload adapter settled through `mock_*` calls
#[derive(Clone)]
pub struct ManualAdapter {
    inner: Arc<ManualAdapterInner>,
}

impl Default for ManualAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualAdapter {
    pub fn new() -> Self {
        Self::with_loader_id(None)
    }

    fn with_loader_id(loader_id: Option<LoaderId>) -> Self {
        let (started, _) = watch::channel(false);
        Self {
            inner: Arc::new(ManualAdapterInner {
                loader_id,
                slot: Mutex::new(None),
                started,
                aborted: AtomicBool::new(false),
                progress: Mutex::new(None),
            }),
        }
    }

    /// Loader this adapter was created for, when built by a factory
    pub fn loader_id(&self) -> Option<&LoaderId> {
        self.inner.loader_id.as_ref()
    }

    pub fn has_started(&self) -> bool {
        *self.inner.started.borrow()
    }

    /// Wait until the loader hands the file to this adapter
    pub async fn upload_started(&self) {
        let mut started = self.inner.started.subscribe();
        let _ = started.wait_for(|s| *s).await;
    }

    pub fn was_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub fn mock_success(&self, response: UploadResponse) {
        deliver(&mut self.inner.slot.lock(), Outcome::Resolved(response));
    }

    pub fn mock_error(&self, message: impl Into<String>) {
        deliver(&mut self.inner.slot.lock(), Outcome::Failed(message.into()));
    }

    pub fn mock_abort(&self) {
        deliver(&mut self.inner.slot.lock(), Outcome::Aborted);
    }

    pub fn mock_progress(&self, uploaded: u64, total: Option<u64>) {
        if let Some(progress) = self.inner.progress.lock().as_ref() {
            progress.update(uploaded, total);
        }
    }
}

#[async_trait]
impl UploadAdapter for ManualAdapter {
    async fn upload(&self, _file: FileHandle, progress: ProgressSink) -> Outcome<UploadResponse> {
        *self.inner.progress.lock() = Some(progress);
        let pending = request(&mut self.inner.slot.lock());
        self.inner.started.send_replace(true);

        match pending {
            Ok(outcome) => outcome,
            Err(rx) => rx.await.unwrap_or(Outcome::Aborted),
        }
    }

    fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        self.inner.slot.lock().take();
    }
}

/// Factory that keeps every `ManualAdapter` it creates
#[derive(Clone, Default)]
pub struct ManualAdapterFactory {
    adapters: Arc<Mutex<Vec<ManualAdapter>>>,
}

impl ManualAdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adapter_for(&self, loader_id: &LoaderId) -> Option<ManualAdapter> {
        self.adapters
            .lock()
            .iter()
            .find(|a| a.loader_id() == Some(loader_id))
            .cloned()
    }

    pub fn last(&self) -> Option<ManualAdapter> {
        self.adapters.lock().last().cloned()
    }

    pub fn created(&self) -> usize {
        self.adapters.lock().len()
    }
}

impl AdapterFactory for ManualAdapterFactory {
    fn create_adapter(&self, loader: &FileLoader) -> Arc<dyn UploadAdapter> {
        let adapter = ManualAdapter::with_loader_id(Some(loader.id().clone()));
        self.adapters.lock().push(adapter.clone());
        Arc::new(adapter)
    }
}
