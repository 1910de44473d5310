//! File repository
//!
//! Registry of the loaders in one editing session.
//!
//! # Design
//!
//! - One live loader per file; a second request for the same file is rejected
//! - Loaders are indexed by file and by id (the placeholder correlation key)
//! - Terminal loaders are released inside their terminal transition
//! - The pending counter tracks loaders between `reading` and a terminal state
//!
//! # Example
//!
//! ```no_run
//! use placeholder_uploadr::upload::{DataUrlReader, FileHandle, FileRepository};
//! use placeholder_uploadr::upload::mock::ManualAdapterFactory;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = FileRepository::new(Arc::new(DataUrlReader::new()));
//! repository.set_adapter_factory(ManualAdapterFactory::new());
//!
//! let file = FileHandle::from_path("photo.png");
//! let loader = repository.create_loader(&file)?;
//! loader.read()?;
//!
//! repository.wait_until_settled().await;
//! # Ok(())
//! # }
//! ```

use super::adapter::AdapterFactory;
use super::loader::TransitionHook;
use super::{FileHandle, FileKey, FileLoader, FileReader, LoaderEvent, LoaderId, LoaderStatus};
use crate::metrics;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::watch;

/// Repository errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("File '{0}' is already being uploaded")]
    DuplicateUpload(String),

    #[error("Upload adapter is not defined")]
    NoAdapter,
}

/// Loader lookup key: a file handle or a loader id
#[derive(Debug, Clone, Copy)]
pub enum LoaderKey<'a> {
    File(&'a FileHandle),
    Id(&'a str),
}

impl<'a> From<&'a FileHandle> for LoaderKey<'a> {
    fn from(file: &'a FileHandle) -> Self {
        LoaderKey::File(file)
    }
}

impl<'a> From<&'a LoaderId> for LoaderKey<'a> {
    fn from(id: &'a LoaderId) -> Self {
        LoaderKey::Id(id.as_str())
    }
}

impl<'a> From<&'a str> for LoaderKey<'a> {
    fn from(id: &'a str) -> Self {
        LoaderKey::Id(id)
    }
}

/// Aggregate upload progress across live loaders
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UploadProgress {
    pub uploaded: u64,
    pub total: Option<u64>,
}

impl UploadProgress {
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some(self.uploaded as f64 / total as f64 * 100.0),
            _ => None,
        }
    }
}

#[derive(Default)]
struct RepositoryState {
    loaders: HashMap<FileKey, FileLoader>,
    id_mapping: HashMap<LoaderId, FileLoader>,
    pending_count: usize,
}

impl RepositoryState {
    fn release(&mut self, file: FileKey, id: &LoaderId) -> bool {
        let removed = self.id_mapping.remove(id).is_some();
        if self.loaders.get(&file).map(|l| l.id() == id).unwrap_or(false) {
            self.loaders.remove(&file);
        }
        removed
    }
}

struct RepositoryInner {
    state: Mutex<RepositoryState>,
    reader: Arc<dyn FileReader>,
    adapter_factory: RwLock<Option<Arc<dyn AdapterFactory>>>,
    pending: watch::Sender<usize>,
}

impl RepositoryInner {
    fn publish_pending(&self, pending: usize) {
        self.pending.send_replace(pending);
        metrics::set_pending_uploads(pending);
    }

    fn abort_all(&self) {
        let loaders: Vec<FileLoader> = {
            let mut state = self.state.lock();
            state.loaders.clear();
            state.id_mapping.drain().map(|(_, loader)| loader).collect()
        };

        // Each abort releases its own pending slot through the hook
        for loader in &loaders {
            loader.abort();
        }

        let pending = self.state.lock().pending_count;
        self.publish_pending(pending);

        if !loaders.is_empty() {
            tracing::info!(count = loaders.len(), "Aborted remaining uploads");
        }
    }
}

impl Drop for RepositoryInner {
    fn drop(&mut self) {
        self.abort_all();
        // Hooks can no longer reach the repository to release their slots
        self.state.get_mut().pending_count = 0;
        self.publish_pending(0);
    }
}

/// Keeps repository bookkeeping in step with a loader
struct RepositoryHook {
    repository: Weak<RepositoryInner>,
}

impl TransitionHook for RepositoryHook {
    fn on_transition(&self, file: FileKey, event: &LoaderEvent) {
        let Some(repository) = self.repository.upgrade() else {
            return;
        };

        let mut state = repository.state.lock();
        if event.from == LoaderStatus::Idle && event.to == LoaderStatus::Reading {
            state.pending_count += 1;
        }

        if event.is_terminal() {
            if event.from.is_in_flight() {
                state.pending_count = state.pending_count.saturating_sub(1);
            }
            if state.release(file, &event.loader_id) {
                tracing::debug!(loader.id = %event.loader_id, "Loader released");
            }
        }

        let pending = state.pending_count;
        drop(state);
        repository.publish_pending(pending);
    }
}

/// Registry of active loaders for one editing session
///
/// Cloning yields another handle to the same registry. When the last handle
/// is dropped every remaining loader is aborted.
#[derive(Clone)]
pub struct FileRepository {
    inner: Arc<RepositoryInner>,
}

impl FileRepository {
    /// Create a repository that decodes files with `reader`
    pub fn new(reader: Arc<dyn FileReader>) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            inner: Arc::new(RepositoryInner {
                state: Mutex::new(RepositoryState::default()),
                reader,
                adapter_factory: RwLock::new(None),
                pending,
            }),
        }
    }

    /// Create a repository with an adapter factory already set
    pub fn with_adapter_factory(
        reader: Arc<dyn FileReader>,
        factory: impl AdapterFactory + 'static,
    ) -> Self {
        let repository = Self::new(reader);
        repository.set_adapter_factory(factory);
        repository
    }

    /// Set the strategy that creates a transport for each loader
    pub fn set_adapter_factory(&self, factory: impl AdapterFactory + 'static) {
        *self.inner.adapter_factory.write() = Some(Arc::new(factory));
    }

    /// Create and register a loader for `file`
    ///
    /// Fails with `DuplicateUpload` while `file` has a live loader.
    pub fn create_loader(&self, file: &FileHandle) -> Result<FileLoader, RepositoryError> {
        let Some(factory) = self.inner.adapter_factory.read().clone() else {
            tracing::warn!(
                file.name = %file.name(),
                "Upload adapter is not defined, cannot create a loader"
            );
            return Err(RepositoryError::NoAdapter);
        };

        if self.inner.state.lock().loaders.contains_key(&file.key()) {
            return Err(RepositoryError::DuplicateUpload(file.name().to_string()));
        }

        let loader = FileLoader::new(file.clone(), self.inner.reader.clone());
        loader.attach_adapter(factory.create_adapter(&loader));
        loader.add_hook(Arc::new(RepositoryHook {
            repository: Arc::downgrade(&self.inner),
        }));

        let mut state = self.inner.state.lock();
        if state.loaders.contains_key(&file.key()) {
            return Err(RepositoryError::DuplicateUpload(file.name().to_string()));
        }
        state.loaders.insert(file.key(), loader.clone());
        state.id_mapping.insert(loader.id().clone(), loader.clone());
        drop(state);

        tracing::debug!(
            loader.id = %loader.id(),
            file.name = %file.name(),
            "Loader created"
        );

        Ok(loader)
    }

    /// Look up a live loader by file or by id
    pub fn get_loader<'a>(&self, key: impl Into<LoaderKey<'a>>) -> Option<FileLoader> {
        let state = self.inner.state.lock();
        match key.into() {
            LoaderKey::File(file) => state.loaders.get(&file.key()).cloned(),
            LoaderKey::Id(id) => state.id_mapping.get(id).cloned(),
        }
    }

    /// Abort `loader` if needed and remove it from the registry
    ///
    /// A no-op for loaders already released.
    pub fn destroy_loader(&self, loader: &FileLoader) {
        loader.abort();
        self.inner
            .state
            .lock()
            .release(loader.file().key(), loader.id());
    }

    /// All live loaders
    pub fn loaders(&self) -> Vec<FileLoader> {
        self.inner.state.lock().id_mapping.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().id_mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loaders between `reading` and a terminal state
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending_count
    }

    /// Whether destructive actions (close, save) should wait
    pub fn has_pending_uploads(&self) -> bool {
        self.pending_count() > 0
    }

    /// Observe the pending counter
    pub fn watch_pending(&self) -> watch::Receiver<usize> {
        self.inner.pending.subscribe()
    }

    /// Wait until no upload is in flight
    pub async fn wait_until_settled(&self) {
        let mut pending = self.watch_pending();
        let _ = pending.wait_for(|count| *count == 0).await;
    }

    /// Sum of progress reported by live loaders
    pub fn progress(&self) -> UploadProgress {
        self.loaders()
            .iter()
            .fold(UploadProgress::default(), |acc, loader| UploadProgress {
                uploaded: acc.uploaded + loader.uploaded(),
                total: match (acc.total, loader.upload_total()) {
                    (Some(a), Some(b)) => Some(a + b),
                    (a, b) => a.or(b),
                },
            })
    }

    /// End the session: abort every live loader and clear the registry
    pub fn destroy(&self) {
        self.inner.abort_all();
    }
}

impl std::fmt::Debug for FileRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("FileRepository")
            .field("loaders", &state.id_mapping.len())
            .field("pending_count", &state.pending_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::mock::{ManualAdapterFactory, ManualFileReader};
    use crate::upload::UploadResponse;

    fn repository() -> (FileRepository, ManualFileReader, ManualAdapterFactory) {
        let reader = ManualFileReader::new();
        let factory = ManualAdapterFactory::new();
        let repository = FileRepository::with_adapter_factory(Arc::new(reader.clone()), factory.clone());
        (repository, reader, factory)
    }

    fn image() -> FileHandle {
        FileHandle::from_bytes("image.png", "image/png", vec![0u8; 8])
    }

    #[test]
    fn test_create_loader_registers_both_keys() {
        let (repository, _, factory) = repository();
        let file = image();

        let loader = repository.create_loader(&file).unwrap();

        assert_eq!(loader.status(), LoaderStatus::Idle);
        assert_eq!(repository.get_loader(&file).unwrap().id(), loader.id());
        assert_eq!(repository.get_loader(loader.id()).unwrap().id(), loader.id());
        assert_eq!(repository.get_loader(loader.id().as_str()).unwrap().id(), loader.id());
        assert_eq!(factory.created(), 1);
        assert_eq!(repository.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_upload_rejected() {
        let (repository, _, _) = repository();
        let file = image();
        repository.create_loader(&file).unwrap();

        let err = repository.create_loader(&file).unwrap_err();
        assert_eq!(err, RepositoryError::DuplicateUpload("image.png".into()));
        assert_eq!(repository.len(), 1);
    }

    #[test]
    fn test_no_adapter() {
        let repository = FileRepository::new(Arc::new(ManualFileReader::new()));
        let err = repository.create_loader(&image()).unwrap_err();
        assert_eq!(err, RepositoryError::NoAdapter);
        assert!(repository.is_empty());
    }

    #[test]
    fn test_unknown_lookup_is_none() {
        let (repository, _, _) = repository();
        assert!(repository.get_loader(&image()).is_none());
        assert!(repository.get_loader("missing").is_none());
    }

    #[tokio::test]
    async fn test_pending_count_follows_lifecycle() {
        let (repository, reader, factory) = repository();
        let file = image();
        let loader = repository.create_loader(&file).unwrap();

        loader.read().unwrap();
        assert_eq!(repository.pending_count(), 1);
        assert!(repository.has_pending_uploads());

        reader.mock_success(&file, "data:");
        let adapter = factory.adapter_for(loader.id()).unwrap();
        adapter.upload_started().await;
        assert_eq!(repository.pending_count(), 1);

        adapter.mock_success(UploadResponse::new("image.png"));
        repository.wait_until_settled().await;

        assert_eq!(repository.pending_count(), 0);
        assert!(repository.get_loader(&file).is_none());
        assert!(repository.get_loader(loader.id()).is_none());
    }

    #[tokio::test]
    async fn test_terminal_loader_frees_file_for_retry() {
        let (repository, reader, _) = repository();
        let file = image();
        let first = repository.create_loader(&file).unwrap();
        first.read().unwrap();
        reader.mock_error(&file, "Reading error.");
        repository.wait_until_settled().await;

        let second = repository.create_loader(&file).unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_destroy_loader_aborts_and_is_idempotent() {
        let (repository, _, _) = repository();
        let file = image();
        let loader = repository.create_loader(&file).unwrap();
        loader.read().unwrap();

        repository.destroy_loader(&loader);
        repository.destroy_loader(&loader);

        assert_eq!(loader.status(), LoaderStatus::Aborted);
        assert!(repository.is_empty());
        assert_eq!(repository.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_destroy_unread_loader() {
        let (repository, _, _) = repository();
        let loader = repository.create_loader(&image()).unwrap();

        repository.destroy_loader(&loader);

        assert_eq!(loader.status(), LoaderStatus::Aborted);
        assert!(repository.is_empty());
        assert_eq!(repository.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_destroy_aborts_everything() {
        let (repository, _, _) = repository();
        let a = repository.create_loader(&image()).unwrap();
        let b = repository.create_loader(&image()).unwrap();
        a.read().unwrap();
        b.read().unwrap();
        assert_eq!(repository.pending_count(), 2);

        repository.destroy();

        assert_eq!(a.status(), LoaderStatus::Aborted);
        assert_eq!(b.status(), LoaderStatus::Aborted);
        assert!(repository.is_empty());
        assert_eq!(*repository.watch_pending().borrow(), 0);
    }

    #[tokio::test]
    async fn test_destroy_keeps_count_for_later_loaders() {
        let (repository, _, _) = repository();
        let idle = repository.create_loader(&image()).unwrap();
        let reading = repository.create_loader(&image()).unwrap();
        reading.read().unwrap();

        repository.destroy();
        assert_eq!(idle.status(), LoaderStatus::Aborted);
        assert_eq!(repository.pending_count(), 0);

        let file = image();
        let next = repository.create_loader(&file).unwrap();
        next.read().unwrap();

        assert_eq!(repository.pending_count(), 1);
        assert_eq!(repository.get_loader(&file).unwrap().id(), next.id());

        repository.destroy();
        assert_eq!(next.status(), LoaderStatus::Aborted);
        assert_eq!(repository.pending_count(), 0);
        assert!(repository.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_repository_aborts_loaders() {
        let (repository, _, _) = repository();
        let loader = repository.create_loader(&image()).unwrap();
        loader.read().unwrap();

        drop(repository);

        assert_eq!(loader.status(), LoaderStatus::Aborted);
    }

    #[tokio::test]
    async fn test_aggregate_progress() {
        let (repository, reader, factory) = repository();
        let (a_file, b_file) = (image(), image());
        let a = repository.create_loader(&a_file).unwrap();
        let b = repository.create_loader(&b_file).unwrap();
        a.read().unwrap();
        b.read().unwrap();
        reader.mock_success(&a_file, "data:");
        reader.mock_success(&b_file, "data:");

        let a_adapter = factory.adapter_for(a.id()).unwrap();
        let b_adapter = factory.adapter_for(b.id()).unwrap();
        a_adapter.upload_started().await;
        b_adapter.upload_started().await;
        a_adapter.mock_progress(10, Some(100));
        b_adapter.mock_progress(40, Some(100));

        let progress = repository.progress();
        assert_eq!(progress.uploaded, 50);
        assert_eq!(progress.total, Some(200));
        assert_eq!(progress.percent(), Some(25.0));
    }
}
