//! File loader
//!
//! State machine for a single upload attempt:
//!
//! ```text
//! idle ──read()──▶ reading ──decoded──▶ uploading ──success──▶ idle
//!                     │                     │
//!                     ├──failed──▶ error ◀──┤
//!                     └──aborted─▶ aborted ◀┘
//! ```
//!
//! Every transition is published, in order, to the loader's subscribers.
//! Once a terminal state is reached the loader accepts no further
//! transitions; late results from an aborted read or upload are dropped.

use super::adapter::UploadAdapter;
use super::{FileHandle, FileKey, FileReader, Outcome, UploadResponse};
use crate::metrics;
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use parking_lot::Mutex;
use serde::Serialize;
use std::borrow::Borrow;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique loader identifier, used as the placeholder attribute value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LoaderId(String);

impl LoaderId {
    fn generate() -> Self {
        Self(format!("e{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for LoaderId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Loader status
///
/// `Idle` is both the initial state and the state after a successful upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderStatus {
    Idle,
    Reading,
    Uploading,
    Error,
    Aborted,
}

impl LoaderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoaderStatus::Idle => "idle",
            LoaderStatus::Reading => "reading",
            LoaderStatus::Uploading => "uploading",
            LoaderStatus::Error => "error",
            LoaderStatus::Aborted => "aborted",
        }
    }

    /// Reading or uploading
    pub fn is_in_flight(&self) -> bool {
        matches!(self, LoaderStatus::Reading | LoaderStatus::Uploading)
    }
}

impl fmt::Display for LoaderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status change published by a loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderEvent {
    pub loader_id: LoaderId,
    pub from: LoaderStatus,
    pub to: LoaderStatus,
}

impl LoaderEvent {
    /// No transition follows this one
    pub fn is_terminal(&self) -> bool {
        match self.to {
            LoaderStatus::Error | LoaderStatus::Aborted => true,
            LoaderStatus::Idle => self.is_success(),
            _ => false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.from == LoaderStatus::Uploading && self.to == LoaderStatus::Idle
    }
}

/// Loader contract violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("Cannot {operation} loader {loader_id} in '{status}' state")]
    InvalidTransition {
        loader_id: LoaderId,
        operation: &'static str,
        status: LoaderStatus,
    },
}

/// Why a loader ended in `error`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderFailure {
    #[error("{0}")]
    Read(String),

    #[error("{0}")]
    Upload(String),
}

impl LoaderFailure {
    pub fn message(&self) -> &str {
        match self {
            LoaderFailure::Read(m) | LoaderFailure::Upload(m) => m,
        }
    }
}

/// Repository-side bookkeeping, run synchronously inside each transition
pub(crate) trait TransitionHook: Send + Sync {
    fn on_transition(&self, file: FileKey, event: &LoaderEvent);
}

struct LoaderState {
    status: LoaderStatus,
    data: Option<String>,
    upload_response: Option<UploadResponse>,
    failure: Option<LoaderFailure>,
    uploaded: u64,
    upload_total: Option<u64>,
    abort_handle: Option<AbortHandle>,
    adapter: Option<Arc<dyn UploadAdapter>>,
    subscribers: Vec<mpsc::UnboundedSender<LoaderEvent>>,
    hooks: Vec<Arc<dyn TransitionHook>>,
}

impl LoaderState {
    fn is_terminal(&self) -> bool {
        match self.status {
            LoaderStatus::Error | LoaderStatus::Aborted => true,
            LoaderStatus::Idle => self.upload_response.is_some(),
            _ => false,
        }
    }
}

struct LoaderInner {
    id: LoaderId,
    file: FileHandle,
    reader: Arc<dyn FileReader>,
    state: Mutex<LoaderState>,
}

/// Handle to one upload attempt
///
/// Clones refer to the same loader.
#[derive(Clone)]
pub struct FileLoader {
    inner: Arc<LoaderInner>,
}

impl FileLoader {
    pub(crate) fn new(file: FileHandle, reader: Arc<dyn FileReader>) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                id: LoaderId::generate(),
                file,
                reader,
                state: Mutex::new(LoaderState {
                    status: LoaderStatus::Idle,
                    data: None,
                    upload_response: None,
                    failure: None,
                    uploaded: 0,
                    upload_total: None,
                    abort_handle: None,
                    adapter: None,
                    subscribers: Vec::new(),
                    hooks: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn attach_adapter(&self, adapter: Arc<dyn UploadAdapter>) {
        self.inner.state.lock().adapter = Some(adapter);
    }

    pub(crate) fn add_hook(&self, hook: Arc<dyn TransitionHook>) {
        self.inner.state.lock().hooks.push(hook);
    }

    pub fn id(&self) -> &LoaderId {
        &self.inner.id
    }

    pub fn file(&self) -> &FileHandle {
        &self.inner.file
    }

    pub fn status(&self) -> LoaderStatus {
        self.inner.state.lock().status
    }

    /// Local preview, present from `uploading` on
    pub fn data(&self) -> Option<String> {
        self.inner.state.lock().data.clone()
    }

    /// Server response, present after a successful upload
    pub fn upload_response(&self) -> Option<UploadResponse> {
        self.inner.state.lock().upload_response.clone()
    }

    pub fn error(&self) -> Option<LoaderFailure> {
        self.inner.state.lock().failure.clone()
    }

    pub fn uploaded(&self) -> u64 {
        self.inner.state.lock().uploaded
    }

    pub fn upload_total(&self) -> Option<u64> {
        self.inner.state.lock().upload_total
    }

    pub fn uploaded_percent(&self) -> Option<f64> {
        let state = self.inner.state.lock();
        match state.upload_total {
            Some(total) if total > 0 => Some(state.uploaded as f64 / total as f64 * 100.0),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.inner.state.lock().is_terminal()
    }

    /// Receive every status change from now on
    ///
    /// The channel closes after the terminal transition. Subscribing to a
    /// terminal loader yields a closed channel.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LoaderEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.state.lock();
        if !state.is_terminal() {
            state.subscribers.push(tx);
        }
        rx
    }

    /// Start reading the file
    ///
    /// Reading completion starts the upload without further calls. Must be
    /// called from within a Tokio runtime.
    pub fn read(&self) -> Result<(), LoaderError> {
        let registration = {
            let mut state = self.inner.state.lock();
            if state.status != LoaderStatus::Idle || state.is_terminal() {
                return Err(LoaderError::InvalidTransition {
                    loader_id: self.inner.id.clone(),
                    operation: "read",
                    status: state.status,
                });
            }

            let (handle, registration) = AbortHandle::new_pair();
            state.abort_handle = Some(handle);
            self.transition(&mut state, LoaderStatus::Reading);
            registration
        };

        tokio::spawn(self.clone().drive(registration));
        Ok(())
    }

    /// Cancel the upload
    ///
    /// Safe from any non-terminal state; a no-op afterwards.
    pub fn abort(&self) {
        let (cancel_read, adapter) = {
            let mut state = self.inner.state.lock();
            if state.is_terminal() {
                return;
            }

            let from = state.status;
            if let Some(handle) = state.abort_handle.take() {
                handle.abort();
            }
            let adapter = match from {
                LoaderStatus::Uploading => state.adapter.clone(),
                _ => None,
            };
            self.transition(&mut state, LoaderStatus::Aborted);
            (from == LoaderStatus::Reading, adapter)
        };

        if cancel_read {
            self.inner.reader.abort(&self.inner.file);
        }
        if let Some(adapter) = adapter {
            adapter.abort();
        }

        tracing::info!(
            loader.id = %self.inner.id,
            file.name = %self.inner.file.name(),
            "Upload aborted"
        );
    }

    async fn drive(self, registration: AbortRegistration) {
        let started = Instant::now();
        let read = Abortable::new(self.inner.reader.read(&self.inner.file), registration).await;

        let data = match read {
            Err(_) => return,
            Ok(Outcome::Resolved(data)) => data,
            Ok(Outcome::Failed(message)) => {
                self.settle(LoaderStatus::Reading, LoaderStatus::Error, |state| {
                    state.failure = Some(LoaderFailure::Read(message));
                });
                return;
            }
            Ok(Outcome::Aborted) => {
                self.settle(LoaderStatus::Reading, LoaderStatus::Aborted, |_| {});
                return;
            }
        };
        metrics::record_read_duration(started.elapsed().as_secs_f64());

        let Some((adapter, registration)) = self.begin_upload(data) else {
            return;
        };

        let started = Instant::now();
        let progress = ProgressSink::new(&self.inner);
        let upload = Abortable::new(adapter.upload(self.inner.file.clone(), progress), registration).await;

        match upload {
            Err(_) => {}
            Ok(Outcome::Resolved(response)) => {
                metrics::record_upload_duration(started.elapsed().as_secs_f64());
                self.settle(LoaderStatus::Uploading, LoaderStatus::Idle, |state| {
                    state.upload_response = Some(response);
                });
            }
            Ok(Outcome::Failed(message)) => {
                self.settle(LoaderStatus::Uploading, LoaderStatus::Error, |state| {
                    state.failure = Some(LoaderFailure::Upload(message));
                });
            }
            Ok(Outcome::Aborted) => {
                self.settle(LoaderStatus::Uploading, LoaderStatus::Aborted, |_| {});
            }
        }
    }

    fn begin_upload(&self, data: String) -> Option<(Arc<dyn UploadAdapter>, AbortRegistration)> {
        let mut state = self.inner.state.lock();
        if state.status != LoaderStatus::Reading {
            return None;
        }

        let Some(adapter) = state.adapter.clone() else {
            state.abort_handle = None;
            state.failure = Some(LoaderFailure::Upload("Upload adapter is not defined".into()));
            self.transition(&mut state, LoaderStatus::Error);
            return None;
        };

        let (handle, registration) = AbortHandle::new_pair();
        state.abort_handle = Some(handle);
        state.data = Some(data);
        self.transition(&mut state, LoaderStatus::Uploading);
        Some((adapter, registration))
    }

    /// Apply the result of an I/O step, unless the loader moved on meanwhile
    fn settle(
        &self,
        expected: LoaderStatus,
        to: LoaderStatus,
        apply: impl FnOnce(&mut LoaderState),
    ) {
        let mut state = self.inner.state.lock();
        if state.status != expected {
            tracing::debug!(
                loader.id = %self.inner.id,
                loader.status = %state.status,
                "Dropping late result"
            );
            return;
        }

        apply(&mut state);
        state.abort_handle = None;
        self.transition(&mut state, to);
    }

    fn transition(&self, state: &mut LoaderState, to: LoaderStatus) {
        let event = LoaderEvent {
            loader_id: self.inner.id.clone(),
            from: state.status,
            to,
        };
        state.status = to;

        tracing::debug!(
            loader.id = %self.inner.id,
            loader.from = %event.from,
            loader.to = %event.to,
            "Loader transition"
        );

        for hook in &state.hooks {
            hook.on_transition(self.inner.file.key(), &event);
        }
        state.subscribers.retain(|tx| tx.send(event.clone()).is_ok());

        if event.is_terminal() {
            state.subscribers.clear();
            state.hooks.clear();
            state.adapter = None;

            match (&state.failure, event.is_success()) {
                (_, true) => {
                    metrics::record_loader_outcome("success");
                    if let Some(size) = self.inner.file.size() {
                        metrics::record_uploaded_bytes(size);
                    }
                    tracing::info!(loader.id = %self.inner.id, "Upload finished");
                }
                (Some(failure), _) => {
                    metrics::record_loader_outcome("error");
                    tracing::warn!(loader.id = %self.inner.id, error = %failure, "Upload failed");
                }
                (None, _) => metrics::record_loader_outcome("aborted"),
            }
        }
    }
}

impl fmt::Debug for FileLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLoader")
            .field("id", &self.inner.id)
            .field("file", &self.inner.file)
            .field("status", &self.status())
            .finish()
    }
}

/// Progress reporting handle given to adapters
///
/// Updates are advisory and ignored outside `uploading`.
#[derive(Clone)]
pub struct ProgressSink {
    loader: Weak<LoaderInner>,
}

impl ProgressSink {
    fn new(inner: &Arc<LoaderInner>) -> Self {
        Self {
            loader: Arc::downgrade(inner),
        }
    }

    /// A sink connected to no loader
    pub fn detached() -> Self {
        Self { loader: Weak::new() }
    }

    pub fn update(&self, uploaded: u64, total: Option<u64>) {
        let Some(inner) = self.loader.upgrade() else {
            return;
        };

        let mut state = inner.state.lock();
        if state.status == LoaderStatus::Uploading {
            state.uploaded = uploaded;
            state.upload_total = total;
            tracing::trace!(loader.id = %inner.id, uploaded, total = ?total, "Upload progress");
        }
    }
}
