//! Upload controller
//!
//! Binds loaders to placeholder nodes in the document. For each upload the
//! controller marks the node with the loader id, follows the loader's
//! transitions in order, and writes their results back:
//!
//! | Transition | Document change |
//! |---|---|
//! | `reading → uploading` | preview payload into the source attribute |
//! | `uploading → idle` | final URL (and `srcset`) in, placeholder out, one batch |
//! | `→ error` | warning notification, then the failure policy |
//! | `→ aborted` | the failure policy, silently |
//!
//! Under `FailurePolicy::Keep` the node returns to its pre-upload state: the
//! source and `srcset` attributes get their earlier values back (or are
//! removed if there were none) in the same batch that drops the placeholder.
//!
//! A node that was deleted, or whose placeholder no longer names the loader,
//! is left alone; the loader's events are still drained.

use crate::document::{Change, ChangeBatch, DocumentError, DocumentModel, NodeId};
use crate::notification::NotificationChannel;
use crate::upload::{
    FileHandle, FileLoader, FileRepository, LoaderError, LoaderEvent, LoaderId, LoaderStatus,
    RepositoryError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

pub mod command;

pub use command::{MimeFilter, UploadCommand, UploadStarted};

const EVENTS_CAPACITY: usize = 256;

/// Controller errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("Node {0} is not in the document")]
    MissingNode(NodeId),
}

/// What happens to a placeholder node when its upload fails or is aborted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Restore the node's pre-upload attributes and keep it
    #[default]
    Keep,
    /// Remove the node
    Remove,
}

/// Attribute and element names the controller writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    pub element_name: String,
    pub placeholder_attribute: String,
    pub source_attribute: String,
    pub srcset_attribute: String,
    pub on_failure: FailurePolicy,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            element_name: "image".to_string(),
            placeholder_attribute: "uploadId".to_string(),
            source_attribute: "src".to_string(),
            srcset_attribute: "srcset".to_string(),
            on_failure: FailurePolicy::Keep,
        }
    }
}

/// Node attributes an upload overwrites, as they were before it started
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PriorAttributes {
    source: Option<String>,
    srcset: Option<String>,
}

/// A loader transition, published once fully reflected in the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTransition {
    pub loader_id: LoaderId,
    pub node: NodeId,
    pub status: LoaderStatus,
    /// Whether the node was still in the document
    pub node_present: bool,
}

struct ControllerInner {
    repository: FileRepository,
    document: Arc<dyn DocumentModel>,
    notifications: NotificationChannel,
    options: ControllerOptions,
    applied: broadcast::Sender<AppliedTransition>,
    tracked: Mutex<HashSet<LoaderId>>,
    active: watch::Sender<usize>,
}

/// Keeps placeholder nodes in step with their loaders
#[derive(Clone)]
pub struct UploadController {
    inner: Arc<ControllerInner>,
}

impl UploadController {
    pub fn new(
        repository: FileRepository,
        document: Arc<dyn DocumentModel>,
        notifications: NotificationChannel,
        options: ControllerOptions,
    ) -> Self {
        let (applied, _) = broadcast::channel(EVENTS_CAPACITY);
        let (active, _) = watch::channel(0);
        Self {
            inner: Arc::new(ControllerInner {
                repository,
                document,
                notifications,
                options,
                applied,
                tracked: Mutex::new(HashSet::new()),
                active,
            }),
        }
    }

    pub fn repository(&self) -> &FileRepository {
        &self.inner.repository
    }

    pub fn document(&self) -> &Arc<dyn DocumentModel> {
        &self.inner.document
    }

    pub fn notifications(&self) -> &NotificationChannel {
        &self.inner.notifications
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.inner.options
    }

    /// Transitions applied from now on
    pub fn events(&self) -> broadcast::Receiver<AppliedTransition> {
        self.inner.applied.subscribe()
    }

    /// Uploads whose terminal transition is not yet in the document
    pub fn active_uploads(&self) -> usize {
        *self.inner.active.borrow()
    }

    /// Wait until every started upload has been written back
    pub async fn wait_until_applied(&self) {
        let mut active = self.inner.active.subscribe();
        let _ = active.wait_for(|count| *count == 0).await;
    }

    /// Upload `file` into an existing `node`
    ///
    /// Fails with `Repository(DuplicateUpload)` while `file` has a live loader.
    pub fn upload(&self, file: &FileHandle, node: NodeId) -> Result<FileLoader, ControllerError> {
        if !self.inner.document.contains(node) {
            return Err(ControllerError::MissingNode(node));
        }

        let prior = PriorAttributes {
            source: self.inner.document.attribute(node, &self.inner.options.source_attribute),
            srcset: self.inner.document.attribute(node, &self.inner.options.srcset_attribute),
        };

        let loader = self.inner.repository.create_loader(file)?;
        let batch = ChangeBatch::new().set_attribute(
            node,
            self.inner.options.placeholder_attribute.clone(),
            loader.id().as_str(),
        );

        self.mark_and_start(loader, node, batch, prior)
    }

    /// Insert a placeholder element at `index` and upload `file` into it
    pub fn insert_and_upload(
        &self,
        file: &FileHandle,
        index: usize,
    ) -> Result<(FileLoader, NodeId), ControllerError> {
        let loader = self.inner.repository.create_loader(file)?;
        let element = self
            .inner
            .document
            .create_element(&self.inner.options.element_name)
            .with_attribute(
                self.inner.options.placeholder_attribute.clone(),
                loader.id().as_str(),
            );
        let node = element.id;

        let loader = self.mark_and_start(
            loader,
            node,
            ChangeBatch::new().insert_element(index, element),
            PriorAttributes::default(),
        )?;
        Ok((loader, node))
    }

    fn mark_and_start(
        &self,
        loader: FileLoader,
        node: NodeId,
        batch: ChangeBatch,
        prior: PriorAttributes,
    ) -> Result<FileLoader, ControllerError> {
        self.inner.start_tracking(loader.id());

        if let Err(e) = self.inner.document.apply(batch) {
            self.inner.stop_tracking(loader.id());
            self.inner.repository.destroy_loader(&loader);
            return Err(e.into());
        }

        let events = loader.subscribe();
        if let Err(e) = loader.read() {
            self.inner.stop_tracking(loader.id());
            self.inner.repository.destroy_loader(&loader);
            return Err(e.into());
        }

        tracing::debug!(
            loader.id = %loader.id(),
            node = %node,
            file.name = %loader.file().name(),
            "Tracking upload"
        );
        tokio::spawn(self.inner.clone().track(loader.clone(), node, prior, events));
        Ok(loader)
    }

    /// Strip placeholders that no live upload will resolve
    ///
    /// Runs until the document or the controller goes away. Placeholders can
    /// come back through undo or redo after their loader has finished.
    pub fn watch_document(&self) -> JoinHandle<()> {
        let controller = Arc::downgrade(&self.inner);
        let changes = self.inner.document.subscribe();
        tokio::spawn(reconcile(controller, changes))
    }
}

impl std::fmt::Debug for UploadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadController")
            .field("repository", &self.inner.repository)
            .field("options", &self.inner.options)
            .finish()
    }
}

impl ControllerInner {
    async fn track(
        self: Arc<Self>,
        loader: FileLoader,
        node: NodeId,
        prior: PriorAttributes,
        mut events: mpsc::UnboundedReceiver<LoaderEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let node_present = self.apply_transition(&loader, node, &prior, &event);

            let _ = self.applied.send(AppliedTransition {
                loader_id: event.loader_id.clone(),
                node,
                status: event.to,
                node_present,
            });
        }
        self.stop_tracking(loader.id());
    }

    fn start_tracking(&self, id: &LoaderId) {
        let mut tracked = self.tracked.lock();
        tracked.insert(id.clone());
        self.active.send_replace(tracked.len());
    }

    fn stop_tracking(&self, id: &LoaderId) {
        let mut tracked = self.tracked.lock();
        if tracked.remove(id) {
            self.active.send_replace(tracked.len());
        }
    }

    fn apply_transition(
        &self,
        loader: &FileLoader,
        node: NodeId,
        prior: &PriorAttributes,
        event: &LoaderEvent,
    ) -> bool {
        if event.to == LoaderStatus::Error {
            if let Some(failure) = loader.error() {
                self.notifications.show_warning(failure.message());
            }
        }

        if !self.document.contains(node) {
            tracing::debug!(
                loader.id = %event.loader_id,
                node = %node,
                loader.to = %event.to,
                "Placeholder node is gone, skipping"
            );
            return false;
        }

        let placeholder = &self.options.placeholder_attribute;
        if self.document.attribute(node, placeholder).as_deref() != Some(event.loader_id.as_str()) {
            tracing::debug!(
                loader.id = %event.loader_id,
                node = %node,
                "Node no longer carries this upload, skipping"
            );
            return true;
        }

        let batch = match (event.from, event.to) {
            (LoaderStatus::Reading, LoaderStatus::Uploading) => match loader.data() {
                Some(data) => ChangeBatch::new().set_attribute(node, self.options.source_attribute.clone(), data),
                None => return true,
            },
            (LoaderStatus::Uploading, LoaderStatus::Idle) => {
                let mut batch = ChangeBatch::new();
                if let Some(response) = loader.upload_response() {
                    if let Some(url) = response.canonical() {
                        batch.push(Change::SetAttribute {
                            node,
                            key: self.options.source_attribute.clone(),
                            value: url.to_string(),
                        });
                    }
                    if let Some(srcset) = response.srcset() {
                        batch.push(Change::SetAttribute {
                            node,
                            key: self.options.srcset_attribute.clone(),
                            value: srcset,
                        });
                    }
                }
                batch.remove_attribute(node, placeholder.clone())
            }
            (_, LoaderStatus::Error) | (_, LoaderStatus::Aborted) => match self.options.on_failure {
                FailurePolicy::Keep => self
                    .restore(node, prior)
                    .remove_attribute(node, placeholder.clone()),
                FailurePolicy::Remove => ChangeBatch::new().remove_element(node),
            },
            _ => return true,
        };

        match self.document.apply(batch) {
            Ok(version) => {
                tracing::debug!(
                    loader.id = %event.loader_id,
                    node = %node,
                    loader.to = %event.to,
                    document.version = version,
                    "Applied upload transition"
                );
                true
            }
            Err(DocumentError::NodeNotFound(_)) => {
                tracing::debug!(loader.id = %event.loader_id, node = %node, "Node removed concurrently");
                false
            }
            Err(e) => {
                tracing::warn!(loader.id = %event.loader_id, node = %node, error = %e, "Failed to apply upload transition");
                true
            }
        }
    }

    /// Put back the attributes the preview may have overwritten
    fn restore(&self, node: NodeId, prior: &PriorAttributes) -> ChangeBatch {
        let mut batch = ChangeBatch::new();
        for (key, value) in [
            (&self.options.source_attribute, &prior.source),
            (&self.options.srcset_attribute, &prior.srcset),
        ] {
            batch.push(match value {
                Some(value) => Change::SetAttribute {
                    node,
                    key: key.clone(),
                    value: value.clone(),
                },
                None => Change::RemoveAttribute {
                    node,
                    key: key.clone(),
                },
            });
        }
        batch
    }

    /// Placeholder stays when its loader is still being tracked or in flight
    fn is_live(&self, id: &str) -> bool {
        if self.tracked.lock().contains(id) {
            return true;
        }
        self.repository
            .get_loader(id)
            .map(|loader| !loader.is_terminal())
            .unwrap_or(false)
    }

    fn strip_stale(&self, changes: &[Change]) {
        let placeholder = &self.options.placeholder_attribute;
        let candidates = changes.iter().filter_map(|change| match change {
            Change::InsertElement { element, .. } => element
                .attribute(placeholder)
                .map(|id| (element.id, id.to_string())),
            Change::SetAttribute { node, key, value } if key == placeholder => {
                Some((*node, value.clone()))
            }
            _ => None,
        });

        let mut batch = ChangeBatch::transparent();
        for (node, id) in candidates {
            if self.is_live(&id) {
                continue;
            }
            if self.document.attribute(node, placeholder).as_deref() == Some(id.as_str()) {
                tracing::debug!(node = %node, loader.id = %id, "Removing stale placeholder");
                batch.push(Change::RemoveAttribute {
                    node,
                    key: placeholder.clone(),
                });
            }
        }

        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.document.apply(batch) {
            tracing::debug!(error = %e, "Stale placeholder cleanup skipped");
        }
    }
}

async fn reconcile(
    controller: Weak<ControllerInner>,
    mut changes: broadcast::Receiver<crate::document::DocumentChange>,
) {
    loop {
        let change = match changes.recv().await {
            Ok(change) => change,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Document watcher lagged behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let Some(controller) = controller.upgrade() else {
            break;
        };
        controller.strip_stale(&change.changes);
    }
}
