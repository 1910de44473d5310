//! Editing session
//!
//! Wires a repository, controller and command around one document from
//! configuration. The session owns the repository: closing it aborts every
//! upload still in flight.

use crate::config::Config;
use crate::controller::{ControllerError, ControllerOptions, MimeFilter, UploadCommand, UploadController, UploadStarted};
use crate::document::DocumentModel;
use crate::notification::NotificationChannel;
use crate::upload::{
    AdapterError, AdapterFactory, DataUrlReader, FileHandle, FileReader, FileRepository,
    SimpleUploadAdapter, SimpleUploadConfig,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to set up upload adapter: {0}")]
    Adapter(#[from] AdapterError),
}

/// One editing session
pub struct UploadSession {
    config: Config,
    command: UploadCommand,
    watcher: JoinHandle<()>,
}

impl UploadSession {
    /// Create a session using the configured HTTP adapter, if any
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: Config, document: Arc<dyn DocumentModel>) -> Result<Self, SessionError> {
        let repository = FileRepository::new(Self::reader(&config));

        match config.adapter {
            Some(ref adapter) => {
                let mut builder = SimpleUploadConfig::builder()
                    .url(&adapter.url)
                    .field_name(&adapter.field_name)
                    .timeout(Duration::from_secs(adapter.timeout_seconds));
                for (name, value) in &adapter.headers {
                    builder = builder.header(name, value);
                }
                repository.set_adapter_factory(SimpleUploadAdapter::factory(builder.build()?)?);
                info!(url = %adapter.url, "Upload adapter configured");
            }
            None => tracing::warn!("No upload adapter configured, uploads will be rejected"),
        }

        Ok(Self::assemble(config, repository, document))
    }

    /// Create a session with a host-supplied adapter factory
    pub fn with_adapter_factory(
        config: Config,
        document: Arc<dyn DocumentModel>,
        factory: impl AdapterFactory + 'static,
    ) -> Self {
        let repository = FileRepository::with_adapter_factory(Self::reader(&config), factory);
        Self::assemble(config, repository, document)
    }

    fn reader(config: &Config) -> Arc<dyn FileReader> {
        let reader = match config.reader.max_file_size {
            Some(max) => DataUrlReader::new().with_max_file_size(max),
            None => DataUrlReader::new(),
        };
        Arc::new(reader)
    }

    fn assemble(config: Config, repository: FileRepository, document: Arc<dyn DocumentModel>) -> Self {
        let upload = &config.upload;
        let options = ControllerOptions {
            element_name: upload.element_name.clone(),
            placeholder_attribute: upload.placeholder_attribute.clone(),
            source_attribute: upload.source_attribute.clone(),
            srcset_attribute: upload.srcset_attribute.clone(),
            on_failure: upload.on_failure,
        };

        let controller = UploadController::new(repository, document, NotificationChannel::new(), options);
        let watcher = controller.watch_document();
        let command = UploadCommand::new(controller, MimeFilter::new(&upload.accepted_types));

        Self {
            config,
            command,
            watcher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn command(&self) -> &UploadCommand {
        &self.command
    }

    pub fn controller(&self) -> &UploadController {
        self.command.controller()
    }

    pub fn repository(&self) -> &FileRepository {
        self.controller().repository()
    }

    pub fn notifications(&self) -> &NotificationChannel {
        self.controller().notifications()
    }

    /// Upload every accepted file, inserting placeholders from `index` on
    pub fn handle_files(
        &self,
        files: impl IntoIterator<Item = FileHandle>,
        index: usize,
    ) -> Result<Vec<UploadStarted>, ControllerError> {
        self.command.handle_files(files, index)
    }

    /// Whether close or save should wait
    pub fn has_pending_uploads(&self) -> bool {
        self.repository().has_pending_uploads()
    }

    /// Wait until no upload is in flight and every result is in the document
    pub async fn wait_until_settled(&self) {
        self.repository().wait_until_settled().await;
        self.controller().wait_until_applied().await;
    }

    /// End the session, aborting uploads still in flight
    pub fn close(self) {
        let pending = self.repository().pending_count();
        self.repository().destroy();
        self.watcher.abort();
        info!(aborted = pending, "Session closed");
    }
}

impl std::fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSession")
            .field("controller", self.controller())
            .finish()
    }
}
