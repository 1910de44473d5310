//! Upload adapter contract
//!
//! The adapter performs the network transfer for one loader. The repository
//! never knows about transports; the host plugs one in through an
//! `AdapterFactory`.

use super::{FileHandle, FileLoader, Outcome, UploadResponse};
use async_trait::async_trait;
use std::sync::Arc;

pub use super::loader::ProgressSink;

/// Transport for one upload
#[async_trait]
pub trait UploadAdapter: Send + Sync {
    /// Send the file to the server
    ///
    /// Timeouts and retries, if any, belong here.
    async fn upload(&self, file: FileHandle, progress: ProgressSink) -> Outcome<UploadResponse>;

    /// Cancel the in-flight upload
    fn abort(&self);
}

/// Creates the adapter for each new loader
pub trait AdapterFactory: Send + Sync {
    fn create_adapter(&self, loader: &FileLoader) -> Arc<dyn UploadAdapter>;
}

impl<F> AdapterFactory for F
where
    F: Fn(&FileLoader) -> Arc<dyn UploadAdapter> + Send + Sync,
{
    fn create_adapter(&self, loader: &FileLoader) -> Arc<dyn UploadAdapter> {
        self(loader)
    }
}
