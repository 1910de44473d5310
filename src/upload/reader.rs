//! Local decode primitive
//!
//! Produces the preview payload shown while the upload is in flight.

use super::{FileHandle, FileSource, Outcome};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Reads a file into a renderable preview
#[async_trait]
pub trait FileReader: Send + Sync {
    /// Decode the file
    async fn read(&self, file: &FileHandle) -> Outcome<String>;

    /// Cancel an in-flight read of `file`
    fn abort(&self, _file: &FileHandle) {}
}

/// Reads files into `data:` URLs
#[derive(Debug, Clone, Default)]
pub struct DataUrlReader {
    max_file_size: Option<u64>,
}

impl DataUrlReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject files larger than `bytes`
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    /// Encode bytes as a base64 `data:` URL
    pub fn encode(mime_type: &str, bytes: &[u8]) -> String {
        format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
    }
}

#[async_trait]
impl FileReader for DataUrlReader {
    #[tracing::instrument(
        name = "upload.read",
        skip(self, file),
        fields(file.name = %file.name(), file.mime_type = %file.mime_type())
    )]
    async fn read(&self, file: &FileHandle) -> Outcome<String> {
        if let (Some(max), FileSource::Path(path)) = (self.max_file_size, file.source()) {
            match tokio::fs::metadata(path).await {
                Ok(metadata) if metadata.len() > max => return too_large(file, metadata.len(), max),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to stat file");
                    return Outcome::Failed(format!("Cannot read file {}: {}", file.name(), e));
                }
            }
        }

        let bytes = match file.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read file");
                return Outcome::Failed(format!("Cannot read file {}: {}", file.name(), e));
            }
        };

        if let Some(max) = self.max_file_size {
            if bytes.len() as u64 > max {
                return too_large(file, bytes.len() as u64, max);
            }
        }

        tracing::debug!(bytes = bytes.len(), "File read");
        Outcome::Resolved(Self::encode(file.mime_type(), &bytes))
    }
}

fn too_large(file: &FileHandle, size: u64, max: u64) -> Outcome<String> {
    Outcome::Failed(format!(
        "File {} is too large ({} bytes, limit {} bytes)",
        file.name(),
        size,
        max
    ))
}
