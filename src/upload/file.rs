//! File handles
//!
//! A `FileHandle` is an immutable, cheaply cloned reference to the bytes being
//! uploaded. Clones share one identity (`FileKey`); two handles built from the
//! same bytes are still different files.

use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Identity of a file handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileKey(Uuid);

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the file's bytes live
#[derive(Debug, Clone)]
pub enum FileSource {
    Memory(Bytes),
    Path(PathBuf),
}

struct FileInner {
    key: FileKey,
    name: String,
    mime_type: String,
    source: FileSource,
}

/// Handle to a source blob
#[derive(Clone)]
pub struct FileHandle {
    inner: Arc<FileInner>,
}

impl FileHandle {
    /// Create a handle over in-memory bytes
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self::with_source(name.into(), mime_type.into(), FileSource::Memory(bytes.into()))
    }

    /// Create a handle over a file on disk
    ///
    /// The MIME type is guessed from the extension.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime_type = guess_mime_type(path).to_string();

        Self::with_source(name, mime_type, FileSource::Path(path.to_path_buf()))
    }

    fn with_source(name: String, mime_type: String, source: FileSource) -> Self {
        Self {
            inner: Arc::new(FileInner {
                key: FileKey(Uuid::new_v4()),
                name,
                mime_type,
                source,
            }),
        }
    }

    pub fn key(&self) -> FileKey {
        self.inner.key
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn mime_type(&self) -> &str {
        &self.inner.mime_type
    }

    pub fn source(&self) -> &FileSource {
        &self.inner.source
    }

    /// Size in bytes, when known without touching the disk
    pub fn size(&self) -> Option<u64> {
        match &self.inner.source {
            FileSource::Memory(bytes) => Some(bytes.len() as u64),
            FileSource::Path(_) => None,
        }
    }

    /// Load the file's contents
    pub async fn bytes(&self) -> std::io::Result<Bytes> {
        match &self.inner.source {
            FileSource::Memory(bytes) => Ok(bytes.clone()),
            FileSource::Path(path) => tokio::fs::read(path).await.map(Bytes::from),
        }
    }
}

impl PartialEq for FileHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.key == other.inner.key
    }
}

impl Eq for FileHandle {}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("key", &self.inner.key)
            .field("name", &self.inner.name)
            .field("mime_type", &self.inner.mime_type)
            .finish()
    }
}

fn guess_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "txt" => "text/plain",
        "pdf" => "application/pdf",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}
