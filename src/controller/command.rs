//! Upload command
//!
//! Entry point used by paste, drop and file-picker handlers. Files whose MIME
//! type is not accepted never reach the controller.

use super::{ControllerError, UploadController};
use crate::document::NodeId;
use crate::upload::{FileHandle, FileLoader, RepositoryError};

/// MIME types accepted for upload by default
pub const DEFAULT_ACCEPTED_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/bmp"];

/// Accepted MIME types; `type/*` matches any subtype
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeFilter {
    patterns: Vec<String>,
}

impl Default for MimeFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ACCEPTED_TYPES)
    }
}

impl MimeFilter {
    pub fn new<S: AsRef<str>>(patterns: impl IntoIterator<Item = S>) -> Self {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn accepts(&self, mime_type: &str) -> bool {
        let mime_type = mime_type.trim().to_ascii_lowercase();
        let Some((kind, _)) = mime_type.split_once('/') else {
            return false;
        };

        self.patterns.iter().any(|pattern| match pattern.strip_suffix("/*") {
            Some(prefix) => prefix == kind,
            None => *pattern == mime_type,
        })
    }
}

/// An upload started by the command
#[derive(Debug, Clone)]
pub struct UploadStarted {
    pub loader: FileLoader,
    pub node: NodeId,
}

/// Inserts a placeholder and starts an upload
#[derive(Debug, Clone)]
pub struct UploadCommand {
    controller: UploadController,
    filter: MimeFilter,
}

impl UploadCommand {
    pub fn new(controller: UploadController, filter: MimeFilter) -> Self {
        Self { controller, filter }
    }

    pub fn controller(&self) -> &UploadController {
        &self.controller
    }

    /// Accepted type and no upload of `file` in flight
    pub fn is_enabled(&self, file: &FileHandle) -> bool {
        self.filter.accepts(file.mime_type())
            && self.controller.repository().get_loader(file).is_none()
    }

    /// Insert a placeholder for `file` at `index` and upload into it
    ///
    /// Returns `Ok(None)` when the command is disabled for `file`.
    pub fn execute(&self, file: &FileHandle, index: usize) -> Result<Option<UploadStarted>, ControllerError> {
        if !self.filter.accepts(file.mime_type()) {
            tracing::debug!(file.name = %file.name(), file.mime_type = %file.mime_type(), "File type not accepted");
            return Ok(None);
        }

        match self.controller.insert_and_upload(file, index) {
            Ok((loader, node)) => Ok(Some(UploadStarted { loader, node })),
            Err(ControllerError::Repository(RepositoryError::DuplicateUpload(name))) => {
                tracing::debug!(file.name = %name, "Upload already in progress");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Upload every accepted file, inserting placeholders from `index` on
    ///
    /// Placeholders keep the order of `files`. Other files are skipped.
    pub fn handle_files(
        &self,
        files: impl IntoIterator<Item = FileHandle>,
        index: usize,
    ) -> Result<Vec<UploadStarted>, ControllerError> {
        let mut started = Vec::new();
        for file in files {
            if !self.filter.accepts(file.mime_type()) {
                tracing::debug!(file.name = %file.name(), file.mime_type = %file.mime_type(), "Skipping file");
                continue;
            }
            if let Some(upload) = self.execute(&file, index + started.len())? {
                started.push(upload);
            }
        }
        Ok(started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_accepts_images() {
        let filter = MimeFilter::default();
        assert!(filter.accepts("image/png"));
        assert!(filter.accepts("IMAGE/JPEG"));
        assert!(!filter.accepts("image/svg+xml"));
        assert!(!filter.accepts("media/mp3"));
        assert!(!filter.accepts("png"));
    }

    #[test]
    fn test_wildcard_filter() {
        let filter = MimeFilter::new(["image/*"]);
        assert!(filter.accepts("image/webp"));
        assert!(!filter.accepts("text/plain"));
    }
}
