//! Upload module
//!
//! Tracks asynchronous file uploads from local read through network transfer.
//!
//! # Components
//!
//! - **FileLoader**: per-file state machine wrapping one upload attempt
//! - **FileRepository**: registry of live loaders, keyed by file and by id
//! - **UploadAdapter**: host-supplied transport performing the network transfer
//! - **FileReader**: decode primitive producing a local preview of the file

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod adapter;
pub mod file;
pub mod loader;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod reader;
pub mod repository;
pub mod simple;

pub use adapter::{AdapterFactory, ProgressSink, UploadAdapter};
pub use file::{FileHandle, FileKey, FileSource};
pub use loader::{FileLoader, LoaderError, LoaderEvent, LoaderFailure, LoaderId, LoaderStatus};
pub use reader::{DataUrlReader, FileReader};
pub use repository::{FileRepository, LoaderKey, RepositoryError, UploadProgress};
pub use simple::{AdapterError, SimpleUploadAdapter, SimpleUploadConfig};

/// Eventual result of a read or upload step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The step completed with a value
    Resolved(T),
    /// The step failed; the message is shown to the user verbatim
    Failed(String),
    /// The step was cancelled
    Aborted,
}

impl<T> Outcome<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Outcome::Resolved(_))
    }
}

/// Keys tried, in order, when looking for the canonical asset URL
const CANONICAL_KEYS: [&str; 3] = ["default", "original", "url"];

/// Server response for a finished upload
///
/// A map of named URLs. Numeric names are image widths and describe
/// responsive variants of the same asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadResponse {
    urls: BTreeMap<String, String>,
}

impl UploadResponse {
    /// Response with a single canonical URL
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_urls([("default", url)])
    }

    pub fn from_urls<K, V>(urls: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            urls: urls
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.urls.get(name).map(String::as_str)
    }

    /// The URL that replaces the local preview in the document
    pub fn canonical(&self) -> Option<&str> {
        CANONICAL_KEYS.iter().find_map(|key| self.get(key))
    }

    /// `srcset` value built from width-named entries, narrowest first
    pub fn srcset(&self) -> Option<String> {
        let mut widths: Vec<(u32, &str)> = self
            .urls
            .iter()
            .filter_map(|(name, url)| name.parse::<u32>().ok().map(|w| (w, url.as_str())))
            .collect();

        if widths.is_empty() {
            return None;
        }

        widths.sort_by_key(|(w, _)| *w);
        Some(
            widths
                .iter()
                .map(|(w, url)| format!("{} {}w", url, w))
                .collect::<Vec<_>>()
                .join(", "),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_prefers_default() {
        let response = UploadResponse::from_urls([("original", "a.png"), ("default", "b.png")]);
        assert_eq!(response.canonical(), Some("b.png"));
    }

    #[test]
    fn test_canonical_falls_back_to_original() {
        let response = UploadResponse::from_urls([("original", "image.png")]);
        assert_eq!(response.canonical(), Some("image.png"));
    }

    #[test]
    fn test_srcset_sorted_by_width() {
        let response = UploadResponse::from_urls([
            ("default", "full.png"),
            ("800", "800.png"),
            ("160", "160.png"),
        ]);
        assert_eq!(
            response.srcset().as_deref(),
            Some("160.png 160w, 800.png 800w")
        );
    }

    #[test]
    fn test_srcset_absent_without_widths() {
        assert!(UploadResponse::new("image.png").srcset().is_none());
    }

    #[test]
    fn test_deserialize_from_plain_map() {
        let response: UploadResponse =
            serde_json::from_str(r#"{"original": "image.png"}"#).unwrap();
        assert_eq!(response.canonical(), Some("image.png"));
    }
}
