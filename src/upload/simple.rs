//! Simple HTTP upload adapter
//!
//! Sends the file as a multipart form to a single endpoint and reads the
//! asset URL(s) from the JSON response.
//!
//! # Response format
//!
//! ```json
//! { "url": "https://cdn.example.com/image.png" }
//! { "urls": { "default": "https://cdn.example.com/image.png", "800": "..." } }
//! { "error": { "message": "File too large." } }
//! ```
//!
//! # Example
//!
//! ```no_run
//! use placeholder_uploadr::upload::{DataUrlReader, FileRepository, SimpleUploadAdapter, SimpleUploadConfig};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SimpleUploadConfig::builder()
//!     .url("https://example.com/upload")
//!     .header("Authorization", "Bearer token")
//!     .build()?;
//!
//! let repository = FileRepository::new(Arc::new(DataUrlReader::new()));
//! repository.set_adapter_factory(SimpleUploadAdapter::factory(config)?);
//! # Ok(())
//! # }
//! ```

use super::adapter::{AdapterFactory, ProgressSink, UploadAdapter};
use super::{FileHandle, FileLoader, Outcome, UploadResponse};
use async_trait::async_trait;
use futures::future::{AbortHandle, Abortable};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default multipart field carrying the file
pub const DEFAULT_FIELD_NAME: &str = "upload";

/// Default request timeout (30 seconds)
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Adapter setup errors
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("HTTP client error: {0}")]
    ClientError(#[from] reqwest::Error),
}

/// Simple upload adapter configuration
#[derive(Debug, Clone)]
pub struct SimpleUploadConfig {
    /// Upload endpoint (e.g., "https://example.com/upload")
    pub url: String,
    /// Extra request headers
    pub headers: BTreeMap<String, String>,
    /// Multipart field name (default: "upload")
    pub field_name: String,
    /// Request timeout (default: 30 seconds)
    pub timeout: Option<Duration>,
}

impl SimpleUploadConfig {
    pub fn builder() -> SimpleUploadConfigBuilder {
        SimpleUploadConfigBuilder::default()
    }
}

/// Builder for SimpleUploadConfig
#[derive(Default)]
pub struct SimpleUploadConfigBuilder {
    url: Option<String>,
    headers: BTreeMap<String, String>,
    field_name: Option<String>,
    timeout: Option<Duration>,
}

impl SimpleUploadConfigBuilder {
    /// Set the upload endpoint
    pub fn url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    /// Add a request header
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Set the multipart field name
    pub fn field_name(mut self, name: &str) -> Self {
        self.field_name = Some(name.to_string());
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<SimpleUploadConfig, AdapterError> {
        let url = self
            .url
            .ok_or_else(|| AdapterError::ConfigError("Upload URL is required".into()))?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(AdapterError::ConfigError(format!(
                "Upload URL must start with http:// or https://, got: {}",
                url
            )));
        }

        Ok(SimpleUploadConfig {
            url,
            headers: self.headers,
            field_name: self
                .field_name
                .unwrap_or_else(|| DEFAULT_FIELD_NAME.to_string()),
            timeout: self.timeout,
        })
    }
}

/// Upload endpoint response body
#[derive(Debug, Deserialize)]
struct ResponseBody {
    url: Option<String>,
    urls: Option<BTreeMap<String, String>>,
    error: Option<ResponseError>,
}

#[derive(Debug, Deserialize)]
struct ResponseError {
    message: Option<String>,
}

/// Multipart POST adapter
pub struct SimpleUploadAdapter {
    config: Arc<SimpleUploadConfig>,
    client: reqwest::Client,
    abort_handle: Mutex<Option<AbortHandle>>,
}

impl SimpleUploadAdapter {
    /// Create an adapter with its own HTTP client
    pub fn new(config: SimpleUploadConfig) -> Result<Self, AdapterError> {
        let client = Self::build_client(&config)?;
        Ok(Self::with_client(Arc::new(config), client))
    }

    fn with_client(config: Arc<SimpleUploadConfig>, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            abort_handle: Mutex::new(None),
        }
    }

    fn build_client(config: &SimpleUploadConfig) -> Result<reqwest::Client, AdapterError> {
        Ok(reqwest::Client::builder()
            .timeout(config.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()?)
    }

    /// Adapter factory sharing one HTTP client across loaders
    pub fn factory(config: SimpleUploadConfig) -> Result<impl AdapterFactory, AdapterError> {
        let client = Self::build_client(&config)?;
        let config = Arc::new(config);

        Ok(move |_loader: &FileLoader| -> Arc<dyn UploadAdapter> {
            Arc::new(SimpleUploadAdapter::with_client(config.clone(), client.clone()))
        })
    }

    async fn send(&self, file: &FileHandle, progress: &ProgressSink) -> Result<UploadResponse, String> {
        let generic_error = || format!("Couldn't upload file: {}.", file.name());

        let bytes = file.bytes().await.map_err(|e| {
            tracing::warn!(error = %e, file.name = %file.name(), "Cannot read file for upload");
            generic_error()
        })?;
        let total = bytes.len() as u64;
        progress.update(0, Some(total));

        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name(file.name().to_string())
            .mime_str(file.mime_type())
            .map_err(|_| generic_error())?;
        let form = reqwest::multipart::Form::new().part(self.config.field_name.clone(), part);

        let mut request = self.client.post(&self.config.url).multipart(form);
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(error = %e, "Upload request failed");
            generic_error()
        })?;
        progress.update(total, Some(total));

        let status = response.status();
        let raw = response.bytes().await.map_err(|e| {
            tracing::warn!(error = %e, "Failed to read upload response");
            generic_error()
        })?;
        let body: Option<ResponseBody> = match serde_json::from_slice(&raw) {
            Ok(body) => Some(body),
            Err(e) => {
                tracing::debug!(error = %e, bytes = raw.len(), "Upload response is not JSON");
                None
            }
        };

        if let Some(message) = body
            .as_ref()
            .and_then(|b| b.error.as_ref())
            .map(|e| e.message.clone().unwrap_or_else(generic_error))
        {
            return Err(message);
        }

        if !status.is_success() {
            tracing::warn!(http.status_code = status.as_u16(), "Upload endpoint returned an error");
            return Err(generic_error());
        }

        match body {
            Some(ResponseBody {
                urls: Some(urls), ..
            }) if !urls.is_empty() => Ok(UploadResponse::from_urls(urls)),
            Some(ResponseBody { url: Some(url), .. }) => Ok(UploadResponse::new(url)),
            _ => Err(generic_error()),
        }
    }
}

#[async_trait]
impl UploadAdapter for SimpleUploadAdapter {
    #[tracing::instrument(
        name = "upload.simple",
        skip(self, file, progress),
        fields(
            file.name = %file.name(),
            http.url = %self.config.url,
            upload.bytes = ?file.size()
        )
    )]
    async fn upload(&self, file: FileHandle, progress: ProgressSink) -> Outcome<UploadResponse> {
        let (handle, registration) = AbortHandle::new_pair();
        *self.abort_handle.lock() = Some(handle);

        let result = Abortable::new(self.send(&file, &progress), registration).await;
        self.abort_handle.lock().take();

        match result {
            Err(_) => Outcome::Aborted,
            Ok(Ok(response)) => {
                tracing::info!(url = ?response.canonical(), "Upload completed");
                Outcome::Resolved(response)
            }
            Ok(Err(message)) => Outcome::Failed(message),
        }
    }

    fn abort(&self) {
        if let Some(handle) = self.abort_handle.lock().take() {
            handle.abort();
        }
    }
}
