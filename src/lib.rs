//! Placeholder Uploadr Library
//!
//! Upload lifecycle engine binding asynchronous file uploads to placeholders
//! in a live document model.
//!
//! # Features
//!
//! - **Loaders**: one state machine per upload attempt, read then upload
//! - **Repository**: single live loader per file, pending-upload guard
//! - **Controller**: writes previews and final URLs back into placeholder nodes
//! - **Pluggable transport**: any `UploadAdapter`, HTTP multipart built in
//!
//! # Example
//!
//! ```no_run
//! use placeholder_uploadr::{config::Config, document::InMemoryDocument, session::UploadSession};
//! use placeholder_uploadr::upload::FileHandle;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let document = Arc::new(InMemoryDocument::with_paragraphs(["foo bar"]));
//!     let session = UploadSession::new(config, document.clone())?;
//!
//!     session.handle_files([FileHandle::from_path("photo.png")], 0)?;
//!     session.wait_until_settled().await;
//!     println!("{}", document.to_markup());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod document;
pub mod metrics;
pub mod notification;
pub mod session;
pub mod telemetry;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use controller::{UploadCommand, UploadController};
pub use session::UploadSession;
pub use upload::{FileHandle, FileLoader, FileRepository, LoaderStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
