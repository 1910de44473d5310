//! Notification channel
//!
//! User-facing messages raised by the upload controller. Handlers run in
//! priority order (highest first) and may stop propagation; when none does,
//! the default sink logs the message.
//!
//! # Example
//!
//! ```
//! use placeholder_uploadr::notification::{NotificationChannel, Propagation, Severity};
//!
//! let channel = NotificationChannel::new();
//! channel.on(10, |notification| {
//!     assert_eq!(notification.severity, Severity::Warning);
//!     Propagation::Stop
//! });
//! channel.show_warning("Reading error.");
//! ```

use crate::metrics;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
    pub title: Option<String>,
}

/// Whether later handlers see the notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    Stop,
}

/// Registration handle returned by [`NotificationChannel::on`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&Notification) -> Propagation + Send + Sync>;

struct Registration {
    id: HandlerId,
    priority: i32,
    handler: Handler,
}

/// Notification dispatcher
#[derive(Clone, Default)]
pub struct NotificationChannel {
    handlers: Arc<RwLock<Vec<Registration>>>,
    next_id: Arc<AtomicU64>,
}

impl NotificationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; higher priorities run first
    pub fn on<F>(&self, priority: i32, handler: F) -> HandlerId
    where
        F: Fn(&Notification) -> Propagation + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write();
        handlers.push(Registration {
            id,
            priority,
            handler: Arc::new(handler),
        });
        // Stable: equal priorities keep registration order
        handlers.sort_by(|a, b| b.priority.cmp(&a.priority));
        id
    }

    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }

    /// Dispatch `notification` to handlers, then to the default sink
    pub fn show(&self, notification: Notification) {
        metrics::record_notification(notification.severity.as_str());

        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .iter()
            .map(|r| r.handler.clone())
            .collect();

        for handler in handlers {
            if handler(&notification) == Propagation::Stop {
                return;
            }
        }

        match notification.severity {
            Severity::Warning => tracing::warn!(
                notification.title = ?notification.title,
                "{}",
                notification.message
            ),
            _ => tracing::info!(
                notification.severity = %notification.severity,
                notification.title = ?notification.title,
                "{}",
                notification.message
            ),
        }
    }

    pub fn show_warning(&self, message: impl Into<String>) {
        self.show(Notification {
            severity: Severity::Warning,
            message: message.into(),
            title: None,
        });
    }

    pub fn show_info(&self, message: impl Into<String>) {
        self.show(Notification {
            severity: Severity::Info,
            message: message.into(),
            title: None,
        });
    }
}

impl fmt::Debug for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}
