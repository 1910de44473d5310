//! Document model
//!
//! The contract the upload controller writes through: attribute access by
//! node, element insertion and removal, and batches applied as one unit.
//!
//! # Components
//!
//! - **DocumentModel**: trait implemented by the host's document
//! - **ChangeBatch**: ordered changes applied all-or-nothing
//! - **InMemoryDocument**: flat element list with undo/redo, used by the CLI and tests

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::broadcast;

pub mod memory;

pub use memory::InMemoryDocument;

/// Stable identity of a document node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

impl NodeId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A document element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub id: NodeId,
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub text: Option<String>,
}

impl Element {
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            attributes: BTreeMap::new(),
            text: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// A single document mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    SetAttribute {
        node: NodeId,
        key: String,
        value: String,
    },
    RemoveAttribute {
        node: NodeId,
        key: String,
    },
    InsertElement {
        index: usize,
        element: Element,
    },
    RemoveElement {
        node: NodeId,
    },
}

/// Changes applied, and observed, as one unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    changes: Vec<Change>,
    transparent: bool,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A batch kept out of the undo history
    pub fn transparent() -> Self {
        Self {
            changes: Vec::new(),
            transparent: true,
        }
    }

    pub fn set_attribute(
        mut self,
        node: NodeId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.changes.push(Change::SetAttribute {
            node,
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn remove_attribute(mut self, node: NodeId, key: impl Into<String>) -> Self {
        self.changes.push(Change::RemoveAttribute {
            node,
            key: key.into(),
        });
        self
    }

    pub fn insert_element(mut self, index: usize, element: Element) -> Self {
        self.changes.push(Change::InsertElement { index, element });
        self
    }

    pub fn remove_element(mut self, node: NodeId) -> Self {
        self.changes.push(Change::RemoveElement { node });
        self
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn into_changes(self) -> Vec<Change> {
        self.changes
    }

    pub fn is_transparent(&self) -> bool {
        self.transparent
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// What produced a document change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Edit,
    Undo,
    Redo,
}

/// Published after a batch is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
    pub version: u64,
    pub origin: ChangeOrigin,
    pub changes: Vec<Change>,
}

/// Document errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Node {0} already exists")]
    DuplicateNode(NodeId),
}

/// Document the upload controller writes to
#[cfg_attr(test, mockall::automock)]
pub trait DocumentModel: Send + Sync {
    /// Whether `node` is still part of the document
    fn contains(&self, node: NodeId) -> bool;

    fn attribute(&self, node: NodeId, key: &str) -> Option<String>;

    /// Allocate a detached element with a fresh id
    fn create_element(&self, name: &str) -> Element;

    /// Apply `batch` atomically and return the new version
    fn apply(&self, batch: ChangeBatch) -> Result<u64, DocumentError>;

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange>;
}
