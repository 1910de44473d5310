//! In-memory document
//!
//! A flat list of elements. Each recorded batch stores its inverse so it can
//! be undone and redone as one step.

use super::{
    Change, ChangeBatch, ChangeOrigin, DocumentChange, DocumentError, DocumentModel, Element,
    NodeId,
};
use parking_lot::RwLock;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct DocumentState {
    elements: Vec<Element>,
    version: u64,
    undo_stack: Vec<Vec<Change>>,
    redo_stack: Vec<Vec<Change>>,
}

impl DocumentState {
    fn position(&self, node: NodeId) -> Option<usize> {
        self.elements.iter().position(|e| e.id == node)
    }
}

/// Apply `changes` to `elements`, returning the changes that revert them
fn apply_changes(elements: &mut Vec<Element>, changes: &[Change]) -> Result<Vec<Change>, DocumentError> {
    let mut inverse = Vec::with_capacity(changes.len());

    for change in changes {
        match change {
            Change::SetAttribute { node, key, value } => {
                let element = find_mut(elements, *node)?;
                let previous = element.attributes.insert(key.clone(), value.clone());
                inverse.push(match previous {
                    Some(value) => Change::SetAttribute {
                        node: *node,
                        key: key.clone(),
                        value,
                    },
                    None => Change::RemoveAttribute {
                        node: *node,
                        key: key.clone(),
                    },
                });
            }
            Change::RemoveAttribute { node, key } => {
                let element = find_mut(elements, *node)?;
                if let Some(value) = element.attributes.remove(key) {
                    inverse.push(Change::SetAttribute {
                        node: *node,
                        key: key.clone(),
                        value,
                    });
                }
            }
            Change::InsertElement { index, element } => {
                if *index > elements.len() {
                    return Err(DocumentError::IndexOutOfBounds {
                        index: *index,
                        len: elements.len(),
                    });
                }
                if elements.iter().any(|e| e.id == element.id) {
                    return Err(DocumentError::DuplicateNode(element.id));
                }
                elements.insert(*index, element.clone());
                inverse.push(Change::RemoveElement { node: element.id });
            }
            Change::RemoveElement { node } => {
                let index = elements
                    .iter()
                    .position(|e| e.id == *node)
                    .ok_or(DocumentError::NodeNotFound(*node))?;
                let element = elements.remove(index);
                inverse.push(Change::InsertElement { index, element });
            }
        }
    }

    inverse.reverse();
    Ok(inverse)
}

fn find_mut(elements: &mut [Element], node: NodeId) -> Result<&mut Element, DocumentError> {
    elements
        .iter_mut()
        .find(|e| e.id == node)
        .ok_or(DocumentError::NodeNotFound(node))
}

/// Document held in memory
pub struct InMemoryDocument {
    state: RwLock<DocumentState>,
    next_id: AtomicU64,
    changes: broadcast::Sender<DocumentChange>,
}

impl Default for InMemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocument {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(DocumentState::default()),
            next_id: AtomicU64::new(1),
            changes,
        }
    }

    /// Create a document holding one paragraph per text
    pub fn with_paragraphs<'a>(paragraphs: impl IntoIterator<Item = &'a str>) -> Self {
        let document = Self::new();
        {
            let mut state = document.state.write();
            for text in paragraphs {
                let element = document.create_element("paragraph").with_text(text);
                state.elements.push(element);
            }
        }
        document
    }

    /// Insert `element` at `index` as its own batch
    pub fn insert(&self, index: usize, element: Element) -> Result<u64, DocumentError> {
        self.apply(ChangeBatch::new().insert_element(index, element))
    }

    pub fn element(&self, node: NodeId) -> Option<Element> {
        let state = self.state.read();
        state.position(node).map(|i| state.elements[i].clone())
    }

    pub fn elements(&self) -> Vec<Element> {
        self.state.read().elements.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    pub fn can_undo(&self) -> bool {
        !self.state.read().undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.state.read().redo_stack.is_empty()
    }

    /// Revert the last recorded batch
    ///
    /// Returns `Ok(None)` when there is nothing to undo.
    pub fn undo(&self) -> Result<Option<u64>, DocumentError> {
        self.replay(ChangeOrigin::Undo)
    }

    /// Reapply the last undone batch
    pub fn redo(&self) -> Result<Option<u64>, DocumentError> {
        self.replay(ChangeOrigin::Redo)
    }

    fn replay(&self, origin: ChangeOrigin) -> Result<Option<u64>, DocumentError> {
        let mut state = self.state.write();
        let stack = match origin {
            ChangeOrigin::Undo => &mut state.undo_stack,
            _ => &mut state.redo_stack,
        };
        let Some(changes) = stack.pop() else {
            return Ok(None);
        };

        let mut elements = state.elements.clone();
        let inverse = match apply_changes(&mut elements, &changes) {
            Ok(inverse) => inverse,
            Err(e) => {
                tracing::warn!(error = %e, origin = ?origin, "History step no longer applies");
                match origin {
                    ChangeOrigin::Undo => state.undo_stack.push(changes),
                    _ => state.redo_stack.push(changes),
                }
                return Err(e);
            }
        };

        state.elements = elements;
        state.version += 1;
        match origin {
            ChangeOrigin::Undo => state.redo_stack.push(inverse),
            _ => state.undo_stack.push(inverse),
        }
        let version = state.version;
        drop(state);

        let _ = self.changes.send(DocumentChange {
            version,
            origin,
            changes,
        });
        Ok(Some(version))
    }

    /// Render the document as markup, attributes in key order
    pub fn to_markup(&self) -> String {
        let state = self.state.read();
        let mut out = String::new();
        for element in &state.elements {
            let _ = write!(out, "<{}", element.name);
            for (key, value) in &element.attributes {
                let _ = write!(out, " {}=\"{}\"", key, value);
            }
            let _ = write!(
                out,
                ">{}</{}>",
                element.text.as_deref().unwrap_or_default(),
                element.name
            );
        }
        out
    }
}

impl DocumentModel for InMemoryDocument {
    fn contains(&self, node: NodeId) -> bool {
        self.state.read().position(node).is_some()
    }

    fn attribute(&self, node: NodeId, key: &str) -> Option<String> {
        let state = self.state.read();
        state
            .position(node)
            .and_then(|i| state.elements[i].attributes.get(key).cloned())
    }

    fn create_element(&self, name: &str) -> Element {
        Element::new(NodeId::new(self.next_id.fetch_add(1, Ordering::Relaxed)), name)
    }

    fn apply(&self, batch: ChangeBatch) -> Result<u64, DocumentError> {
        let mut state = self.state.write();
        let mut elements = state.elements.clone();
        let inverse = apply_changes(&mut elements, batch.changes())?;

        state.elements = elements;
        state.version += 1;
        if !batch.is_transparent() {
            state.undo_stack.push(inverse);
            state.redo_stack.clear();
        }
        let version = state.version;
        drop(state);

        let _ = self.changes.send(DocumentChange {
            version,
            origin: ChangeOrigin::Edit,
            changes: batch.into_changes(),
        });
        Ok(version)
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.changes.subscribe()
    }
}

impl std::fmt::Debug for InMemoryDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("InMemoryDocument")
            .field("elements", &state.elements.len())
            .field("version", &state.version)
            .finish()
    }
}
