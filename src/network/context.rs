//! Node Context
//!
//! Tracks which node the process is currently acting as. Switching returns
//! a guard that restores the previous node when dropped, including on early
//! return or error.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::id::NodeId;

/// Shared "current node" cell.
///
/// Guards restore whatever node they replaced, so switches are only
/// well-nested within one task. Two tasks switching concurrently (a batch
/// on a non-main source alongside a delete cascade, say) can leave
/// `current()` on a node neither of them started from until the next
/// switch. Nothing reads it for correctness; `/status` reports it as is.
#[derive(Debug)]
pub struct NodeContext {
    current: Arc<Mutex<NodeId>>,
}

impl NodeContext {
    /// Create a context rooted at the given home node
    pub fn new(home: NodeId) -> Self {
        Self {
            current: Arc::new(Mutex::new(home)),
        }
    }

    /// Node currently acted on
    pub fn current(&self) -> NodeId {
        *lock(&self.current)
    }

    /// Act as `node` until the returned guard is dropped
    pub fn switch_to(&self, node: NodeId) -> ContextGuard {
        let mut current = lock(&self.current);
        let previous = std::mem::replace(&mut *current, node);
        if previous != node {
            tracing::trace!("Switched context from node {} to node {}", previous, node);
        }
        ContextGuard {
            cell: self.current.clone(),
            previous,
        }
    }
}

fn lock(cell: &Mutex<NodeId>) -> MutexGuard<'_, NodeId> {
    // NodeId is Copy; a poisoned cell still holds a valid value
    cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Restores the previous node on drop
#[must_use = "the context switches back as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    cell: Arc<Mutex<NodeId>>,
    previous: NodeId,
}

impl ContextGuard {
    /// Node that will be restored
    pub fn previous(&self) -> NodeId {
        self.previous
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        *lock(&self.cell) = self.previous;
    }
}
