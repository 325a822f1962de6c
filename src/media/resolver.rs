//! Unsynced Set Resolution
//!
//! Finds the originals on a source node that have no copy on a target node
//! yet. Results come back in ascending asset ID order, so repeating the call
//! after partial progress naturally continues from the lowest remaining ID:
//! anything already synced has dropped out of the set.

use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::id::NodeId;
use crate::media::AssetRecord;
use crate::store::MediaStore;

/// One resolution pass: the next batch plus the size of the whole delta
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnsyncedSet {
    /// Next batch, ascending by asset ID, at most `max_batch` long
    pub items: Vec<AssetRecord>,
    /// Count of ALL unsynced originals on the source, independent of the batch bound
    pub total_unsynced: u64,
}

/// Computes the unsynced delta for an ordered (source, target) pair.
///
/// Does not reject `source == target`; pairing is validated before a
/// request ever gets here.
pub struct UnsyncedSetResolver {
    store: Arc<dyn MediaStore>,
}

impl UnsyncedSetResolver {
    pub fn new(store: Arc<dyn MediaStore>) -> Self {
        Self { store }
    }

    /// Resolve the next batch of originals on `source` lacking a copy on `target`
    pub async fn resolve(&self, source: NodeId, target: NodeId, max_batch: usize) -> Result<UnsyncedSet> {
        let set = self.store.unsynced_originals(source, target, max_batch).await?;

        tracing::debug!(
            "Resolved {} of {} unsynced originals from node {} to node {}",
            set.items.len(),
            set.total_unsynced,
            source,
            target
        );

        Ok(set)
    }
}
