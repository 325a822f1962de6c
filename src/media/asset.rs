//! Asset Records
//!
//! Per-node view of one media asset: where it came from (provenance) and,
//! for originals, which nodes already hold a copy (the replication ledger).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AssetId, AssetRef, NodeId};

/// Where an asset came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    /// Uploaded on its owning node; the authoritative source
    Original,
    /// Created by replication from another node's original
    Copy {
        source_node: NodeId,
        source_asset_id: AssetId,
    },
}

impl Provenance {
    /// Reference to the original, if this is a copy
    pub fn source(&self) -> Option<AssetRef> {
        match self {
            Provenance::Original => None,
            Provenance::Copy { source_node, source_asset_id } => {
                Some(AssetRef::new(*source_node, *source_asset_id))
            }
        }
    }
}

/// Mapping of target node to the ID of the copy held there.
///
/// Entries are append-only: once a target is recorded it keeps its copy ID
/// until the whole record is deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicationLedger(BTreeMap<NodeId, AssetId>);

impl ReplicationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a copy; returns false (and keeps the existing entry) if the
    /// target was already recorded
    pub fn record(&mut self, target: NodeId, copy: AssetId) -> bool {
        match self.0.entry(target) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(copy);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Merge another ledger into this one without overwriting existing keys
    pub fn merge(&mut self, other: &ReplicationLedger) {
        for (target, copy) in other.iter() {
            self.record(target, copy);
        }
    }

    pub fn copy_on(&self, target: NodeId) -> Option<AssetId> {
        self.0.get(&target).copied()
    }

    /// Presence test; a recorded copy ID of 0 still counts as synced
    pub fn contains(&self, target: NodeId) -> bool {
        self.0.contains_key(&target)
    }

    pub fn targets(&self) -> BTreeSet<NodeId> {
        self.0.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, AssetId)> + '_ {
        self.0.iter().map(|(n, a)| (*n, *a))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(NodeId, AssetId)> for ReplicationLedger {
    fn from_iter<I: IntoIterator<Item = (NodeId, AssetId)>>(iter: I) -> Self {
        let mut ledger = ReplicationLedger::new();
        for (target, copy) in iter {
            ledger.record(target, copy);
        }
        ledger
    }
}

/// Descriptive metadata carried from an original to its copies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMetadata {
    /// File name inside the shared uploads directory
    pub file_name: String,
    /// MIME type
    pub mime_type: String,
    /// Human readable title
    #[serde(default)]
    pub title: String,
    /// Publication status
    #[serde(default = "default_status")]
    pub status: String,
    /// Public URL of the asset
    pub guid: String,
    /// Asset this one is attached to on the same node
    #[serde(default)]
    pub parent: Option<AssetId>,
}

fn default_status() -> String {
    "inherit".to_string()
}

/// A record to be inserted into a node's store
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub metadata: AssetMetadata,
    pub provenance: Provenance,
    pub uploaded_at: DateTime<Utc>,
}

impl NewAsset {
    /// A freshly uploaded original
    pub fn original(metadata: AssetMetadata) -> Self {
        Self {
            metadata,
            provenance: Provenance::Original,
            uploaded_at: Utc::now(),
        }
    }

    /// A copy of `source` carrying the given metadata
    pub fn copy_of(source: AssetRef, metadata: AssetMetadata) -> Self {
        Self {
            metadata,
            provenance: Provenance::Copy {
                source_node: source.node,
                source_asset_id: source.asset,
            },
            uploaded_at: Utc::now(),
        }
    }
}

/// One media asset as stored on its owning node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Owning node
    pub node: NodeId,
    /// Node-local ID
    pub id: AssetId,
    /// Descriptive metadata
    #[serde(flatten)]
    pub metadata: AssetMetadata,
    /// Upload time
    pub uploaded_at: DateTime<Utc>,
    provenance: Provenance,
    #[serde(default)]
    ledger: ReplicationLedger,
}

impl AssetRecord {
    /// Assemble a record. A copy never carries ledger entries; any passed in
    /// for a copy are dropped.
    pub fn new(
        node: NodeId,
        id: AssetId,
        metadata: AssetMetadata,
        uploaded_at: DateTime<Utc>,
        provenance: Provenance,
        ledger: ReplicationLedger,
    ) -> Self {
        let ledger = match provenance {
            Provenance::Original => ledger,
            Provenance::Copy { .. } => ReplicationLedger::new(),
        };
        Self {
            node,
            id,
            metadata,
            uploaded_at,
            provenance,
            ledger,
        }
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn is_original(&self) -> bool {
        matches!(self.provenance, Provenance::Original)
    }

    /// The original this record was copied from
    pub fn source(&self) -> Option<AssetRef> {
        self.provenance.source()
    }

    pub fn asset_ref(&self) -> AssetRef {
        AssetRef::new(self.node, self.id)
    }

    /// Ledger of existing copies, or None for a copy
    pub fn copies(&self) -> Option<&ReplicationLedger> {
        if self.is_original() {
            Some(&self.ledger)
        } else {
            None
        }
    }

    /// Whether `target` already holds a copy of this original
    pub fn is_synced_to(&self, target: NodeId) -> bool {
        self.ledger.contains(target)
    }

    /// Fold in copies recorded since this record was read. No-op for a copy.
    pub fn merge_copies(&mut self, recorded: &ReplicationLedger) {
        if self.is_original() {
            self.ledger.merge(recorded);
        }
    }

    /// Linked nodes that do not yet hold a copy. Never includes the owner.
    pub fn pending_targets(&self, linked: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
        if !self.is_original() {
            return BTreeSet::new();
        }
        linked
            .iter()
            .copied()
            .filter(|n| *n != self.node && !self.ledger.contains(*n))
            .collect()
    }
}
