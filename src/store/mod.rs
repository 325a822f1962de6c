//! Media Store Module
//!
//! The per-node content store the replication engine reads and writes.
//! Every call names the node it targets; there is no ambient "current
//! node" at this layer.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::id::{AssetId, AssetRef, NodeId};
use crate::media::{AssetRecord, NewAsset, ReplicationLedger, UnsyncedSet};
use crate::network::RelationshipGraph;

/// Storage backend for asset records, replication ledgers and the
/// network-wide relationship map
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Register a node and its public base URL (replaces an existing URL)
    async fn register_node(&self, node: NodeId, base_url: &str) -> Result<()>;

    /// Base URL of a node, if registered
    async fn node_url(&self, node: NodeId) -> Result<Option<String>>;

    /// All registered nodes, ascending by ID
    async fn list_nodes(&self) -> Result<Vec<(NodeId, String)>>;

    /// Insert a record and return its new node-local ID
    async fn insert_asset(&self, node: NodeId, asset: NewAsset) -> Result<AssetId>;

    /// Load one record together with its ledger
    async fn get_asset(&self, node: NodeId, id: AssetId) -> Result<Option<AssetRecord>>;

    /// All records on a node, ascending by ID
    async fn list_assets(&self, node: NodeId) -> Result<Vec<AssetRecord>>;

    /// Find a record on `node` whose provenance points at `original`
    async fn find_copy_of(&self, node: NodeId, original: AssetRef) -> Result<Option<AssetId>>;

    /// Originals on `node` with no ledger entry for `target`, plus the total
    /// count of such originals, read in one consistent snapshot
    async fn unsynced_originals(&self, node: NodeId, target: NodeId, limit: usize) -> Result<UnsyncedSet>;

    /// Number of originals on a node
    async fn count_originals(&self, node: NodeId) -> Result<u64>;

    /// Persist a full ledger for an original in one write. Keys already
    /// present keep their copy ID.
    async fn record_ledger(&self, node: NodeId, id: AssetId, ledger: &ReplicationLedger) -> Result<()>;

    /// Delete a record and its ledger; returns false if it did not exist
    async fn delete_asset(&self, node: NodeId, id: AssetId) -> Result<bool>;

    /// Load the persisted relationship map
    async fn load_relationships(&self) -> Result<RelationshipGraph>;

    /// Replace the persisted relationship map
    async fn save_relationships(&self, graph: &RelationshipGraph) -> Result<()>;
}
