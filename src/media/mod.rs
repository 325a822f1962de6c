//! Media Module
//!
//! Asset records, their provenance and replication ledgers, and resolution
//! of the not-yet-synced delta between two nodes.

mod asset;
mod resolver;

pub use asset::{AssetMetadata, AssetRecord, NewAsset, Provenance, ReplicationLedger};
pub use resolver::{UnsyncedSet, UnsyncedSetResolver};
