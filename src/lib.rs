//! MediaSync - Media Replication Across Linked Sites
//!
//! Keeps media assets in sync between the sites (nodes) of a multi-tenant
//! network. Every asset has exactly one original on the node it was
//! uploaded to; replication creates copies on linked nodes and records them
//! in the original's replication ledger.
//!
//! # Architecture
//!
//! Nodes share media only with the nodes they are linked to in the
//! relationship map. New uploads are replicated immediately by the
//! replication engine; media that existed before two nodes were linked is
//! brought across in resumable batches driven by a client loop.
//!
//! # Features
//!
//! - Symmetric node relationship map persisted alongside the media
//! - Per-upload replication with double-check against duplicate copies
//! - Bounded, resumable batch replication of existing media
//! - Cascading deletes across an asset's copies
//! - Pluggable pre-replication filters and copy ingest
//! - HTTP API and command line batch client with pause/terminate

pub mod api;
pub mod app;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod id;
pub mod media;
pub mod network;
pub mod replication;
pub mod store;

#[cfg(test)]
mod testing;

pub use app::MediaSync;
pub use config::MediaSyncConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::app::MediaSync;
    pub use crate::config::MediaSyncConfig;
    pub use crate::error::{Error, Result};
    pub use crate::id::{AssetId, AssetRef, NodeId};
    pub use crate::media::{AssetMetadata, AssetRecord, Provenance, ReplicationLedger};
    pub use crate::network::{NodeContext, RelationshipGraph, RelationshipMap};
    pub use crate::replication::{AssetIngest, BatchOrchestrator, BatchProgress, ReplicationEngine};
    pub use crate::store::{MediaStore, SqliteStore};
}
