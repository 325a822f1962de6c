//! Replication Module
//!
//! Copies originals to linked nodes, cascades deletes and drives bulk
//! replication of existing media in batches.

mod engine;
mod filter;
mod ingest;
mod orchestrator;

pub use engine::{DeletionReport, EngineState, InProcess, ReplicationEngine};
pub use filter::{skip_mime_prefixes, FilterPipeline};
pub use ingest::{rewrite_guid, AssetIngest, StoreIngest};
pub use orchestrator::{BatchOrchestrator, BatchProgress};
