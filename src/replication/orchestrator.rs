//! Batch Orchestrator
//!
//! Server side of the bulk "replicate existing media" operation. Each call
//! resolves the next batch of unsynced originals for a (source, target)
//! pair, pushes them through the engine and reports what is left.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::id::NodeId;
use crate::media::UnsyncedSetResolver;
use crate::network::{NodeContext, RelationshipMap};
use crate::replication::ReplicationEngine;
use crate::store::MediaStore;

/// Progress after one batch tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Originals on the source node
    pub total: u64,
    /// Originals still lacking a copy on the target
    pub not_replicated: u64,
}

impl BatchProgress {
    /// Share of originals already on the target, 0 to 100
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 || self.not_replicated == 0 {
            return 100.0;
        }
        let done = self.total.saturating_sub(self.not_replicated);
        (done as f64 / self.total as f64) * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.not_replicated == 0
    }
}

/// Drives batch replication between paired nodes
pub struct BatchOrchestrator {
    store: Arc<dyn MediaStore>,
    network: Arc<RelationshipMap>,
    context: Arc<NodeContext>,
    engine: Arc<ReplicationEngine>,
    resolver: UnsyncedSetResolver,
    /// One batch tick at a time
    tick: Mutex<()>,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn MediaStore>,
        network: Arc<RelationshipMap>,
        context: Arc<NodeContext>,
        engine: Arc<ReplicationEngine>,
    ) -> Self {
        Self {
            resolver: UnsyncedSetResolver::new(store.clone()),
            store,
            network,
            context,
            engine,
            tick: Mutex::new(()),
        }
    }

    /// Replicate up to `batch_size` unsynced originals from `source` and
    /// report progress toward `target`. `not_replicated` is re-read after
    /// the batch, so it only drops for items whose copy landed.
    ///
    /// Fails with `IllegalPair` unless the two nodes are linked.
    pub async fn replicate_batch(&self, source: NodeId, target: NodeId, batch_size: usize) -> Result<BatchProgress> {
        if !self.network.is_paired(source, target).await? {
            tracing::warn!("Rejected batch for unpaired nodes {} -> {}", source, target);
            return Err(Error::IllegalPair {
                source_node: source,
                target,
            });
        }

        let _tick = self.tick.lock().await;
        let _guard = self.context.switch_to(source);

        let total = self.store.count_originals(source).await?;
        let set = self.resolver.resolve(source, target, batch_size).await?;

        for item in set.items {
            let asset = item.id;
            if self.engine.enqueue(item).await {
                self.engine.process().await?;
            } else {
                tracing::debug!("Asset {} on node {} filtered out of batch", asset, source);
            }
        }

        // Count what is actually on the target now; failed ingests and
        // filtered items stay unsynced
        let not_replicated = self.resolver.resolve(source, target, 0).await?.total_unsynced;
        let progress = BatchProgress { total, not_replicated };
        tracing::info!(
            "Batch {} -> {}: {} of {} originals left ({:.0}% done)",
            source,
            target,
            progress.not_replicated,
            progress.total,
            progress.percent_complete()
        );
        Ok(progress)
    }
}
