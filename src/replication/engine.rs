//! Replication Engine
//!
//! Copies one original at a time to every linked node that lacks it, and
//! cascades deletes across the copies of an asset.
//!
//! The engine holds two process-wide slots: the item staged for replication
//! and the item currently being worked on. The in-process slot doubles as a
//! soft re-entrancy guard: uploads and deletes made while it is occupied do
//! not start another round.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::id::{AssetId, AssetRef, NodeId};
use crate::media::{AssetRecord, ReplicationLedger};
use crate::network::{NodeContext, RelationshipMap};
use crate::replication::{AssetIngest, FilterPipeline};
use crate::store::MediaStore;

/// What the engine is currently working on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InProcess {
    /// Copying an original to its linked nodes
    Replicating(AssetRecord),
    /// Cascading a delete
    Deleting(AssetRef),
}

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Enqueued,
    Processing,
}

/// Outcome of a cascading delete
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    /// Records removed from other nodes
    pub removed: usize,
    /// Per-record deletes that failed
    pub failed: usize,
    /// True if the cascade did not run because the engine was busy
    pub skipped: bool,
}

/// Replicates originals across linked nodes
pub struct ReplicationEngine {
    /// Shared media store
    store: Arc<dyn MediaStore>,
    /// Node relationships
    network: Arc<RelationshipMap>,
    /// Current-node context
    context: Arc<NodeContext>,
    /// Copy creation
    ingest: Arc<dyn AssetIngest>,
    /// Pre-enqueue hooks
    filters: FilterPipeline,
    /// Item staged for the next `process`
    item_in_queue: Mutex<Option<AssetRecord>>,
    /// Item being replicated or deleted
    item_in_process: Mutex<Option<InProcess>>,
}

impl ReplicationEngine {
    pub fn new(
        store: Arc<dyn MediaStore>,
        network: Arc<RelationshipMap>,
        context: Arc<NodeContext>,
        ingest: Arc<dyn AssetIngest>,
    ) -> Self {
        Self {
            store,
            network,
            context,
            ingest,
            filters: FilterPipeline::new(),
            item_in_queue: Mutex::new(None),
            item_in_process: Mutex::new(None),
        }
    }

    /// Filters applied on enqueue
    pub fn filters(&self) -> &FilterPipeline {
        &self.filters
    }

    /// Stage an item for replication, replacing anything already staged.
    ///
    /// Returns false if a filter rejected the item; the queue slot is
    /// cleared in that case.
    pub async fn enqueue(&self, item: AssetRecord) -> bool {
        let asset = item.asset_ref();
        let staged = self.filters.apply(item);
        let accepted = staged.is_some();

        *self.item_in_queue.lock().await = staged;

        if accepted {
            tracing::debug!("Enqueued {} for replication", asset);
        }
        accepted
    }

    /// Replicate the staged item to every linked node lacking a copy.
    ///
    /// Returns `Ok(true)` without doing anything if nothing is staged or
    /// another item is in process. Per-target failures are logged and left
    /// for the next pass.
    pub async fn process(&self) -> Result<bool> {
        let item = {
            let mut in_process = self.item_in_process.lock().await;
            if in_process.is_some() {
                return Ok(true);
            }
            let mut queue = self.item_in_queue.lock().await;
            let Some(item) = queue.take() else {
                return Ok(true);
            };
            *in_process = Some(InProcess::Replicating(item.clone()));
            item
        };

        let result = self.replicate(&item).await;
        *self.item_in_process.lock().await = None;

        result.map(|_| true)
    }

    /// Process only if the staged item is `asset`; used by triggers that run
    /// after the record has been fully written
    pub async fn process_for(&self, asset: AssetId) -> Result<bool> {
        let matches = self
            .item_in_queue
            .lock()
            .await
            .as_ref()
            .map_or(false, |item| item.id == asset);

        if !matches {
            tracing::debug!("Deferred trigger for asset {} does not match the staged item", asset);
            return Ok(false);
        }
        self.process().await
    }

    /// What is in process, if anything
    pub async fn currently_processing(&self) -> Option<InProcess> {
        self.item_in_process.lock().await.clone()
    }

    pub async fn state(&self) -> EngineState {
        if self.item_in_process.lock().await.is_some() {
            EngineState::Processing
        } else if self.item_in_queue.lock().await.is_some() {
            EngineState::Enqueued
        } else {
            EngineState::Idle
        }
    }

    #[cfg(test)]
    pub(crate) async fn item_in_process_for_test(&self) -> tokio::sync::MutexGuard<'_, Option<InProcess>> {
        self.item_in_process.lock().await
    }

    async fn replicate(&self, item: &AssetRecord) -> Result<ReplicationLedger> {
        if !item.is_original() {
            tracing::error!("Refusing to replicate {}: it is a copy, not an original", item.asset_ref());
            return Err(Error::ProvenanceViolation {
                node: item.node,
                asset: item.id,
            });
        }

        let home = item.node;
        let mut plan = item.clone();
        // pick up copies recorded since the item was staged
        if let Some(stored) = self.store.get_asset(home, item.id).await? {
            if let Some(current) = stored.copies() {
                plan.merge_copies(current);
            }
        }

        let linked = self.network.neighbors(home).await?;
        let targets = plan.pending_targets(&linked);
        let mut ledger = plan.copies().cloned().unwrap_or_default();

        if targets.is_empty() {
            tracing::debug!("{} is already on every linked node", item.asset_ref());
        }

        for target in targets {
            let _guard = self.context.switch_to(target);
            match self.copy_to(item, target).await {
                Ok(copy) => {
                    ledger.record(target, copy);
                    tracing::debug!("Replicated {} to node {} as asset {}", item.asset_ref(), target, copy);
                }
                Err(e) => {
                    tracing::warn!("Failed to replicate {} to node {}: {}", item.asset_ref(), target, e);
                }
            }
        }

        self.store.record_ledger(home, item.id, &ledger).await?;
        Ok(ledger)
    }

    /// Adopt an existing copy on `target` or ingest a new one
    async fn copy_to(&self, item: &AssetRecord, target: NodeId) -> Result<AssetId> {
        if let Some(existing) = self.store.find_copy_of(target, item.asset_ref()).await? {
            tracing::debug!("Node {} already holds {} as asset {}", target, item.asset_ref(), existing);
            return Ok(existing);
        }
        self.ingest.ingest(item, target).await
    }

    /// Delete the other copies of an asset before `node` deletes its own.
    ///
    /// For a copy, the original and every sibling copy are removed. For an
    /// original, every copy is removed and the caller deletes the original.
    /// The record on `node` itself is never touched. Ignored while anything
    /// is in process.
    pub async fn delete_item(&self, node: NodeId, asset: AssetId) -> Result<DeletionReport> {
        let target = AssetRef::new(node, asset);
        {
            let mut in_process = self.item_in_process.lock().await;
            if let Some(current) = in_process.as_ref() {
                tracing::debug!("Ignoring delete of {} while busy with {:?}", target, current);
                return Ok(DeletionReport {
                    skipped: true,
                    ..Default::default()
                });
            }
            *in_process = Some(InProcess::Deleting(target));
        }

        let result = self.cascade_delete(node, asset).await;
        *self.item_in_process.lock().await = None;

        if let Ok(report) = &result {
            if report.removed > 0 || report.failed > 0 {
                tracing::info!(
                    "Cascaded delete of {}: {} removed, {} failed",
                    target,
                    report.removed,
                    report.failed
                );
            }
        }
        result
    }

    async fn cascade_delete(&self, node: NodeId, asset: AssetId) -> Result<DeletionReport> {
        let mut report = DeletionReport::default();
        let Some(record) = self.store.get_asset(node, asset).await? else {
            return Ok(report);
        };

        match record.source() {
            Some(original) => {
                let _guard = self.context.switch_to(original.node);
                let Some(home) = self.store.get_asset(original.node, original.asset).await? else {
                    tracing::debug!("Original {} of {} no longer exists", original, record.asset_ref());
                    return Ok(report);
                };
                if let Some(ledger) = home.copies() {
                    self.delete_copies(original, ledger, node, &mut report).await;
                }
                match self.store.delete_asset(original.node, original.asset).await {
                    Ok(true) => report.removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!("Failed to delete original {}: {}", original, e);
                        report.failed += 1;
                    }
                }
            }
            None => {
                if let Some(ledger) = record.copies() {
                    self.delete_copies(record.asset_ref(), ledger, node, &mut report).await;
                }
            }
        }

        Ok(report)
    }

    async fn delete_copies(
        &self,
        original: AssetRef,
        ledger: &ReplicationLedger,
        caller: NodeId,
        report: &mut DeletionReport,
    ) {
        for (target, copy) in ledger.iter() {
            if target == caller {
                continue;
            }
            let _guard = self.context.switch_to(target);
            match self.delete_copy(original, target, copy).await {
                Ok(true) => report.removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Failed to delete copy {} of {} on node {}: {}", copy, original, target, e);
                    report.failed += 1;
                }
            }
        }
    }

    /// Delete `copy` on `target` only if it really is a copy of `original`
    async fn delete_copy(&self, original: AssetRef, target: NodeId, copy: AssetId) -> Result<bool> {
        match self.store.get_asset(target, copy).await? {
            Some(record) if record.source() == Some(original) => self.store.delete_asset(target, copy).await,
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{insert_copy, test_store, upload, FailingDeletes, FailingIngest, Harness};

    #[tokio::test]
    async fn test_upload_replicates_to_all_linked() {
        let h = Harness::new(vec![(1, vec![2, 3])]).await;
        let x = upload(&h.store, NodeId(1), "x.jpg").await;

        assert_eq!(h.engine.state().await, EngineState::Idle);
        assert!(h.engine.enqueue(x.clone()).await);
        assert_eq!(h.engine.state().await, EngineState::Enqueued);
        assert!(h.engine.process().await.unwrap());
        assert_eq!(h.engine.state().await, EngineState::Idle);

        let stored = h.store.get_asset(NodeId(1), x.id).await.unwrap().unwrap();
        let ledger = stored.copies().unwrap();
        assert_eq!(ledger.targets(), [NodeId(2), NodeId(3)].into_iter().collect());

        for target in [NodeId(2), NodeId(3)] {
            let copy = h.store.get_asset(target, ledger.copy_on(target).unwrap()).await.unwrap().unwrap();
            assert_eq!(copy.source(), Some(x.asset_ref()));
        }

        // nothing staged, nothing changes
        assert!(h.engine.process().await.unwrap());
        assert_eq!(h.store.list_assets(NodeId(2)).await.unwrap().len(), 1);
        assert_eq!(h.context.current(), NodeId(1));
    }

    #[tokio::test]
    async fn test_no_double_copy() {
        let h = Harness::new(vec![(1, vec![2])]).await;
        let x = upload(&h.store, NodeId(1), "x.jpg").await;

        // stale record staged twice
        h.engine.enqueue(x.clone()).await;
        h.engine.process().await.unwrap();
        h.engine.enqueue(x.clone()).await;
        h.engine.process().await.unwrap();

        assert_eq!(h.store.list_assets(NodeId(2)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_rounds_make_one_copy_per_target() {
        let h = Harness::new(vec![(1, vec![2, 3])]).await;
        let x = upload(&h.store, NodeId(1), "x.jpg").await;

        async fn round(engine: &ReplicationEngine, item: &AssetRecord) {
            engine.enqueue(item.clone()).await;
            engine.process().await.unwrap();
        }
        tokio::join!(round(&h.engine, &x), round(&h.engine, &x), round(&h.engine, &x));
        // drain anything left staged while another round was in process
        h.engine.process().await.unwrap();

        assert_eq!(h.store.list_assets(NodeId(2)).await.unwrap().len(), 1);
        assert_eq!(h.store.list_assets(NodeId(3)).await.unwrap().len(), 1);
        let stored = h.store.get_asset(NodeId(1), x.id).await.unwrap().unwrap();
        assert_eq!(stored.copies().unwrap().len(), 2);
        assert_eq!(h.engine.state().await, EngineState::Idle);
    }

    #[tokio::test]
    async fn test_adopts_unrecorded_copy() {
        let h = Harness::new(vec![(1, vec![2])]).await;
        let x = upload(&h.store, NodeId(1), "x.jpg").await;
        let existing = insert_copy(&h.store, NodeId(2), NodeId(1), x.id).await;

        h.engine.enqueue(x.clone()).await;
        h.engine.process().await.unwrap();

        let stored = h.store.get_asset(NodeId(1), x.id).await.unwrap().unwrap();
        assert_eq!(stored.copies().unwrap().copy_on(NodeId(2)), Some(existing));
        assert_eq!(h.store.list_assets(NodeId(2)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_copy_is_rejected() {
        let h = Harness::new(vec![(1, vec![2, 3])]).await;
        let x = upload(&h.store, NodeId(1), "x.jpg").await;
        let copy_id = insert_copy(&h.store, NodeId(2), NodeId(1), x.id).await;
        let copy = h.store.get_asset(NodeId(2), copy_id).await.unwrap().unwrap();

        h.engine.enqueue(copy).await;
        let err = h.engine.process().await.unwrap_err();
        assert!(matches!(err, Error::ProvenanceViolation { .. }));

        // slot released
        assert!(h.engine.currently_processing().await.is_none());
        assert_eq!(h.engine.state().await, EngineState::Idle);
        assert!(h.store.list_assets(NodeId(3)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_target_failure_is_isolated() {
        let h = Harness::with_ingest(vec![(1, vec![2, 3])], |store| {
            Arc::new(FailingIngest::new(store, [NodeId(2)])) as Arc<dyn AssetIngest>
        })
        .await;
        let x = upload(&h.store, NodeId(1), "x.jpg").await;

        h.engine.enqueue(x.clone()).await;
        assert!(h.engine.process().await.unwrap());

        let stored = h.store.get_asset(NodeId(1), x.id).await.unwrap().unwrap();
        let ledger = stored.copies().unwrap();
        assert!(!ledger.contains(NodeId(2)));
        assert!(ledger.contains(NodeId(3)));
        assert_eq!(h.context.current(), NodeId(1));
    }

    #[tokio::test]
    async fn test_filter_veto_clears_queue() {
        let h = Harness::new(vec![(1, vec![2])]).await;
        let x = upload(&h.store, NodeId(1), "x.jpg").await;
        h.engine.enqueue(x.clone()).await;

        h.engine.filters().register("none", |_item: AssetRecord| None);
        assert!(!h.engine.enqueue(x.clone()).await);
        assert_eq!(h.engine.state().await, EngineState::Idle);

        h.engine.process().await.unwrap();
        assert!(h.store.list_assets(NodeId(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_process_for_requires_matching_id() {
        let h = Harness::new(vec![(1, vec![2])]).await;
        let x = upload(&h.store, NodeId(1), "x.jpg").await;
        h.engine.enqueue(x.clone()).await;

        assert!(!h.engine.process_for(AssetId(999)).await.unwrap());
        assert_eq!(h.engine.state().await, EngineState::Enqueued);

        assert!(h.engine.process_for(x.id).await.unwrap());
        assert_eq!(h.store.list_assets(NodeId(2)).await.unwrap().len(), 1);
    }

    async fn replicated(h: &Harness) -> (AssetRecord, AssetId, AssetId) {
        let x = upload(&h.store, NodeId(1), "x.jpg").await;
        h.engine.enqueue(x.clone()).await;
        h.engine.process().await.unwrap();
        let stored = h.store.get_asset(NodeId(1), x.id).await.unwrap().unwrap();
        let ledger = stored.copies().unwrap();
        (stored.clone(), ledger.copy_on(NodeId(2)).unwrap(), ledger.copy_on(NodeId(3)).unwrap())
    }

    #[tokio::test]
    async fn test_delete_original_removes_copies() {
        let h = Harness::new(vec![(1, vec![2, 3])]).await;
        let (x, on_2, on_3) = replicated(&h).await;

        let report = h.engine.delete_item(NodeId(1), x.id).await.unwrap();
        assert_eq!(report.removed, 2);
        assert!(h.store.get_asset(NodeId(2), on_2).await.unwrap().is_none());
        assert!(h.store.get_asset(NodeId(3), on_3).await.unwrap().is_none());
        // caller deletes the original itself
        assert!(h.store.get_asset(NodeId(1), x.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_copy_removes_original_and_siblings() {
        let h = Harness::new(vec![(1, vec![2, 3])]).await;
        let (x, on_2, on_3) = replicated(&h).await;

        let report = h.engine.delete_item(NodeId(2), on_2).await.unwrap();
        assert_eq!(report.removed, 2);
        assert!(h.store.get_asset(NodeId(1), x.id).await.unwrap().is_none());
        assert!(h.store.get_asset(NodeId(3), on_3).await.unwrap().is_none());
        assert!(h.store.get_asset(NodeId(2), on_2).await.unwrap().is_some());
        assert_eq!(h.context.current(), NodeId(1));
    }

    #[tokio::test]
    async fn test_failed_copy_delete_does_not_stop_siblings() {
        let store: Arc<dyn MediaStore> = Arc::new(FailingDeletes::new(test_store().await, [NodeId(2)]));
        let h = Harness::with_store(store, vec![(1, vec![2, 3])]).await;
        let (x, on_2, on_3) = replicated(&h).await;

        let report = h.engine.delete_item(NodeId(1), x.id).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.failed, 1);
        assert!(!report.skipped);
        assert!(h.store.get_asset(NodeId(2), on_2).await.unwrap().is_some());
        assert!(h.store.get_asset(NodeId(3), on_3).await.unwrap().is_none());
        assert!(h.engine.currently_processing().await.is_none());
        assert_eq!(h.context.current(), NodeId(1));
    }

    #[tokio::test]
    async fn test_delete_ignored_while_busy() {
        let h = Harness::new(vec![(1, vec![2, 3])]).await;
        let (x, on_2, _) = replicated(&h).await;

        *h.engine.item_in_process.lock().await = Some(InProcess::Replicating(x.clone()));
        let report = h.engine.delete_item(NodeId(1), x.id).await.unwrap();
        assert!(report.skipped);
        assert!(h.store.get_asset(NodeId(2), on_2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_unshared_is_noop() {
        let h = Harness::new(vec![(1, vec![2])]).await;
        let x = upload(&h.store, NodeId(1), "x.jpg").await;

        let report = h.engine.delete_item(NodeId(1), x.id).await.unwrap();
        assert_eq!(report, DeletionReport::default());
        let missing = h.engine.delete_item(NodeId(1), AssetId(404)).await.unwrap();
        assert_eq!(missing, DeletionReport::default());
    }
}
