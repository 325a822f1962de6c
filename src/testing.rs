//! Shared fixtures for unit tests

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::id::{AssetId, AssetRef, NodeId};
use crate::media::{AssetMetadata, AssetRecord, NewAsset, ReplicationLedger, UnsyncedSet};
use crate::network::{NodeContext, RelationshipGraph, RelationshipMap};
use crate::replication::{AssetIngest, BatchOrchestrator, ReplicationEngine, StoreIngest};
use crate::store::{MediaStore, SqliteStore};

pub async fn test_store() -> Arc<dyn MediaStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
}

pub fn metadata(node: NodeId, name: &str) -> AssetMetadata {
    AssetMetadata {
        file_name: name.to_string(),
        mime_type: "image/jpeg".to_string(),
        title: name.to_string(),
        status: "inherit".to_string(),
        guid: format!("https://node-{}.example/uploads/{}", node, name),
        parent: None,
    }
}

/// Insert an original and return it as stored
pub async fn upload(store: &Arc<dyn MediaStore>, node: NodeId, name: &str) -> AssetRecord {
    let id = store
        .insert_asset(node, NewAsset::original(metadata(node, name)))
        .await
        .unwrap();
    store.get_asset(node, id).await.unwrap().unwrap()
}

pub async fn seed_originals(store: &Arc<dyn MediaStore>, node: NodeId, count: usize) -> Vec<AssetId> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        ids.push(upload(store, node, &format!("seed-{}.jpg", i)).await.id);
    }
    ids
}

/// Insert a copy of (source_node, source_asset) on `node` without touching any ledger
pub async fn insert_copy(
    store: &Arc<dyn MediaStore>,
    node: NodeId,
    source_node: NodeId,
    source_asset: AssetId,
) -> AssetId {
    let source = AssetRef::new(source_node, source_asset);
    store
        .insert_asset(node, NewAsset::copy_of(source, metadata(node, "copy.jpg")))
        .await
        .unwrap()
}

/// Ingest that fails for the listed destinations
pub struct FailingIngest {
    inner: StoreIngest,
    fail_on: BTreeSet<NodeId>,
}

impl FailingIngest {
    pub fn new(store: Arc<dyn MediaStore>, fail_on: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            inner: StoreIngest::new(store),
            fail_on: fail_on.into_iter().collect(),
        }
    }
}

#[async_trait]
impl AssetIngest for FailingIngest {
    async fn ingest(&self, source: &AssetRecord, destination: NodeId) -> Result<AssetId> {
        if self.fail_on.contains(&destination) {
            return Err(Error::Ingest {
                target: destination,
                message: "simulated upload failure".to_string(),
            });
        }
        self.inner.ingest(source, destination).await
    }
}

/// Store whose deletes fail on the listed nodes
pub struct FailingDeletes {
    inner: Arc<dyn MediaStore>,
    fail_on: BTreeSet<NodeId>,
}

impl FailingDeletes {
    pub fn new(inner: Arc<dyn MediaStore>, fail_on: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            inner,
            fail_on: fail_on.into_iter().collect(),
        }
    }
}

#[async_trait]
impl MediaStore for FailingDeletes {
    async fn register_node(&self, node: NodeId, base_url: &str) -> Result<()> {
        self.inner.register_node(node, base_url).await
    }

    async fn node_url(&self, node: NodeId) -> Result<Option<String>> {
        self.inner.node_url(node).await
    }

    async fn list_nodes(&self) -> Result<Vec<(NodeId, String)>> {
        self.inner.list_nodes().await
    }

    async fn insert_asset(&self, node: NodeId, asset: NewAsset) -> Result<AssetId> {
        self.inner.insert_asset(node, asset).await
    }

    async fn get_asset(&self, node: NodeId, id: AssetId) -> Result<Option<AssetRecord>> {
        self.inner.get_asset(node, id).await
    }

    async fn list_assets(&self, node: NodeId) -> Result<Vec<AssetRecord>> {
        self.inner.list_assets(node).await
    }

    async fn find_copy_of(&self, node: NodeId, original: AssetRef) -> Result<Option<AssetId>> {
        self.inner.find_copy_of(node, original).await
    }

    async fn unsynced_originals(&self, node: NodeId, target: NodeId, limit: usize) -> Result<UnsyncedSet> {
        self.inner.unsynced_originals(node, target, limit).await
    }

    async fn count_originals(&self, node: NodeId) -> Result<u64> {
        self.inner.count_originals(node).await
    }

    async fn record_ledger(&self, node: NodeId, id: AssetId, ledger: &ReplicationLedger) -> Result<()> {
        self.inner.record_ledger(node, id, ledger).await
    }

    async fn delete_asset(&self, node: NodeId, id: AssetId) -> Result<bool> {
        if self.fail_on.contains(&node) {
            return Err(Error::Store(format!("simulated delete failure on node {}", node)));
        }
        self.inner.delete_asset(node, id).await
    }

    async fn load_relationships(&self) -> Result<RelationshipGraph> {
        self.inner.load_relationships().await
    }

    async fn save_relationships(&self, graph: &RelationshipGraph) -> Result<()> {
        self.inner.save_relationships(graph).await
    }
}

/// Store, relationships, context and engine wired together. Home node is 1.
pub struct Harness {
    pub store: Arc<dyn MediaStore>,
    pub network: Arc<RelationshipMap>,
    pub context: Arc<NodeContext>,
    pub engine: Arc<ReplicationEngine>,
}

impl Harness {
    pub async fn new(links: Vec<(u64, Vec<u64>)>) -> Self {
        Self::with_ingest(links, |store| Arc::new(StoreIngest::new(store)) as Arc<dyn AssetIngest>).await
    }

    pub async fn with_ingest<F>(links: Vec<(u64, Vec<u64>)>, ingest: F) -> Self
    where
        F: FnOnce(Arc<dyn MediaStore>) -> Arc<dyn AssetIngest>,
    {
        Self::with_parts(test_store().await, links, ingest).await
    }

    pub async fn with_store(store: Arc<dyn MediaStore>, links: Vec<(u64, Vec<u64>)>) -> Self {
        Self::with_parts(store, links, |store| Arc::new(StoreIngest::new(store)) as Arc<dyn AssetIngest>).await
    }

    async fn with_parts<F>(store: Arc<dyn MediaStore>, links: Vec<(u64, Vec<u64>)>, ingest: F) -> Self
    where
        F: FnOnce(Arc<dyn MediaStore>) -> Arc<dyn AssetIngest>,
    {
        let network = Arc::new(RelationshipMap::new(store.clone()));
        let graph = RelationshipGraph::from_links(
            links
                .into_iter()
                .map(|(node, peers)| (NodeId(node), peers.into_iter().map(NodeId).collect())),
        );
        network.replace_all(graph).await.unwrap();

        let context = Arc::new(NodeContext::new(NodeId(1)));
        let engine = Arc::new(ReplicationEngine::new(
            store.clone(),
            network.clone(),
            context.clone(),
            ingest(store.clone()),
        ));

        Self {
            store,
            network,
            context,
            engine,
        }
    }

    pub fn orchestrator(&self) -> BatchOrchestrator {
        BatchOrchestrator::new(
            self.store.clone(),
            self.network.clone(),
            self.context.clone(),
            self.engine.clone(),
        )
    }
}
