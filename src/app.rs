//! Service Wiring
//!
//! Builds the shared services of one mediasync process from its
//! configuration.

use std::sync::Arc;

use crate::config::MediaSyncConfig;
use crate::controller::MediaController;
use crate::error::Result;
use crate::network::{NodeContext, RelationshipMap};
use crate::replication::{skip_mime_prefixes, BatchOrchestrator, ReplicationEngine, StoreIngest};
use crate::store::{MediaStore, SqliteStore};

/// All services of a running process, shared by the API and the CLI
pub struct MediaSync {
    pub config: MediaSyncConfig,
    pub store: Arc<dyn MediaStore>,
    pub network: Arc<RelationshipMap>,
    pub context: Arc<NodeContext>,
    pub engine: Arc<ReplicationEngine>,
    pub orchestrator: Arc<BatchOrchestrator>,
    pub controller: Arc<MediaController>,
}

impl MediaSync {
    /// Open the configured SQLite store and wire everything on top of it
    pub async fn open(config: MediaSyncConfig) -> Result<Self> {
        let path = config.store_path();
        tracing::info!("Opening media store at {:?}", path);
        let store: Arc<dyn MediaStore> = Arc::new(SqliteStore::open(&path)?);
        Self::with_store(config, store).await
    }

    /// Wire services on top of an existing store
    pub async fn with_store(config: MediaSyncConfig, store: Arc<dyn MediaStore>) -> Result<Self> {
        for seed in &config.nodes {
            store.register_node(seed.id, &seed.url).await?;
            tracing::debug!("Registered node {} at {}", seed.id, seed.url);
        }

        let network = Arc::new(RelationshipMap::new(store.clone()));
        let context = Arc::new(NodeContext::new(config.node.main_node));
        let ingest = Arc::new(StoreIngest::new(store.clone()));
        let engine = Arc::new(ReplicationEngine::new(
            store.clone(),
            network.clone(),
            context.clone(),
            ingest,
        ));

        if !config.replication.skip_mime_types.is_empty() {
            engine
                .filters()
                .register("skip-mime-types", skip_mime_prefixes(config.replication.skip_mime_types.clone()));
        }

        let orchestrator = Arc::new(BatchOrchestrator::new(
            store.clone(),
            network.clone(),
            context.clone(),
            engine.clone(),
        ));
        let controller = Arc::new(MediaController::new(
            store.clone(),
            engine.clone(),
            config.sharing.clone(),
        ));

        Ok(Self {
            config,
            store,
            network,
            context,
            engine,
            orchestrator,
            controller,
        })
    }
}
