//! Media Controller
//!
//! Upload and delete entry points. These are the hooks that feed the
//! replication engine when media changes on a node, honouring the
//! network-wide sharing switches.

use std::sync::Arc;

use crate::config::SharingConfig;
use crate::error::{Error, Result};
use crate::id::{AssetId, NodeId};
use crate::media::{AssetMetadata, AssetRecord, NewAsset};
use crate::replication::{DeletionReport, ReplicationEngine};
use crate::store::MediaStore;

/// Upload and delete triggers for one process
pub struct MediaController {
    store: Arc<dyn MediaStore>,
    engine: Arc<ReplicationEngine>,
    sharing: SharingConfig,
}

impl MediaController {
    pub fn new(store: Arc<dyn MediaStore>, engine: Arc<ReplicationEngine>, sharing: SharingConfig) -> Self {
        Self { store, engine, sharing }
    }

    pub fn sharing(&self) -> &SharingConfig {
        &self.sharing
    }

    /// Store a newly uploaded original and replicate it to linked nodes.
    ///
    /// Nothing is replicated while the engine is busy; copies created during
    /// replication come through ingest, never through here.
    pub async fn upload(&self, node: NodeId, metadata: AssetMetadata) -> Result<AssetRecord> {
        let id = self.store.insert_asset(node, NewAsset::original(metadata)).await?;
        let record = self.fetch(node, id).await?;
        tracing::info!("Uploaded {}", record.asset_ref());

        if self.sharing.share_media
            && record.is_original()
            && self.engine.currently_processing().await.is_none()
            && self.engine.enqueue(record.clone()).await
        {
            self.engine.process_for(id).await?;
            return self.fetch(node, id).await;
        }

        Ok(record)
    }

    /// Delete a record, cascading to its copies when shared deletion is on
    pub async fn delete(&self, node: NodeId, id: AssetId) -> Result<DeletionReport> {
        // fail early for unknown records
        self.fetch(node, id).await?;

        let report = if self.sharing.delete_shared_media {
            self.engine.delete_item(node, id).await?
        } else {
            DeletionReport::default()
        };

        self.store.delete_asset(node, id).await?;
        tracing::info!("Deleted asset {} on node {}", id, node);
        Ok(report)
    }

    /// Load a record or fail with `AssetNotFound`
    pub async fn fetch(&self, node: NodeId, id: AssetId) -> Result<AssetRecord> {
        self.store
            .get_asset(node, id)
            .await?
            .ok_or(Error::AssetNotFound { node, asset: id })
    }
}
