//! Asset Ingest
//!
//! Creates the copy of an original on a destination node. The default
//! implementation writes straight into the shared store, rewriting the
//! public URL to the destination's base URL.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::id::{AssetId, NodeId};
use crate::media::{AssetRecord, NewAsset};
use crate::store::MediaStore;

/// Creates a copy of `source` on `destination` and returns its new ID.
///
/// Implementations must record the copy's provenance and must not trigger
/// replication of the copy they create.
#[async_trait]
pub trait AssetIngest: Send + Sync {
    async fn ingest(&self, source: &AssetRecord, destination: NodeId) -> Result<AssetId>;
}

/// Ingest into the local media store
pub struct StoreIngest {
    store: Arc<dyn MediaStore>,
}

impl StoreIngest {
    pub fn new(store: Arc<dyn MediaStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AssetIngest for StoreIngest {
    async fn ingest(&self, source: &AssetRecord, destination: NodeId) -> Result<AssetId> {
        if !source.is_original() {
            return Err(Error::ProvenanceViolation {
                node: source.node,
                asset: source.id,
            });
        }

        let mut metadata = source.metadata.clone();
        metadata.guid = rewrite_guid(
            &metadata.guid,
            self.store.node_url(source.node).await?.as_deref(),
            self.store.node_url(destination).await?.as_deref(),
        );
        // attachments do not keep their parent across nodes
        metadata.parent = None;

        let id = self
            .store
            .insert_asset(destination, NewAsset::copy_of(source.asset_ref(), metadata))
            .await
            .map_err(|e| Error::Ingest {
                target: destination,
                message: e.to_string(),
            })?;

        tracing::debug!("Ingested {} as asset {} on node {}", source.asset_ref(), id, destination);
        Ok(id)
    }
}

/// Swap the source base URL prefix for the destination's. Unknown URLs or a
/// guid outside the source's tree are left as they are.
pub fn rewrite_guid(guid: &str, source_url: Option<&str>, destination_url: Option<&str>) -> String {
    match (source_url, destination_url) {
        (Some(from), Some(to)) => match guid.strip_prefix(from.trim_end_matches('/')) {
            Some(rest) => format!("{}{}", to.trim_end_matches('/'), rest),
            None => guid.to_string(),
        },
        _ => guid.to_string(),
    }
}
