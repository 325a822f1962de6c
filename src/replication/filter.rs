//! Replication Filters
//!
//! Ordered hooks that see each item before it is staged for replication.
//! A filter may rewrite the record or veto it by returning `None`.

use std::sync::RwLock;

use crate::media::AssetRecord;

type Filter = Box<dyn Fn(AssetRecord) -> Option<AssetRecord> + Send + Sync>;

/// Registered transforms, applied in registration order
#[derive(Default)]
pub struct FilterPipeline {
    filters: RwLock<Vec<(String, Filter)>>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named filter
    pub fn register<F>(&self, name: impl Into<String>, filter: F)
    where
        F: Fn(AssetRecord) -> Option<AssetRecord> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!("Registered replication filter '{}'", name);
        self.filters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((name, Box::new(filter)));
    }

    /// Run every filter in order. Returns `None` as soon as one vetoes.
    pub fn apply(&self, item: AssetRecord) -> Option<AssetRecord> {
        let filters = self.filters.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut current = item;
        for (name, filter) in filters.iter() {
            let id = current.id;
            match filter(current) {
                Some(next) => current = next,
                None => {
                    tracing::debug!("Filter '{}' skipped asset {}", name, id);
                    return None;
                }
            }
        }
        Some(current)
    }

    pub fn len(&self) -> usize {
        self.filters.read().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Filter that vetoes assets whose MIME type starts with any of `prefixes`
pub fn skip_mime_prefixes(prefixes: Vec<String>) -> impl Fn(AssetRecord) -> Option<AssetRecord> + Send + Sync {
    move |item: AssetRecord| {
        let mime = item.metadata.mime_type.to_ascii_lowercase();
        if prefixes.iter().any(|p| mime.starts_with(&p.to_ascii_lowercase())) {
            None
        } else {
            Some(item)
        }
    }
}
