//! Node Relationships
//!
//! The undirected "who shares with whom" graph and its cached,
//! store-backed holder.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::id::NodeId;
use crate::store::MediaStore;

/// Symmetric adjacency between nodes.
///
/// Every constructor enforces `b ∈ peers(a) ⇔ a ∈ peers(b)` and drops self
/// links, so a graph value is always well-formed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, Vec<NodeId>>",
    into = "BTreeMap<String, Vec<NodeId>>"
)]
pub struct RelationshipGraph {
    links: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from per-node peer lists as entered by an operator.
    ///
    /// A link named on either side is added on both sides. Self links and
    /// duplicates are dropped.
    pub fn from_links<I>(links: I) -> Self
    where
        I: IntoIterator<Item = (NodeId, Vec<NodeId>)>,
    {
        let mut graph = Self::new();
        for (node, peers) in links {
            graph.links.entry(node).or_default();
            for peer in peers {
                graph.link(node, peer);
            }
        }
        graph
    }

    /// Parse command line link specs of the form `1=2,3`.
    ///
    /// A node with an empty list (`4=`) is kept without peers.
    pub fn parse_links<S: AsRef<str>>(specs: &[S]) -> Result<Self> {
        let mut links = Vec::with_capacity(specs.len());
        for spec in specs {
            let spec = spec.as_ref();
            let (node, peers) = spec
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid link '{}', expected <node>=<peer,peer>", spec)))?;
            let invalid = |e: std::num::ParseIntError| Error::Config(format!("invalid node id in '{}': {}", spec, e));
            let node: NodeId = node.parse().map_err(invalid)?;
            let peers = peers
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| p.parse::<NodeId>().map_err(invalid))
                .collect::<Result<Vec<_>>>()?;
            links.push((node, peers));
        }
        Ok(Self::from_links(links))
    }

    /// Add a link in both directions
    pub fn link(&mut self, a: NodeId, b: NodeId) {
        if a == b {
            return;
        }
        self.links.entry(a).or_default().insert(b);
        self.links.entry(b).or_default().insert(a);
    }

    /// Nodes linked to `node`; empty if it has no entry
    pub fn peers(&self, node: NodeId) -> BTreeSet<NodeId> {
        self.links.get(&node).cloned().unwrap_or_default()
    }

    pub fn contains_pair(&self, a: NodeId, b: NodeId) -> bool {
        self.links.get(&a).map_or(false, |peers| peers.contains(&b))
    }

    /// Nodes with an entry in the map, linked or not
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.links.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.links.values().all(|peers| peers.is_empty())
    }

    /// Number of undirected links
    pub fn pair_count(&self) -> usize {
        self.links.values().map(|peers| peers.len()).sum::<usize>() / 2
    }

    /// Persisted form: `site_{id}` to an ascending peer list
    pub fn to_option_map(&self) -> BTreeMap<String, Vec<NodeId>> {
        self.links
            .iter()
            .map(|(node, peers)| (node.option_key(), peers.iter().copied().collect()))
            .collect()
    }
}

impl TryFrom<BTreeMap<String, Vec<NodeId>>> for RelationshipGraph {
    type Error = String;

    fn try_from(map: BTreeMap<String, Vec<NodeId>>) -> std::result::Result<Self, Self::Error> {
        let mut links = Vec::with_capacity(map.len());
        for (key, peers) in map {
            let node = NodeId::from_option_key(&key)
                .ok_or_else(|| format!("invalid relationship key '{}', expected site_<id>", key))?;
            links.push((node, peers));
        }
        Ok(Self::from_links(links))
    }
}

impl From<RelationshipGraph> for BTreeMap<String, Vec<NodeId>> {
    fn from(graph: RelationshipGraph) -> Self {
        graph.to_option_map()
    }
}

/// Cached view of the persisted relationship graph.
///
/// Loaded lazily on first use. Readers get a snapshot `Arc`, so a concurrent
/// `replace_all` never tears a read.
pub struct RelationshipMap {
    store: Arc<dyn MediaStore>,
    current: RwLock<Option<Arc<RelationshipGraph>>>,
}

impl RelationshipMap {
    pub fn new(store: Arc<dyn MediaStore>) -> Self {
        Self {
            store,
            current: RwLock::new(None),
        }
    }

    /// Current graph, loading it from the store on first access
    pub async fn snapshot(&self) -> Result<Arc<RelationshipGraph>> {
        if let Some(graph) = self.current.read().await.as_ref() {
            return Ok(graph.clone());
        }

        let mut current = self.current.write().await;
        if let Some(graph) = current.as_ref() {
            return Ok(graph.clone());
        }
        let graph = Arc::new(self.store.load_relationships().await?);
        tracing::debug!("Loaded relationship map with {} links", graph.pair_count());
        *current = Some(graph.clone());
        Ok(graph)
    }

    /// Nodes linked to `node`
    pub async fn neighbors(&self, node: NodeId) -> Result<BTreeSet<NodeId>> {
        Ok(self.snapshot().await?.peers(node))
    }

    /// Whether `a` and `b` are linked
    pub async fn is_paired(&self, a: NodeId, b: NodeId) -> Result<bool> {
        Ok(self.snapshot().await?.contains_pair(a, b))
    }

    /// Persist a new graph and make it current
    pub async fn replace_all(&self, graph: RelationshipGraph) -> Result<Arc<RelationshipGraph>> {
        let mut current = self.current.write().await;
        self.store.save_relationships(&graph).await?;

        tracing::info!(
            "Relationship map replaced: {} nodes, {} links",
            graph.nodes().count(),
            graph.pair_count()
        );

        let graph = Arc::new(graph);
        *current = Some(graph.clone());
        Ok(graph)
    }

    /// Drop the cache and re-read from the store
    pub async fn reload(&self) -> Result<Arc<RelationshipGraph>> {
        let mut current = self.current.write().await;
        let graph = Arc::new(self.store.load_relationships().await?);
        *current = Some(graph.clone());
        Ok(graph)
    }
}
