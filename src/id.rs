//! Node and Asset Identifiers
//!
//! Nodes (sites) and media assets are addressed by plain integers. The
//! wrappers keep the two from being mixed up at call sites: an asset ID is
//! only meaningful together with the node that owns it.

use serde::{Deserialize, Serialize};

/// Identifier of one tenant/site in the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Get the raw u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Key under which this node's peers are persisted ("site_{id}")
    pub fn option_key(&self) -> String {
        format!("site_{}", self.0)
    }

    /// Parse a "site_{id}" key back into a node ID
    pub fn from_option_key(key: &str) -> Option<Self> {
        key.strip_prefix("site_")
            .and_then(|id| id.parse::<u64>().ok())
            .map(Self)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// Node-local identifier of a media asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub u64);

impl AssetId {
    /// Get the raw u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AssetId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<AssetId> for u64 {
    fn from(id: AssetId) -> Self {
        id.0
    }
}

/// Network-wide address of an asset: owning node plus local ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    pub node: NodeId,
    pub asset: AssetId,
}

impl AssetRef {
    pub fn new(node: NodeId, asset: AssetId) -> Self {
        Self { node, asset }
    }
}

impl std::fmt::Display for AssetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@node-{}", self.asset, self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_key_roundtrip() {
        let node = NodeId(42);
        assert_eq!(node.option_key(), "site_42");
        assert_eq!(NodeId::from_option_key("site_42"), Some(node));
        assert_eq!(NodeId::from_option_key("blog_42"), None);
        assert_eq!(NodeId::from_option_key("site_x"), None);
    }

    #[test]
    fn test_parse_node_id() {
        assert_eq!(" 7 ".parse::<NodeId>().unwrap(), NodeId(7));
        assert!("seven".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&NodeId(3)).unwrap();
        assert_eq!(json, "3");
        let asset: AssetId = serde_json::from_str("12").unwrap();
        assert_eq!(asset, AssetId(12));
    }

    #[test]
    fn test_asset_ref_display() {
        let r = AssetRef::new(NodeId(2), AssetId(15));
        assert_eq!(r.to_string(), "15@node-2");
    }
}
