//! Network Module
//!
//! Node relationships and the current-node context.

mod context;
mod relationships;

pub use context::{ContextGuard, NodeContext};
pub use relationships::{RelationshipGraph, RelationshipMap};
