//! Graph primitives shared by the bundler.
//!
//! [`Graph`] is a directed graph with stable integer node ids and typed
//! edges, [`ContentGraph`] adds string content keys on top of it, and
//! [`BitSet`] is the dense integer set used for reachability bookkeeping.

mod bit_set;
mod content_graph;
mod graph;
mod traversal;

pub use bit_set::BitSet;
pub use content_graph::ContentGraph;
pub use graph::{EdgeFilter, Graph, NodeId};
pub use traversal::{GraphVisitor, TraversalAction};
