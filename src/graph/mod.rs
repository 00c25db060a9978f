//! The signed membership graph: append-only DAG of links with
//! deterministic linearization.

pub mod graph;
pub mod link;
pub mod sequence;

#[cfg(test)]
pub mod testing;

pub use graph::{GraphError, SignedGraph};
pub use link::{AuthorContext, Link, LinkBody, LinkError, MergeLink, SignedLink, MAX_LINK_BYTES};
pub use sequence::{default_resolver, sequence, sequence_default, Resolver};
