/// The signed graph — an append-only, content-addressed DAG of links.
///
/// The link table is the single source of truth; `root` and `head` are
/// cursors into it. Merging two graphs is a set union plus (when the
/// heads diverge) one deterministic merge link, so `merge(a, b)` and
/// `merge(b, a)` produce byte-identical results.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use thiserror::Error;

use crate::crypto::hashing::Hash;
use crate::graph::link::{
    AuthorContext, Link, LinkError, MergeLink, SignedLink, MAX_LINK_BYTES,
};
use crate::team::actions::Action;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Invalid link: {0}")]
    InvalidLink(#[from] LinkError),

    #[error("Link references a parent that is not in the graph: {0}")]
    DanglingParent(Hash),

    #[error("Graph has more than one root link")]
    MultipleRoots,

    #[error("Graph has no root link")]
    NoRoot,

    #[error("Graph failed validation — content does not match its hashes")]
    Tampered,

    #[error("Unknown link: {0}")]
    UnknownLink(Hash),

    #[error("Graphs have different roots and cannot be merged")]
    DifferentRoot,

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;

// ---------------------------------------------------------------------------
// SignedGraph
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct SignedGraph {
    root: Hash,
    head: Hash,
    links: BTreeMap<Hash, Link>,
}

impl SignedGraph {
    /// Create a graph from its founding action.
    pub fn create(
        root_action: &Action,
        author: AuthorContext,
        device_signing_secret: &[u8; 32],
        timestamp_ms: u64,
    ) -> Result<Self> {
        let root_link =
            SignedLink::create(root_action, vec![], author, device_signing_secret, timestamp_ms)?;
        let root = root_link.hash;

        let mut links = BTreeMap::new();
        links.insert(root, Link::Signed(root_link));

        Ok(SignedGraph {
            root,
            head: root,
            links,
        })
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn head(&self) -> Hash {
        self.head
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, hash: &Hash) -> Option<&Link> {
        self.links.get(hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.links.contains_key(hash)
    }

    /// All link hashes, in hash order.
    pub fn hashes(&self) -> Vec<Hash> {
        self.links.keys().copied().collect()
    }

    /// The links named by `hashes`, for answering a peer's missing-links
    /// request.
    pub fn links_for(&self, hashes: &[Hash]) -> Result<Vec<Link>> {
        hashes
            .iter()
            .map(|h| {
                self.links
                    .get(h)
                    .cloned()
                    .ok_or(GraphError::UnknownLink(*h))
            })
            .collect()
    }

    /// Append an action as a new head link.
    pub fn append(
        &mut self,
        action: &Action,
        author: AuthorContext,
        device_signing_secret: &[u8; 32],
        timestamp_ms: u64,
    ) -> Result<Hash> {
        let link = SignedLink::create(
            action,
            vec![self.head],
            author,
            device_signing_secret,
            timestamp_ms,
        )?;
        let hash = link.hash;
        self.links.insert(hash, Link::Signed(link));
        self.head = hash;
        Ok(hash)
    }

    /// Merge another graph into this one. Returns the new head.
    ///
    /// Fast-forwards when one head is an ancestor of the other; otherwise
    /// mints a merge link over both heads.
    pub fn merge(&mut self, other: &SignedGraph) -> Result<Hash> {
        if other.root != self.root {
            return Err(GraphError::DifferentRoot);
        }
        let incoming: Vec<Link> = other.links.values().cloned().collect();
        self.admit_links(incoming)?;
        self.join_heads(other.head)
    }

    /// Merge a peer's links received over the wire, then join heads.
    pub fn merge_remote(&mut self, their_head: Hash, incoming: Vec<Link>) -> Result<Hash> {
        self.admit_links(incoming)?;
        if !self.links.contains_key(&their_head) {
            return Err(GraphError::UnknownLink(their_head));
        }
        self.join_heads(their_head)
    }

    /// Verify and stage incoming links, committing only if every parent
    /// resolves. A bad batch leaves the graph untouched.
    fn admit_links(&mut self, incoming: Vec<Link>) -> Result<()> {
        let mut staged: BTreeMap<Hash, Link> = BTreeMap::new();
        for link in incoming {
            let hash = link.hash();
            if self.links.contains_key(&hash) || staged.contains_key(&hash) {
                continue;
            }
            verify_link(&link)?;
            staged.insert(hash, link);
        }
        for link in staged.values() {
            for parent in link.parents() {
                if !self.links.contains_key(parent) && !staged.contains_key(parent) {
                    return Err(GraphError::DanglingParent(*parent));
                }
            }
        }
        self.links.extend(staged);
        Ok(())
    }

    fn join_heads(&mut self, their_head: Hash) -> Result<Hash> {
        if their_head == self.head {
            return Ok(self.head);
        }
        if self.is_ancestor(&their_head, &self.head) {
            // Their head is behind ours; nothing to do.
            return Ok(self.head);
        }
        if self.is_ancestor(&self.head, &their_head) {
            self.head = their_head;
            return Ok(self.head);
        }

        let merge = MergeLink::new(self.head, their_head);
        let hash = merge.hash;
        self.links.insert(hash, Link::Merge(merge));
        self.head = hash;
        Ok(hash)
    }

    /// Whether `ancestor` is reachable from `descendant` via parent hashes.
    pub fn is_ancestor(&self, ancestor: &Hash, descendant: &Hash) -> bool {
        if ancestor == descendant {
            return false;
        }
        self.ancestors_inclusive(descendant).contains(ancestor)
    }

    /// All hashes reachable from `from` (inclusive) via parent edges.
    pub fn ancestors_inclusive(&self, from: &Hash) -> BTreeSet<Hash> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(*from);

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(link) = self.links.get(&current) {
                for parent in link.parents() {
                    queue.push_back(*parent);
                }
            }
        }
        seen
    }

    /// Full structural validation.
    ///
    /// Checks every signature and content hash, parent presence, root
    /// uniqueness, and that the head reaches every link. Author keys are
    /// additionally checked against team state during reduction.
    pub fn validate(&self) -> Result<()> {
        let mut roots = 0usize;
        for link in self.links.values() {
            verify_link(link)?;
            if link.is_root() {
                roots += 1;
            }
            for parent in link.parents() {
                if !self.links.contains_key(parent) {
                    return Err(GraphError::DanglingParent(*parent));
                }
            }
        }
        match roots {
            0 => return Err(GraphError::NoRoot),
            1 => {}
            _ => return Err(GraphError::MultipleRoots),
        }

        let reachable = self.ancestors_inclusive(&self.head);
        if !reachable.contains(&self.root) {
            return Err(GraphError::NoRoot);
        }
        if reachable.len() != self.links.len() {
            // Orphaned links that the head cannot see.
            return Err(GraphError::Tampered);
        }
        Ok(())
    }

    /// Canonical serialization of `{root, head, links}`.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(&(&self.root, &self.head, &self.links))
            .map_err(|e| GraphError::Serialization(e.to_string()))
    }

    /// Deserialize and validate. A blob whose content no longer matches
    /// its hashes is rejected as tampered.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (root, head, links): (Hash, Hash, BTreeMap<Hash, Link>) =
            bincode::deserialize(bytes).map_err(|e| GraphError::Serialization(e.to_string()))?;

        let graph = SignedGraph { root, head, links };
        graph.validate().map_err(|e| match e {
            GraphError::InvalidLink(_) => GraphError::Tampered,
            other => other,
        })?;
        Ok(graph)
    }

}

fn verify_link(link: &Link) -> Result<()> {
    match link {
        Link::Signed(signed) => {
            let size = bincode::serialize(signed)
                .map_err(|e| GraphError::Serialization(e.to_string()))?
                .len();
            if size > MAX_LINK_BYTES + 1024 {
                return Err(GraphError::InvalidLink(LinkError::TooLarge {
                    size,
                    max: MAX_LINK_BYTES,
                }));
            }
            signed.verify()?;
        }
        Link::Merge(merge) => merge.verify()?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::{action_rename, graph_with_author, TestAuthor};

    #[test]
    fn test_create_sets_root_and_head() {
        let alice = TestAuthor::new("alice");
        let graph = graph_with_author(&alice);
        assert_eq!(graph.root(), graph.head());
        assert_eq!(graph.len(), 1);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_append_advances_head() {
        let alice = TestAuthor::new("alice");
        let mut graph = graph_with_author(&alice);
        let first = graph.head();

        let hash = alice.append(&mut graph, action_rename("one"), 2000);
        assert_eq!(graph.head(), hash);
        assert_ne!(graph.head(), first);
        assert!(graph.validate().is_ok());

        // The new link's parent is the previous head.
        let link = graph.get(&hash).unwrap();
        assert_eq!(link.parents().to_vec(), vec![first]);
    }

    #[test]
    fn test_merge_is_symmetric() {
        let alice = TestAuthor::new("alice");
        let bob = TestAuthor::new("bob");
        let base = graph_with_author(&alice);

        let mut a = base.clone();
        alice.append(&mut a, action_rename("from alice"), 2000);

        let mut b = base.clone();
        bob.append(&mut b, action_rename("from bob"), 2001);

        let mut ab = a.clone();
        ab.merge(&b).unwrap();
        let mut ba = b.clone();
        ba.merge(&a).unwrap();

        assert_eq!(ab.head(), ba.head());
        assert_eq!(ab, ba);
        assert!(ab.validate().is_ok());
    }

    #[test]
    fn test_merge_fast_forwards() {
        let alice = TestAuthor::new("alice");
        let base = graph_with_author(&alice);

        let mut ahead = base.clone();
        alice.append(&mut ahead, action_rename("ahead"), 2000);

        let mut behind = base.clone();
        behind.merge(&ahead).unwrap();
        assert_eq!(behind.head(), ahead.head());
        // Fast-forward mints no merge link.
        assert_eq!(behind.len(), ahead.len());
    }

    #[test]
    fn test_merge_different_roots_rejected() {
        let alice = TestAuthor::new("alice");
        let mut a = graph_with_author(&alice);
        let b = graph_with_author(&alice);
        assert!(matches!(a.merge(&b), Err(GraphError::DifferentRoot)));
    }

    #[test]
    fn test_serialize_roundtrip_validates() {
        let alice = TestAuthor::new("alice");
        let mut graph = graph_with_author(&alice);
        alice.append(&mut graph, action_rename("renamed"), 2000);

        let bytes = graph.serialize().unwrap();
        let restored = SignedGraph::deserialize(&bytes).unwrap();
        assert_eq!(restored, graph);
    }

    #[test]
    fn test_tampered_blob_rejected() {
        let alice = TestAuthor::new("alice");
        let mut graph = graph_with_author(&alice);
        alice.append(&mut graph, action_rename("original name"), 2000);
        let bytes = graph.serialize().unwrap();

        // Flip one byte somewhere in the middle of the blob.
        let mut tampered = bytes.clone();
        let mid = tampered.len() / 2;
        tampered[mid] ^= 0x01;

        assert!(SignedGraph::deserialize(&tampered).is_err());
    }

    #[test]
    fn test_merge_remote_rejects_dangling() {
        let alice = TestAuthor::new("alice");
        let bob = TestAuthor::new("bob");
        let base = graph_with_author(&alice);

        let mut theirs = base.clone();
        bob.append(&mut theirs, action_rename("one"), 2000);
        let skipped = bob.append(&mut theirs, action_rename("two"), 2001);

        // Deliver only the second link — its parent is missing.
        let links = theirs.links_for(&[skipped]).unwrap();
        let mut ours = base.clone();
        assert!(matches!(
            ours.merge_remote(skipped, links),
            Err(GraphError::DanglingParent(_))
        ));
    }
}
