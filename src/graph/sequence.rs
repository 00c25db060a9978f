/// Deterministic linearization of the graph.
///
/// The sequence walks back from the head. Linear runs are emitted as-is;
/// at each merge link the two branches are rewound to their common
/// ancestors and handed to the resolver, which decides which links
/// survive and in what order. Merge links themselves never appear in the
/// output — they are structure, not payload.
///
/// For a given graph the sequence is identical on every peer: branch
/// contents are fixed by the content addresses, and every tie-break is by
/// timestamp then hash.

use std::collections::BTreeSet;

use crate::crypto::hashing::Hash;
use crate::graph::graph::{GraphError, Result, SignedGraph};
use crate::graph::link::{Link, SignedLink};

/// Reconciles the two branches of a merge.
///
/// Receives `(branch_a, branch_b, prior)` where `prior` is the linearized
/// sequence up to and including the common ancestor, and returns the
/// surviving links in order. Injected by value; must be pure.
pub type Resolver<'r> = &'r dyn Fn(&[SignedLink], &[SignedLink], &[SignedLink]) -> Vec<SignedLink>;

/// Linearize the whole graph with `resolver`.
pub fn sequence(graph: &SignedGraph, resolver: Resolver) -> Result<Vec<SignedLink>> {
    linearize(graph, graph.head(), &BTreeSet::new(), resolver)
}

/// Linearize with the default resolver (keep everything, deterministic
/// branch order).
pub fn sequence_default(graph: &SignedGraph) -> Result<Vec<SignedLink>> {
    sequence(graph, &default_resolver)
}

/// Default resolver: no link is dropped. The branch with the lower sort
/// key (earliest first link, ties by hash) is emitted first.
pub fn default_resolver(
    branch_a: &[SignedLink],
    branch_b: &[SignedLink],
    _prior: &[SignedLink],
) -> Vec<SignedLink> {
    let (first, second) = if branch_sort_key(branch_a) <= branch_sort_key(branch_b) {
        (branch_a, branch_b)
    } else {
        (branch_b, branch_a)
    };
    first.iter().chain(second.iter()).cloned().collect()
}

fn branch_sort_key(branch: &[SignedLink]) -> (u64, Hash) {
    match branch.first() {
        Some(link) => (link.body.timestamp_ms, link.hash),
        None => (0, Hash::from_bytes([0u8; 32])),
    }
}

// ---------------------------------------------------------------------------
// Core walk
// ---------------------------------------------------------------------------

/// Linearize everything reachable from `head` that is not in `excluded`.
fn linearize(
    graph: &SignedGraph,
    head: Hash,
    excluded: &BTreeSet<Hash>,
    resolver: Resolver,
) -> Result<Vec<SignedLink>> {
    // Walk the linear run backwards until we hit the root, the excluded
    // set, or a merge link. Only merges recurse.
    let mut run: Vec<SignedLink> = Vec::new();
    let mut current = head;

    loop {
        if excluded.contains(&current) {
            run.reverse();
            return Ok(run);
        }

        let link = graph
            .get(&current)
            .ok_or(GraphError::UnknownLink(current))?;

        match link {
            Link::Signed(signed) => {
                run.push(signed.clone());
                match signed.body.prev.first() {
                    None => {
                        run.reverse();
                        return Ok(run);
                    }
                    Some(parent) => current = *parent,
                }
            }
            Link::Merge(merge) => {
                let mut prefix_and_merged =
                    resolve_merge(graph, merge.parents[0], merge.parents[1], excluded, resolver)?;
                run.reverse();
                prefix_and_merged.extend(run);
                return Ok(prefix_and_merged);
            }
        }
    }
}

/// Handle one merge: split off the common ancestry, linearize both
/// branches without it, and let the resolver reconcile them.
fn resolve_merge(
    graph: &SignedGraph,
    a: Hash,
    b: Hash,
    excluded: &BTreeSet<Hash>,
    resolver: Resolver,
) -> Result<Vec<SignedLink>> {
    let ancestors_a = graph.ancestors_inclusive(&a);
    let ancestors_b = graph.ancestors_inclusive(&b);

    let common: BTreeSet<Hash> = ancestors_a
        .intersection(&ancestors_b)
        .filter(|h| !excluded.contains(*h))
        .copied()
        .collect();

    let mut branch_excluded = excluded.clone();
    branch_excluded.extend(common.iter().copied());

    let branch_a = linearize(graph, a, &branch_excluded, resolver)?;
    let branch_b = linearize(graph, b, &branch_excluded, resolver)?;

    let prefix = linearize_common(graph, &common, excluded, resolver)?;
    let merged = resolver(&branch_a, &branch_b, &prefix);

    let mut out = prefix;
    out.extend(merged);
    Ok(out)
}

/// Linearize the shared ancestry of a merge.
///
/// Normally the common set has a single newest link and we recurse from
/// it. A criss-cross merge can leave several maximal links; those have
/// already been reconciled on both sides, so a plain deterministic
/// topological sort suffices.
fn linearize_common(
    graph: &SignedGraph,
    common: &BTreeSet<Hash>,
    excluded: &BTreeSet<Hash>,
    resolver: Resolver,
) -> Result<Vec<SignedLink>> {
    let maxima = maximal_links(graph, common);
    match maxima.len() {
        0 => Ok(Vec::new()),
        1 => linearize(graph, maxima[0], excluded, resolver),
        _ => topo_sort(graph, common),
    }
}

/// Links in `set` that no other member of `set` descends from.
fn maximal_links(graph: &SignedGraph, set: &BTreeSet<Hash>) -> Vec<Hash> {
    let mut has_child: BTreeSet<Hash> = BTreeSet::new();
    for hash in set {
        if let Some(link) = graph.get(hash) {
            for parent in link.parents() {
                has_child.insert(*parent);
            }
        }
    }
    set.iter()
        .filter(|h| !has_child.contains(*h))
        .copied()
        .collect()
}

/// Parent-before-child order over `set`, smallest `(timestamp, hash)`
/// among the ready links first. Merge links are traversed but not
/// emitted.
fn topo_sort(graph: &SignedGraph, set: &BTreeSet<Hash>) -> Result<Vec<SignedLink>> {
    let mut emitted: BTreeSet<Hash> = BTreeSet::new();
    let mut out: Vec<SignedLink> = Vec::new();

    while emitted.len() < set.len() {
        let mut ready: Vec<(u64, Hash)> = Vec::new();
        for hash in set {
            if emitted.contains(hash) {
                continue;
            }
            let link = graph.get(hash).ok_or(GraphError::UnknownLink(*hash))?;
            let all_parents_done = link
                .parents()
                .iter()
                .all(|p| !set.contains(p) || emitted.contains(p));
            if all_parents_done {
                let ts = match link {
                    Link::Signed(s) => s.body.timestamp_ms,
                    Link::Merge(_) => 0,
                };
                ready.push((ts, *hash));
            }
        }

        // A non-empty remainder with nothing ready would mean a cycle,
        // which content addressing rules out.
        let (_, next) = ready
            .into_iter()
            .min()
            .ok_or(GraphError::Tampered)?;
        emitted.insert(next);
        if let Some(Link::Signed(signed)) = graph.get(&next) {
            out.push(signed.clone());
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
