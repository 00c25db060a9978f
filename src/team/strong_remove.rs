/// The strong-remove resolver.
///
/// Given the two concurrent branches of a merge (common ancestry
/// excluded) and the sequence that precedes them, decides which links
/// survive:
///
/// 1. Collect removals and admin demotions from both branches.
/// 2. Where removals form a cycle (two members removing each other, or a
///    longer loop), the junior actor's removal of a more senior target is
///    cancelled. Seniority is order of first appearance; the founder is
///    most senior.
/// 3. Remaining removals are processed senior-actor-first; a removal
///    whose actor has already lost membership or authority is cancelled.
/// 4. Links authored in one branch by a member removed or demoted from
///    the other branch are dropped, transitively through any members
///    they admitted. A targeted member's own `ChangeMemberKeys` and
///    `AddDevice` are kept.
/// 5. Concurrent removals of the same target by different actors all
///    survive; the reducer treats the later ones as no-ops.
///
/// Survivors are ordered by branch-local timestamp, ties by hash, which
/// makes the output identical regardless of which peer performs the
/// merge.

use std::collections::{BTreeMap, BTreeSet};

use crate::crypto::hashing::Hash;
use crate::graph::link::SignedLink;
use crate::ids::DeviceId;
use crate::team::actions::Action;
use crate::team::state::ADMIN_ROLE;

/// Entry point, shaped to fit [`crate::graph::sequence::Resolver`].
pub fn strong_remove_resolver(
    branch_a: &[SignedLink],
    branch_b: &[SignedLink],
    prior: &[SignedLink],
) -> Vec<SignedLink> {
    // Deterministic branch labelling: the branch with the lower sort key
    // is "first" no matter which side initiated the merge.
    let (first, second) = if branch_key(branch_a) <= branch_key(branch_b) {
        (branch_a, branch_b)
    } else {
        (branch_b, branch_a)
    };

    let seniority = seniority_index(prior, first, second);
    let device_owners = device_owner_map(prior, first, second);

    let removals_first = removals_in(first, 0, &device_owners);
    let removals_second = removals_in(second, 1, &device_owners);
    let mut removals: Vec<Removal> = removals_first;
    removals.extend(removals_second);

    let cancelled = cancel_removals(&removals, &seniority);

    // Targets of surviving removals, per originating branch.
    let mut targets_of: [BTreeSet<String>; 2] = [BTreeSet::new(), BTreeSet::new()];
    for removal in removals.iter().filter(|r| !cancelled.contains(&r.hash)) {
        targets_of[removal.branch].insert(removal.target.clone());
    }

    // Cross-branch cascade: branch 0 is invalidated by branch 1's
    // surviving removals and vice versa.
    let mut dropped = cancelled;
    cascade(first, &targets_of[1], &mut dropped);
    cascade(second, &targets_of[0], &mut dropped);

    let mut survivors: Vec<SignedLink> = first
        .iter()
        .chain(second.iter())
        .filter(|link| !dropped.contains(&link.hash))
        .cloned()
        .collect();

    survivors.sort_by(|x, y| {
        x.body
            .timestamp_ms
            .cmp(&y.body.timestamp_ms)
            .then_with(|| x.hash.cmp(&y.hash))
    });
    survivors
}

fn branch_key(branch: &[SignedLink]) -> (u64, Option<Hash>) {
    match branch.first() {
        Some(link) => (link.body.timestamp_ms, Some(link.hash)),
        None => (0, None),
    }
}

// ---------------------------------------------------------------------------
// Removals
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct Removal {
    actor: String,
    target: String,
    hash: Hash,
    branch: usize,
}

fn removals_in(
    branch: &[SignedLink],
    branch_index: usize,
    device_owners: &BTreeMap<DeviceId, String>,
) -> Vec<Removal> {
    let mut out = Vec::new();
    for link in branch {
        let Ok(action) = link.action() else { continue };
        let target = match action {
            Action::RemoveMember { user_id, .. } => Some(user_id),
            Action::RemoveMemberRole {
                user_id, role_name, ..
            } if role_name == ADMIN_ROLE => Some(user_id),
            Action::RemoveDevice { device_id, .. } => device_owners.get(&device_id).cloned(),
            _ => None,
        };
        if let Some(target) = target {
            // Self-removal is not a conflict.
            if target != link.author_id() {
                out.push(Removal {
                    actor: link.author_id().to_string(),
                    target,
                    hash: link.hash,
                    branch: branch_index,
                });
            }
        }
    }
    out
}

/// Cancel removals per rules 2 and 3. Returns the hashes of cancelled
/// removal links.
fn cancel_removals(removals: &[Removal], seniority: &BTreeMap<String, usize>) -> BTreeSet<Hash> {
    let rank = |user: &str| seniority.get(user).copied().unwrap_or(usize::MAX);
    let mut cancelled: BTreeSet<Hash> = BTreeSet::new();

    // Rule 2: in a removal cycle, a junior cannot take down a senior.
    for removal in removals.iter() {
        if in_cycle(removal, removals) && rank(&removal.actor) > rank(&removal.target) {
            cancelled.insert(removal.hash);
        }
    }

    // Rule 3: senior actors first; an actor already taken out of the
    // membership or out of authority loses their removal.
    let mut ordered: Vec<&Removal> = removals
        .iter()
        .filter(|r| !cancelled.contains(&r.hash))
        .collect();
    ordered.sort_by(|x, y| {
        rank(&x.actor)
            .cmp(&rank(&y.actor))
            .then_with(|| x.hash.cmp(&y.hash))
    });

    let mut out: BTreeSet<String> = BTreeSet::new();
    for removal in ordered {
        if out.contains(&removal.actor) {
            cancelled.insert(removal.hash);
        } else {
            out.insert(removal.target.clone());
        }
    }
    cancelled
}

/// Whether this removal's edge lies on a cycle: its target can reach its
/// actor through the removal graph.
fn in_cycle(removal: &Removal, removals: &[Removal]) -> bool {
    let mut frontier: Vec<&str> = vec![removal.target.as_str()];
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    while let Some(current) = frontier.pop() {
        if !seen.insert(current) {
            continue;
        }
        for edge in removals {
            if edge.actor == current {
                if edge.target == removal.actor {
                    return true;
                }
                frontier.push(edge.target.as_str());
            }
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Cascade
// ---------------------------------------------------------------------------

/// Drop links in `branch` authored by an invalidated member, transitively
/// through any members those links admitted. The targeted member's own
/// key rotations and device additions survive.
fn cascade(branch: &[SignedLink], invalid_seed: &BTreeSet<String>, dropped: &mut BTreeSet<Hash>) {
    let mut invalid: BTreeSet<String> = invalid_seed.clone();

    loop {
        let mut changed = false;
        for link in branch {
            if dropped.contains(&link.hash) {
                continue;
            }
            let author = link.author_id();
            if !invalid.contains(author) {
                continue;
            }
            if is_exempt(link) {
                continue;
            }

            dropped.insert(link.hash);
            changed = true;

            // Anyone this link brought in never joined.
            if let Ok(action) = link.action() {
                match action {
                    Action::AddMember { member, .. } | Action::Admit { member, .. } => {
                        invalid.insert(member.user_id);
                    }
                    _ => {}
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// A demoted-but-still-present member keeps their own key rotations and
/// device additions.
fn is_exempt(link: &SignedLink) -> bool {
    match link.action() {
        Ok(Action::ChangeMemberKeys { .. }) => true,
        Ok(Action::AddDevice { device, .. }) => device.user_id == link.author_id(),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Seniority and device ownership
// ---------------------------------------------------------------------------

/// Order of first appearance across the prior sequence, then the first
/// branch, then the second. Lower index is more senior.
fn seniority_index(
    prior: &[SignedLink],
    first: &[SignedLink],
    second: &[SignedLink],
) -> BTreeMap<String, usize> {
    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    let mut next = 0usize;
    let note = |user: String, index: &mut BTreeMap<String, usize>, next: &mut usize| {
        if !index.contains_key(&user) {
            index.insert(user, *next);
            *next += 1;
        }
    };

    for link in prior.iter().chain(first).chain(second) {
        note(link.author_id().to_string(), &mut index, &mut next);
        if let Ok(action) = link.action() {
            match action {
                Action::Root { root_member, .. } => {
                    note(root_member.user_id, &mut index, &mut next)
                }
                Action::AddMember { member, .. } | Action::Admit { member, .. } => {
                    note(member.user_id, &mut index, &mut next)
                }
                _ => {}
            }
        }
    }
    index
}

fn device_owner_map(
    prior: &[SignedLink],
    first: &[SignedLink],
    second: &[SignedLink],
) -> BTreeMap<DeviceId, String> {
    let mut owners = BTreeMap::new();
    for link in prior.iter().chain(first).chain(second) {
        let Ok(action) = link.action() else { continue };
        match action {
            Action::Root { root_member, .. } => {
                for device in &root_member.devices {
                    owners.insert(device.device_id, root_member.user_id.clone());
                }
            }
            Action::AddMember { member, .. } | Action::Admit { member, .. } => {
                for device in &member.devices {
                    owners.insert(device.device_id, member.user_id.clone());
                }
            }
            Action::AddDevice { device, .. } => {
                owners.insert(device.device_id, device.user_id.clone());
            }
            _ => {}
        }
    }
    owners
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
