//! Proof verification
//!
//! Standalone verifiers for the paths produced by the tree engine.
//! Leaves are hashed bare (`SHA-256(payload)`, no prefix); internal nodes
//! use `SHA-256(0x01 ‖ left ‖ right)`. Verifiers take 0-based positions:
//! a proof computed for 1-based `(i, j)` verifies with `i - 1` and
//! `j - 1`.

use sha2::{Digest as _, Sha256};

use crate::geometry::tree_height;
use crate::tree::{Digest, NODE_PREFIX};

/// Leaf digest of a payload.
pub fn leaf_digest(payload: &[u8]) -> Digest {
    Sha256::digest(payload).into()
}

/// Verify an inclusion proof.
///
/// `at` is the 0-based index of the last leaf (`tree size - 1`) and `i`
/// the 0-based index of the proven leaf. The path is consumed
/// leaf-adjacent first.
pub fn verify_inclusion(path: &[Digest], at: u64, i: u64, root: &Digest, leaf: &Digest) -> bool {
    if i > at || (at > 0 && path.is_empty()) {
        return false;
    }

    let mut i = i;
    let mut at = at;
    let mut h = *leaf;

    for v in path {
        h = if i % 2 == 0 && i != at {
            hash_children(&h, v)
        } else {
            hash_children(v, &h)
        };

        i /= 2;
        at /= 2;
    }

    at == i && h == *root
}

/// Verify a consistency proof between the trees of `first + 1` and
/// `second + 1` leaves.
///
/// The path embeds the older tree's frozen-subtree decomposition, so
/// verification recomputes both roots by walking the same shape the
/// prover walked and checks each against the supplied value. Equal sizes
/// are consistent exactly when the roots match; a non-empty path then
/// just re-derives that shared root.
pub fn verify_consistency(
    path: &[Digest],
    first: u64,
    second: u64,
    first_root: &Digest,
    second_root: &Digest,
) -> bool {
    if first > second {
        return false;
    }

    if first == second {
        if first_root != second_root {
            return false;
        }
        if path.is_empty() {
            return true;
        }
        // Fold the boundary decomposition back into the root.
        let mut h = path[0];
        for v in &path[1..] {
            h = hash_children(v, &h);
        }
        return h == *first_root;
    }

    if path.is_empty() {
        return false;
    }

    let i = first + 1;
    let j = second + 1;

    let mut it = path.iter().rev();
    match subtree_roots(i, j, tree_height(j), &mut it) {
        Some((old, new)) => it.next().is_none() && old == *first_root && new == *second_root,
        None => false,
    }
}

/// Recompute the roots of the trees over `1..=i` and `1..=j` from a
/// consistency path, consuming entries in the prover's discovery order
/// (root towards leaf). Requires `i < j`.
fn subtree_roots<'a>(
    i: u64,
    j: u64,
    height: u32,
    it: &mut impl Iterator<Item = &'a Digest>,
) -> Option<(Digest, Digest)> {
    // Complete left subtrees shared by both trees, outermost first.
    let mut shared = Vec::new();

    for h in (0..height).rev() {
        if (j - 1) & (1u64 << h) != 0 {
            let k = ((j - 1) >> h) << h;

            if i <= k {
                let right = *it.next()?;

                let (old, left_new) = if i < k {
                    subtree_roots(i, k, h, it)?
                } else {
                    let boundary = *it.next()?;
                    (boundary, boundary)
                };

                let mut new = hash_children(&left_new, &right);
                let mut old = old;
                for l in shared.iter().rev() {
                    new = hash_children(l, &new);
                    old = hash_children(l, &old);
                }
                return Some((old, new));
            }

            shared.push(*it.next()?);
        }
    }

    None
}

fn hash_children(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}
