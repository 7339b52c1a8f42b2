//! Inclusion and consistency path computation
//!
//! Both proofs are computed by direct slot lookups into the hash log,
//! descending the tree shape implied by the set bits of `j - 1`. Entries
//! are pushed in discovery order (root towards leaf) and reversed once by
//! the caller, so the emitted path is leaf-adjacent first — the order the
//! verifiers consume.

use super::{AhtResult, Digest, Inner};

impl Inner {
    pub(super) fn inclusion_path(
        &mut self,
        i: u64,
        j: u64,
        height: u32,
        out: &mut Vec<Digest>,
    ) -> AhtResult<()> {
        for h in (0..height).rev() {
            if (j - 1) & (1u64 << h) != 0 {
                let k = ((j - 1) >> h) << h;

                if i <= k {
                    out.push(self.highest_node(j, h)?);
                    return self.inclusion_path(i, k, h, out);
                }

                out.push(self.node(k, h)?);
            }
        }

        Ok(())
    }

    pub(super) fn consistency_path(
        &mut self,
        i: u64,
        j: u64,
        height: u32,
        out: &mut Vec<Digest>,
    ) -> AhtResult<()> {
        for h in (0..height).rev() {
            if (j - 1) & (1u64 << h) != 0 {
                let k = ((j - 1) >> h) << h;

                if i <= k {
                    out.push(self.highest_node(j, h)?);
                    if i < k {
                        self.consistency_path(i, k, h, out)?;
                    }
                    if i == k {
                        out.push(self.highest_node(i, h)?);
                    }
                    return Ok(());
                }

                out.push(self.node(k, h)?);

                if i == j {
                    // Equal sizes: the remaining path is the boundary
                    // decomposition of the tree itself.
                    out.push(self.highest_node(i, h)?);
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    /// Digest of the largest frozen subtree ending at leaf `i` within a
    /// tree of height `d`.
    pub(super) fn highest_node(&mut self, i: u64, d: u32) -> AhtResult<Digest> {
        let mut l = 0u32;
        for r in (0..d).rev() {
            if (i - 1) & (1u64 << r) != 0 {
                l += 1;
            }
        }
        self.node(i, l)
    }
}
