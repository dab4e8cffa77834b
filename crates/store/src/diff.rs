//! Index-level diff between two deliveries of the same collection
//!
//! Both sides are lists of primary keys in result order. A key present on
//! both sides whose relative order changed is reported as a move: a deletion
//! at its old index plus an insertion at its new index. Which keys count as
//! moved is decided by a longest increasing subsequence over the new
//! positions, so the smallest possible set of keys is reported.

use cordon_core::Value;
use std::collections::BTreeMap;

/// Positional changes between an old and a new key list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDiff {
    /// Old indices, descending
    pub deletions: Vec<usize>,
    /// New indices, ascending
    pub insertions: Vec<usize>,
    /// Old indices of modified keys that kept their relative position, ascending
    pub modifications: Vec<usize>,
}

impl IndexDiff {
    /// True if nothing changed
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.insertions.is_empty() && self.modifications.is_empty()
    }
}

/// Compute the diff from `old` to `new`
///
/// `is_modified` is asked about keys present on both sides.
pub fn diff(old: &[Value], new: &[Value], is_modified: impl Fn(&Value) -> bool) -> IndexDiff {
    let new_pos: BTreeMap<&Value, usize> = new.iter().enumerate().map(|(j, k)| (k, j)).collect();

    let mut out = IndexDiff::default();
    let mut common: Vec<(usize, usize)> = Vec::new();
    for (i, key) in old.iter().enumerate() {
        match new_pos.get(key) {
            Some(&j) => common.push((i, j)),
            None => out.deletions.push(i),
        }
    }

    let stable = longest_increasing(&common);
    let mut kept_new = vec![false; new.len()];
    for (idx, &(i, j)) in common.iter().enumerate() {
        if stable[idx] {
            kept_new[j] = true;
            if is_modified(&old[i]) {
                out.modifications.push(i);
            }
        } else {
            out.deletions.push(i);
        }
    }
    out.insertions = (0..new.len()).filter(|j| !kept_new[*j]).collect();

    out.deletions.sort_unstable_by(|a, b| b.cmp(a));
    out.modifications.sort_unstable();
    out
}

/// Mark the members of one longest strictly increasing subsequence of the
/// second components.
fn longest_increasing(pairs: &[(usize, usize)]) -> Vec<bool> {
    // tails[len] = index into `pairs` of the smallest tail of an increasing
    // run of length len + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; pairs.len()];

    for (idx, &(_, j)) in pairs.iter().enumerate() {
        let pos = tails.partition_point(|&t| pairs[t].1 < j);
        if pos > 0 {
            prev[idx] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(idx);
        } else {
            tails[pos] = idx;
        }
    }

    let mut keep = vec![false; pairs.len()];
    let mut cursor = tails.last().copied();
    while let Some(idx) = cursor {
        keep[idx] = true;
        cursor = prev[idx];
    }
    keep
}
