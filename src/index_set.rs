//! Ordered integer set with a run-compressed representation.
//!
//! Work indices start out as long contiguous ranges and are consumed from the
//! low end, so the set stores ascending, coalesced `start..end` runs instead
//! of individual members. Pushing a fresh range is a single run insertion and
//! the length is tracked separately, so both are cheap no matter how many
//! members are involved. The set is not internally synchronized; callers that
//! share one across threads must lock around it.

use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSet {
    /// Ascending, pairwise disjoint, never adjacent (adjacent runs coalesce).
    runs: Vec<Range<i64>>,
    len: usize,
}

impl IndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members. O(1).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds a single integer. Returns false if it was already a member.
    pub fn push(&mut self, x: i64) -> bool {
        match self.locate(x) {
            Ok(_) => false,
            Err(pos) => {
                let merge_left = pos > 0 && self.runs[pos - 1].end == x;
                let merge_right = pos < self.runs.len() && self.runs[pos].start == x + 1;
                match (merge_left, merge_right) {
                    (true, true) => {
                        self.runs[pos - 1].end = self.runs[pos].end;
                        self.runs.remove(pos);
                    }
                    (true, false) => self.runs[pos - 1].end = x + 1,
                    (false, true) => self.runs[pos].start = x,
                    (false, false) => self.runs.insert(pos, x..x + 1),
                }
                self.len += 1;
                true
            }
        }
    }

    /// Adds every integer in a half-open range, coalescing with any runs it
    /// touches. Members already present are not duplicated.
    pub fn push_range(&mut self, range: Range<i64>) {
        if range.is_empty() {
            return;
        }
        // Runs strictly before the new range (not even adjacent) stay put;
        // everything from there up to the first run starting past range.end
        // gets folded into a single run.
        let lo = self.runs.partition_point(|r| r.end < range.start);
        let hi = self.runs.partition_point(|r| r.start <= range.end);
        let mut merged = range;
        let mut already_present: i64 = 0;
        for r in &self.runs[lo..hi] {
            merged.start = merged.start.min(r.start);
            merged.end = merged.end.max(r.end);
            already_present += r.end - r.start;
        }
        let gained = (merged.end - merged.start) - already_present;
        self.runs.splice(lo..hi, [merged]);
        self.len += gained as usize;
    }

    /// Removes and returns the smallest member, or None when empty.
    pub fn pop_next(&mut self) -> Option<i64> {
        let first = self.runs.first_mut()?;
        let x = first.start;
        first.start += 1;
        if first.is_empty() {
            self.runs.remove(0);
        }
        self.len -= 1;
        Some(x)
    }

    /// Removes a single integer. Returns false if it was not a member.
    pub fn remove(&mut self, x: i64) -> bool {
        let Ok(pos) = self.locate(x) else {
            return false;
        };
        let run = self.runs[pos].clone();
        if run.start == x && run.end == x + 1 {
            self.runs.remove(pos);
        } else if run.start == x {
            self.runs[pos].start += 1;
        } else if run.end == x + 1 {
            self.runs[pos].end -= 1;
        } else {
            // Interior member, the run splits in two.
            self.runs[pos].end = x;
            self.runs.insert(pos + 1, x + 1..run.end);
        }
        self.len -= 1;
        true
    }

    pub fn contains(&self, x: i64) -> bool {
        self.locate(x).is_ok()
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.runs.iter().flat_map(|r| r.clone())
    }

    /// Ok(run index) when x is a member, Err(insertion position) otherwise.
    fn locate(&self, x: i64) -> Result<usize, usize> {
        self.runs.binary_search_by(|r| {
            if r.end <= x {
                std::cmp::Ordering::Less
            } else if r.start > x {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        })
    }
}

impl fmt::Display for IndexSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (n, run) in self.runs.iter().enumerate() {
            if n > 0 {
                write!(f, ", ")?;
            }
            if run.end == run.start + 1 {
                write!(f, "{}", run.start)?;
            } else {
                write!(f, "{}..{}", run.start, run.end)?;
            }
        }
        write!(f, "}} ({})", self.len)
    }
}

impl Extend<i64> for IndexSet {
    fn extend<T: IntoIterator<Item = i64>>(&mut self, iter: T) {
        for x in iter {
            self.push(x);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_push_is_one_run() {
        let mut set = IndexSet::new();
        set.push_range(0..1000);
        assert_eq!(set.len(), 1000);
        assert_eq!(set.runs.len(), 1);
    }

    #[test]
    fn pop_is_ascending() {
        let mut set = IndexSet::new();
        set.push(7);
        set.push(2);
        set.push_range(4..6);
        let drained: Vec<i64> = std::iter::from_fn(|| set.pop_next()).collect();
        assert_eq!(drained, vec![2, 4, 5, 7]);
        assert!(set.is_empty());
        assert_eq!(set.pop_next(), None);
    }

    #[test]
    fn adjacent_pushes_coalesce() {
        let mut set = IndexSet::new();
        set.push(0);
        set.push(2);
        assert_eq!(set.runs.len(), 2);
        set.push(1);
        assert_eq!(set.runs.len(), 1);
        assert_eq!(set.runs[0], 0..3);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn duplicate_push_is_rejected() {
        let mut set = IndexSet::new();
        set.push_range(0..4);
        assert!(!set.push(2));
        assert_eq!(set.len(), 4);
        assert_eq!(set.runs.len(), 1);
    }

    #[test]
    fn overlapping_ranges_do_not_duplicate() {
        let mut set = IndexSet::new();
        set.push_range(0..5);
        set.push_range(3..8);
        assert_eq!(set.len(), 8);
        assert_eq!(set.runs.len(), 1);
        set.push_range(10..12);
        set.push_range(8..10);
        assert_eq!(set.len(), 12);
        assert_eq!(set.runs.len(), 1);
    }

    #[test]
    fn remove_interior_splits_run() {
        let mut set = IndexSet::new();
        set.push_range(0..10);
        assert!(set.remove(5));
        assert_eq!(set.len(), 9);
        assert_eq!(set.runs.len(), 2);
        assert!(!set.contains(5));
        let drained: Vec<i64> = set.iter().collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4, 6, 7, 8, 9]);
    }

    #[test]
    fn remove_edges_and_absent() {
        let mut set = IndexSet::new();
        set.push_range(0..3);
        assert!(set.remove(0));
        assert!(set.remove(2));
        assert!(!set.remove(9));
        assert_eq!(set.len(), 1);
        assert!(set.contains(1));
    }

    #[test]
    fn summary_compresses_runs() {
        let mut set = IndexSet::new();
        set.push_range(0..4);
        set.push(9);
        assert_eq!(set.to_string(), "{0..4, 9} (5)");
    }

    #[test]
    fn matches_a_reference_set_under_mixed_ops() {
        use std::collections::BTreeSet;

        let mut set = IndexSet::new();
        let mut reference = BTreeSet::new();
        // Fixed-seed linear congruential stream keeps the sweep deterministic.
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as i64
        };

        for step in 0..4000 {
            match next() % 4 {
                0 => {
                    let x = next() % 200;
                    assert_eq!(set.push(x), reference.insert(x));
                }
                1 => {
                    let a = next() % 200;
                    let b = a + next() % 16;
                    set.push_range(a..b);
                    reference.extend(a..b);
                }
                2 => {
                    let x = next() % 200;
                    assert_eq!(set.remove(x), reference.remove(&x));
                }
                _ => {
                    assert_eq!(set.pop_next(), reference.pop_first());
                }
            }
            assert_eq!(set.len(), reference.len(), "diverged at step {step}");
        }
        let drained: Vec<i64> = set.iter().collect();
        let expected: Vec<i64> = reference.into_iter().collect();
        assert_eq!(drained, expected);
    }
}
