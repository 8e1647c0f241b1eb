//! Ordered interval set over string keys.
//!
//! A shard's key space is a list of half-open ranges `[low, high)`,
//! stored as a flat sorted list of alternating boundaries. A key lies
//! inside the set iff its insertion point lands on an even index.

use serde::{Deserialize, Serialize};

/// An ordered set of non-overlapping, non-adjacent key ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeList {
    /// Alternating low/high boundaries, sorted ascending.
    boundaries: Vec<String>,
}

impl RangeList {
    /// An empty range list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the compact comma-joined boundary form.
    ///
    /// Returns None when the boundary count is odd.
    pub fn from_compact(s: &str) -> Option<Self> {
        if s.is_empty() {
            return Some(Self::new());
        }
        let labels: Vec<&str> = s.split(',').collect();
        if labels.len() % 2 == 1 {
            return None;
        }
        let mut list = Self::new();
        for pair in labels.chunks(2) {
            list.add_range(pair[0], pair[1]);
        }
        Some(list)
    }

    /// The compact comma-joined boundary form.
    pub fn to_compact(&self) -> String {
        self.boundaries.join(",")
    }

    /// The lowest boundary, or empty when the list is empty.
    pub fn start_key(&self) -> &str {
        self.boundaries.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// The highest boundary, or empty when the list is empty.
    pub fn end_key(&self) -> &str {
        self.boundaries.last().map(|s| s.as_str()).unwrap_or("")
    }

    /// The ranges as (low, high) pairs.
    pub fn ranges(&self) -> Vec<(String, String)> {
        self.boundaries
            .chunks(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect()
    }

    /// Union another list into this one.
    pub fn add(&mut self, other: &RangeList) {
        for (low, high) in other.ranges() {
            self.add_range(&low, &high);
        }
    }

    /// Whether `key` lies inside the set.
    pub fn search(&self, key: &str) -> bool {
        Self::red_place(self.find(key))
    }

    /// Insert the range `[low, high)`, merging adjacent intervals.
    pub fn add_range(&mut self, low: &str, high: &str) {
        if high <= low {
            return;
        }
        if self.boundaries.is_empty() {
            self.boundaries = vec![low.to_string(), high.to_string()];
            return;
        }
        let pl = self.find(low);
        let pr = self.find(high);
        if pl == pr && Self::red_place(pl) {
            return;
        }

        let (left, new_low) = if Self::red_place(pl) {
            (self.left_of(pl), self.get(pl))
        } else if self.step_there(low, pl) {
            (self.left_of(pl - 1), self.get(pl - 1))
        } else {
            (self.left_of(pl + 1), low.to_string())
        };

        let (right, new_high) = if Self::red_place(pr) {
            (self.right_of(pr + 1), self.get(pr + 1))
        } else if self.step_there(high, pr) {
            (self.right_of(pr), self.get(pr))
        } else {
            (self.right_of(pr), high.to_string())
        };

        let mut next = left;
        next.push(new_low);
        next.push(new_high);
        next.extend(right);
        self.boundaries = next;
    }

    /// Remove the range `[low, high)`, splitting intervals it cuts.
    pub fn delete_range(&mut self, low: &str, high: &str) {
        if high <= low || self.boundaries.is_empty() {
            return;
        }
        let pl = self.find(low);
        let pr = self.find(high);
        if pl == pr && !Self::red_place(pl) {
            return;
        }

        let mut middle: Vec<String> = Vec::new();

        let left = if Self::red_place(pl) {
            if self.step_there(low, pl) {
                self.left_of(pl)
            } else {
                middle.push(low.to_string());
                self.left_of(pl + 1)
            }
        } else {
            self.left_of(pl + 1)
        };

        let right = if Self::red_place(pr) {
            if self.step_there(high, pr) {
                self.right_of(pr - 1)
            } else {
                middle.push(high.to_string());
                self.right_of(pr)
            }
        } else {
            self.right_of(pr)
        };

        let mut next = left;
        next.extend(middle);
        next.extend(right);
        self.boundaries = next;
    }

    /// Insertion point of `key`: the largest index whose boundary is
    /// `<= key`, or -1 when the key precedes everything.
    fn find(&self, key: &str) -> isize {
        let mut start: isize = -1;
        let mut end: isize = self.boundaries.len() as isize - 1;
        let mut place = (start + end) / 2;
        while !self.good_place(key, place) {
            if key < self.boundaries[place as usize].as_str() {
                end = place - 1;
            } else {
                start = place + 1;
            }
            place = (start + end) / 2;
        }
        place
    }

    fn good_place(&self, key: &str, place: isize) -> bool {
        let last = self.boundaries.len() as isize - 1;
        (place == -1 || self.boundaries[place as usize].as_str() <= key)
            && (place == last || key < self.boundaries[(place + 1) as usize].as_str())
    }

    /// An even insertion point lies just past a low boundary.
    fn red_place(place: isize) -> bool {
        place >= 0 && place % 2 == 0
    }

    fn step_there(&self, key: &str, place: isize) -> bool {
        place >= 0 && self.boundaries[place as usize] == key
    }

    fn get(&self, place: isize) -> String {
        self.boundaries[place as usize].clone()
    }

    fn left_of(&self, place: isize) -> Vec<String> {
        if place <= 0 {
            Vec::new()
        } else {
            self.boundaries[..place as usize].to_vec()
        }
    }

    fn right_of(&self, place: isize) -> Vec<String> {
        let last = self.boundaries.len() as isize - 1;
        if place >= last {
            Vec::new()
        } else {
            self.boundaries[(place + 1) as usize..].to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_membership() {
        let mut rl = RangeList::new();
        rl.add_range("b", "d");
        rl.add_range("f", "h");

        assert!(!rl.search("a"));
        assert!(rl.search("b")); // closed low boundary
        assert!(rl.search("c"));
        assert!(!rl.search("d")); // open high boundary
        assert!(!rl.search("e"));
        assert!(rl.search("g"));
        assert!(!rl.search("z"));
    }

    #[test]
    fn test_empty_and_degenerate() {
        let mut rl = RangeList::new();
        assert!(!rl.search("a"));

        rl.add_range("z", "a"); // high <= low is a no-op
        assert_eq!(rl.to_compact(), "");
    }

    #[test]
    fn test_add_merges_overlapping() {
        let mut rl = RangeList::new();
        rl.add_range("b", "d");
        rl.add_range("c", "f");
        assert_eq!(rl.ranges(), vec![("b".to_string(), "f".to_string())]);

        rl.add_range("f", "g"); // adjacent at a high boundary merges
        assert_eq!(rl.ranges(), vec![("b".to_string(), "g".to_string())]);
    }

    #[test]
    fn test_add_spanning_range_swallows() {
        let mut rl = RangeList::new();
        rl.add_range("b", "c");
        rl.add_range("e", "f");
        rl.add_range("a", "z");
        assert_eq!(rl.ranges(), vec![("a".to_string(), "z".to_string())]);
    }

    #[test]
    fn test_delete_splits_range() {
        let mut rl = RangeList::new();
        rl.add_range("a", "z");
        rl.delete_range("f", "h");

        assert_eq!(
            rl.ranges(),
            vec![
                ("a".to_string(), "f".to_string()),
                ("h".to_string(), "z".to_string())
            ]
        );
        assert!(rl.search("e"));
        assert!(!rl.search("f"));
        assert!(!rl.search("g"));
        assert!(rl.search("h"));
    }

    #[test]
    fn test_delete_whole_range() {
        let mut rl = RangeList::new();
        rl.add_range("b", "d");
        rl.add_range("f", "h");
        rl.delete_range("b", "d");

        assert_eq!(rl.ranges(), vec![("f".to_string(), "h".to_string())]);
        assert!(!rl.search("c"));
        assert!(rl.search("g"));
    }

    #[test]
    fn test_search_equivalence_over_random_ranges() {
        // Membership must match the naive union of the added ranges.
        let pairs = [("10", "15"), ("20", "25"), ("40", "45"), ("12", "22")];
        let mut rl = RangeList::new();
        for (low, high) in pairs {
            rl.add_range(low, high);
        }

        let inside = |k: &str| pairs.iter().any(|(l, h)| *l <= k && k < *h);
        for key in ["05", "10", "14", "15", "18", "22", "24", "25", "39", "40", "44", "45", "99"] {
            assert_eq!(rl.search(key), inside(key), "key {}", key);
        }
    }

    #[test]
    fn test_compact_roundtrip() {
        let mut rl = RangeList::new();
        rl.add_range("10", "11");
        rl.add_range("20", "21");

        let restored = RangeList::from_compact(&rl.to_compact()).unwrap();
        assert_eq!(restored, rl);

        assert!(RangeList::from_compact("10,11,20").is_none());
    }
}
