//! Interval index.
//!
//! Answers point-in-interval, before and after queries over records that
//! carry a [`ValueRange`]. Used by range-typed filter indexes and by price
//! validity.

use crate::bitmap::Bitmap;
use crate::value::ValueRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stored form of one interval and its records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeEntry {
    range: ValueRange,
    record_ids: Bitmap,
}

/// Records grouped by interval, ordered by interval start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<RangeEntry>", into = "Vec<RangeEntry>")]
pub struct RangeIndex {
    intervals: BTreeMap<ValueRange, Bitmap>,
}

impl From<Vec<RangeEntry>> for RangeIndex {
    fn from(entries: Vec<RangeEntry>) -> Self {
        Self {
            intervals: entries
                .into_iter()
                .filter(|entry| !entry.record_ids.is_empty())
                .map(|entry| (entry.range, entry.record_ids))
                .collect(),
        }
    }
}

impl From<RangeIndex> for Vec<RangeEntry> {
    fn from(index: RangeIndex) -> Self {
        index
            .intervals
            .into_iter()
            .map(|(range, record_ids)| RangeEntry { range, record_ids })
            .collect()
    }
}

impl RangeIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record to an interval.
    pub fn insert(&mut self, range: ValueRange, record_id: u32) {
        self.intervals.entry(range).or_default().insert(record_id);
    }

    /// Removes a record from an interval. Returns true if it was present.
    pub fn remove(&mut self, range: &ValueRange, record_id: u32) -> bool {
        let Some(records) = self.intervals.get_mut(range) else {
            return false;
        };
        let removed = records.remove(record_id);
        if records.is_empty() {
            self.intervals.remove(range);
        }
        removed
    }

    /// Removes a record from every interval holding it.
    pub fn remove_everywhere(&mut self, record_id: u32) -> bool {
        let mut removed = false;
        self.intervals.retain(|_, records| {
            removed |= records.remove(record_id);
            !records.is_empty()
        });
        removed
    }

    /// Records whose interval contains `point`.
    #[must_use]
    pub fn valid_at(&self, point: i64) -> Bitmap {
        let mut result = Bitmap::new();
        for (range, records) in &self.intervals {
            if range.from.is_some_and(|from| from > point) {
                break;
            }
            if range.contains(point) {
                result.union_with(records);
            }
        }
        result
    }

    /// Records whose interval ends strictly before `point`.
    #[must_use]
    pub fn valid_before(&self, point: i64) -> Bitmap {
        let mut result = Bitmap::new();
        for (range, records) in &self.intervals {
            if range.from.is_some_and(|from| from >= point) {
                break;
            }
            if range.ends_before(point) {
                result.union_with(records);
            }
        }
        result
    }

    /// Records whose interval starts strictly after `point`.
    #[must_use]
    pub fn valid_after(&self, point: i64) -> Bitmap {
        let mut result = Bitmap::new();
        for (range, records) in self.intervals.iter().rev() {
            if !range.starts_after(point) {
                break;
            }
            result.union_with(records);
        }
        result
    }

    /// Number of distinct intervals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Returns true if no interval is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Union of all indexed records.
    #[must_use]
    pub fn all_records(&self) -> Bitmap {
        let mut result = Bitmap::new();
        for records in self.intervals.values() {
            result.union_with(records);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RangeIndex {
        let mut index = RangeIndex::new();
        index.insert(ValueRange::between(10, 20), 1);
        index.insert(ValueRange::between(15, 30), 2);
        index.insert(ValueRange::since(40), 3);
        index.insert(ValueRange::until(5), 4);
        index.insert(ValueRange::unbounded(), 5);
        index
    }

    #[test]
    fn valid_at_point() {
        let index = sample();
        assert_eq!(index.valid_at(17).to_vec(), vec![1, 2, 5]);
        assert_eq!(index.valid_at(5).to_vec(), vec![4, 5]);
        assert_eq!(index.valid_at(100).to_vec(), vec![3, 5]);
    }

    #[test]
    fn valid_before_point() {
        let index = sample();
        assert_eq!(index.valid_before(21).to_vec(), vec![1, 4]);
        assert_eq!(index.valid_before(20).to_vec(), vec![4]);
    }

    #[test]
    fn valid_after_point() {
        let index = sample();
        assert_eq!(index.valid_after(12).to_vec(), vec![2, 3]);
        assert_eq!(index.valid_after(40).to_vec(), Vec::<u32>::new());
    }

    #[test]
    fn remove_prunes_empty_intervals() {
        let mut index = sample();
        assert!(index.remove(&ValueRange::between(10, 20), 1));
        assert!(!index.remove(&ValueRange::between(10, 20), 1));
        assert_eq!(index.len(), 4);
        assert!(index.remove_everywhere(5));
        assert_eq!(index.len(), 3);
    }
}
