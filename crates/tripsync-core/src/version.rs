//! Per-author version vectors for causal ordering

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable snapshot of per-author sequence counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector(BTreeMap<String, u64>);

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last sequence number seen for an author (0 if never seen)
    pub fn get(&self, author: &str) -> u64 {
        self.0.get(author).copied().unwrap_or(0)
    }

    pub fn set(&mut self, author: impl Into<String>, seq: u64) {
        self.0.insert(author.into(), seq);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pointwise `self <= other`
    fn le(&self, other: &VersionVector) -> bool {
        self.0.iter().all(|(author, seq)| *seq <= other.get(author))
    }

    /// Standard vector-clock dominance: `self` has seen everything
    /// `other` has, and more
    pub fn dominates(&self, other: &VersionVector) -> bool {
        other.le(self) && !self.le(other)
    }

    /// Neither side dominates: the recorded histories are concurrent
    pub fn concurrent_with(&self, other: &VersionVector) -> bool {
        !self.le(other) && !other.le(self)
    }
}

impl FromIterator<(String, u64)> for VersionVector {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Monotonic per-author sequence counters for one document session
///
/// Two operations are concurrent when neither author's vector at emission
/// dominates the other's. A sequence number that does not advance its
/// author's counter signals a protocol violation and is rejected.
#[derive(Debug, Clone, Default)]
pub struct VersionVectorTracker {
    counters: BTreeMap<String, u64>,
}

impl VersionVectorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a tracker from a checkpointed vector
    pub fn from_vector(vector: &VersionVector) -> Self {
        let mut tracker = Self::new();
        for (author, seq) in &vector.0 {
            tracker.counters.insert(author.clone(), *seq);
        }
        tracker
    }

    /// Advance the author's counter and return the new sequence number
    pub fn bump(&mut self, author: &str) -> u64 {
        let counter = self.counters.entry(author.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Last recorded sequence number for an author
    pub fn get(&self, author: &str) -> u64 {
        self.counters.get(author).copied().unwrap_or(0)
    }

    /// Record an externally assigned sequence number
    ///
    /// Rejects regressions: `seq` must be strictly greater than the
    /// recorded counter, otherwise the client is desynced and must
    /// fetch a fresh snapshot.
    pub fn record(&mut self, author: &str, seq: u64) -> Result<()> {
        let recorded = self.get(author);
        if seq <= recorded {
            return Err(Error::StaleOperation {
                author: author.to_string(),
                seq,
                recorded,
            });
        }
        self.counters.insert(author.to_string(), seq);
        Ok(())
    }

    /// Immutable snapshot of all counters
    pub fn vector(&self) -> VersionVector {
        VersionVector(self.counters.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_monotonic() {
        let mut tracker = VersionVectorTracker::new();
        assert_eq!(tracker.bump("a"), 1);
        assert_eq!(tracker.bump("a"), 2);
        assert_eq!(tracker.bump("b"), 1);
        assert_eq!(tracker.get("a"), 2);
    }

    #[test]
    fn test_record_rejects_regression() {
        let mut tracker = VersionVectorTracker::new();
        tracker.record("a", 1).unwrap();
        tracker.record("a", 2).unwrap();

        // Equal and lower sequence numbers are both protocol violations
        assert!(tracker.record("a", 2).is_err());
        assert!(tracker.record("a", 1).is_err());
        assert_eq!(tracker.get("a"), 2);
    }

    #[test]
    fn test_record_allows_gaps() {
        let mut tracker = VersionVectorTracker::new();
        tracker.record("a", 3).unwrap();
        assert_eq!(tracker.get("a"), 3);
    }

    #[test]
    fn test_dominance() {
        let newer: VersionVector =
            [("a".to_string(), 2), ("b".to_string(), 1)].into_iter().collect();
        let older: VersionVector = [("a".to_string(), 1)].into_iter().collect();

        assert!(newer.dominates(&older));
        assert!(!older.dominates(&newer));
        assert!(!newer.concurrent_with(&older));
    }

    #[test]
    fn test_concurrency() {
        let left: VersionVector = [("a".to_string(), 2)].into_iter().collect();
        let right: VersionVector = [("b".to_string(), 1)].into_iter().collect();

        assert!(left.concurrent_with(&right));
        assert!(right.concurrent_with(&left));
        assert!(!left.dominates(&right));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut tracker = VersionVectorTracker::new();
        tracker.bump("a");
        let snapshot = tracker.vector();
        tracker.bump("a");

        assert_eq!(snapshot.get("a"), 1);
        assert_eq!(tracker.get("a"), 2);
    }
}
