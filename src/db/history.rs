//! Fixed-capacity, most-recent-first history buffer.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use super::models::HistoryEntry;

#[derive(Debug, Clone)]
pub struct HistoryRing {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert at the front, evicting the oldest entry once full.
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(entry);
    }

    pub fn to_vec(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Entries strictly newer than `cutoff`, most recent first.
    pub fn since(&self, cutoff: DateTime<Utc>) -> Vec<HistoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.timestamp > cutoff)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProbeStatus;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn entry(at: DateTime<Utc>, msg: &str) -> HistoryEntry {
        HistoryEntry {
            timestamp: at,
            status: ProbeStatus::Up,
            response_time: Duration::from_millis(1),
            message: msg.to_string(),
        }
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut ring = HistoryRing::new(3);
        let now = Utc::now();
        for i in 0..5 {
            ring.push(entry(now + ChronoDuration::seconds(i), &i.to_string()));
        }
        let msgs: Vec<_> = ring.to_vec().into_iter().map(|e| e.message).collect();
        assert_eq!(msgs, vec!["4", "3", "2"]);
    }

    #[test]
    fn test_since_filters_by_cutoff() {
        let mut ring = HistoryRing::new(10);
        let now = Utc::now();
        ring.push(entry(now - ChronoDuration::hours(2), "old"));
        ring.push(entry(now - ChronoDuration::minutes(5), "new"));
        let recent = ring.since(now - ChronoDuration::hours(1));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "new");
    }
}
