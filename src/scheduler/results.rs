//! Latest outcome and recent history per probe, kept in memory for live queries.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::db::{HistoryEntry, HistoryRing, ProbeOutcome, HISTORY_LIMIT};

struct Tracked {
    latest: ProbeOutcome,
    history: HistoryRing,
}

/// Outcome and history are updated under one short write lock, so readers
/// never see one without the other.
pub struct ResultStore {
    probes: RwLock<HashMap<String, Tracked>>,
    history_limit: usize,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new(HISTORY_LIMIT)
    }
}

impl ResultStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            probes: RwLock::new(HashMap::new()),
            history_limit,
        }
    }

    /// Replace the latest outcome for the probe and prepend it to the history.
    pub async fn store_outcome(&self, outcome: ProbeOutcome) {
        let entry = outcome.history_entry();
        let latest = outcome.summary();
        let mut probes = self.probes.write().await;
        let tracked = probes
            .entry(outcome.probe_id)
            .or_insert_with(|| Tracked {
                latest: latest.clone(),
                history: HistoryRing::new(self.history_limit),
            });
        tracked.latest = latest;
        tracked.history.push(entry);
    }

    pub async fn get_outcome(&self, id: &str) -> Option<ProbeOutcome> {
        let probes = self.probes.read().await;
        probes.get(id).map(Tracked::with_history)
    }

    /// Every outcome with its history, ordered by probe name.
    pub async fn get_all_outcomes(&self) -> Vec<ProbeOutcome> {
        let probes = self.probes.read().await;
        let mut outcomes: Vec<_> = probes.values().map(Tracked::with_history).collect();
        outcomes.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.probe_id.cmp(&b.probe_id)));
        outcomes
    }

    /// Recent history, filtered like the storage backends do.
    pub async fn history(&self, id: &str, window: Duration) -> Option<Vec<HistoryEntry>> {
        let probes = self.probes.read().await;
        let tracked = probes.get(id)?;
        if window.is_zero() {
            return Some(tracked.history.to_vec());
        }
        let window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Some(tracked.history.since(cutoff))
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.probes.write().await.remove(id).is_some()
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.probes.read().await.len()
    }
}

impl Tracked {
    fn with_history(&self) -> ProbeOutcome {
        ProbeOutcome {
            history: self.history.to_vec(),
            ..self.latest.clone()
        }
    }
}
