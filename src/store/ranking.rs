//! History ranking policies.
//!
//! Frecency combines frequency (how often) and recency (how recently) with
//! an exponential decay:
//!
//! ```text
//! score = 0.4 × ln(count + 1) × 10 + 0.6 × e^(-λ × age_days) × 100
//! λ = ln(2) / half_life_days
//! ```
//!
//! With a 14-day half-life, an item used 14 days ago has half the recency
//! weight of an item used today.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::{HistoryMode, HistoryRecord};

/// Half-life in days for the exponential decay function.
pub const HALF_LIFE_DAYS: f64 = 14.0;

/// Decay constant: λ = ln(2) / half_life
const LAMBDA: f64 = std::f64::consts::LN_2 / HALF_LIFE_DAYS;

/// Adaptive mode only counts uses inside this window.
pub const ADAPTIVE_WINDOW_HOURS: u64 = 36;

/// Maximum age in days before an entry is pruned.
pub(crate) const MAX_AGE_DAYS: u64 = 90;

/// How many recent use timestamps are kept per entry.
const RECENT_USES_KEPT: usize = 32;

const MS_PER_HOUR: u64 = 3_600_000;
const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Usage of one id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    /// Number of times this id was used.
    pub count: u32,

    /// Unix milliseconds of last use.
    pub last_used: u64,

    /// Unix milliseconds of first use.
    pub first_used: u64,

    /// Store-wide sequence number of the last use; orders uses that share a
    /// timestamp.
    pub last_seq: u64,

    /// Timestamps of the most recent uses, oldest first.
    #[serde(default)]
    pub recent: Vec<u64>,

    /// Query typed when this id was last picked.
    #[serde(default)]
    pub last_query: Option<String>,
}

impl UsageEntry {
    pub(crate) fn new(now: u64, seq: u64, query: Option<&str>) -> Self {
        Self {
            count: 1,
            last_used: now,
            first_used: now,
            last_seq: seq,
            recent: vec![now],
            last_query: query.map(str::to_string),
        }
    }

    pub(crate) fn record_usage(&mut self, now: u64, seq: u64, query: Option<&str>) {
        self.count = self.count.saturating_add(1);
        self.last_used = now;
        self.last_seq = seq;
        self.recent.push(now);
        if self.recent.len() > RECENT_USES_KEPT {
            let excess = self.recent.len() - RECENT_USES_KEPT;
            self.recent.drain(..excess);
        }
        if query.is_some() {
            self.last_query = query.map(str::to_string);
        }
    }

    fn age_days(&self, now: u64) -> f64 {
        now.saturating_sub(self.last_used) as f64 / MS_PER_DAY as f64
    }

    /// Frecency score. Higher is better.
    pub fn frecency(&self, now: u64) -> f64 {
        // Frequency component: logarithmic scaling
        let freq_score = (self.count as f64 + 1.0).ln();

        // Recency component: exponential decay
        let recency_score = (-LAMBDA * self.age_days(now)).exp();

        0.4 * freq_score * 10.0 + 0.6 * recency_score * 100.0
    }

    /// Uses inside the adaptive window.
    pub fn recent_uses(&self, now: u64) -> usize {
        let cutoff = now.saturating_sub(ADAPTIVE_WINDOW_HOURS * MS_PER_HOUR);
        self.recent.iter().filter(|&&t| t >= cutoff).count()
    }

    pub(crate) fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.last_used) > MAX_AGE_DAYS * MS_PER_DAY
    }

    fn score(&self, mode: HistoryMode, now: u64) -> Option<f64> {
        match mode {
            HistoryMode::Recency => Some(self.last_seq as f64),
            HistoryMode::Frequency => Some(self.count as f64),
            HistoryMode::Frecency => Some(self.frecency(now)),
            HistoryMode::Adaptive => match self.recent_uses(now) {
                0 => None,
                uses => Some(uses as f64),
            },
        }
    }
}

/// Rank usage entries under `mode`, best first. Ties go to the most
/// recently used id.
pub(crate) fn rank(
    entries: &HashMap<String, UsageEntry>,
    mode: HistoryMode,
    limit: usize,
    now: u64,
) -> Vec<HistoryRecord> {
    let mut scored: Vec<(&String, f64, u64)> = entries
        .iter()
        .filter_map(|(id, entry)| {
            entry
                .score(mode, now)
                .map(|score| (id, score, entry.last_seq))
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(b.2.cmp(&a.2)));

    scored
        .into_iter()
        .take(limit)
        .map(|(id, score, _)| HistoryRecord {
            id: id.clone(),
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(entries: &mut HashMap<String, UsageEntry>, id: &str, at: u64, seq: u64) {
        entries
            .entry(id.to_string())
            .and_modify(|e| e.record_usage(at, seq, None))
            .or_insert_with(|| UsageEntry::new(at, seq, None));
    }

    #[test]
    fn test_new_entry() {
        let entry = UsageEntry::new(1_000, 1, Some("fi"));
        assert_eq!(entry.count, 1);
        assert_eq!(entry.first_used, entry.last_used);
        assert_eq!(entry.last_query.as_deref(), Some("fi"));
    }

    #[test]
    fn test_frequent_use_increases_score() {
        let now = now_millis();
        let mut entry = UsageEntry::new(now, 1, None);
        let score1 = entry.frecency(now);

        for seq in 2..12 {
            entry.record_usage(now, seq, None);
        }
        let score2 = entry.frecency(now);

        assert!(
            score2 > score1,
            "More usage should increase score: {} > {}",
            score2,
            score1
        );
        assert!(score2 < 100.0);
    }

    #[test]
    fn test_decay_halves_recency() {
        let now = now_millis();
        let fresh = UsageEntry::new(now, 1, None);
        let old = UsageEntry::new(now - 14 * MS_PER_DAY, 2, None);
        // same frequency component, recency halved
        let freq = 0.4 * 2f64.ln() * 10.0;
        let ratio = (old.frecency(now) - freq) / (fresh.frecency(now) - freq);
        assert!((ratio - 0.5).abs() < 1e-6, "ratio was {}", ratio);
    }

    #[test]
    fn test_recent_uses_trimmed() {
        let mut entry = UsageEntry::new(0, 0, None);
        for seq in 1..100 {
            entry.record_usage(seq, seq, None);
        }
        assert_eq!(entry.recent.len(), RECENT_USES_KEPT);
        assert_eq!(entry.count, 100);
        assert_eq!(*entry.recent.last().unwrap(), 99);
    }

    #[test]
    fn test_rank_modes() {
        let now = 100 * MS_PER_DAY;
        let mut entries = HashMap::new();
        // a: used three times two days ago
        usage(&mut entries, "a", now - 2 * MS_PER_DAY, 1);
        usage(&mut entries, "a", now - 2 * MS_PER_DAY, 2);
        usage(&mut entries, "a", now - 2 * MS_PER_DAY, 3);
        // b: used once just now
        usage(&mut entries, "b", now, 4);

        let ids = |records: Vec<HistoryRecord>| -> Vec<String> {
            records.into_iter().map(|r| r.id).collect()
        };

        assert_eq!(ids(rank(&entries, HistoryMode::Recency, 10, now)), vec!["b", "a"]);
        assert_eq!(ids(rank(&entries, HistoryMode::Frequency, 10, now)), vec!["a", "b"]);
        // outside the 36h window only b counts
        assert_eq!(ids(rank(&entries, HistoryMode::Adaptive, 10, now)), vec!["b"]);
        assert_eq!(ids(rank(&entries, HistoryMode::Recency, 1, now)), vec!["b"]);
    }

    #[test]
    fn test_expiry() {
        let now = 200 * MS_PER_DAY;
        assert!(UsageEntry::new(now - 91 * MS_PER_DAY, 0, None).is_expired(now));
        assert!(!UsageEntry::new(now - 89 * MS_PER_DAY, 0, None).is_expired(now));
    }
}
