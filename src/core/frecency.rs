//! Frecency ranking for directory usage.
//!
//! `score = frequency / (1 + age_in_days)`. Frequently visited directories win,
//! but their weight decays smoothly the longer they go unvisited.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use super::records::DirUsage;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Fractional days between `last_seen` and `now`. Future timestamps count as zero.
pub fn age_in_days(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = now.signed_duration_since(last_seen).num_milliseconds();
    (millis.max(0) as f64) / MILLIS_PER_DAY
}

/// Frecency score for a `(frequency, last_seen)` pair observed at `now`.
pub fn score(frequency: u64, last_seen: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    frequency as f64 * (1.0 / (1.0 + age_in_days(last_seen, now)))
}

/// Total order: score descending, then `last_seen` descending, then path.
pub fn compare(a: &DirUsage, b: &DirUsage, now: DateTime<Utc>) -> Ordering {
    let sa = score(a.frequency, a.last_seen, now);
    let sb = score(b.frequency, b.last_seen, now);
    sb.total_cmp(&sa)
        .then_with(|| b.last_seen.cmp(&a.last_seen))
        .then_with(|| a.path.cmp(&b.path))
}

/// Sort usage entries into frecency order in place.
pub fn rank(entries: &mut [DirUsage], now: DateTime<Utc>) {
    entries.sort_by(|a, b| compare(a, b, now));
}

/// A usage entry paired with its score, for display.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Ranked {
    #[serde(flatten)]
    pub usage: DirUsage,
    pub score: f64,
}

pub fn ranked(mut entries: Vec<DirUsage>, now: DateTime<Utc>) -> Vec<Ranked> {
    rank(&mut entries, now);
    entries
        .into_iter()
        .map(|usage| Ranked {
            score: score(usage.frequency, usage.last_seen, now),
            usage,
        })
        .collect()
}
