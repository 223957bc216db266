use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::LimitKind;

use super::distribution::{Distribution, Slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Drop,
}

struct LimiterState {
    /// `buckets_count` contiguous time slots, oldest at index 0.
    buckets: Vec<i64>,
    /// `[bucket][slot]`, present only when a distribution is configured.
    dist_counters: Option<Vec<Vec<i64>>>,
    min_bucket_ts: DateTime<Utc>,
    effective_limit: i64,
    last_used: DateTime<Utc>,
}

/// The bucket ring and metadata for a single (throttle key, rule). All
/// charge steps happen under this limiter's own mutex; limiters for
/// different keys proceed independently.
pub struct Limiter {
    state: Mutex<LimiterState>,
    bucket_interval: Duration,
    buckets_count: usize,
    limit_kind: LimitKind,
    distribution: Option<Arc<Distribution>>,
}

impl Limiter {
    pub fn new(
        buckets_count: usize,
        bucket_interval: Duration,
        limit: i64,
        limit_kind: LimitKind,
        distribution: Option<Arc<Distribution>>,
        aligned_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let dist_counters = distribution
            .as_ref()
            .map(|d| vec![vec![0i64; d.slot_count()]; buckets_count]);
        Self {
            state: Mutex::new(LimiterState {
                buckets: vec![0i64; buckets_count],
                dist_counters,
                min_bucket_ts: aligned_start,
                effective_limit: limit,
                last_used: now,
            }),
            bucket_interval,
            buckets_count,
            limit_kind,
            distribution,
        }
    }

    pub fn limit_kind(&self) -> LimitKind {
        self.limit_kind
    }

    /// Applied by the external-store adapter; never performs a charge
    /// itself, only tunes the locally effective limit.
    pub fn set_effective_limit(&self, limit: i64) {
        self.state.lock().unwrap().effective_limit = limit;
    }

    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.state.lock().unwrap().last_used < cutoff
    }

    /// Rotates the bucket ring to cover `now`, then attempts to charge
    /// `cost` against the applicable limit (the full limit, or a
    /// distribution sub-limit when `category` resolves to one).
    pub fn charge(&self, now: DateTime<Utc>, cost: i64, category: Option<&str>) -> Verdict {
        let mut state = self.state.lock().unwrap();
        state.last_used = now;

        let interval_nanos = (self.bucket_interval.as_nanos().max(1)) as i64;
        let delta_nanos = now
            .signed_duration_since(state.min_bucket_ts)
            .num_nanoseconds()
            .unwrap_or(0);
        let mut idx = delta_nanos.div_euclid(interval_nanos);

        if idx < 0 {
            // Older than the window: charge the oldest bucket rather than
            // rejecting outright, ensuring monotonic progress.
            idx = 0;
        } else if idx >= self.buckets_count as i64 {
            let shift = (idx - self.buckets_count as i64 + 1).min(self.buckets_count as i64) as usize;
            for _ in 0..shift {
                state.buckets.remove(0);
                state.buckets.push(0);
                if let Some(dist_counters) = state.dist_counters.as_mut() {
                    dist_counters.remove(0);
                    let slots = self.distribution.as_ref().map(|d| d.slot_count()).unwrap_or(0);
                    dist_counters.push(vec![0i64; slots]);
                }
            }
            state.min_bucket_ts += chrono::Duration::nanoseconds(interval_nanos * shift as i64);
            idx = self.buckets_count as i64 - 1;
        }
        let idx = idx as usize;

        let limit = state.effective_limit;

        if limit < 0 {
            // No-limit mode: events always pass, buckets still accumulate
            // for observability.
            state.buckets[idx] += cost;
            if let (Some(dist), Some(cat)) = (&self.distribution, category) {
                if let Some(slot_idx) = dist.slot_index(dist.resolve(cat)) {
                    state.dist_counters.as_mut().unwrap()[idx][slot_idx] += cost;
                }
            }
            return Verdict::Pass;
        }

        let (applicable_limit, current, slot_idx) = match (&self.distribution, category) {
            (Some(dist), Some(cat)) => match dist.resolve(cat) {
                Slot::Unconstrained => (limit, state.buckets.iter().sum(), None),
                slot => {
                    let idx2 = dist.slot_index(slot).expect("mapped/default slot has an index");
                    let applicable = if slot == Slot::Default {
                        dist.default_limit(limit)
                    } else {
                        dist.mapped_limit(idx2, limit)
                    };
                    let current = state.dist_counters.as_ref().unwrap().iter().map(|b| b[idx2]).sum();
                    (applicable, current, Some(idx2))
                }
            },
            _ => (limit, state.buckets.iter().sum(), None),
        };

        if current + cost <= applicable_limit {
            state.buckets[idx] += cost;
            if let Some(slot_idx) = slot_idx {
                state.dist_counters.as_mut().unwrap()[idx][slot_idx] += cost;
            }
            Verdict::Pass
        } else {
            Verdict::Drop
        }
    }
}
