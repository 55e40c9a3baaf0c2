//! Multi-window rate limiting with wall-clock-bucketed counters.
//!
//! Four windows (second/minute/hour/day) are enforced per
//! `(subject, service)` pair, and three aggregate windows (minute/hour/day)
//! per subject across all services. Windows are bucketed by calendar
//! boundaries, not a true rolling window, so the retry hints are fixed
//! conservative values per granularity.
//!
//! Admission ([`RateLimiter::check_and_reserve`]) is read-only; counters are
//! incremented via [`RateLimiter::record_usage`] after the provider call was
//! attempted, regardless of its outcome — a failed call still consumed
//! provider-side capacity.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Scope string for the per-subject aggregate windows.
const AGGREGATE_SCOPE: &str = "aggregate";

/// How long counter buckets are kept before the sweep removes them.
const BUCKET_RETENTION_HOURS: i64 = 24;

/// Time source abstraction so bucket boundaries are testable.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Controllable clock for window-boundary tests.
#[derive(Debug)]
pub struct MockClock {
    now: Mutex<DateTime<Utc>>,
}

impl MockClock {
    /// Clock pinned to `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    /// Advance the clock by `seconds`.
    pub fn advance_secs(&self, seconds: i64) {
        *self.now.lock() += ChronoDuration::seconds(seconds);
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Window granularities, ordered narrowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowGranularity {
    /// Calendar second
    Second,
    /// Calendar minute
    Minute,
    /// Calendar hour
    Hour,
    /// Calendar day
    Day,
}

impl WindowGranularity {
    /// Window length in seconds.
    fn bucket_secs(self) -> i64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 3600,
            Self::Day => 86_400,
        }
    }

    /// Bucket index for a timestamp: seconds since epoch divided by the
    /// window length, so boundaries fall on calendar edges.
    fn bucket(self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(self.bucket_secs())
    }

    /// Conservative fixed retry hint for a violation of this window.
    /// Not time-to-reset: buckets are wall-clock aligned.
    pub fn retry_after_secs(self) -> u64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 300,
            Self::Day => 3600,
        }
    }
}

/// Whether a window counts one service or the subject's aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitScope {
    /// Per `(subject, service)` window
    Service(String),
    /// Per-subject window across all services
    Subject,
}

/// Counter identity: one bucket of one window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// Who is making calls
    pub subject: String,
    /// Service name, or the aggregate scope
    pub scope: String,
    /// Window granularity
    pub granularity: WindowGranularity,
    /// Wall-clock bucket index
    pub bucket: i64,
}

/// Storage for window counters.
///
/// Injected rather than global so a multi-instance deployment can plug in an
/// external atomic-increment store; the in-process default is
/// [`InMemoryCounterStore`]. An absent counter reads as zero.
pub trait RateCounterStore: Send + Sync {
    /// Current count for a bucket; zero when absent.
    fn count(&self, key: &CounterKey) -> u64;
    /// Atomically increment a bucket, stamping `now` as last touched.
    fn increment(&self, key: &CounterKey, now: DateTime<Utc>);
    /// Remove buckets not touched since `cutoff`; returns how many.
    fn sweep(&self, cutoff: DateTime<Utc>) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    last_touched: DateTime<Utc>,
}

/// Concurrent-map counter store for single-instance deployments.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: DashMap<CounterKey, CounterEntry>,
}

impl InMemoryCounterStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateCounterStore for InMemoryCounterStore {
    fn count(&self, key: &CounterKey) -> u64 {
        self.counters.get(key).map_or(0, |entry| entry.count)
    }

    fn increment(&self, key: &CounterKey, now: DateTime<Utc>) {
        self.counters
            .entry(key.clone())
            .and_modify(|entry| {
                entry.count += 1;
                entry.last_touched = now;
            })
            .or_insert(CounterEntry { count: 1, last_touched: now });
    }

    fn sweep(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, entry| entry.last_touched >= cutoff);
        before - self.counters.len()
    }
}

/// Per-service window limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceLimits {
    /// Calls per calendar second
    pub per_second: u64,
    /// Calls per calendar minute
    pub per_minute: u64,
    /// Calls per calendar hour
    pub per_hour: u64,
    /// Calls per calendar day
    pub per_day: u64,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self { per_second: 10, per_minute: 100, per_hour: 1_000, per_day: 10_000 }
    }
}

/// Per-subject aggregate limits across all services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubjectLimits {
    /// Calls per calendar minute
    pub per_minute: u64,
    /// Calls per calendar hour
    pub per_hour: u64,
    /// Calls per calendar day
    pub per_day: u64,
}

impl Default for SubjectLimits {
    fn default() -> Self {
        Self { per_minute: 200, per_hour: 2_000, per_day: 20_000 }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitDecision {
    /// Proceed with the call
    Admit,
    /// Do not call the provider
    Reject {
        /// Conservative wait hint derived from the violated window
        retry_after_secs: u64,
        /// Which scope was violated
        scope: LimitScope,
        /// Which window was violated
        granularity: WindowGranularity,
    },
}

impl LimitDecision {
    /// Whether the call may proceed.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit)
    }
}

/// Multi-window limiter over an injected counter store.
pub struct RateLimiter {
    store: Arc<dyn RateCounterStore>,
    clock: Arc<dyn Clock>,
    service_limits: ServiceLimits,
    subject_limits: SubjectLimits,
}

impl RateLimiter {
    /// Limiter with the given store and limits, on the system clock.
    pub fn new(
        store: Arc<dyn RateCounterStore>,
        service_limits: ServiceLimits,
        subject_limits: SubjectLimits,
    ) -> Self {
        Self::with_clock(store, service_limits, subject_limits, Arc::new(SystemClock))
    }

    /// Limiter with an explicit clock.
    pub fn with_clock(
        store: Arc<dyn RateCounterStore>,
        service_limits: ServiceLimits,
        subject_limits: SubjectLimits,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, clock, service_limits, subject_limits }
    }

    /// Read-only admission check for one outbound call.
    ///
    /// When several windows are violated at once, the one with the smallest
    /// remaining capacity (most over limit) is reported.
    pub fn check_and_reserve(&self, subject: &str, service: &str) -> LimitDecision {
        let now = self.clock.now();
        let mut worst: Option<(i64, LimitScope, WindowGranularity)> = None;

        for (scope, granularity, limit) in self.windows(service) {
            let scope_name = match &scope {
                LimitScope::Service(name) => name.clone(),
                LimitScope::Subject => AGGREGATE_SCOPE.to_string(),
            };
            let key = CounterKey {
                subject: subject.to_string(),
                scope: scope_name,
                granularity,
                bucket: granularity.bucket(now),
            };
            let count = self.store.count(&key);
            if count >= limit {
                let remaining = limit as i64 - count as i64;
                let is_worse = worst.as_ref().map_or(true, |(r, _, _)| remaining < *r);
                if is_worse {
                    worst = Some((remaining, scope, granularity));
                }
            }
        }

        match worst {
            None => LimitDecision::Admit,
            Some((remaining, scope, granularity)) => {
                debug!(
                    subject,
                    service,
                    ?granularity,
                    remaining,
                    "rate limit rejection"
                );
                LimitDecision::Reject {
                    retry_after_secs: granularity.retry_after_secs(),
                    scope,
                    granularity,
                }
            }
        }
    }

    /// Record one attempted call in every window.
    ///
    /// Called after the provider call regardless of outcome.
    pub fn record_usage(&self, subject: &str, service: &str) {
        let now = self.clock.now();
        for (scope, granularity, _) in self.windows(service) {
            let scope_name = match scope {
                LimitScope::Service(name) => name,
                LimitScope::Subject => AGGREGATE_SCOPE.to_string(),
            };
            let key = CounterKey {
                subject: subject.to_string(),
                scope: scope_name,
                granularity,
                bucket: granularity.bucket(now),
            };
            self.store.increment(&key, now);
        }
    }

    /// Purge counter buckets older than the retention window.
    pub fn sweep(&self) -> usize {
        let cutoff = self.clock.now() - ChronoDuration::hours(BUCKET_RETENTION_HOURS);
        let removed = self.store.sweep(cutoff);
        if removed > 0 {
            debug!(removed, "swept stale rate-limit buckets");
        }
        removed
    }

    /// The seven windows checked for a call: four per service, three per
    /// subject in aggregate. Ordered narrowest first within each scope.
    fn windows(&self, service: &str) -> Vec<(LimitScope, WindowGranularity, u64)> {
        vec![
            (
                LimitScope::Service(service.to_string()),
                WindowGranularity::Second,
                self.service_limits.per_second,
            ),
            (
                LimitScope::Service(service.to_string()),
                WindowGranularity::Minute,
                self.service_limits.per_minute,
            ),
            (
                LimitScope::Service(service.to_string()),
                WindowGranularity::Hour,
                self.service_limits.per_hour,
            ),
            (
                LimitScope::Service(service.to_string()),
                WindowGranularity::Day,
                self.service_limits.per_day,
            ),
            (LimitScope::Subject, WindowGranularity::Minute, self.subject_limits.per_minute),
            (LimitScope::Subject, WindowGranularity::Hour, self.subject_limits.per_hour),
            (LimitScope::Subject, WindowGranularity::Day, self.subject_limits.per_day),
        ]
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("service_limits", &self.service_limits)
            .field("subject_limits", &self.subject_limits)
            .finish_non_exhaustive()
    }
}
