//! Three-phase latency tracking.
//!
//! Each logical operation is marked up to three times under one correlation
//! key: when it is issued, when its transport acknowledges it, and when the
//! result shows up on the event stream. Marks may arrive in any order. Once
//! all three exist the record is reported exactly once and forgotten.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// The operation was issued.
    Issue,
    /// The issuing transport confirmed it.
    Ack,
    /// The operation was observed on the event stream.
    Deliver,
}

/// Completed timing triple for one correlation key.
#[derive(Clone, Debug, PartialEq)]
pub struct LatencyRecord {
    pub key: String,
    /// `ack - issue`.
    pub ack: Duration,
    /// `deliver - issue`.
    pub deliver: Duration,
    pub completed_at: DateTime<Utc>,
}

impl LatencyRecord {
    /// `YYYY-MM-DD HH:MM:SS,<ack ms>,<deliver ms>`
    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{},{}",
            self.completed_at.format("%Y-%m-%d %H:%M:%S"),
            self.ack.as_millis(),
            self.deliver.as_millis()
        )
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct TimingRecord {
    issue: Option<Instant>,
    ack: Option<Instant>,
    deliver: Option<Instant>,
}

impl TimingRecord {
    fn set(&mut self, phase: Phase, at: Instant) {
        match phase {
            Phase::Issue => self.issue = Some(at),
            Phase::Ack => self.ack = Some(at),
            Phase::Deliver => self.deliver = Some(at),
        }
    }

    fn complete(&self) -> Option<(Instant, Instant, Instant)> {
        Some((self.issue?, self.ack?, self.deliver?))
    }
}

type Reporter = Box<dyn Fn(&LatencyRecord) + Send + Sync>;

struct Inner {
    records: Mutex<HashMap<String, TimingRecord>>,
    reporter: Option<Reporter>,
}

/// Cloneable handle to a shared timing table.
#[derive(Clone)]
pub struct LatencyHarness {
    inner: Arc<Inner>,
}

impl LatencyHarness {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a harness that hands every completed record to `reporter`.
    pub fn with_reporter<F>(reporter: F) -> Self
    where
        F: Fn(&LatencyRecord) + Send + Sync + 'static,
    {
        Self::build(Some(Box::new(reporter)))
    }

    fn build(reporter: Option<Reporter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(HashMap::new()),
                reporter,
            }),
        }
    }

    /// Marks `phase` for `key` now.
    pub fn mark(&self, key: &str, phase: Phase) -> Option<LatencyRecord> {
        self.mark_at(key, phase, Instant::now())
    }

    /// Marks `phase` for `key` at `at`. Returns the completed record when this
    /// mark was the last one missing.
    pub fn mark_at(&self, key: &str, phase: Phase, at: Instant) -> Option<LatencyRecord> {
        self.apply_mark(key, phase, at, true)
    }

    /// Marks `phase` only when `key` is already being tracked. Keys never
    /// issued here, or already reported, are ignored.
    pub fn mark_pending(&self, key: &str, phase: Phase) -> Option<LatencyRecord> {
        self.mark_pending_at(key, phase, Instant::now())
    }

    pub fn mark_pending_at(&self, key: &str, phase: Phase, at: Instant) -> Option<LatencyRecord> {
        self.apply_mark(key, phase, at, false)
    }

    fn apply_mark(
        &self,
        key: &str,
        phase: Phase,
        at: Instant,
        track_new: bool,
    ) -> Option<LatencyRecord> {
        let completed = {
            let mut records = self.lock();
            if !track_new && !records.contains_key(key) {
                debug!(event = "latency_mark_ignored", key, phase = ?phase);
                return None;
            }
            let record = records.entry(key.to_string()).or_default();
            record.set(phase, at);
            let complete = record.complete();
            if complete.is_some() {
                records.remove(key);
            }
            complete
        };

        let (issue, ack, deliver) = completed?;
        let record = LatencyRecord {
            key: key.to_string(),
            ack: ack.saturating_duration_since(issue),
            deliver: deliver.saturating_duration_since(issue),
            completed_at: Utc::now(),
        };
        debug!(
            event = "latency_complete",
            key,
            ack_ms = record.ack.as_millis() as u64,
            deliver_ms = record.deliver.as_millis() as u64
        );
        if let Some(reporter) = &self.inner.reporter {
            reporter(&record);
        }
        Some(record)
    }

    /// Drops whatever marks exist for `key`, for operations that will never
    /// complete.
    pub fn discard(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Number of keys still waiting for at least one phase.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TimingRecord>> {
        self.inner
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LatencyHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LatencyHarness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyHarness")
            .field("pending", &self.pending())
            .field("has_reporter", &self.inner.reporter.is_some())
            .finish()
    }
}
