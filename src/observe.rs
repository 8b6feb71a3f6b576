//! Resolution telemetry: counters, duration histogram, and the event timeline.
//!
//! Metrics and the timeline are in-process structures gated by runtime
//! config flags. Structured log emits ride the `logging` cargo feature, the
//! same way the rest of the crate logs.

use crate::context::TraceId;
use crate::definition::Lifetime;
use crate::trace::{Outcome, Stage};
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Histogram bucket upper bounds, in milliseconds.
const DURATION_BUCKETS_MS: [f64; 8] = [0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 25.0, 100.0];

/// Fixed-bucket duration histogram.
#[derive(Debug, Clone, Default)]
pub struct DurationStats {
    pub count: u64,
    pub total_ms: f64,
    pub max_ms: f64,
    /// One slot per bound in `DURATION_BUCKETS_MS`, plus overflow.
    pub buckets: [u64; DURATION_BUCKETS_MS.len() + 1],
}

impl DurationStats {
    fn record(&mut self, duration_ms: f64) {
        self.count += 1;
        self.total_ms += duration_ms;
        if duration_ms > self.max_ms {
            self.max_ms = duration_ms;
        }
        let slot = DURATION_BUCKETS_MS
            .iter()
            .position(|bound| duration_ms <= *bound)
            .unwrap_or(DURATION_BUCKETS_MS.len());
        self.buckets[slot] += 1;
    }

    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

/// In-process metric store.
pub struct Metrics {
    /// "resolutions_total" keyed by (identifier, lifetime).
    resolutions: DashMap<(String, &'static str), u64, RandomState>,
    /// "resolution_duration_ms" keyed by identifier.
    durations: DashMap<String, DurationStats, RandomState>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            resolutions: DashMap::with_hasher(RandomState::new()),
            durations: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn record_resolution(&self, identifier: &str, lifetime: Lifetime, duration_ms: f64) {
        *self
            .resolutions
            .entry((identifier.to_string(), lifetime.as_str()))
            .or_insert(0) += 1;
        self.durations
            .entry(identifier.to_string())
            .or_default()
            .record(duration_ms);
    }

    pub fn resolutions_total(&self, identifier: &str, lifetime: Lifetime) -> u64 {
        self.resolutions
            .get(&(identifier.to_string(), lifetime.as_str()))
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }

    pub fn duration_stats(&self, identifier: &str) -> Option<DurationStats> {
        self.durations
            .get(identifier)
            .map(|entry| entry.value().clone())
    }

    pub fn clear(&self) {
        self.resolutions.clear();
        self.durations.clear();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("series", &self.resolutions.len())
            .finish()
    }
}

/// Step lifecycle phase of a telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    Started,
    Succeeded,
    Failed,
}

impl StepPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepPhase::Started => "started",
            StepPhase::Succeeded => "succeeded",
            StepPhase::Failed => "failed",
        }
    }
}

/// One timeline event.
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    pub phase: StepPhase,
    pub stage: Stage,
    pub outcome: Option<Outcome>,
    pub identifier: String,
    pub duration_ms: Option<f64>,
    pub trace_id: TraceId,
    pub at: SystemTime,
}

/// Append-only event timeline.
pub struct Timeline {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, event: TelemetryEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn snapshot(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

/// The sink the engine and pipeline report into.
pub struct Observer {
    metrics_enabled: AtomicBool,
    tracing_enabled: AtomicBool,
    metrics: Arc<Metrics>,
    timeline: Arc<Timeline>,
}

impl Observer {
    pub fn new(metrics_enabled: bool, tracing_enabled: bool) -> Self {
        Self {
            metrics_enabled: AtomicBool::new(metrics_enabled),
            tracing_enabled: AtomicBool::new(tracing_enabled),
            metrics: Arc::new(Metrics::new()),
            timeline: Arc::new(Timeline::new()),
        }
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    #[inline]
    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    pub fn step_started(&self, stage: Stage, identifier: &str, trace_id: TraceId) {
        #[cfg(feature = "logging")]
        trace!(
            target: "keystone_di",
            stage = stage.as_str(),
            service = identifier,
            trace_id = trace_id.id(),
            "Stage started"
        );

        if self.tracing_enabled.load(Ordering::Relaxed) {
            self.timeline.push(TelemetryEvent {
                phase: StepPhase::Started,
                stage,
                outcome: None,
                identifier: identifier.to_string(),
                duration_ms: None,
                trace_id,
                at: SystemTime::now(),
            });
        }
    }

    pub fn step_succeeded(
        &self,
        stage: Stage,
        outcome: Outcome,
        identifier: &str,
        duration_ms: f64,
        trace_id: TraceId,
    ) {
        #[cfg(feature = "logging")]
        trace!(
            target: "keystone_di",
            stage = stage.as_str(),
            outcome = outcome.as_str(),
            service = identifier,
            duration_ms = duration_ms,
            trace_id = trace_id.id(),
            "Stage succeeded"
        );

        if self.tracing_enabled.load(Ordering::Relaxed) {
            self.timeline.push(TelemetryEvent {
                phase: StepPhase::Succeeded,
                stage,
                outcome: Some(outcome),
                identifier: identifier.to_string(),
                duration_ms: Some(duration_ms),
                trace_id,
                at: SystemTime::now(),
            });
        }
    }

    pub fn step_failed(
        &self,
        stage: Stage,
        identifier: &str,
        duration_ms: f64,
        trace_id: TraceId,
    ) {
        #[cfg(feature = "logging")]
        debug!(
            target: "keystone_di",
            stage = stage.as_str(),
            service = identifier,
            duration_ms = duration_ms,
            trace_id = trace_id.id(),
            "Stage failed"
        );

        if self.tracing_enabled.load(Ordering::Relaxed) {
            self.timeline.push(TelemetryEvent {
                phase: StepPhase::Failed,
                stage,
                outcome: Some(Outcome::Failure),
                identifier: identifier.to_string(),
                duration_ms: Some(duration_ms),
                trace_id,
                at: SystemTime::now(),
            });
        }
    }

    /// Record a completed resolution against the counters and histogram.
    pub fn resolution_finished(&self, identifier: &str, lifetime: Lifetime, duration_ms: f64) {
        if self.metrics_enabled.load(Ordering::Relaxed) {
            self.metrics
                .record_resolution(identifier, lifetime, duration_ms);
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("metrics_enabled", &self.metrics_enabled.load(Ordering::Relaxed))
            .field("tracing_enabled", &self.tracing_enabled.load(Ordering::Relaxed))
            .field("timeline_events", &self.timeline.len())
            .finish()
    }
}
