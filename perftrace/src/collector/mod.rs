mod analysis;
pub use analysis::{N_PLUS_ONE_QUERY_THRESHOLD, SLOW_TRACE_THRESHOLD_MS};

mod store;
mod throttle;

use crate::clocks::{Clock, StdClock, Timestamp};
use crate::events::{CollectorEvent, Observers, SubscriptionId};
use crate::export::{export_traces, ExportError, ExportFormat};
use crate::id_generators::{FastrandIdGenerator, IdGenerator};
use crate::sampling::{Sampler, SamplingRate};
use crate::stats::{CollectorStats, DurationStats};
use crate::{Metadata, RecordSpanError, Span, SpanError, SpanId, SpanKind, Status, Timing, Trace, TraceId, TracingConfig};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use store::{TraceRecord, TraceStore};
use throttle::TokenBucket;

pub struct CollectorBuilder {
    config: TracingConfig,
    clock: Box<dyn Clock>,
    id_generator: Box<dyn IdGenerator>,
}

impl CollectorBuilder {
    pub fn new(config: TracingConfig) -> Self {
        Self{ config, clock: Box::new(StdClock), id_generator: Box::new(FastrandIdGenerator) }
    }

    pub fn clock(self, clock: impl Clock) -> Self {
        Self{ clock: Box::new(clock), ..self }
    }

    pub fn id_generator(self, id_generator: impl IdGenerator) -> Self {
        Self{ id_generator: Box::new(id_generator), ..self }
    }

    pub fn build(self) -> Collector {
        let now = self.clock.now();
        let throttle = self.config.sampling.max_traces_per_second
            .map(|capacity| TokenBucket::new(capacity, now));

        Collector{
            sampling_rate: SamplingRate::new(self.config.sampling.rate),
            config: self.config,
            clock: self.clock,
            id_generator: self.id_generator,
            state: Mutex::new(CollectorState{ store: TraceStore::default(), throttle }),
            observers: Mutex::new(Observers::default()),
        }
    }
}

struct CollectorState {
    store: TraceStore,
    throttle: Option<TokenBucket>,
}

/// Counts used by the adaptive sampler, see [`Collector::summarize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceSummary {
    pub retained: usize,
    pub started_since: usize,
    pub errored: usize,
}

/// In-memory trace collector.
///
/// All methods take `&self` and serialize on one internal lock, so a
/// collector is shared as `Arc<Collector>` between instrumentation layers,
/// the adaptive sampler and readers. Events are dispatched after the lock is
/// released, in the order the operations were called; observers may call
/// back into the collector.
///
/// Operations on unknown or already finished ids are silent no-ops.
pub struct Collector {
    config: TracingConfig,
    clock: Box<dyn Clock>,
    id_generator: Box<dyn IdGenerator>,
    // NOTE read by the start_trace gate, written by the adaptive sampler
    sampling_rate: SamplingRate,
    state: Mutex<CollectorState>,
    observers: Mutex<Observers>,
}

impl Collector {
    pub fn new(config: TracingConfig) -> Self {
        CollectorBuilder::new(config).build()
    }

    pub fn builder(config: TracingConfig) -> CollectorBuilder {
        CollectorBuilder::new(config)
    }

    pub fn config(&self) -> &TracingConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn sampling_rate(&self) -> SamplingRate {
        self.sampling_rate.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_observers(&self) -> MutexGuard<'_, Observers> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ++++++++++++++++++++ events ++++++++++++++++++++

    pub fn subscribe(&self, observer: impl Fn(&CollectorEvent) + Send + Sync + 'static) -> SubscriptionId {
        self.lock_observers().add(std::sync::Arc::new(observer))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock_observers().remove(id)
    }

    fn emit(&self, events: impl IntoIterator<Item = CollectorEvent>) {
        let observers = self.lock_observers().snapshot();
        if observers.is_empty() { return }
        for event in events {
            for observer in &observers {
                observer(&event);
            }
        }
    }

    // ++++++++++++++++++++ lifecycle ++++++++++++++++++++

    /// Starts a trace unless tracing is disabled, the sampling draw fails or
    /// the per-second throttle is exhausted; all three yield `None`.
    pub fn start_trace(&self, name: impl Into<String>, metadata: Metadata) -> Option<Trace> {
        if !self.config.enabled { return None }
        if !self.sampling_rate.should_sample() { return None }

        let now = self.clock.now();
        let trace = {
            let mut state = self.lock_state();
            if let Some(throttle) = state.throttle.as_mut() {
                if !throttle.try_acquire(now) {
                    #[cfg(feature = "log")]
                    log::debug!("trace throttled: max traces per second reached");
                    return None
                }
            }

            let (trace_id, root_span_id) = self.id_generator.trace_ids();
            let record = TraceRecord::new(trace_id, name.into(), Timing::started(now), metadata, root_span_id);
            let trace = state.store.snapshot(&record);
            state.store.insert_trace(record);
            trace
        };

        #[cfg(feature = "log")]
        log::debug!("trace started: {} ({})", trace.name, trace.id);
        self.emit([CollectorEvent::TraceStarted(trace.clone())]);
        Some(trace)
    }

    /// `parent_id` may name another span or be `None`; unparented spans are
    /// children of the trace's `root_span_id`.
    pub fn start_span(&self,
        trace_id: TraceId,
        name: impl Into<String>,
        kind: SpanKind,
        parent_id: Option<SpanId>,
        metadata: Metadata,
    ) -> Option<Span> {
        let now = self.clock.now();
        let span = {
            let mut state = self.lock_state();
            state.store.trace(trace_id)?;

            let span = Span{
                id: self.id_generator.span_id(),
                trace_id,
                parent_id,
                name: name.into(),
                kind,
                timing: Timing::started(now),
                status: Status::Pending,
                metadata,
                tags: vec![],
                errors: vec![],
            };
            state.store.push_span(span.clone());
            span
        };

        self.emit([CollectorEvent::SpanStarted(span.clone())]);
        Some(span)
    }

    /// Finishes an active span. Only the first call for a span has any effect.
    pub fn complete_span(&self, span_id: SpanId, status: Status, metadata: Option<Metadata>) {
        let now = self.clock.now();
        let span = {
            let mut state = self.lock_state();
            let Some(span) = state.store.active_span_mut(span_id) else { return };
            span.timing.close(now);
            span.status = status;
            if let Some(metadata) = metadata {
                span.metadata.extend(metadata);
            }
            let span = span.clone();
            state.store.deactivate(span_id);
            span
        };

        self.emit([CollectorEvent::SpanCompleted(span)]);
    }

    /// Records an error on a still active span and marks it as failed.
    pub fn add_span_error(&self, span_id: SpanId, error: impl Into<SpanError>) {
        let mut state = self.lock_state();
        let Some(span) = state.store.active_span_mut(span_id) else { return };
        span.errors.push(error.into());
        span.status = Status::Error;
    }

    pub fn add_span_tags<S: Into<String>>(&self, span_id: SpanId, tags: impl IntoIterator<Item = S>) {
        let mut state = self.lock_state();
        let Some(span) = state.store.active_span_mut(span_id) else { return };
        span.tags.extend(tags.into_iter().map(Into::into));
    }

    /// Finishes a trace. Traces shorter than `filters.min_duration` are
    /// dropped on the spot without any event; all others are announced and
    /// then checked for performance issues.
    ///
    /// Spans of the trace that are still pending stay pending.
    pub fn complete_trace(&self, trace_id: TraceId, status: Status) {
        let now = self.clock.now();
        let trace = {
            let mut state = self.lock_state();
            let Some(record) = state.store.trace_mut(trace_id) else { return };
            if record.timing.end.is_some() { return }

            let duration = record.timing.close(now);
            record.status = status;

            if let Some(min_duration) = self.config.filters.min_duration {
                if duration < min_duration {
                    state.store.remove_trace(trace_id);
                    #[cfg(feature = "log")]
                    log::debug!("trace {trace_id} discarded: {duration:.3}ms below minimum of {min_duration}ms");
                    return
                }
            }

            let Some(trace) = state.store.snapshot_by_id(trace_id) else { return };
            trace
        };

        let issues = analysis::detect_issues(&trace, now);
        #[cfg(feature = "log")]
        for issue in &issues {
            log::warn!("performance issue ({}): {}", issue.kind.as_str(), issue.message);
        }

        let mut events = Vec::with_capacity(1 + issues.len());
        events.push(CollectorEvent::TraceCompleted(trace));
        events.extend(issues.into_iter().map(CollectorEvent::PerformanceIssue));
        self.emit(events);
    }

    // ++++++++++++++++++++ traced operations ++++++++++++++++++++

    /// Runs `f` inside a new span of `trace_id`.
    ///
    /// `f` receives the span id (`None` when the trace is unknown) to parent
    /// nested spans. An `Err` is attached to the span, the span is completed
    /// as failed, and the error is returned exactly as `f` produced it.
    ///
    /// Only the span is marked. The trace keeps its status until the caller
    /// passes one to [`Collector::complete_trace`], typically `Status::Error`
    /// after propagating the returned error.
    pub fn in_span<T, E, F>(&self,
        trace_id: TraceId,
        name: impl Into<String>,
        kind: SpanKind,
        parent_id: Option<SpanId>,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Option<SpanId>) -> Result<T, E>,
        E: std::error::Error,
    {
        let span_id = self.start_span(trace_id, name, kind, parent_id, Metadata::new()).map(|s| s.id);
        let result = f(span_id);
        match span_id {
            Some(span_id) => self.finish_traced(span_id, result),
            None => result,
        }
    }

    /// Async variant of [`Collector::in_span`]. The span stays active while
    /// the future is suspended, so its duration is wall time, not CPU time.
    pub async fn in_span_async<T, E, F, Fut>(&self,
        trace_id: TraceId,
        name: impl Into<String>,
        kind: SpanKind,
        parent_id: Option<SpanId>,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Option<SpanId>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        let span_id = self.start_span(trace_id, name, kind, parent_id, Metadata::new()).map(|s| s.id);
        let result = f(span_id).await;
        match span_id {
            Some(span_id) => self.finish_traced(span_id, result),
            None => result,
        }
    }

    fn finish_traced<T, E: std::error::Error>(&self, span_id: SpanId, result: Result<T, E>) -> Result<T, E> {
        let status = if result.is_ok() { Status::Success } else { Status::Error };
        let result = result.record_span_error(self, span_id);
        self.complete_span(span_id, status, None);
        result
    }

    // ++++++++++++++++++++ reads ++++++++++++++++++++

    /// Every retained trace in arrival order.
    pub fn get_all_traces(&self) -> Vec<Trace> {
        let state = self.lock_state();
        state.store.records().map(|record| state.store.snapshot(record)).collect()
    }

    pub fn get_trace(&self, trace_id: TraceId) -> Option<Trace> {
        self.lock_state().store.snapshot_by_id(trace_id)
    }

    /// Traces whose start wall-clock time lies in `start_ms..=end_ms`.
    pub fn get_traces_by_time_range(&self, start_ms: u64, end_ms: u64) -> Vec<Trace> {
        let state = self.lock_state();
        state.store.records()
            .filter(|record| (start_ms..=end_ms).contains(&record.timing.start.wall_ms))
            .map(|record| state.store.snapshot(record))
            .collect()
    }

    /// Up to `limit` traces, newest first.
    pub fn recent_traces(&self, limit: usize) -> Vec<Trace> {
        let state = self.lock_state();
        state.store.records().rev()
            .take(limit)
            .map(|record| state.store.snapshot(record))
            .collect()
    }

    pub fn trace_count(&self) -> usize {
        self.lock_state().store.len()
    }

    pub fn active_span_count(&self) -> usize {
        self.lock_state().store.active_count()
    }

    /// Retained traces, how many started at or after `since_wall_ms`, and how
    /// many ended with status error.
    pub fn summarize(&self, since_wall_ms: u64) -> TraceSummary {
        let state = self.lock_state();
        let mut summary = TraceSummary{ retained: state.store.len(), ..Default::default() };
        for record in state.store.records() {
            if record.timing.start.wall_ms >= since_wall_ms {
                summary.started_since += 1;
            }
            if record.status == Status::Error {
                summary.errored += 1;
            }
        }
        summary
    }

    /// Duration statistics over all retained traces and all of their spans.
    /// Only finished traces and spans have a duration and contribute.
    pub fn get_stats(&self) -> CollectorStats {
        let state = self.lock_state();
        let store = &state.store;
        CollectorStats{
            traces: DurationStats::from_durations(
                store.records().filter_map(|record| record.timing.duration)
            ),
            spans: DurationStats::from_durations(
                store.records()
                    .flat_map(|record| store.spans_of(record))
                    .filter_map(|span| span.timing.duration)
            ),
        }
    }

    // ++++++++++++++++++++ maintenance ++++++++++++++++++++

    /// Drops every trace that started more than `max_age` ago by the wall
    /// clock, finished or not. Returns the number of traces removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let max_age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        let cutoff = self.clock.now().wall_ms.saturating_sub(max_age_ms);
        let removed = self.lock_state().store
            .remove_where(|record| record.timing.start.wall_ms < cutoff);

        #[cfg(feature = "log")]
        if removed > 0 {
            log::debug!("cleanup removed {removed} traces older than {max_age:?}");
        }
        removed
    }

    pub fn export(&self, format: ExportFormat) -> Result<String, ExportError> {
        export_traces(&self.get_all_traces(), format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata, FilterConfig, IssueKind, IssueSeverity, SamplingConfig, TestClock, TestIdGenerator};
    use std::sync::{Arc, Mutex};

    fn collector_with(config: TracingConfig) -> (Collector, TestClock) {
        let clock = TestClock::default();
        let collector = Collector::builder(config)
            .clock(clock.clone())
            .id_generator(TestIdGenerator::default())
            .build();
        (collector, clock)
    }

    fn record_events(collector: &Collector) -> Arc<Mutex<Vec<CollectorEvent>>> {
        let events = Arc::new(Mutex::new(vec![]));
        let sink = events.clone();
        collector.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        events
    }

    fn names(events: &Mutex<Vec<CollectorEvent>>) -> Vec<&'static str> {
        events.lock().unwrap().iter().map(|e| e.name()).collect()
    }

    #[test]
    fn sampling_rate_zero_rejects_every_trace() {
        let config = TracingConfig::default().sampling(SamplingConfig::default().rate(0.0));
        let (collector, _) = collector_with(config);
        for _ in 0..200 {
            assert!(collector.start_trace("t", Metadata::new()).is_none());
        }
        assert_eq!(collector.trace_count(), 0);
    }

    #[test]
    fn sampling_rate_one_accepts_every_trace() {
        let (collector, _) = collector_with(TracingConfig::default());
        for _ in 0..200 {
            assert!(collector.start_trace("t", Metadata::new()).is_some());
        }
        assert_eq!(collector.trace_count(), 200);
    }

    #[test]
    fn disabled_collector_records_nothing() {
        let (collector, _) = collector_with(TracingConfig::default().enabled(false));
        let events = record_events(&collector);
        assert!(collector.start_trace("t", Metadata::new()).is_none());
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn throttle_caps_traces_per_second() {
        let config = TracingConfig::default()
            .sampling(SamplingConfig::default().max_traces_per_second(3));
        let (collector, clock) = collector_with(config);

        let accepted = (0..5).filter(|_| collector.start_trace("t", Metadata::new()).is_some()).count();
        assert_eq!(accepted, 3);

        clock.advance_millis(999);
        assert!(collector.start_trace("t", Metadata::new()).is_none());
        clock.advance_millis(1);
        assert!(collector.start_trace("t", Metadata::new()).is_some());
    }

    #[test]
    fn new_trace_reserves_virtual_root() {
        let (collector, _) = collector_with(TracingConfig::default());
        let trace = collector.start_trace("checkout", metadata!{ "user" => "u1" }).unwrap();
        assert_eq!(trace.status, Status::Pending);
        assert!(trace.spans.is_empty());
        assert_ne!(trace.root_span_id.0.get(), 0);
        assert_eq!(trace.metadata["user"].as_str(), Some("u1"));

        let span = collector.start_span(trace.id, "load", SpanKind::FunctionCall, None, Metadata::new()).unwrap();
        assert_ne!(span.id, trace.root_span_id);
        assert_eq!(span.parent_id, None);
    }

    #[test]
    fn span_for_unknown_trace_is_none() {
        let (collector, clock) = collector_with(TracingConfig::default());
        let trace = collector.start_trace("t", Metadata::new()).unwrap();
        clock.advance_millis(1);
        assert_eq!(collector.cleanup(Duration::ZERO), 1);
        collector.complete_trace(trace.id, Status::Success);
        assert!(collector.start_span(trace.id, "s", SpanKind::Custom, None, Metadata::new()).is_none());

        let never_started = TraceId(std::num::NonZeroU128::new(999).unwrap());
        assert!(collector.start_span(never_started, "s", SpanKind::Custom, None, Metadata::new()).is_none());
        assert_eq!(collector.active_span_count(), 0);
    }

    #[test]
    fn first_completion_wins() {
        let (collector, clock) = collector_with(TracingConfig::default());
        let events = record_events(&collector);
        let trace = collector.start_trace("t", Metadata::new()).unwrap();
        let span = collector.start_span(trace.id, "s", SpanKind::HttpRequest, None, Metadata::new()).unwrap();

        clock.advance_millis(12);
        collector.complete_span(span.id, Status::Timeout, Some(metadata!{ "attempt" => 1 }));
        clock.advance_millis(30);
        collector.complete_span(span.id, Status::Success, Some(metadata!{ "attempt" => 2 }));

        let stored = collector.get_trace(trace.id).unwrap();
        let stored = stored.span(span.id).unwrap();
        assert_eq!(stored.status, Status::Timeout);
        assert_eq!(stored.duration(), Some(12.0));
        assert_eq!(stored.metadata["attempt"], 1.into());
        assert_eq!(collector.active_span_count(), 0);
        assert_eq!(names(&events), vec!["trace-started", "span-started", "span-completed"]);
    }

    #[test]
    fn span_errors_only_attach_while_active() {
        let (collector, _) = collector_with(TracingConfig::default());
        let trace = collector.start_trace("t", Metadata::new()).unwrap();
        let span = collector.start_span(trace.id, "s", SpanKind::DbQuery, None, Metadata::new()).unwrap();

        collector.add_span_error(span.id, "connection reset");
        assert_eq!(collector.get_trace(trace.id).unwrap().spans[0].status, Status::Error);

        collector.complete_span(span.id, Status::Error, None);
        collector.add_span_error(span.id, "too late");

        let stored = collector.get_trace(trace.id).unwrap();
        assert_eq!(stored.spans[0].errors.len(), 1);
        assert_eq!(stored.spans[0].errors[0].message, "connection reset");
    }

    #[test]
    fn tags_only_attach_while_active() {
        let (collector, _) = collector_with(TracingConfig::default());
        let trace = collector.start_trace("t", Metadata::new()).unwrap();
        let span = collector.start_span(trace.id, "s", SpanKind::HttpRequest, None, Metadata::new()).unwrap();

        collector.add_span_tags(span.id, ["retry", "cache-miss"]);
        collector.add_span_tags(span.id, vec![String::from("slow-path")]);
        collector.complete_span(span.id, Status::Success, None);
        collector.add_span_tags(span.id, ["too-late"]);

        let stored = collector.get_trace(trace.id).unwrap();
        assert_eq!(stored.spans[0].tags, ["retry", "cache-miss", "slow-path"]);
    }

    #[test]
    fn short_traces_are_dropped_silently() {
        let config = TracingConfig::default().filters(FilterConfig::default().min_duration(5.0));
        let (collector, clock) = collector_with(config);
        let events = record_events(&collector);

        let short = collector.start_trace("short", Metadata::new()).unwrap();
        clock.advance_millis(4);
        collector.complete_trace(short.id, Status::Success);

        let long = collector.start_trace("long", Metadata::new()).unwrap();
        clock.advance_millis(5);
        collector.complete_trace(long.id, Status::Success);

        let ids: Vec<_> = collector.get_all_traces().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![long.id]);
        assert_eq!(names(&events), vec!["trace-started", "trace-started", "trace-completed"]);
    }

    #[test]
    fn eleven_queries_raise_one_n_plus_one_issue() {
        let (collector, _) = collector_with(TracingConfig::default());
        let events = record_events(&collector);
        let trace = collector.start_trace("list orders", Metadata::new()).unwrap();
        let query_ids: Vec<_> = (0..11)
            .map(|i| collector.start_span(trace.id, format!("select {i}"), SpanKind::DbQuery, None, Metadata::new()).unwrap().id)
            .collect();
        collector.complete_trace(trace.id, Status::Success);

        let events = events.lock().unwrap();
        let issues: Vec<_> = events.iter().filter_map(|e| match e {
            CollectorEvent::PerformanceIssue(issue) => Some(issue),
            _ => None,
        }).collect();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::NPlusOne);
        assert_eq!(issues[0].severity, IssueSeverity::Medium);
        assert_eq!(issues[0].span_ids, query_ids);
    }

    #[test]
    fn ten_queries_are_not_an_issue() {
        let (collector, _) = collector_with(TracingConfig::default());
        let events = record_events(&collector);
        let trace = collector.start_trace("t", Metadata::new()).unwrap();
        for _ in 0..N_PLUS_ONE_QUERY_THRESHOLD {
            collector.start_span(trace.id, "q", SpanKind::DbQuery, None, Metadata::new());
        }
        collector.complete_trace(trace.id, Status::Success);
        assert!(!names(&events).contains(&"performance-issue"));
    }

    #[test]
    fn slow_trace_issue_references_every_span() {
        let (collector, clock) = collector_with(TracingConfig::default());
        let events = record_events(&collector);
        let trace = collector.start_trace("report", Metadata::new()).unwrap();
        let a = collector.start_span(trace.id, "a", SpanKind::Custom, None, Metadata::new()).unwrap();
        let b = collector.start_span(trace.id, "b", SpanKind::UiRender, Some(a.id), Metadata::new()).unwrap();
        clock.advance_millis(1001);
        collector.complete_trace(trace.id, Status::Success);

        let events = events.lock().unwrap();
        let Some(CollectorEvent::PerformanceIssue(issue)) = events.last() else {
            panic!("expected a performance issue, got {events:?}");
        };
        assert_eq!(issue.kind, IssueKind::SlowTrace);
        assert_eq!(issue.severity, IssueSeverity::High);
        assert_eq!(issue.span_ids, vec![a.id, b.id]);
        assert_eq!(events[events.len() - 2].name(), "trace-completed");
    }

    #[test]
    fn exactly_one_second_is_not_slow() {
        let (collector, clock) = collector_with(TracingConfig::default());
        let events = record_events(&collector);
        let trace = collector.start_trace("t", Metadata::new()).unwrap();
        clock.advance_millis(1000);
        collector.complete_trace(trace.id, Status::Success);
        assert_eq!(names(&events), vec!["trace-started", "trace-completed"]);
    }

    #[test]
    fn completing_a_trace_twice_changes_nothing() {
        let (collector, clock) = collector_with(TracingConfig::default());
        let events = record_events(&collector);
        let trace = collector.start_trace("t", Metadata::new()).unwrap();
        clock.advance_millis(10);
        collector.complete_trace(trace.id, Status::Success);
        clock.advance_millis(10);
        collector.complete_trace(trace.id, Status::Error);

        let stored = collector.get_trace(trace.id).unwrap();
        assert_eq!(stored.status, Status::Success);
        assert_eq!(stored.duration(), Some(10.0));
        assert_eq!(names(&events).iter().filter(|n| **n == "trace-completed").count(), 1);
    }

    #[test]
    fn time_range_filters_on_start_wall_clock() {
        let clock = TestClock::starting_at_wall_ms(10_000);
        let collector = Collector::builder(TracingConfig::default()).clock(clock.clone()).build();
        let first = collector.start_trace("first", Metadata::new()).unwrap();
        clock.advance_millis(100);
        let second = collector.start_trace("second", Metadata::new()).unwrap();
        clock.advance_millis(100);
        collector.start_trace("third", Metadata::new()).unwrap();

        let found: Vec<_> = collector.get_traces_by_time_range(10_000, 10_100).iter().map(|t| t.id).collect();
        assert_eq!(found, vec![first.id, second.id]);
        assert!(collector.get_traces_by_time_range(0, 9_999).is_empty());
    }

    #[test]
    fn cleanup_with_enormous_age_keeps_everything() {
        let (collector, clock) = collector_with(TracingConfig::default());
        collector.start_trace("t", Metadata::new()).unwrap();
        clock.advance_millis(1000);

        assert_eq!(collector.cleanup(Duration::from_secs(18_446_744_073_709_552)), 0);
        assert_eq!(collector.cleanup(Duration::MAX), 0);
        assert_eq!(collector.trace_count(), 1);
    }

    #[test]
    fn cleanup_removes_old_traces_even_when_pending() {
        let (collector, clock) = collector_with(TracingConfig::default());
        let old = collector.start_trace("old", Metadata::new()).unwrap();
        let leaked = collector.start_span(old.id, "never finished", SpanKind::Custom, None, Metadata::new()).unwrap();
        clock.advance_millis(60_000);
        let fresh = collector.start_trace("fresh", Metadata::new()).unwrap();

        assert_eq!(collector.cleanup(Duration::from_secs(30)), 1);
        assert!(collector.get_trace(old.id).is_none());
        assert!(collector.get_trace(fresh.id).is_some());
        assert_eq!(collector.active_span_count(), 0);

        // the leaked span is unknown now
        collector.complete_span(leaked.id, Status::Success, None);
        collector.complete_trace(old.id, Status::Success);
        assert_eq!(collector.trace_count(), 1);
    }

    #[test]
    fn stats_cover_finished_traces_and_spans() {
        let (collector, clock) = collector_with(TracingConfig::default());
        for ms in [10, 20, 30] {
            let trace = collector.start_trace("t", Metadata::new()).unwrap();
            let span = collector.start_span(trace.id, "s", SpanKind::Custom, None, Metadata::new()).unwrap();
            clock.advance_millis(ms);
            collector.complete_span(span.id, Status::Success, None);
            collector.complete_trace(trace.id, Status::Success);
        }
        collector.start_trace("still running", Metadata::new());

        let stats = collector.get_stats();
        assert_eq!(stats.traces.count, 3);
        assert_eq!(stats.traces.min, 10.0);
        assert_eq!(stats.traces.max, 30.0);
        assert_eq!(stats.traces.p50, 20.0);
        assert_eq!(stats.spans.count, 3);
        assert_eq!(stats.spans.avg, 20.0);
    }

    #[test]
    fn stats_of_empty_collector_are_zero() {
        let (collector, _) = collector_with(TracingConfig::default());
        assert_eq!(collector.get_stats(), CollectorStats::default());
    }

    #[test]
    fn json_export_lists_every_trace() {
        let (collector, _) = collector_with(TracingConfig::default());
        for name in ["a", "b", "c"] {
            collector.start_trace(name, Metadata::new());
        }
        let json = collector.export(ExportFormat::Json).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), collector.get_all_traces().len());
        assert_eq!(parsed[0]["name"], "a");
        assert_eq!(parsed[0]["status"], "pending");
    }

    #[test]
    fn csv_export_does_not_escape() {
        let (collector, clock) = collector_with(TracingConfig::default());
        let trace = collector.start_trace("GET /a,b", Metadata::new()).unwrap();
        collector.start_span(trace.id, "s", SpanKind::Custom, None, Metadata::new());
        clock.advance_millis(7);
        collector.complete_trace(trace.id, Status::Success);

        let csv = collector.export(ExportFormat::Csv).unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines[0], "traceId,name,duration,status,spanCount");
        assert_eq!(lines[1], format!("{},GET /a,b,7,success,1", trace.id));
    }

    #[derive(Debug, PartialEq)]
    struct PaymentDeclined;
    impl std::fmt::Display for PaymentDeclined {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("card declined") }
    }
    impl std::error::Error for PaymentDeclined {}

    #[test]
    fn in_span_returns_the_original_error() {
        let (collector, _) = collector_with(TracingConfig::default());
        let trace = collector.start_trace("checkout", Metadata::new()).unwrap();

        let result: Result<(), PaymentDeclined> = collector.in_span(trace.id, "charge", SpanKind::HttpRequest, None, |span| {
            assert!(span.is_some());
            Err(PaymentDeclined)
        });
        assert_eq!(result, Err(PaymentDeclined));

        let stored = collector.get_trace(trace.id).unwrap();
        assert_eq!(stored.spans[0].status, Status::Error);
        assert_eq!(stored.spans[0].errors[0].message, "card declined");
        assert_eq!(collector.active_span_count(), 0);
    }

    #[test]
    fn in_span_nests_through_the_span_id() {
        let (collector, _) = collector_with(TracingConfig::default());
        let trace = collector.start_trace("t", Metadata::new()).unwrap();
        let value: Result<u32, PaymentDeclined> = collector.in_span(trace.id, "outer", SpanKind::FunctionCall, None, |outer| {
            collector.in_span(trace.id, "inner", SpanKind::DbQuery, outer, |_| Ok(7))
        });
        assert_eq!(value, Ok(7));

        let stored = collector.get_trace(trace.id).unwrap();
        assert_eq!(stored.spans[1].parent_id, Some(stored.spans[0].id));
        assert!(stored.spans.iter().all(|s| s.status == Status::Success));
    }

    #[tokio::test]
    async fn in_span_async_measures_suspended_time() {
        let (collector, clock) = collector_with(TracingConfig::default());
        let trace = collector.start_trace("t", Metadata::new()).unwrap();
        let result: Result<&str, PaymentDeclined> = collector
            .in_span_async(trace.id, "fetch", SpanKind::HttpRequest, None, |_| async {
                clock.advance_millis(25);
                tokio::task::yield_now().await;
                Ok("body")
            })
            .await;
        assert_eq!(result, Ok("body"));
        assert_eq!(collector.get_trace(trace.id).unwrap().spans[0].duration(), Some(25.0));
    }

    #[test]
    fn observers_may_call_back_into_the_collector() {
        let collector = Arc::new(Collector::builder(TracingConfig::default()).clock(TestClock::default()).build());
        let seen = Arc::new(Mutex::new(0usize));
        let (weak, counter) = (Arc::downgrade(&collector), seen.clone());
        collector.subscribe(move |event| {
            if let (CollectorEvent::TraceCompleted(_), Some(collector)) = (event, weak.upgrade()) {
                *counter.lock().unwrap() = collector.trace_count();
            }
        });

        let trace = collector.start_trace("t", Metadata::new()).unwrap();
        collector.complete_trace(trace.id, Status::Success);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn unsubscribed_observer_stops_receiving() {
        let (collector, _) = collector_with(TracingConfig::default());
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let id = collector.subscribe(move |_| *c.lock().unwrap() += 1);
        collector.start_trace("t", Metadata::new());
        assert!(collector.unsubscribe(id));
        assert!(!collector.unsubscribe(id));
        collector.start_trace("t", Metadata::new());
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
