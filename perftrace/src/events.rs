use crate::{Span, SpanId, Timestamp, Trace, TraceId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    SlowTrace,
    NPlusOne,
}

impl IssueKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SlowTrace => "slow_trace",
            Self::NPlusOne => "n_plus_one",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceIssue {
    pub kind: IssueKind,
    pub severity: IssueSeverity,
    pub trace_id: TraceId,
    pub message: String,
    pub span_ids: Vec<SpanId>,
    pub detected_at: Timestamp,
}

/// Everything the collector announces. Payloads are snapshots taken at the
/// moment of emission.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectorEvent {
    TraceStarted(Trace),
    SpanStarted(Span),
    SpanCompleted(Span),
    TraceCompleted(Trace),
    PerformanceIssue(PerformanceIssue),
}

impl CollectorEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TraceStarted(_) => "trace-started",
            Self::SpanStarted(_) => "span-started",
            Self::SpanCompleted(_) => "span-completed",
            Self::TraceCompleted(_) => "trace-completed",
            Self::PerformanceIssue(_) => "performance-issue",
        }
    }

    pub fn trace_id(&self) -> TraceId {
        match self {
            Self::TraceStarted(t) | Self::TraceCompleted(t) => t.id,
            Self::SpanStarted(s) | Self::SpanCompleted(s) => s.trace_id,
            Self::PerformanceIssue(i) => i.trace_id,
        }
    }
}

// ++++++++++++++++++++ observers ++++++++++++++++++++

pub type Observer = Arc<dyn Fn(&CollectorEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct Observers {
    next_id: u64,
    entries: Vec<(SubscriptionId, Observer)>,
}

impl Observers {
    pub(crate) fn add(&mut self, observer: Observer) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.entries.push((id, observer));
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Registration order. Cloned so callbacks run without any lock held.
    pub(crate) fn snapshot(&self) -> Vec<Observer> {
        self.entries.iter().map(|(_, o)| o.clone()).collect()
    }
}
