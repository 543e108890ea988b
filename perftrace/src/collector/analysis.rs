use crate::{IssueKind, IssueSeverity, PerformanceIssue, SpanKind, Timestamp, Trace};

pub const SLOW_TRACE_THRESHOLD_MS: f64 = 1000.0;
pub const N_PLUS_ONE_QUERY_THRESHOLD: usize = 10;

/// Heuristic checks run on every trace that survives completion.
pub(crate) fn detect_issues(trace: &Trace, detected_at: Timestamp) -> Vec<PerformanceIssue> {
    let mut issues = vec![];

    if let Some(duration) = trace.duration() {
        if duration > SLOW_TRACE_THRESHOLD_MS {
            issues.push(PerformanceIssue{
                kind: IssueKind::SlowTrace,
                severity: IssueSeverity::High,
                trace_id: trace.id,
                message: format!("trace `{}` took {duration:.1}ms (threshold {SLOW_TRACE_THRESHOLD_MS}ms)", trace.name),
                span_ids: trace.spans.iter().map(|s| s.id).collect(),
                detected_at,
            });
        }
    }

    let queries: Vec<_> = trace.spans_of_kind(SpanKind::DbQuery).map(|s| s.id).collect();
    if queries.len() > N_PLUS_ONE_QUERY_THRESHOLD {
        issues.push(PerformanceIssue{
            kind: IssueKind::NPlusOne,
            severity: IssueSeverity::Medium,
            trace_id: trace.id,
            message: format!("possible N+1 query pattern: {} database queries in trace `{}`", queries.len(), trace.name),
            span_ids: queries,
            detected_at,
        });
    }

    issues
}
