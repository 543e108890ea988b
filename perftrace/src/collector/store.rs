use crate::{Metadata, Span, SpanId, Status, Timing, Trace, TraceId};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SpanSlot(u32);

/// A stored trace. Spans live in the store's arena and are referenced by slot.
pub(crate) struct TraceRecord {
    pub id: TraceId,
    pub name: String,
    pub timing: Timing,
    pub status: Status,
    pub metadata: Metadata,
    pub root_span_id: SpanId,
    span_slots: Vec<SpanSlot>,
}

impl TraceRecord {
    pub fn new(id: TraceId, name: String, timing: Timing, metadata: Metadata, root_span_id: SpanId) -> Self {
        Self{ id, name, timing, status: Status::Pending, metadata, root_span_id, span_slots: vec![] }
    }
}

/// In-memory trace store.
///
/// Traces are kept in arrival order. Spans are allocated in an arena of
/// reusable slots; a trace owns the ordered list of its slots, and `active`
/// only maps ids of pending spans to their slot for lookup.
#[derive(Default)]
pub(crate) struct TraceStore {
    next_seq: u64,
    traces: BTreeMap<u64, TraceRecord>,
    trace_index: HashMap<TraceId, u64>,
    spans: Vec<Option<Span>>,
    free_indices: Vec<u32>,
    active: HashMap<SpanId, SpanSlot>,
}

impl TraceStore {
    pub fn insert_trace(&mut self, record: TraceRecord) {
        let seq = self.next_seq;
        self.next_seq += 1;
        // NOTE an id collision replaces the older trace
        if let Some(old_seq) = self.trace_index.insert(record.id, seq) {
            if let Some(old) = self.traces.remove(&old_seq) {
                self.release_slots(&old);
            }
        }
        self.traces.insert(seq, record);
    }

    pub fn trace(&self, id: TraceId) -> Option<&TraceRecord> {
        self.traces.get(self.trace_index.get(&id)?)
    }

    pub fn trace_mut(&mut self, id: TraceId) -> Option<&mut TraceRecord> {
        self.traces.get_mut(self.trace_index.get(&id)?)
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn records(&self) -> impl DoubleEndedIterator<Item = &TraceRecord> + '_ {
        self.traces.values()
    }

    /// Appends `span` to its trace and marks it active.
    /// Returns `false` without storing anything if the trace is unknown.
    pub fn push_span(&mut self, span: Span) -> bool {
        let Some(&seq) = self.trace_index.get(&span.trace_id) else { return false };

        let idx = match self.free_indices.pop() {
            Some(idx) => idx,
            None => {
                self.spans.push(None);
                self.spans.len() as u32 - 1
            }
        };
        let slot = SpanSlot(idx);

        debug_assert!(self.spans[idx as usize].is_none());
        self.active.insert(span.id, slot);
        self.spans[idx as usize] = Some(span);
        if let Some(record) = self.traces.get_mut(&seq) {
            record.span_slots.push(slot);
        }
        true
    }

    pub fn active_span_mut(&mut self, id: SpanId) -> Option<&mut Span> {
        let slot = *self.active.get(&id)?;
        self.spans.get_mut(slot.0 as usize)?.as_mut()
    }

    /// Drops the id from the active index; the span itself stays with its trace.
    pub fn deactivate(&mut self, id: SpanId) {
        self.active.remove(&id);
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn remove_trace(&mut self, id: TraceId) -> Option<TraceRecord> {
        let seq = self.trace_index.remove(&id)?;
        let record = self.traces.remove(&seq)?;
        self.release_slots(&record);
        Some(record)
    }

    /// Removes every trace matching `predicate`, returning how many went.
    pub fn remove_where(&mut self, predicate: impl Fn(&TraceRecord) -> bool) -> usize {
        let doomed: Vec<TraceId> = self.traces.values()
            .filter(|record| predicate(record))
            .map(|record| record.id)
            .collect();
        for id in &doomed {
            self.remove_trace(*id);
        }
        doomed.len()
    }

    fn release_slots(&mut self, record: &TraceRecord) {
        for slot in &record.span_slots {
            if let Some(span) = self.spans.get_mut(slot.0 as usize).and_then(Option::take) {
                self.active.remove(&span.id);
                self.free_indices.push(slot.0);
            }
        }
    }

    pub fn spans_of<'a>(&'a self, record: &'a TraceRecord) -> impl Iterator<Item = &'a Span> + 'a {
        record.span_slots.iter()
            .filter_map(|slot| self.spans.get(slot.0 as usize)?.as_ref())
    }

    pub fn snapshot(&self, record: &TraceRecord) -> Trace {
        Trace{
            id: record.id,
            name: record.name.clone(),
            timing: record.timing,
            status: record.status,
            spans: self.spans_of(record).cloned().collect(),
            metadata: record.metadata.clone(),
            root_span_id: record.root_span_id,
        }
    }

    pub fn snapshot_by_id(&self, id: TraceId) -> Option<Trace> {
        self.trace(id).map(|record| self.snapshot(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SpanKind, Timestamp};
    use std::num::{NonZeroU128, NonZeroU64};

    fn trace_id(n: u128) -> TraceId { TraceId(NonZeroU128::new(n).unwrap()) }
    fn span_id(n: u64) -> SpanId { SpanId(NonZeroU64::new(n).unwrap()) }

    fn record(n: u128) -> TraceRecord {
        let start = Timestamp{ nanos: 0, wall_ms: 0 };
        TraceRecord::new(trace_id(n), format!("t{n}"), Timing::started(start), Metadata::new(), span_id(1000 + n as u64))
    }

    fn span(trace: u128, id: u64) -> Span {
        Span{
            id: span_id(id),
            trace_id: trace_id(trace),
            parent_id: None,
            name: format!("s{id}"),
            kind: SpanKind::Custom,
            timing: Timing::started(Timestamp{ nanos: 0, wall_ms: 0 }),
            status: Status::Pending,
            metadata: Metadata::new(),
            tags: vec![],
            errors: vec![],
        }
    }

    #[test]
    fn removed_trace_frees_slots_for_reuse() {
        let mut store = TraceStore::default();
        store.insert_trace(record(1));
        store.insert_trace(record(2));
        assert!(store.push_span(span(1, 1)));
        assert!(store.push_span(span(1, 2)));
        assert_eq!(store.active_count(), 2);

        store.remove_trace(trace_id(1));
        assert_eq!(store.active_count(), 0);
        assert!(store.active_span_mut(span_id(1)).is_none());

        assert!(store.push_span(span(2, 3)));
        assert_eq!(store.spans.len(), 2, "freed slot reused");
        let snapshot = store.snapshot_by_id(trace_id(2)).unwrap();
        assert_eq!(snapshot.spans.len(), 1);
        assert_eq!(snapshot.spans[0].id, span_id(3));
    }

    #[test]
    fn deactivated_span_stays_with_trace() {
        let mut store = TraceStore::default();
        store.insert_trace(record(1));
        store.push_span(span(1, 1));
        store.deactivate(span_id(1));
        assert!(store.active_span_mut(span_id(1)).is_none());
        assert_eq!(store.snapshot_by_id(trace_id(1)).unwrap().spans.len(), 1);
    }

    #[test]
    fn span_for_unknown_trace_is_rejected() {
        let mut store = TraceStore::default();
        assert!(!store.push_span(span(9, 1)));
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn records_keep_arrival_order() {
        let mut store = TraceStore::default();
        for n in [3, 1, 2] {
            store.insert_trace(record(n));
        }
        let order: Vec<_> = store.records().map(|r| r.id).collect();
        assert_eq!(order, vec![trace_id(3), trace_id(1), trace_id(2)]);
        assert_eq!(store.remove_where(|r| r.id != trace_id(1)), 2);
        assert_eq!(store.len(), 1);
    }
}
