use crate::{Collector, SpanError, SpanId};

/// Attaches an error carried by `self` to an active span and hands `self`
/// back untouched, so it can sit in the middle of a `?` chain.
///
/// ```
/// # use perftrace::*;
/// let collector = Collector::new(TracingConfig::default());
/// let trace = collector.start_trace("import", Metadata::new()).unwrap();
/// let span = collector.start_span(trace.id, "parse", SpanKind::FunctionCall, None, Metadata::new()).unwrap();
///
/// let parsed = "x1".parse::<u32>().record_span_error(&collector, span.id);
/// assert!(parsed.is_err());
/// assert_eq!(collector.get_trace(trace.id).unwrap().spans[0].status, Status::Error);
/// ```
pub trait RecordSpanError<E: std::error::Error>: Sized {
    #[doc(hidden)]
    fn get_error(&self) -> Option<&E>;

    fn record_span_error(self, collector: &Collector, span_id: SpanId) -> Self {
        if let Some(err) = self.get_error() {
            collector.add_span_error(span_id, SpanError::from_error(err));
        }
        self
    }
}

impl<E: std::error::Error> RecordSpanError<E> for Option<E> {
    fn get_error(&self) -> Option<&E> { self.as_ref() }
}

impl<T, E: std::error::Error> RecordSpanError<E> for Result<T, E> {
    fn get_error(&self) -> Option<&E> { self.as_ref().err() }
}
