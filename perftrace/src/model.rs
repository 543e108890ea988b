use crate::{Metadata, SpanId, Timestamp, TraceId};
use serde::{Deserialize, Serialize};

// ++++++++++++++++++++ enums ++++++++++++++++++++

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpanKind {
    HttpRequest,
    DbQuery,
    UiRender,
    FunctionCall,
    Custom,
}

impl SpanKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HttpRequest => "http-request",
            Self::DbQuery => "db-query",
            Self::UiRender => "ui-render",
            Self::FunctionCall => "function-call",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared by traces and spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Success,
    Error,
    Timeout,
}

impl Status {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ++++++++++++++++++++ timing ++++++++++++++++++++

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub start: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end: Option<Timestamp>,
    /// milliseconds, present exactly when `end` is
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration: Option<f64>,
}

impl Timing {
    pub fn started(start: Timestamp) -> Self {
        Self{ start, end: None, duration: None }
    }

    pub(crate) fn close(&mut self, end: Timestamp) -> f64 {
        let duration = end.millis_since(&self.start);
        self.end = Some(end);
        self.duration = Some(duration);
        duration
    }
}

// ++++++++++++++++++++ errors attached to spans ++++++++++++++++++++

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanError {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack: Option<String>,
}

impl SpanError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self{ name: name.into(), message: message.into(), stack: None }
    }

    /// Captures the error's type name, its display text and its `source()` chain.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        let mut causes = vec![];
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        Self{
            name: std::any::type_name::<E>().to_owned(),
            message: err.to_string(),
            stack: (!causes.is_empty()).then(|| causes.join("\n")),
        }
    }
}

impl From<&str> for SpanError {
    fn from(message: &str) -> Self { Self::new("Error", message) }
}

impl From<String> for SpanError {
    fn from(message: String) -> Self { Self::new("Error", message) }
}

// ++++++++++++++++++++ Span / Trace ++++++++++++++++++++

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub id: SpanId,
    pub trace_id: TraceId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<SpanId>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SpanKind,
    pub timing: Timing,
    pub status: Status,
    pub metadata: Metadata,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<SpanError>,
}

impl Span {
    pub fn duration(&self) -> Option<f64> {
        self.timing.duration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub id: TraceId,
    pub name: String,
    pub timing: Timing,
    pub status: Status,
    /// insertion order, not necessarily start order
    pub spans: Vec<Span>,
    pub metadata: Metadata,
    /// Reserved when the trace starts. Spans without a parent hang below this
    /// id even though no span carries it.
    pub root_span_id: SpanId,
}

impl Trace {
    pub fn duration(&self) -> Option<f64> {
        self.timing.duration
    }

    pub fn span(&self, id: SpanId) -> Option<&Span> {
        self.spans.iter().find(|s| s.id == id)
    }

    pub fn spans_of_kind(&self, kind: SpanKind) -> impl Iterator<Item = &Span> + '_ {
        self.spans.iter().filter(move |s| s.kind == kind)
    }
}
