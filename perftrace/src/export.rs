use crate::Trace;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

pub const CSV_HEADER: &str = "traceId,name,duration,status,spanCount";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown export format `{0}`, expected `json` or `csv`")]
pub struct ExportFormatError(pub String);

impl std::str::FromStr for ExportFormat {
    type Err = ExportFormatError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else if s.eq_ignore_ascii_case("csv") {
            Ok(Self::Csv)
        } else {
            Err(ExportFormatError(s.to_owned()))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to serialize traces as json: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn export_traces(traces: &[Trace], format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Json => to_json(traces),
        ExportFormat::Csv => Ok(to_csv(traces)),
    }
}

/// Pretty-printed array of full trace records.
pub fn to_json(traces: &[Trace]) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(traces)?)
}

/// One header row and one row per trace.
///
/// NOTE fields are joined as-is: a name containing a comma or newline
/// produces a malformed row. Consumers rely on this exact layout.
pub fn to_csv(traces: &[Trace]) -> String {
    let mut out = String::from(CSV_HEADER);
    for trace in traces {
        let duration = trace.duration().map(|d| d.to_string()).unwrap_or_default();
        // writing into a String cannot fail
        let _ = write!(out, "\n{},{},{},{},{}", trace.id, trace.name, duration, trace.status, trace.spans.len());
    }
    out
}
