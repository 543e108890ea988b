use crate::ExportFormat;
use serde::{Deserialize, Serialize};

/// Collector configuration.
///
/// Values are taken as given: the collector does not re-validate them.
/// `filters.exclude_*` and `output` are carried for instrumentation and
/// reporting layers and are never interpreted by the collector itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[serde(rename_all = "camelCase", default)]
pub struct TracingConfig {
    pub enabled: bool,
    pub sampling: SamplingConfig,
    pub filters: FilterConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplingConfig {
    /// probability in 0..=1 that a trace is recorded
    pub rate: f64,
    #[setters(strip_option)]
    pub max_traces_per_second: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Setters)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterConfig {
    /// milliseconds; completed traces shorter than this are dropped
    #[setters(strip_option)]
    pub min_duration: Option<f64>,
    pub exclude_urls: Vec<String>,
    pub exclude_components: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputConfig {
    pub console: bool,
    #[setters(strip_option, into)]
    pub file: Option<String>,
    pub format: ExportFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self{
            enabled: true,
            sampling: SamplingConfig::default(),
            filters: FilterConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self{ rate: 1.0, max_traces_per_second: None }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self{ console: false, file: None, format: ExportFormat::Json }
    }
}

impl TracingConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Defaults overlaid with `{prefix}_ENABLED`, `{prefix}_SAMPLE_RATE`,
    /// `{prefix}_MAX_TRACES_PER_SECOND`, `{prefix}_MIN_DURATION`,
    /// `{prefix}_EXCLUDE_URLS` and `{prefix}_EXCLUDE_COMPONENTS`.
    pub fn from_env(prefix: &str) -> Self {
        Self::default().overlay_env(prefix, |key| std::env::var(key).ok())
    }

    /// Applies every recognised variable found through `lookup`.
    /// Malformed entries are reported and skipped.
    pub fn overlay_env(mut self, prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| {
            let key = format!("{prefix}_{name}");
            lookup(&key).map(|value| (key, value.trim().to_owned()))
        };

        if let Some((key, value)) = var("ENABLED") {
            match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => self.enabled = true,
                "0" | "false" | "off" | "no" => self.enabled = false,
                _ => malformed(&key, &value),
            }
        }
        if let Some((key, value)) = var("SAMPLE_RATE") {
            match value.parse::<f64>() {
                Ok(rate) => self.sampling.rate = rate,
                Err(_) => malformed(&key, &value),
            }
        }
        if let Some((key, value)) = var("MAX_TRACES_PER_SECOND") {
            match value.parse::<u32>() {
                Ok(max) => self.sampling.max_traces_per_second = Some(max),
                Err(_) => malformed(&key, &value),
            }
        }
        if let Some((key, value)) = var("MIN_DURATION") {
            match value.parse::<f64>() {
                Ok(ms) => self.filters.min_duration = Some(ms),
                Err(_) => malformed(&key, &value),
            }
        }
        if let Some((_, value)) = var("EXCLUDE_URLS") {
            self.filters.exclude_urls = split_list(&value);
        }
        if let Some((_, value)) = var("EXCLUDE_COMPONENTS") {
            self.filters.exclude_components = split_list(&value);
        }
        self
    }
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(|e| e.trim()).filter(|e| !e.is_empty()).map(str::to_owned).collect()
}

fn malformed(_key: &str, _value: &str) {
    #[cfg(feature = "log")]
    log::error!("ignoring malformed configuration entry {_key}={_value:?}");
}
