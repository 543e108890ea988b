use serde::{Deserialize, Serialize};

/// Linearly interpolated percentile of an ascending slice.
///
/// The fractional rank is `p/100 * (n-1)`; an integral rank selects that
/// element, otherwise the two neighbours are blended by the fraction.
/// Returns 0 for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() { return 0.0 }
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower]
    }
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl DurationStats {
    pub fn from_durations(durations: impl IntoIterator<Item = f64>) -> Self {
        let mut values: Vec<f64> = durations.into_iter().collect();
        if values.is_empty() { return Self::default() }
        values.sort_by(f64::total_cmp);

        let count = values.len();
        Self{
            count,
            min: values[0],
            max: values[count - 1],
            avg: values.iter().sum::<f64>() / count as f64,
            p50: percentile(&values, 50.0),
            p95: percentile(&values, 95.0),
            p99: percentile(&values, 99.0),
        }
    }
}

/// Snapshot over every retained trace, see `Collector::get_stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectorStats {
    pub traces: DurationStats,
    pub spans: DurationStats,
}
