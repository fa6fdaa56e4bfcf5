//! Per-trial sample windows, latency histograms, and summary statistics.
mod aggregator;
mod histogram;


pub use aggregator::{
    LabelSummary, MetricsAggregator, MetricsSummary, Sample, format_x100, per_second_x100, percent_x100,
};
pub use histogram::{LatencyHistogram, LatencyPercentiles};
