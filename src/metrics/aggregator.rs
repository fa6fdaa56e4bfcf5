use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::warn;

use crate::exec::TaskResult;

use super::histogram::LatencyHistogram;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub latency_us: u64,
    pub success: bool,
    pub error_kind: Option<&'static str>,
    pub label: Option<String>,
}

/// Counts for the samples sharing one task label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelSummary {
    pub count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub error_rate_x100: u64,
    /// Over successful samples only.
    pub mean_latency_us: u64,
    pub max_latency_us: u64,
    pub errors_by_kind: BTreeMap<String, u64>,
}

/// Statistics of one window. Rates are scaled by 100 (`1234` is 12.34).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSummary {
    pub count: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Error percentage x100 (`500` is 5%).
    pub error_rate_x100: u64,
    /// Latency figures cover successful samples only.
    pub mean_latency_us: u64,
    pub p50_latency_us: u64,
    pub p95_latency_us: u64,
    pub p99_latency_us: u64,
    pub max_latency_us: u64,
    /// Successful operations per second x100.
    pub throughput_x100: u64,
    pub duration_ms: u64,
    pub errors_by_kind: BTreeMap<String, u64>,
    /// Breakdown per task label; empty when no task carried one.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub by_label: BTreeMap<String, LabelSummary>,
    pub has_data: bool,
}

/// Collects the samples of one trial. `reset` starts a new window.
#[derive(Debug)]
pub struct MetricsAggregator {
    samples: Vec<Sample>,
    success_latency: Option<LatencyHistogram>,
    success_latency_sum_us: u128,
    opened: Instant,
    closed: Option<Instant>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            success_latency: new_histogram(),
            success_latency_sum_us: 0,
            opened: Instant::now(),
            closed: None,
        }
    }

    pub fn record(&mut self, result: &TaskResult) {
        let sample = Sample {
            latency_us: result.latency_us(),
            success: result.success,
            error_kind: result.error.as_ref().map(|err| err.kind_label()),
            label: result.label.clone(),
        };
        if sample.success {
            self.success_latency_sum_us = self
                .success_latency_sum_us
                .saturating_add(u128::from(sample.latency_us));
            if let Some(histogram) = self.success_latency.as_mut()
                && let Err(err) = histogram.record(sample.latency_us)
            {
                warn!("Dropping latency sample: {}", err);
            }
        }
        self.samples.push(sample);
    }

    pub fn record_all<'result>(&mut self, results: impl IntoIterator<Item = &'result TaskResult>) {
        for result in results {
            self.record(result);
        }
    }

    /// Freezes the window end used for throughput.
    pub fn close(&mut self) {
        if self.closed.is_none() {
            self.closed = Some(Instant::now());
        }
    }

    /// Drops every sample and reopens the window now.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.success_latency_sum_us = 0;
        match self.success_latency.as_mut() {
            Some(histogram) => histogram.clear(),
            None => self.success_latency = new_histogram(),
        }
        self.opened = Instant::now();
        self.closed = None;
    }

    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.closed
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.opened)
    }

    /// Summarizes the current window. An empty window yields the zero
    /// summary with `has_data == false`.
    #[must_use]
    pub fn summarize(&self) -> MetricsSummary {
        let window = self.window();
        let duration_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        if self.samples.is_empty() {
            return MetricsSummary {
                duration_ms,
                ..MetricsSummary::default()
            };
        }

        let count = u64::try_from(self.samples.len()).unwrap_or(u64::MAX);
        let mut success_count: u64 = 0;
        let mut errors_by_kind = BTreeMap::new();
        for sample in &self.samples {
            if sample.success {
                success_count = success_count.saturating_add(1);
            } else {
                let kind = sample.error_kind.unwrap_or("failed");
                let entry = errors_by_kind.entry(kind.to_owned()).or_insert(0_u64);
                *entry = entry.saturating_add(1);
            }
        }
        let error_count = count.saturating_sub(success_count);

        let mean_latency_us = if success_count > 0 {
            let avg = self
                .success_latency_sum_us
                .checked_div(u128::from(success_count))
                .unwrap_or(0);
            u64::try_from(avg).unwrap_or(u64::MAX)
        } else {
            0
        };
        let (percentiles, max_latency_us) = self
            .success_latency
            .as_ref()
            .map(|histogram| (histogram.percentiles(), histogram.max()))
            .unwrap_or_default();

        MetricsSummary {
            count,
            success_count,
            error_count,
            error_rate_x100: percent_x100(error_count, count),
            mean_latency_us,
            p50_latency_us: percentiles.p50_us,
            p95_latency_us: percentiles.p95_us,
            p99_latency_us: percentiles.p99_us,
            max_latency_us,
            throughput_x100: per_second_x100(success_count, window),
            duration_ms,
            errors_by_kind,
            by_label: self.by_label(),
            has_data: true,
        }
    }

    fn by_label(&self) -> BTreeMap<String, LabelSummary> {
        let mut partials: BTreeMap<&str, (LabelSummary, u128)> = BTreeMap::new();
        for sample in &self.samples {
            let Some(label) = sample.label.as_deref() else {
                continue;
            };
            let (summary, latency_sum_us) = partials.entry(label).or_default();
            summary.count = summary.count.saturating_add(1);
            if sample.success {
                summary.success_count = summary.success_count.saturating_add(1);
                summary.max_latency_us = summary.max_latency_us.max(sample.latency_us);
                *latency_sum_us = latency_sum_us.saturating_add(u128::from(sample.latency_us));
            } else {
                summary.error_count = summary.error_count.saturating_add(1);
                let kind = sample.error_kind.unwrap_or("failed");
                let entry = summary.errors_by_kind.entry(kind.to_owned()).or_insert(0_u64);
                *entry = entry.saturating_add(1);
            }
        }
        partials
            .into_iter()
            .map(|(label, (mut summary, latency_sum_us))| {
                summary.error_rate_x100 = percent_x100(summary.error_count, summary.count);
                summary.mean_latency_us = latency_sum_us
                    .checked_div(u128::from(summary.success_count))
                    .and_then(|mean| u64::try_from(mean).ok())
                    .unwrap_or(0);
                (label.to_owned(), summary)
            })
            .collect()
    }
}

fn new_histogram() -> Option<LatencyHistogram> {
    match LatencyHistogram::new() {
        Ok(histogram) => Some(histogram),
        Err(err) => {
            warn!("Latency percentiles disabled: {}", err);
            None
        }
    }
}

/// `part / total` as a percentage scaled by 100. Zero when `total` is zero.
#[must_use]
pub fn percent_x100(part: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    let scaled = u128::from(part)
        .saturating_mul(10_000)
        .checked_div(u128::from(total))
        .unwrap_or(0);
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Events per second scaled by 100. Windows shorter than 1ms count as 1ms.
#[must_use]
pub fn per_second_x100(events: u64, window: Duration) -> u64 {
    if events == 0 {
        return 0;
    }
    let duration_ms = window.as_millis().max(1);
    let scaled = u128::from(events)
        .saturating_mul(100_000)
        .checked_div(duration_ms)
        .unwrap_or(0);
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Renders an x100 value as `12.34`.
#[must_use]
pub fn format_x100(value: u64) -> String {
    format!("{}.{:02}", value / 100, value % 100)
}
