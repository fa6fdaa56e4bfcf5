use std::collections::BTreeMap;

use serde::Serialize;

use crate::args::OutputFormat;
use crate::correlation::{ChainReport, StepStatus};
use crate::error::AppResult;
use crate::exec::ExecutorStats;
use crate::metrics::{LabelSummary, MetricsSummary, format_x100};
use crate::rate::LimiterStats;
use crate::search::SearchOutcome;

#[derive(Debug, Serialize)]
pub(crate) struct RunReport<'report> {
    pub summary: &'report MetricsSummary,
    pub executor: &'report ExecutorStats,
    pub limiter: Option<&'report LimiterStats>,
}

/// Text lines for humans, or one pretty JSON document.
pub(crate) fn render<T: Serialize>(
    value: &T,
    format: OutputFormat,
    lines: impl FnOnce(&T) -> Vec<String>,
) -> AppResult<String> {
    match format {
        OutputFormat::Text => Ok(lines(value).join("\n")),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
    }
}

pub(crate) fn search_lines(outcome: &SearchOutcome) -> Vec<String> {
    let mut lines = Vec::with_capacity(outcome.trials.len().saturating_add(6));
    lines.push("Trials:".to_owned());
    lines.push(format!(
        "{:>8} {:>8} {:>8} {:>12} {:>8} {:>10} {:>10}  verdict",
        "level", "workers", "total", "rps", "errors", "p95_ms", "mean_ms"
    ));
    for trial in &outcome.trials {
        lines.push(format!(
            "{:>8} {:>8} {:>8} {:>12} {:>7}% {:>10} {:>10}  {:?}",
            trial.level,
            trial.concurrency,
            trial.total,
            format_x100(trial.throughput_x100),
            format_x100(trial.error_rate_x100),
            micros_as_ms(trial.p95_latency_us),
            micros_as_ms(trial.mean_latency_us),
            trial.verdict
        ));
    }
    if outcome.no_passing_level {
        lines.push("Result: no level met the thresholds".to_owned());
    } else {
        lines.push(format!(
            "Result: optimal level {} ({} workers) at {} req/s",
            outcome.optimal_level,
            outcome.optimal_concurrency,
            format_x100(outcome.max_throughput_x100)
        ));
        let optimal = outcome
            .trials
            .iter()
            .rev()
            .find(|trial| trial.level == outcome.optimal_level && trial.verdict.passed());
        if let Some(trial) = optimal {
            lines.extend(label_lines(&trial.by_label));
        }
        if outcome.highest_passing_level != outcome.optimal_level {
            lines.push(format!(
                "Note: level {} still passed, at lower throughput",
                outcome.highest_passing_level
            ));
        }
    }
    if outcome.ceiling_reached {
        lines.push("Note: the maximum level passed; raise --max to search further".to_owned());
    }
    if outcome.interrupted {
        lines.push("Note: interrupted before the search converged".to_owned());
    }
    lines
}

pub(crate) fn run_lines(report: &RunReport<'_>) -> Vec<String> {
    let summary = report.summary;
    let mut lines = vec![
        format!(
            "Requests: {} total, {} ok, {} failed ({}%)",
            summary.count,
            summary.success_count,
            summary.error_count,
            format_x100(summary.error_rate_x100)
        ),
        format!(
            "Throughput: {} req/s over {}ms",
            format_x100(summary.throughput_x100),
            summary.duration_ms
        ),
        format!(
            "Latency ms: mean {} p50 {} p95 {} p99 {} max {}",
            micros_as_ms(summary.mean_latency_us),
            micros_as_ms(summary.p50_latency_us),
            micros_as_ms(summary.p95_latency_us),
            micros_as_ms(summary.p99_latency_us),
            micros_as_ms(summary.max_latency_us)
        ),
    ];
    for (kind, count) in &summary.errors_by_kind {
        lines.push(format!("Errors[{}]: {}", kind, count));
    }
    lines.extend(label_lines(&summary.by_label));
    if report.executor.retried > 0 {
        lines.push(format!("Retried tasks: {}", report.executor.retried));
    }
    if let Some(limiter) = report.limiter {
        lines.push(format!(
            "Rate limiter: {} admitted, wait p95 {}ms",
            limiter.admitted,
            micros_as_ms(limiter.wait_p95_us)
        ));
    }
    lines
}

fn label_lines(by_label: &BTreeMap<String, LabelSummary>) -> Vec<String> {
    by_label
        .iter()
        .map(|(label, stats)| {
            format!(
                "  {}: {} total, {} ok, {} failed ({}%), mean {}ms, max {}ms",
                label,
                stats.count,
                stats.success_count,
                stats.error_count,
                format_x100(stats.error_rate_x100),
                micros_as_ms(stats.mean_latency_us),
                micros_as_ms(stats.max_latency_us)
            )
        })
        .collect()
}

pub(crate) fn chain_lines(reports: &[ChainReport]) -> Vec<String> {
    let mut lines = Vec::new();
    for (iteration, report) in reports.iter().enumerate() {
        lines.push(format!(
            "Iteration {}: {}",
            iteration.saturating_add(1),
            if report.success { "passed" } else { "failed" }
        ));
        for step in &report.steps {
            let status = match step.status {
                StepStatus::Passed => "ok",
                StepStatus::Failed => "FAIL",
                StepStatus::Skipped => "skip",
            };
            let mut parts = vec![format!(
                "  [{}] {} ({}ms)",
                status, step.name, step.latency_ms
            )];
            if let Some(http_status) = step.http_status {
                parts.push(format!("status={}", http_status));
            }
            if !step.extracted.is_empty() {
                parts.push(format!("extracted={}", step.extracted.join(",")));
            }
            if let Some(error) = step.error.as_deref() {
                parts.push(format!("error={}", error));
            }
            lines.push(parts.join(" "));
        }
        for (name, value) in &report.parameters {
            lines.push(format!("  {} = {}", name, value));
        }
    }
    lines
}

fn micros_as_ms(micros: u64) -> String {
    format!("{}.{:03}", micros / 1000, micros % 1000)
}
