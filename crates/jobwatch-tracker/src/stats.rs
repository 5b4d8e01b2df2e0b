//! Aggregate statistics over historical runs.
//!
//! Every function here is a pure function of its input. Percentages are
//! returned as full-precision values on a 0-100 scale; rounding for display
//! is up to the caller.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use jobwatch_core::{HistoricalRun, JobKind, JobStatus};

/// Headline numbers for a set of runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    /// Percentage of runs that completed, 0 when there are no runs.
    pub success_rate: f64,
    /// Mean duration in milliseconds over runs with both timestamps.
    pub average_duration: f64,
}

/// How often a pipeline step caused a run to fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub count: usize,
}

/// Success rate of one pipeline step across the runs that contain it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSuccess {
    pub step: String,
    /// Runs containing the step.
    pub runs: usize,
    /// Runs in which the step completed.
    pub succeeded: usize,
    pub success_rate: f64,
}

/// Summary restricted to one job kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindSummary {
    pub kind: JobKind,
    pub summary: RunSummary,
}

/// Everything the dashboard shows about a run history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub summary: RunSummary,
    pub by_kind: Vec<KindSummary>,
    pub step_failures: Vec<StepFailure>,
    pub step_success: Vec<StepSuccess>,
    /// Percentage change from the oldest to the newest run duration.
    pub duration_trend: f64,
}

/// Totals, success rate and mean duration.
pub fn summarize(runs: &[HistoricalRun]) -> RunSummary {
    let total_runs = runs.len();
    if total_runs == 0 {
        return RunSummary::default();
    }

    let successful_runs = runs
        .iter()
        .filter(|r| r.status == JobStatus::Completed)
        .count();
    let failed_runs = runs.iter().filter(|r| r.status == JobStatus::Failed).count();

    let durations: Vec<i64> = runs.iter().filter_map(HistoricalRun::duration_ms).collect();
    let average_duration = if durations.is_empty() {
        0.0
    } else {
        durations.iter().map(|d| *d as f64).sum::<f64>() / durations.len() as f64
    };

    RunSummary {
        total_runs,
        successful_runs,
        failed_runs,
        success_rate: percentage(successful_runs, total_runs),
        average_duration,
    }
}

/// One summary per kind present in `runs`, in kind order.
pub fn summarize_by_kind(runs: &[HistoricalRun]) -> Vec<KindSummary> {
    JobKind::ALL
        .into_iter()
        .filter_map(|kind| {
            let of_kind: Vec<HistoricalRun> =
                runs.iter().filter(|r| r.kind == kind).cloned().collect();
            (!of_kind.is_empty()).then(|| KindSummary {
                kind,
                summary: summarize(&of_kind),
            })
        })
        .collect()
}

/// Failing pipeline steps by number of failures, most frequent first.
///
/// Ties keep the order in which the steps were first seen.
pub fn step_failure_ranking(runs: &[HistoricalRun]) -> Vec<StepFailure> {
    let mut ranking: Vec<StepFailure> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    let failing_steps = runs
        .iter()
        .filter(|r| r.kind == JobKind::PipelineRun && r.status == JobStatus::Failed)
        .filter_map(HistoricalRun::failing_step);

    for step in failing_steps {
        match index.get(step) {
            Some(&i) => ranking[i].count += 1,
            None => {
                index.insert(step, ranking.len());
                ranking.push(StepFailure {
                    step: step.to_string(),
                    count: 1,
                });
            }
        }
    }

    // sort_by is stable, so first-seen order survives among equal counts.
    ranking.sort_by(|a, b| b.count.cmp(&a.count));
    ranking
}

/// Per-step success percentage, in first-seen order.
///
/// A run only counts toward a step's denominator if it contains that step.
pub fn step_success_rate(runs: &[HistoricalRun]) -> Vec<StepSuccess> {
    let mut rates: Vec<StepSuccess> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for run in runs {
        let mut seen_in_run: Vec<&str> = Vec::new();
        for step in &run.steps {
            if seen_in_run.contains(&step.id.as_str()) {
                continue;
            }
            seen_in_run.push(&step.id);

            let i = *index.entry(step.id.clone()).or_insert_with(|| {
                rates.push(StepSuccess {
                    step: step.id.clone(),
                    runs: 0,
                    succeeded: 0,
                    success_rate: 0.0,
                });
                rates.len() - 1
            });
            rates[i].runs += 1;
            if step.status == JobStatus::Completed {
                rates[i].succeeded += 1;
            }
        }
    }

    for rate in &mut rates {
        rate.success_rate = percentage(rate.succeeded, rate.runs);
    }
    rates
}

/// Failed runs that started within `window` of now.
pub fn recent_failure_count(runs: &[HistoricalRun], window: Duration) -> usize {
    recent_failure_count_at(runs, window, Utc::now())
}

/// Failed runs that started within `window` before `now`.
pub fn recent_failure_count_at(
    runs: &[HistoricalRun],
    window: Duration,
    now: DateTime<Utc>,
) -> usize {
    let cutoff = chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w));

    runs.iter()
        .filter(|r| r.status == JobStatus::Failed)
        .filter_map(|r| r.started_at)
        .filter(|started| cutoff.map_or(true, |c| *started >= c))
        .count()
}

/// Percentage change from the first to the last sample.
///
/// Returns 0 for fewer than two samples or when the first sample is 0; the
/// sign of the result carries no meaning in those cases.
pub fn trend(samples: &[f64]) -> f64 {
    match (samples.first(), samples.last()) {
        (Some(&first), Some(&last)) if samples.len() >= 2 && first != 0.0 => {
            (last - first) / first * 100.0
        }
        _ => 0.0,
    }
}

/// Trend of run durations, oldest run first.
pub fn duration_trend(runs: &[HistoricalRun]) -> f64 {
    let mut timed: Vec<(DateTime<Utc>, i64)> = runs
        .iter()
        .filter_map(|r| Some((r.started_at?, r.duration_ms()?)))
        .collect();
    timed.sort_by_key(|(started, _)| *started);

    let samples: Vec<f64> = timed.into_iter().map(|(_, d)| d as f64).collect();
    trend(&samples)
}

/// Build the full report over `runs`.
pub fn report(runs: &[HistoricalRun]) -> StatsReport {
    StatsReport {
        summary: summarize(runs),
        by_kind: summarize_by_kind(runs),
        step_failures: step_failure_ranking(runs),
        step_success: step_success_rate(runs),
        duration_trend: duration_trend(runs),
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
