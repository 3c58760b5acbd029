//! Time-series metric storage with percentile summaries
//!
//! Points are partitioned by `(metric name, label set)`. Each partition keeps
//! a bounded buffer capped both by point count and by age, whichever bites
//! first.

use crate::config::MonitorConfig;
use crate::error::{RagGuardError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Label set attached to a series; ordered so equal sets hash equally
pub type Labels = BTreeMap<String, String>;

/// Build a label set from string pairs
pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonic increments; summaries expose the sum and rate
    Counter,
    /// Last value wins
    Gauge,
    Histogram,
    /// Durations in milliseconds
    Timer,
}

/// One recorded observation
#[derive(Debug, Clone)]
pub struct MetricPoint {
    pub recorded_at: Instant,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    name: String,
    labels: Labels,
}

struct Series {
    kind: MetricKind,
    points: VecDeque<MetricPoint>,
}

impl Series {
    fn push(&mut self, point: MetricPoint, max_points: usize, retention: Duration) {
        let now = point.recorded_at;
        self.points.push_back(point);
        while self.points.len() > max_points {
            self.points.pop_front();
        }
        if let Some(cutoff) = now.checked_sub(retention) {
            while self.points.front().is_some_and(|p| p.recorded_at < cutoff) {
                self.points.pop_front();
            }
        }
    }
}

/// Statistics over one metric within a time window
#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub name: String,
    pub labels: Labels,
    pub kind: MetricKind,
    pub window_secs: f64,
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub stdev: f64,
    pub p95: f64,
    pub p99: f64,
    pub latest: f64,
    /// Sum divided by the window length
    pub rate_per_sec: f64,
    /// Span between the oldest and newest point in the window
    pub observed_secs: f64,
    pub last_timestamp: DateTime<Utc>,
}

/// Thread-safe metrics store
pub struct MetricsRecorder {
    max_points: usize,
    retention: Duration,
    series: RwLock<HashMap<SeriesKey, Arc<Mutex<Series>>>>,
}

impl MetricsRecorder {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            max_points: config.max_points_per_series.max(1),
            retention: config.retention,
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_counter(&self, name: &str, value: f64, labels: &Labels) {
        self.record(MetricKind::Counter, name, value, labels);
    }

    pub fn record_gauge(&self, name: &str, value: f64, labels: &Labels) {
        self.record(MetricKind::Gauge, name, value, labels);
    }

    pub fn record_histogram(&self, name: &str, value: f64, labels: &Labels) {
        self.record(MetricKind::Histogram, name, value, labels);
    }

    /// Record a duration, stored in milliseconds
    pub fn record_timer(&self, name: &str, duration: Duration, labels: &Labels) {
        self.record(
            MetricKind::Timer,
            name,
            duration.as_secs_f64() * 1000.0,
            labels,
        );
    }

    /// Start a timer that records its elapsed time when dropped
    pub fn start_timer(&self, name: &str, labels: Labels) -> TimerGuard<'_> {
        TimerGuard {
            recorder: self,
            name: name.to_string(),
            labels,
            started: Instant::now(),
        }
    }

    fn record(&self, kind: MetricKind, name: &str, value: f64, labels: &Labels) {
        if !value.is_finite() {
            tracing::debug!("Dropping non-finite value for metric {}", name);
            return;
        }

        let point = MetricPoint {
            recorded_at: Instant::now(),
            timestamp: Utc::now(),
            value,
        };
        let key = SeriesKey {
            name: name.to_string(),
            labels: labels.clone(),
        };

        // The map lock is held while pushing so `prune_stale` cannot drop
        // the series under us
        {
            let map = match self.series.read() {
                Ok(map) => map,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(series) = map.get(&key) {
                self.push(series, kind, name, point);
                return;
            }
        }

        let mut map = match self.series.write() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        let series = map.entry(key).or_insert_with(|| {
            Arc::new(Mutex::new(Series {
                kind,
                points: VecDeque::new(),
            }))
        });
        self.push(series, kind, name, point);
    }

    fn push(&self, series: &Mutex<Series>, kind: MetricKind, name: &str, point: MetricPoint) {
        let mut series = match series.lock() {
            Ok(series) => series,
            Err(poisoned) => poisoned.into_inner(),
        };
        if series.kind != kind {
            tracing::debug!(
                "Metric {} recorded as {:?} but registered as {:?}",
                name,
                kind,
                series.kind
            );
        }
        series.push(point, self.max_points, self.retention);
    }

    /// Drop points past retention and forget series left empty.
    /// Returns the number of series removed.
    pub fn prune_stale(&self) -> usize {
        let cutoff = Instant::now().checked_sub(self.retention);
        let mut map = match self.series.write() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = map.len();
        map.retain(|_, series| {
            let mut series = match series.lock() {
                Ok(series) => series,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(cutoff) = cutoff {
                while series.points.front().is_some_and(|p| p.recorded_at < cutoff) {
                    series.points.pop_front();
                }
            }
            !series.points.is_empty()
        });
        let pruned = before - map.len();
        if pruned > 0 {
            tracing::debug!("Pruned {} idle metric series", pruned);
        }
        pruned
    }

    /// Summarize a metric over the trailing `window`.
    ///
    /// With `labels = None` every label set recorded under `name` is merged.
    /// Returns `MetricNotFound` for a name never recorded and `NoData` when
    /// the series exists but has no points inside the window.
    pub fn get_summary(
        &self,
        name: &str,
        labels: Option<&Labels>,
        window: Duration,
    ) -> Result<MetricSummary> {
        let cutoff = Instant::now().checked_sub(window);
        self.summary_where(name, labels, window, |p| {
            cutoff.map_or(true, |c| p.recorded_at >= c)
        })
    }

    /// Summarize only the points recorded strictly after `since`.
    ///
    /// Errors as [`MetricsRecorder::get_summary`] does.
    pub fn get_summary_since(
        &self,
        name: &str,
        labels: Option<&Labels>,
        since: Instant,
    ) -> Result<MetricSummary> {
        let window = Instant::now().saturating_duration_since(since);
        self.summary_where(name, labels, window, |p| p.recorded_at > since)
    }

    fn summary_where(
        &self,
        name: &str,
        labels: Option<&Labels>,
        window: Duration,
        keep: impl Fn(&MetricPoint) -> bool,
    ) -> Result<MetricSummary> {
        let matching: Vec<(Labels, Arc<Mutex<Series>>)> = {
            let map = self
                .series
                .read()
                .map_err(|_| RagGuardError::Other(anyhow::anyhow!("metrics store poisoned")))?;
            map.iter()
                .filter(|(key, _)| key.name == name)
                .filter(|(key, _)| labels.map_or(true, |l| &key.labels == l))
                .map(|(key, series)| (key.labels.clone(), series.clone()))
                .collect()
        };
        if matching.is_empty() {
            return Err(RagGuardError::MetricNotFound(name.to_string()));
        }

        let mut kind = MetricKind::Gauge;
        let mut points: Vec<MetricPoint> = Vec::new();
        for (_, series) in &matching {
            let series = match series.lock() {
                Ok(series) => series,
                Err(poisoned) => poisoned.into_inner(),
            };
            kind = series.kind;
            points.extend(series.points.iter().filter(|&p| keep(p)).cloned());
        }
        if points.is_empty() {
            return Err(RagGuardError::NoData {
                metric: name.to_string(),
                window,
            });
        }
        points.sort_by_key(|p| p.recorded_at);

        let summary_labels = match labels {
            Some(l) => l.clone(),
            None if matching.len() == 1 => matching[0].0.clone(),
            None => Labels::new(),
        };
        Ok(summarize(name, summary_labels, kind, window, &points))
    }

    /// Summaries for every series with data in the window
    pub fn summaries(&self, window: Duration) -> Vec<MetricSummary> {
        self.prune_stale();
        let keys: Vec<SeriesKey> = match self.series.read() {
            Ok(map) => map.keys().cloned().collect(),
            Err(_) => return Vec::new(),
        };
        let mut summaries: Vec<MetricSummary> = keys
            .iter()
            .filter_map(|key| self.get_summary(&key.name, Some(&key.labels), window).ok())
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        summaries
    }

    /// Distinct metric names, sorted
    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.series.read() {
            Ok(map) => map.keys().map(|k| k.name.clone()).collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names.dedup();
        names
    }

    pub fn series_count(&self) -> usize {
        self.series.read().map(|map| map.len()).unwrap_or(0)
    }

    /// Number of points retained for one series
    pub fn point_count(&self, name: &str, labels: &Labels) -> usize {
        let key = SeriesKey {
            name: name.to_string(),
            labels: labels.clone(),
        };
        self.series
            .read()
            .ok()
            .and_then(|map| map.get(&key).cloned())
            .and_then(|series| series.lock().ok().map(|s| s.points.len()))
            .unwrap_or(0)
    }
}

/// Records elapsed milliseconds into a timer metric on drop
pub struct TimerGuard<'a> {
    recorder: &'a MetricsRecorder,
    name: String,
    labels: Labels,
    started: Instant,
}

impl TimerGuard<'_> {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.recorder
            .record_timer(&self.name, self.started.elapsed(), &self.labels);
    }
}

fn summarize(
    name: &str,
    labels: Labels,
    kind: MetricKind,
    window: Duration,
    points: &[MetricPoint],
) -> MetricSummary {
    let mut values: Vec<f64> = points.iter().map(|p| p.value).collect();
    let latest = values[values.len() - 1];
    values.sort_by(f64::total_cmp);

    let count = values.len();
    let sum: f64 = values.iter().sum();
    let mean = sum / count as f64;
    let window_secs = window.as_secs_f64();
    let first = &points[0];
    let last = &points[points.len() - 1];

    MetricSummary {
        name: name.to_string(),
        labels,
        kind,
        window_secs,
        count,
        sum,
        min: values[0],
        max: values[count - 1],
        mean,
        median: percentile(&values, 50.0),
        stdev: sample_stdev(&values, mean),
        p95: percentile(&values, 95.0),
        p99: percentile(&values, 99.0),
        latest,
        rate_per_sec: if window_secs > 0.0 { sum / window_secs } else { 0.0 },
        observed_secs: last
            .recorded_at
            .duration_since(first.recorded_at)
            .as_secs_f64(),
        last_timestamp: last.timestamp,
    }
}

/// Linear-interpolated percentile over an ascending slice; `pct` in 0..=100
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (pct.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let frac = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * frac
        }
    }
}

/// Sample standard deviation; zero for fewer than two points
fn sample_stdev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}
