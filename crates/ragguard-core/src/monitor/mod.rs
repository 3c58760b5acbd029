//! Performance monitoring
//!
//! Provides:
//! - A time-series metrics recorder (counters, gauges, histograms, timers)
//! - An alert engine with sustain-duration hysteresis and cooldowns
//! - A dashboard snapshot combining both

mod alerts;
mod metrics;

pub use alerts::{
    AlertCallback, AlertEngine, AlertEvent, AlertLevel, AlertRule, AlertStatistic, Comparator,
    EvaluationReport,
};
pub use metrics::{
    labels, percentile, Labels, MetricKind, MetricPoint, MetricSummary, MetricsRecorder,
    TimerGuard,
};

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::runtime::BackgroundTask;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Alert history entries included in a dashboard
const DASHBOARD_HISTORY_LIMIT: usize = 50;

/// Point-in-time view of metrics and alerts
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub generated_at: DateTime<Utc>,
    pub window_secs: f64,
    pub metrics: Vec<MetricSummary>,
    pub active_alerts: Vec<AlertEvent>,
    pub history: Vec<AlertEvent>,
}

/// Metrics recorder plus alert engine, evaluated on a timer
pub struct PerformanceMonitor {
    recorder: Arc<MetricsRecorder>,
    alerts: Arc<AlertEngine>,
    evaluator: Mutex<Option<BackgroundTask>>,
}

impl PerformanceMonitor {
    /// Build the monitor and start the alert evaluation loop.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: &MonitorConfig, token: CancellationToken) -> Result<Self> {
        let monitor = Self::detached(config)?;
        let alerts = monitor.alerts.clone();
        let task = BackgroundTask::spawn_periodic(
            "alert-evaluation",
            config.evaluation_interval,
            token.child_token(),
            move || {
                let alerts = alerts.clone();
                async move {
                    let report = alerts.evaluate_now();
                    if !report.fired.is_empty() || !report.resolved.is_empty() {
                        tracing::debug!(
                            "Alert pass: {} fired, {} resolved",
                            report.fired.len(),
                            report.resolved.len()
                        );
                    }
                }
            },
        )?;
        if let Ok(mut slot) = monitor.evaluator.lock() {
            *slot = Some(task);
        }
        Ok(monitor)
    }

    /// Build the monitor without a background loop; evaluate with
    /// [`AlertEngine::evaluate_now`]
    pub fn detached(config: &MonitorConfig) -> Result<Self> {
        config.validate()?;
        let recorder = Arc::new(MetricsRecorder::new(config));
        let alerts = Arc::new(AlertEngine::new(recorder.clone(), config)?);
        Ok(Self {
            recorder,
            alerts,
            evaluator: Mutex::new(None),
        })
    }

    pub fn recorder(&self) -> &Arc<MetricsRecorder> {
        &self.recorder
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn record_counter(&self, name: &str, value: f64, labels: &Labels) {
        self.recorder.record_counter(name, value, labels);
    }

    pub fn record_gauge(&self, name: &str, value: f64, labels: &Labels) {
        self.recorder.record_gauge(name, value, labels);
    }

    pub fn record_histogram(&self, name: &str, value: f64, labels: &Labels) {
        self.recorder.record_histogram(name, value, labels);
    }

    pub fn record_timer(&self, name: &str, duration: Duration, labels: &Labels) {
        self.recorder.record_timer(name, duration, labels);
    }

    pub fn get_summary(
        &self,
        name: &str,
        labels: Option<&Labels>,
        window: Duration,
    ) -> Result<MetricSummary> {
        self.recorder.get_summary(name, labels, window)
    }

    pub fn add_alert_rule(&self, rule: AlertRule) -> Result<()> {
        self.alerts.add_alert_rule(rule)
    }

    pub fn add_alert_callback(&self, callback: AlertCallback) {
        self.alerts.add_alert_callback(callback);
    }

    /// Summaries of every metric with data in `window`, plus alert state
    pub fn get_dashboard(&self, window: Duration) -> Dashboard {
        Dashboard {
            generated_at: Utc::now(),
            window_secs: window.as_secs_f64(),
            metrics: self.recorder.summaries(window),
            active_alerts: self.alerts.active_alerts(),
            history: self.alerts.history(DASHBOARD_HISTORY_LIMIT),
        }
    }

    /// Stop the evaluation loop. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let task = match self.evaluator.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.shutdown().await;
        }
    }
}
