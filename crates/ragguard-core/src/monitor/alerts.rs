//! Threshold alerting with sustain-duration hysteresis and cooldown
//!
//! Each evaluation summarizes only the observations recorded since the rule's
//! previous evaluation, so one outlier can satisfy the condition for at most
//! one pass. A rule fires only after its condition has held on every pass for
//! at least `sustain_duration`. A fired alert stays active until the
//! condition clears, at which point it is resolved and kept in the history
//! ring.

use super::metrics::{Labels, MetricSummary, MetricsRecorder};
use crate::config::MonitorConfig;
use crate::error::{RagGuardError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Lookback for a rule's first evaluation
const FIRST_PASS_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Comparator {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::GreaterOrEqual => value >= threshold,
            Self::LessThan => value < threshold,
            Self::LessOrEqual => value <= threshold,
            Self::Equal => (value - threshold).abs() < f64::EPSILON,
            Self::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::GreaterOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessOrEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    #[default]
    Warning,
    Error,
    Critical,
}

/// Which summary statistic a rule compares against its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatistic {
    #[default]
    Mean,
    Latest,
    Min,
    Max,
    Median,
    P95,
    P99,
    Sum,
    Rate,
    Count,
}

impl AlertStatistic {
    pub fn pick(self, summary: &MetricSummary) -> f64 {
        match self {
            Self::Mean => summary.mean,
            Self::Latest => summary.latest,
            Self::Min => summary.min,
            Self::Max => summary.max,
            Self::Median => summary.median,
            Self::P95 => summary.p95,
            Self::P99 => summary.p99,
            Self::Sum => summary.sum,
            Self::Rate => summary.rate_per_sec,
            Self::Count => summary.count as f64,
        }
    }
}

/// A threshold rule over one metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,

    pub metric_name: String,

    /// Restrict to one label set; `None` merges all series of the metric
    #[serde(default)]
    pub labels: Option<Labels>,

    pub threshold: f64,

    pub comparator: Comparator,

    #[serde(default)]
    pub level: AlertLevel,

    #[serde(default)]
    pub statistic: AlertStatistic,

    /// How long the condition must hold before the rule fires
    #[serde(default = "default_sustain", with = "crate::config::secs")]
    pub sustain_duration: Duration,

    /// Minimum time between two firings of the same rule
    #[serde(default = "default_cooldown", with = "crate::config::secs")]
    pub cooldown: Duration,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Custom message; a description of the breach is generated otherwise
    #[serde(default)]
    pub message: Option<String>,
}

fn default_sustain() -> Duration {
    Duration::from_secs(60)
}

fn default_cooldown() -> Duration {
    Duration::from_secs(300)
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    pub fn new(
        name: impl Into<String>,
        metric_name: impl Into<String>,
        comparator: Comparator,
        threshold: f64,
    ) -> Self {
        Self {
            name: name.into(),
            metric_name: metric_name.into(),
            labels: None,
            threshold,
            comparator,
            level: AlertLevel::default(),
            statistic: AlertStatistic::default(),
            sustain_duration: default_sustain(),
            cooldown: default_cooldown(),
            enabled: true,
            message: None,
        }
    }

    pub fn with_sustain(mut self, sustain: Duration) -> Self {
        self.sustain_duration = sustain;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_level(mut self, level: AlertLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_statistic(mut self, statistic: AlertStatistic) -> Self {
        self.statistic = statistic;
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.metric_name.trim().is_empty() {
            return Err(RagGuardError::Config(
                "alert rule needs a name and a metric_name".to_string(),
            ));
        }
        if !self.threshold.is_finite() {
            return Err(RagGuardError::Config(format!(
                "alert rule '{}': threshold must be finite",
                self.name
            )));
        }
        Ok(())
    }

    /// True when the comparator holds and the breach has lasted the full
    /// sustain duration
    pub fn evaluate(&self, current_value: f64, observed_duration: Duration) -> bool {
        self.comparator.holds(current_value, self.threshold)
            && observed_duration >= self.sustain_duration
    }

    fn describe(&self, value: f64) -> String {
        match &self.message {
            Some(message) => message.clone(),
            None => format!(
                "{} {:?} of {} is {:.2} ({} {})",
                self.name,
                self.statistic,
                self.metric_name,
                value,
                self.comparator.symbol(),
                self.threshold
            ),
        }
    }
}

/// A fired alert, resolved in place when its condition clears
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub id: u64,
    pub rule_name: String,
    pub metric_name: String,
    pub level: AlertLevel,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub fired_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl AlertEvent {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Notification hook; errors and panics are logged and contained
pub type AlertCallback = Arc<dyn Fn(&AlertEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct RuleState {
    last_evaluated: Option<Instant>,
    breach_started: Option<Instant>,
    last_fired: Option<Instant>,
}

#[derive(Default)]
struct EngineState {
    rule_states: HashMap<String, RuleState>,
    active: BTreeMap<String, AlertEvent>,
    history: VecDeque<AlertEvent>,
}

/// Outcome of one evaluation pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct EvaluationReport {
    pub evaluated: usize,
    pub fired: Vec<String>,
    pub resolved: Vec<String>,
    pub suppressed: Vec<String>,
}

/// Evaluates alert rules against recent metric summaries
pub struct AlertEngine {
    recorder: Arc<MetricsRecorder>,
    rules: RwLock<BTreeMap<String, AlertRule>>,
    callbacks: RwLock<Vec<AlertCallback>>,
    state: Mutex<EngineState>,
    max_history: usize,
    next_id: AtomicU64,
    suppressed_total: AtomicU64,
    callback_failures: AtomicU64,
}

impl AlertEngine {
    pub fn new(recorder: Arc<MetricsRecorder>, config: &MonitorConfig) -> Result<Self> {
        let engine = Self {
            recorder,
            rules: RwLock::new(BTreeMap::new()),
            callbacks: RwLock::new(Vec::new()),
            state: Mutex::new(EngineState::default()),
            max_history: config.max_history.max(1),
            next_id: AtomicU64::new(1),
            suppressed_total: AtomicU64::new(0),
            callback_failures: AtomicU64::new(0),
        };
        for rule in &config.alert_rules {
            engine.add_alert_rule(rule.clone())?;
        }
        Ok(engine)
    }

    /// Add or replace a rule by name
    pub fn add_alert_rule(&self, rule: AlertRule) -> Result<()> {
        rule.validate()?;
        let mut rules = write_lock(&self.rules);
        if rules.insert(rule.name.clone(), rule).is_some() {
            tracing::debug!("Replaced existing alert rule");
        }
        Ok(())
    }

    /// Remove a rule; an active alert for it is resolved
    pub fn remove_alert_rule(&self, name: &str) -> bool {
        let removed = write_lock(&self.rules).remove(name).is_some();
        if removed {
            let mut state = lock(&self.state);
            state.rule_states.remove(name);
            if let Some(event) = state.active.remove(name) {
                resolve_in_history(&mut state.history, event.id, Utc::now());
            }
        }
        removed
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        read_lock(&self.rules).values().cloned().collect()
    }

    pub fn add_alert_callback(&self, callback: AlertCallback) {
        write_lock(&self.callbacks).push(callback);
    }

    pub fn active_alerts(&self) -> Vec<AlertEvent> {
        lock(&self.state).active.values().cloned().collect()
    }

    /// Most recent events first, resolved ones included
    pub fn history(&self, limit: usize) -> Vec<AlertEvent> {
        lock(&self.state)
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Firings skipped because the rule was still cooling down
    pub fn suppressed_count(&self) -> u64 {
        self.suppressed_total.load(Ordering::Relaxed)
    }

    pub fn callback_failures(&self) -> u64 {
        self.callback_failures.load(Ordering::Relaxed)
    }

    /// Run one evaluation pass over all enabled rules
    pub fn evaluate_now(&self) -> EvaluationReport {
        self.recorder.prune_stale();
        let now = Instant::now();
        let rules: Vec<AlertRule> = read_lock(&self.rules)
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect();

        let mut report = EvaluationReport::default();
        let mut fired_events = Vec::new();

        for rule in rules {
            report.evaluated += 1;
            let since = lock(&self.state)
                .rule_states
                .get(&rule.name)
                .and_then(|s| s.last_evaluated)
                .filter(|last| *last < now);
            let summary = match since {
                Some(since) => {
                    self.recorder
                        .get_summary_since(&rule.metric_name, rule.labels.as_ref(), since)
                }
                None => self.recorder.get_summary(
                    &rule.metric_name,
                    rule.labels.as_ref(),
                    FIRST_PASS_WINDOW,
                ),
            };
            let value = match summary {
                Ok(summary) => Some(rule.statistic.pick(&summary)),
                Err(RagGuardError::MetricNotFound(_)) | Err(RagGuardError::NoData { .. }) => None,
                Err(e) => {
                    tracing::warn!("Alert rule {} could not read metrics: {}", rule.name, e);
                    None
                }
            };

            let mut state = lock(&self.state);
            let EngineState {
                rule_states,
                active,
                history,
            } = &mut *state;
            let rule_state = rule_states.entry(rule.name.clone()).or_default();
            rule_state.last_evaluated = Some(now);

            let holds = value.is_some_and(|v| rule.comparator.holds(v, rule.threshold));
            let observed = if holds {
                let started = *rule_state.breach_started.get_or_insert(now);
                now.duration_since(started)
            } else {
                rule_state.breach_started = None;
                Duration::ZERO
            };

            match value {
                Some(value) if rule.evaluate(value, observed) => {
                    if active.contains_key(&rule.name) {
                        continue;
                    }
                    let cooling = rule_state
                        .last_fired
                        .is_some_and(|last| now.duration_since(last) < rule.cooldown);
                    if cooling {
                        self.suppressed_total.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("Alert {} suppressed during cooldown", rule.name);
                        report.suppressed.push(rule.name.clone());
                        continue;
                    }

                    rule_state.last_fired = Some(now);
                    let event = AlertEvent {
                        id: self.next_id.fetch_add(1, Ordering::Relaxed),
                        rule_name: rule.name.clone(),
                        metric_name: rule.metric_name.clone(),
                        level: rule.level,
                        value,
                        threshold: rule.threshold,
                        message: rule.describe(value),
                        fired_at: Utc::now(),
                        resolved_at: None,
                    };
                    tracing::warn!("Alert fired [{:?}]: {}", event.level, event.message);

                    active.insert(rule.name.clone(), event.clone());
                    history.push_back(event.clone());
                    while history.len() > self.max_history {
                        history.pop_front();
                    }
                    report.fired.push(rule.name.clone());
                    fired_events.push(event);
                }
                _ if !holds => {
                    if let Some(event) = active.remove(&rule.name) {
                        tracing::info!("Alert resolved: {}", rule.name);
                        resolve_in_history(history, event.id, Utc::now());
                        report.resolved.push(rule.name.clone());
                    }
                }
                _ => {}
            }
        }

        for event in &fired_events {
            self.notify(event);
        }
        report
    }

    fn notify(&self, event: &AlertEvent) {
        let callbacks: Vec<AlertCallback> = read_lock(&self.callbacks).clone();
        for callback in callbacks {
            match std::panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.callback_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("Alert callback failed for {}: {}", event.rule_name, e);
                }
                Err(_) => {
                    self.callback_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("Alert callback panicked for {}", event.rule_name);
                }
            }
        }
    }
}

fn resolve_in_history(history: &mut VecDeque<AlertEvent>, id: u64, at: DateTime<Utc>) {
    if let Some(entry) = history.iter_mut().rev().find(|e| e.id == id) {
        entry.resolved_at = Some(at);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn engine() -> (Arc<MetricsRecorder>, AlertEngine) {
        let config = MonitorConfig::default();
        let recorder = Arc::new(MetricsRecorder::new(&config));
        let engine = AlertEngine::new(recorder.clone(), &config).unwrap();
        (recorder, engine)
    }

    fn latency_rule() -> AlertRule {
        AlertRule::new("high_latency", "latency_ms", Comparator::GreaterThan, 100.0)
            .with_sustain(Duration::from_secs(2))
            .with_cooldown(Duration::from_secs(60))
            .with_statistic(AlertStatistic::Latest)
    }

    async fn step(recorder: &MetricsRecorder, engine: &AlertEngine, value: f64) -> EvaluationReport {
        tokio::time::advance(Duration::from_millis(250)).await;
        recorder.record_gauge("latency_ms", value, &Labels::new());
        engine.evaluate_now()
    }

    #[test]
    fn test_rule_evaluate_requires_full_sustain() {
        let rule = latency_rule();
        assert!(!rule.evaluate(150.0, Duration::from_millis(500)));
        assert!(rule.evaluate(150.0, Duration::from_secs(2)));
        assert!(!rule.evaluate(50.0, Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_spike_does_not_fire() {
        let (recorder, engine) = engine();
        engine.add_alert_rule(latency_rule()).unwrap();

        // 0.5s above threshold, then back down
        for _ in 0..2 {
            step(&recorder, &engine, 150.0).await;
        }
        for _ in 0..12 {
            let report = step(&recorder, &engine, 50.0).await;
            assert!(report.fired.is_empty());
        }
        assert!(engine.active_alerts().is_empty());
        assert!(engine.history(10).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_spike_cannot_carry_default_statistic() {
        let (recorder, engine) = engine();
        let rule = AlertRule::new("high_latency", "latency_ms", Comparator::GreaterThan, 100.0)
            .with_sustain(Duration::from_secs(2));
        assert_eq!(rule.statistic, AlertStatistic::Mean);
        engine.add_alert_rule(rule).unwrap();

        step(&recorder, &engine, 10_000.0).await;
        for _ in 0..16 {
            let report = step(&recorder, &engine, 50.0).await;
            assert!(report.fired.is_empty());
        }
        assert!(engine.history(10).is_empty());

        let mut fired = false;
        for _ in 0..12 {
            if !step(&recorder, &engine, 150.0).await.fired.is_empty() {
                fired = true;
                break;
            }
        }
        assert!(fired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_pass_sees_only_fresh_points() {
        let (recorder, engine) = engine();
        engine
            .add_alert_rule(
                AlertRule::new("busy", "queue_depth", Comparator::GreaterThan, 10.0)
                    .with_sustain(Duration::ZERO),
            )
            .unwrap();

        recorder.record_gauge("queue_depth", 40.0, &Labels::new());
        assert_eq!(engine.evaluate_now().fired, vec!["busy".to_string()]);

        tokio::time::advance(Duration::from_secs(5)).await;
        recorder.record_gauge("queue_depth", 2.0, &Labels::new());
        recorder.record_gauge("queue_depth", 4.0, &Labels::new());
        assert_eq!(engine.evaluate_now().resolved, vec!["busy".to_string()]);

        // Nothing new since the last pass reads as no data
        tokio::time::advance(Duration::from_secs(5)).await;
        let report = engine.evaluate_now();
        assert!(report.fired.is_empty() && report.resolved.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_breach_fires_then_resolves() {
        let (recorder, engine) = engine();
        engine.add_alert_rule(latency_rule()).unwrap();

        let mut fired_at_step = None;
        for i in 0..12 {
            let report = step(&recorder, &engine, 150.0).await;
            if !report.fired.is_empty() {
                fired_at_step = Some(i);
                break;
            }
        }
        // Breach starts at step 0; 8 steps of 250ms cover the 2s sustain
        assert_eq!(fired_at_step, Some(8));
        assert_eq!(engine.active_alerts().len(), 1);

        let report = step(&recorder, &engine, 20.0).await;
        assert_eq!(report.resolved, vec!["high_latency".to_string()]);
        assert!(engine.active_alerts().is_empty());

        let history = engine.history(10);
        assert_eq!(history.len(), 1);
        assert!(history[0].is_resolved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refire_within_cooldown_is_suppressed() {
        let (recorder, engine) = engine();
        engine.add_alert_rule(latency_rule()).unwrap();

        for _ in 0..10 {
            step(&recorder, &engine, 150.0).await;
        }
        step(&recorder, &engine, 20.0).await;
        for _ in 0..10 {
            step(&recorder, &engine, 150.0).await;
        }

        assert_eq!(engine.history(10).len(), 1);
        assert!(engine.suppressed_count() >= 1);
        assert!(engine.active_alerts().is_empty());

        // After the cooldown the rule can fire again
        tokio::time::advance(Duration::from_secs(60)).await;
        for _ in 0..10 {
            step(&recorder, &engine, 150.0).await;
        }
        assert_eq!(engine.history(10).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_callbacks_are_isolated() {
        let (recorder, engine) = engine();
        engine
            .add_alert_rule(latency_rule().with_sustain(Duration::ZERO))
            .unwrap();

        let delivered = Arc::new(AtomicUsize::new(0));
        engine.add_alert_callback(Arc::new(|_: &AlertEvent| -> anyhow::Result<()> {
            Err(anyhow::anyhow!("pager offline"))
        }));
        engine.add_alert_callback(Arc::new(|_: &AlertEvent| -> anyhow::Result<()> {
            panic!("bad callback")
        }));
        let counter = delivered.clone();
        engine.add_alert_callback(Arc::new(move |event: &AlertEvent| -> anyhow::Result<()> {
            assert_eq!(event.rule_name, "high_latency");
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let report = step(&recorder, &engine, 500.0).await;
        assert_eq!(report.fired.len(), 1);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(engine.callback_failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_and_removed_rules() {
        let (recorder, engine) = engine();
        let mut rule = latency_rule().with_sustain(Duration::ZERO);
        rule.enabled = false;
        engine.add_alert_rule(rule).unwrap();

        let report = step(&recorder, &engine, 500.0).await;
        assert_eq!(report.evaluated, 0);

        engine
            .add_alert_rule(latency_rule().with_sustain(Duration::ZERO))
            .unwrap();
        let report = step(&recorder, &engine, 500.0).await;
        assert_eq!(report.fired.len(), 1);

        assert!(engine.remove_alert_rule("high_latency"));
        assert!(engine.active_alerts().is_empty());
        assert!(engine.history(1)[0].is_resolved());
    }

    #[test]
    fn test_rule_yaml_defaults() {
        let yaml = "name: errors\nmetric_name: calls\nthreshold: 5\ncomparator: \">=\"\n";
        let rule: AlertRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.comparator, Comparator::GreaterOrEqual);
        assert_eq!(rule.level, AlertLevel::Warning);
        assert_eq!(rule.statistic, AlertStatistic::Mean);
        assert!(rule.enabled);
        assert_eq!(rule.cooldown, Duration::from_secs(300));
    }
}
