//! Alert Monitor
//!
//! Threshold rules evaluated against the latest pair-analytics metric
//! values. Triggered events land in a bounded FIFO history and fan out to
//! registered callbacks; a panicking callback is isolated so it cannot
//! take down the remaining callbacks or the evaluation loop.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Events kept in history before the oldest is evicted.
pub const MAX_HISTORY: usize = 100;

/// Tolerance for the `Equal` condition.
const EQUAL_EPSILON: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
    Equal,
}

impl AlertCondition {
    pub fn matches(&self, value: f64, threshold: f64) -> bool {
        match self {
            AlertCondition::Greater => value > threshold,
            AlertCondition::Less => value < threshold,
            AlertCondition::GreaterEqual => value >= threshold,
            AlertCondition::LessEqual => value <= threshold,
            AlertCondition::Equal => (value - threshold).abs() < EQUAL_EPSILON,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCondition::Greater => "greater",
            AlertCondition::Less => "less",
            AlertCondition::GreaterEqual => "greater_equal",
            AlertCondition::LessEqual => "less_equal",
            AlertCondition::Equal => "equal",
        }
    }
}

/// A registered threshold rule, unique by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub name: String,
    /// Metric key looked up in the per-pair metric map, e.g. "z_score".
    pub metric: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub symbol_pair: String,
    pub enabled: bool,
    pub triggered_count: u64,
    pub last_triggered_ms: Option<i64>,
}

impl Alert {
    pub fn new(
        name: impl Into<String>,
        condition: AlertCondition,
        metric: impl Into<String>,
        threshold: f64,
        symbol_pair: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            condition,
            threshold,
            symbol_pair: symbol_pair.into(),
            enabled: true,
            triggered_count: 0,
            last_triggered_ms: None,
        }
    }
}

/// One triggered-alert record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub ts_ms: i64,
    pub alert_name: String,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub condition: AlertCondition,
    pub symbol_pair: String,
}

/// Closed set of mutable alert fields. Anything not listed here cannot be
/// changed after registration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertUpdate {
    pub enabled: Option<bool>,
    pub threshold: Option<f64>,
    pub condition: Option<AlertCondition>,
    pub metric: Option<String>,
}

pub type AlertCallback = Arc<dyn Fn(&AlertEvent) + Send + Sync>;

/// Per-pair metric values fed into evaluation: pair -> metric -> value.
pub type MetricsByPair = HashMap<String, HashMap<String, f64>>;

#[derive(Default)]
pub struct AlertMonitor {
    alerts: RwLock<Vec<Alert>>,
    history: Mutex<VecDeque<AlertEvent>>,
    callbacks: Mutex<Vec<AlertCallback>>,
}

impl AlertMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an alert. A same-named alert is replaced.
    pub fn add_alert(&self, alert: Alert) {
        let mut alerts = self.alerts.write();
        alerts.retain(|a| a.name != alert.name);
        info!(name = %alert.name, pair = %alert.symbol_pair, "Alert added");
        alerts.push(alert);
    }

    /// Remove an alert by name. Returns true if one was removed.
    pub fn remove_alert(&self, name: &str) -> bool {
        let mut alerts = self.alerts.write();
        let before = alerts.len();
        alerts.retain(|a| a.name != name);
        let removed = alerts.len() < before;
        if removed {
            info!(name, "Alert removed");
        }
        removed
    }

    /// Apply a field update to a named alert. Returns false when no alert
    /// with that name exists.
    pub fn update_alert(&self, name: &str, update: AlertUpdate) -> bool {
        let mut alerts = self.alerts.write();
        let Some(alert) = alerts.iter_mut().find(|a| a.name == name) else {
            warn!(name, "Update requested for unknown alert");
            return false;
        };

        if let Some(enabled) = update.enabled {
            alert.enabled = enabled;
        }
        if let Some(threshold) = update.threshold {
            alert.threshold = threshold;
        }
        if let Some(condition) = update.condition {
            alert.condition = condition;
        }
        if let Some(metric) = update.metric {
            alert.metric = metric;
        }
        info!(name, "Alert updated");
        true
    }

    pub fn list_alerts(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }

    /// Look up one alert by name.
    pub fn get_alert(&self, name: &str) -> Option<Alert> {
        self.alerts.read().iter().find(|a| a.name == name).cloned()
    }

    /// Evaluate every enabled alert against the supplied metric values.
    /// Alerts whose pair or metric is absent are skipped. Returns the
    /// events triggered by this evaluation, in registration order.
    pub fn check_alerts(&self, metrics: &MetricsByPair) -> Vec<AlertEvent> {
        let mut triggered = Vec::new();

        {
            let mut alerts = self.alerts.write();
            let now_ms = Utc::now().timestamp_millis();

            for alert in alerts.iter_mut() {
                if !alert.enabled {
                    continue;
                }
                let Some(value) = metrics
                    .get(&alert.symbol_pair)
                    .and_then(|m| m.get(&alert.metric))
                else {
                    continue;
                };

                if alert.condition.matches(*value, alert.threshold) {
                    alert.triggered_count += 1;
                    alert.last_triggered_ms = Some(now_ms);
                    triggered.push(AlertEvent {
                        ts_ms: now_ms,
                        alert_name: alert.name.clone(),
                        metric: alert.metric.clone(),
                        value: *value,
                        threshold: alert.threshold,
                        condition: alert.condition,
                        symbol_pair: alert.symbol_pair.clone(),
                    });
                }
            }
        }

        for event in &triggered {
            info!(
                alert = %event.alert_name,
                metric = %event.metric,
                value = event.value,
                threshold = event.threshold,
                "Alert triggered"
            );
            self.record_event(event.clone());
            self.dispatch(event);
        }

        triggered
    }

    fn record_event(&self, event: AlertEvent) {
        let mut history = self.history.lock();
        history.push_back(event);
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    fn dispatch(&self, event: &AlertEvent) {
        // Clone the list out of the lock so a callback may itself register
        // callbacks without deadlocking.
        let callbacks: Vec<AlertCallback> = self.callbacks.lock().clone();
        for (idx, callback) in callbacks.iter().enumerate() {
            // A misbehaving callback must not stop the others.
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(callback = idx, alert = %event.alert_name, "Alert callback panicked");
            }
        }
    }

    pub fn register_callback(&self, callback: AlertCallback) {
        self.callbacks.lock().push(callback);
    }

    /// Most recent `limit` events, oldest first.
    pub fn history(&self, limit: usize) -> Vec<AlertEvent> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
        info!("Alert history cleared");
    }

    /// Install the standard preset alerts for a symbol pair.
    pub fn preset_alerts(&self, symbol_a: &str, symbol_b: &str) {
        let pair = format!("{}_{}", symbol_a, symbol_b);
        let presets = [
            (format!("High Z-Score ({pair})"), AlertCondition::Greater, "z_score", 2.0),
            (format!("Low Z-Score ({pair})"), AlertCondition::Less, "z_score", -2.0),
            (format!("Extreme High Z-Score ({pair})"), AlertCondition::Greater, "z_score", 3.0),
            (format!("Extreme Low Z-Score ({pair})"), AlertCondition::Less, "z_score", -3.0),
            (format!("Low Correlation ({pair})"), AlertCondition::Less, "correlation", 0.5),
        ];
        for (name, condition, metric, threshold) in presets {
            self.add_alert(Alert::new(name, condition, metric, threshold, pair.clone()));
        }
        info!(pair = %pair, "Preset alerts created");
    }
}
