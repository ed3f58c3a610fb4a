//! Periodic per-connection health scoring and alerting.
//!
//! ```text
//! score = 0.30·stability + 0.25·activity_recency + 0.15·subscription_efficiency
//!       + 0.20·network_quality + 0.10·uptime_ratio
//! ```
//!
//! Alerts are submitted back through the dispatcher as system-wide events.
//! They repeat once per tick while the condition holds. Submission never
//! waits for queue space: when the queue is full an alert is dropped and
//! counted, and the next tick raises it again.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use floor_common::id::{prefix, prefixed_ulid};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::Instant;

use super::dispatcher::Dispatcher;
use super::event::{Event, EventType, Priority, TargetSelector};
use super::history::RingBuffer;
use super::registry::{Connection, ConnectionId, ConnectionRegistry};

const STABILITY_WEIGHT: f64 = 0.30;
const RECENCY_WEIGHT: f64 = 0.25;
const EFFICIENCY_WEIGHT: f64 = 0.15;
const NETWORK_WEIGHT: f64 = 0.20;
const UPTIME_WEIGHT: f64 = 0.10;

/// Idle time at which activity recency reaches zero.
const RECENCY_WINDOW_SECS: f64 = 300.0;
/// Topic count above which subscription efficiency starts to drop.
const EFFICIENT_TOPIC_COUNT: f64 = 10.0;
/// Uptime at which the uptime ratio saturates.
const FULL_UPTIME_SECS: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthStatus {
    pub const ALL: [HealthStatus; 5] = [
        Self::Excellent,
        Self::Good,
        Self::Fair,
        Self::Poor,
        Self::Critical,
    ];

    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Self::Excellent
        } else if score >= 0.8 {
            Self::Good
        } else if score >= 0.6 {
            Self::Fair
        } else if score >= 0.3 {
            Self::Poor
        } else {
            Self::Critical
        }
    }

    pub fn is_degraded(self) -> bool {
        matches!(self, Self::Poor | Self::Critical)
    }
}

/// Raw inputs of a health computation.
#[derive(Debug, Clone, Copy)]
pub struct HealthInputs {
    pub messages_sent: u64,
    pub errors: u64,
    pub idle: Duration,
    pub topic_count: usize,
    pub uptime: Duration,
}

impl HealthInputs {
    pub fn from_connection(connection: &Connection, now: Instant) -> Self {
        Self {
            messages_sent: connection.counters.messages_sent,
            errors: connection.counters.errors,
            idle: connection.idle_for(now),
            topic_count: connection.subscribed_topics.len(),
            uptime: connection.uptime(now),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthComponents {
    pub stability: f64,
    pub activity_recency: f64,
    pub subscription_efficiency: f64,
    pub network_quality: f64,
    pub uptime_ratio: f64,
}

impl HealthComponents {
    pub fn compute(inputs: &HealthInputs) -> Self {
        let error_rate = inputs.errors as f64 / inputs.messages_sent.max(1) as f64;
        let stability = (1.0 - error_rate).clamp(0.0, 1.0);
        Self {
            stability,
            activity_recency: (1.0 - inputs.idle.as_secs_f64() / RECENCY_WINDOW_SECS).max(0.0),
            subscription_efficiency: (EFFICIENT_TOPIC_COUNT / inputs.topic_count.max(1) as f64)
                .min(1.0),
            // Same error-rate signal as stability for now.
            network_quality: stability,
            uptime_ratio: (inputs.uptime.as_secs_f64() / FULL_UPTIME_SECS).min(1.0),
        }
    }

    /// Weighted composite, clamped to `[0, 1]`.
    pub fn score(&self) -> f64 {
        (STABILITY_WEIGHT * self.stability
            + RECENCY_WEIGHT * self.activity_recency
            + EFFICIENCY_WEIGHT * self.subscription_efficiency
            + NETWORK_WEIGHT * self.network_quality
            + UPTIME_WEIGHT * self.uptime_ratio)
            .clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSample {
    pub recorded_at: DateTime<Utc>,
    pub score: f64,
    pub status: HealthStatus,
    pub components: HealthComponents,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealthSample {
    pub recorded_at: DateTime<Utc>,
    pub connections: usize,
    pub average_score: f64,
    pub distribution: BTreeMap<HealthStatus, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ConnectionWarning,
    ConnectionCritical,
    SystemCritical,
}

impl AlertKind {
    pub fn event_type(self) -> &'static str {
        match self {
            Self::ConnectionWarning => EventType::CONNECTION_WARNING,
            Self::ConnectionCritical => EventType::CONNECTION_CRITICAL,
            Self::SystemCritical => EventType::SYSTEM_CRITICAL,
        }
    }

    pub fn priority(self) -> Priority {
        match self {
            Self::ConnectionWarning => Priority::Normal,
            Self::ConnectionCritical | Self::SystemCritical => Priority::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthAlert {
    pub alert_id: String,
    pub kind: AlertKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<ConnectionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub score: f64,
    pub raised_at: DateTime<Utc>,
}

/// Summary of one monitor tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub evaluated: usize,
    pub average_score: f64,
    /// System alert first, then connection alerts.
    pub alerts: Vec<HealthAlert>,
    /// Alerts that found the dispatch queue full.
    pub alerts_dropped: usize,
}

pub struct HealthMonitor {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    system_alert_threshold: f64,
    history_capacity: usize,
    connection_history: DashMap<ConnectionId, RingBuffer<HealthSample>>,
    system_history: Mutex<RingBuffer<SystemHealthSample>>,
    alerts: Mutex<RingBuffer<HealthAlert>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<Dispatcher>,
        interval: Duration,
        history_capacity: usize,
        system_alert_threshold: f64,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            interval,
            system_alert_threshold,
            history_capacity,
            connection_history: DashMap::new(),
            system_history: Mutex::new(RingBuffer::new(history_capacity)),
            alerts: Mutex::new(RingBuffer::new(history_capacity)),
        }
    }

    /// Tick every `interval` until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // First tick fires immediately; skip it.

        tracing::info!(interval_secs = self.interval.as_secs(), "health monitor started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let report = self.tick();
                    tracing::debug!(
                        evaluated = report.evaluated,
                        average_score = report.average_score,
                        alerts = report.alerts.len(),
                        alerts_dropped = report.alerts_dropped,
                        "health tick"
                    );
                }
            }
        }
        tracing::info!("health monitor stopped");
    }

    /// Score every live connection, record history and emit alerts.
    pub fn tick(&self) -> TickReport {
        let now = Instant::now();
        let recorded_at = Utc::now();
        let connections = self.registry.snapshots();

        let mut distribution: BTreeMap<HealthStatus, usize> =
            HealthStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut total = 0.0;
        let mut alerts = Vec::new();

        for connection in &connections {
            let components = HealthComponents::compute(&HealthInputs::from_connection(connection, now));
            let score = components.score();
            let status = HealthStatus::from_score(score);

            self.registry
                .set_health(&connection.connection_id, score, status.is_degraded());
            self.connection_history
                .entry(connection.connection_id.clone())
                .or_insert_with(|| RingBuffer::new(self.history_capacity))
                .push(HealthSample {
                    recorded_at,
                    score,
                    status,
                    components,
                });

            *distribution.entry(status).or_default() += 1;
            total += score;

            let kind = match status {
                HealthStatus::Critical => Some(AlertKind::ConnectionCritical),
                HealthStatus::Poor => Some(AlertKind::ConnectionWarning),
                _ => None,
            };
            if let Some(kind) = kind {
                alerts.push(HealthAlert {
                    alert_id: prefixed_ulid(prefix::ALERT),
                    kind,
                    connection_id: Some(connection.connection_id.clone()),
                    user_id: Some(connection.user_id.clone()),
                    score,
                    raised_at: recorded_at,
                });
            }
        }

        // History of vanished connections goes with them.
        self.connection_history
            .retain(|id, _| connections.iter().any(|c| &c.connection_id == id));

        let average_score = if connections.is_empty() {
            0.0
        } else {
            total / connections.len() as f64
        };

        if !connections.is_empty() && average_score < self.system_alert_threshold {
            alerts.insert(0, HealthAlert {
                alert_id: prefixed_ulid(prefix::ALERT),
                kind: AlertKind::SystemCritical,
                connection_id: None,
                user_id: None,
                score: average_score,
                raised_at: recorded_at,
            });
        }

        self.system_history.lock().push(SystemHealthSample {
            recorded_at,
            connections: connections.len(),
            average_score,
            distribution: distribution.clone(),
        });

        let mut alerts_dropped = 0;
        for alert in &alerts {
            self.alerts.lock().push(alert.clone());
            if !self.emit(alert, &distribution) {
                alerts_dropped += 1;
            }
        }
        if alerts_dropped > 0 {
            tracing::warn!(
                dropped = alerts_dropped,
                raised = alerts.len(),
                "dispatch queue full, health alerts dropped"
            );
        }

        TickReport {
            evaluated: connections.len(),
            average_score,
            alerts,
            alerts_dropped,
        }
    }

    /// Queue the alert without waiting. Returns `false` if it was dropped.
    fn emit(&self, alert: &HealthAlert, distribution: &BTreeMap<HealthStatus, usize>) -> bool {
        let payload = match alert.kind {
            AlertKind::SystemCritical => json!({
                "alert_id": alert.alert_id,
                "average_score": alert.score,
                "threshold": self.system_alert_threshold,
                "distribution": distribution,
            }),
            _ => json!({
                "alert_id": alert.alert_id,
                "connection_id": alert.connection_id,
                "user_id": alert.user_id,
                "score": alert.score,
                "status": HealthStatus::from_score(alert.score),
            }),
        };

        tracing::warn!(
            kind = ?alert.kind,
            connection_id = alert.connection_id.as_deref().unwrap_or("-"),
            score = alert.score,
            "health alert raised"
        );

        let event = Event::new(
            alert.kind.event_type(),
            payload,
            alert.kind.priority(),
            TargetSelector::SystemWide,
        );
        match self.dispatcher.try_submit(event) {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(kind = ?alert.kind, error = %err, "health alert not queued");
                false
            }
        }
    }

    /// Oldest first; empty for unknown connections.
    pub fn connection_history(&self, connection_id: &str) -> Vec<HealthSample> {
        self.connection_history
            .get(connection_id)
            .map(|h| h.to_vec())
            .unwrap_or_default()
    }

    pub fn system_history(&self) -> Vec<SystemHealthSample> {
        self.system_history.lock().to_vec()
    }

    pub fn recent_alerts(&self) -> Vec<HealthAlert> {
        self.alerts.lock().to_vec()
    }

    /// Latest score minus the oldest retained score.
    pub fn trend(&self, connection_id: &str) -> Option<f64> {
        let history = self.connection_history.get(connection_id)?;
        Some(history.latest()?.score - history.oldest()?.score)
    }

    /// Status distribution of the connections' current scores.
    pub fn current_distribution(&self) -> (BTreeMap<HealthStatus, usize>, f64) {
        let connections = self.registry.snapshots();
        let mut distribution: BTreeMap<HealthStatus, usize> =
            HealthStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut total = 0.0;
        for c in &connections {
            *distribution.entry(HealthStatus::from_score(c.health_score)).or_default() += 1;
            total += c.health_score;
        }
        let average = if connections.is_empty() {
            0.0
        } else {
            total / connections.len() as f64
        };
        (distribution, average)
    }
}
