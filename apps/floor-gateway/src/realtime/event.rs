//! Events submitted to the dispatcher and their wire envelope.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attempts allowed when a producer does not choose its own limit.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Dispatch preference. `Critical` is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    /// Highest first.
    pub const ALL: [Priority; 4] = [Self::Critical, Self::High, Self::Normal, Self::Low];

    /// Lane index, 0 for `Critical`.
    pub fn rank(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "normal" | "medium" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Who an event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    /// Every live connection.
    SystemWide,
    /// Connections subscribed to any of these topic keys.
    Topics(BTreeSet<String>),
}

impl TargetSelector {
    pub fn topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Topics(topics.into_iter().map(Into::into).collect())
    }

    pub fn topic(topic: impl Into<String>) -> Self {
        Self::topics([topic.into()])
    }

    pub fn is_system_wide(&self) -> bool {
        matches!(self, Self::SystemWide)
    }
}

/// A unit of dispatch work.
///
/// Everything except the retry counter is fixed at construction; the id and
/// the default retry limit are stamped by the dispatcher on submit.
#[derive(Debug, Clone)]
pub struct Event {
    id: u64,
    event_type: String,
    payload: Value,
    priority: Priority,
    target: TargetSelector,
    created_at: DateTime<Utc>,
    retry_count: u32,
    max_retries: Option<u32>,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        payload: Value,
        priority: Priority,
        target: TargetSelector,
    ) -> Self {
        Self {
            id: 0,
            event_type: event_type.into(),
            payload,
            priority,
            target,
            created_at: Utc::now(),
            retry_count: 0,
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn target(&self) -> &TargetSelector {
        &self.target
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub(crate) fn stamp(&mut self, id: u64, default_max_retries: u32) {
        if self.id == 0 {
            self.id = id;
        }
        self.max_retries.get_or_insert(default_max_retries);
    }

    /// Count a failed attempt. Returns `true` while another attempt is
    /// allowed, so `max_retries` bounds the total number of attempts.
    pub(crate) fn record_failed_attempt(&mut self) -> bool {
        self.retry_count += 1;
        self.retry_count < self.max_retries()
    }

    /// Serialize the outbound envelope:
    /// `{type, data, priority, timestamp, metadata}`.
    pub fn envelope_json(&self) -> serde_json::Result<String> {
        let topics: Vec<&str> = match &self.target {
            TargetSelector::SystemWide => Vec::new(),
            TargetSelector::Topics(topics) => topics.iter().map(String::as_str).collect(),
        };
        serde_json::to_string(&EventEnvelope {
            event_type: &self.event_type,
            data: &self.payload,
            priority: self.priority,
            timestamp: self.created_at,
            metadata: EnvelopeMetadata {
                event_id: self.id.to_string(),
                retry_count: self.retry_count,
                system_wide: self.target.is_system_wide(),
                topics,
            },
        })
    }
}

#[derive(Serialize)]
struct EventEnvelope<'a> {
    #[serde(rename = "type")]
    event_type: &'a str,
    data: &'a Value,
    priority: Priority,
    timestamp: DateTime<Utc>,
    metadata: EnvelopeMetadata<'a>,
}

#[derive(Serialize)]
struct EnvelopeMetadata<'a> {
    /// String form so JavaScript clients keep full precision.
    event_id: String,
    retry_count: u32,
    system_wide: bool,
    topics: Vec<&'a str>,
}

/// Lifecycle of an event inside the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Queued,
    Resolving,
    Delivering,
    Delivered,
    RetryScheduled,
    Failed,
}

/// Event type tags produced by domain collaborators and the health monitor.
pub struct EventType;

impl EventType {
    pub const PRODUCTION_UPDATE: &'static str = "production_update";
    pub const OEE_UPDATE: &'static str = "oee_update";
    pub const EQUIPMENT_STATUS: &'static str = "equipment_status";
    pub const JOB_UPDATE: &'static str = "job_update";
    pub const DOWNTIME_EVENT: &'static str = "downtime_event";
    pub const ANDON_EVENT: &'static str = "andon_event";
    pub const ESCALATION_EVENT: &'static str = "escalation_event";
    pub const QUALITY_ALERT: &'static str = "quality_alert";
    pub const CHANGEOVER_EVENT: &'static str = "changeover_event";
    pub const SYSTEM_ANNOUNCEMENT: &'static str = "system_announcement";
    pub const CONNECTION_WARNING: &'static str = "connection_warning";
    pub const CONNECTION_CRITICAL: &'static str = "connection_critical";
    pub const SYSTEM_CRITICAL: &'static str = "system_critical";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn priority_orders_critical_first() {
        let mut all = vec![Priority::Low, Priority::Critical, Priority::Normal, Priority::High];
        all.sort();
        assert_eq!(all, Priority::ALL.to_vec());
        assert_eq!(Priority::Critical.rank(), 0);
        assert_eq!(Priority::Low.rank(), 3);
    }

    #[test]
    fn priority_parses_medium_as_normal() {
        assert_eq!("Medium".parse::<Priority>(), Ok(Priority::Normal));
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn stamp_keeps_explicit_retry_limit() {
        let mut event = Event::new("x", json!({}), Priority::Low, TargetSelector::SystemWide)
            .with_max_retries(5);
        event.stamp(42, 3);
        assert_eq!(event.id(), 42);
        assert_eq!(event.max_retries(), 5);

        // A second stamp (resubmission) keeps the first id.
        event.stamp(43, 3);
        assert_eq!(event.id(), 42);
    }

    #[test]
    fn failed_attempts_are_bounded_by_max_retries() {
        let mut event = Event::new("x", json!({}), Priority::Low, TargetSelector::SystemWide);
        event.stamp(1, 3);
        assert!(event.record_failed_attempt());
        assert!(event.record_failed_attempt());
        assert!(!event.record_failed_attempt());
        assert_eq!(event.retry_count(), 3);
    }

    #[test]
    fn envelope_carries_type_data_priority_and_metadata() {
        let mut event = Event::new(
            EventType::ESCALATION_EVENT,
            json!({"escalation_id": "E1"}),
            Priority::High,
            TargetSelector::topics(["escalation:high", "escalation"]),
        );
        event.stamp(7, 3);

        let v: Value = serde_json::from_str(&event.envelope_json().unwrap()).unwrap();
        assert_eq!(v["type"], "escalation_event");
        assert_eq!(v["data"]["escalation_id"], "E1");
        assert_eq!(v["priority"], "high");
        assert!(v["timestamp"].is_string());
        assert_eq!(v["metadata"]["event_id"], "7");
        assert_eq!(v["metadata"]["system_wide"], false);
        assert_eq!(v["metadata"]["topics"], json!(["escalation", "escalation:high"]));
    }
}
