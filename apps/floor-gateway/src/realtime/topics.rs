//! Topic namespaces and key construction.
//!
//! Topic keys are opaque strings to the subscription index. A key is either
//! an unqualified namespace (`"downtime"`) or `"<namespace>:<qualifier>"`
//! (`"downtime:L7"`).

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Namespaces a client may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    Line,
    Equipment,
    Job,
    Production,
    Oee,
    Downtime,
    Escalation,
    Andon,
    Quality,
    Changeover,
    System,
}

impl SubscriptionType {
    pub const ALL: [SubscriptionType; 11] = [
        Self::Line,
        Self::Equipment,
        Self::Job,
        Self::Production,
        Self::Oee,
        Self::Downtime,
        Self::Escalation,
        Self::Andon,
        Self::Quality,
        Self::Changeover,
        Self::System,
    ];

    pub fn namespace(self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Equipment => "equipment",
            Self::Job => "job",
            Self::Production => "production",
            Self::Oee => "oee",
            Self::Downtime => "downtime",
            Self::Escalation => "escalation",
            Self::Andon => "andon",
            Self::Quality => "quality",
            Self::Changeover => "changeover",
            Self::System => "system",
        }
    }

    /// The unqualified topic for this namespace (`target_id = "all"`).
    pub fn wildcard_topic(self) -> String {
        self.namespace().to_string()
    }

    /// `"<namespace>:<qualifier>"`.
    pub fn topic(self, qualifier: &str) -> String {
        format!("{}:{}", self.namespace(), qualifier)
    }

    pub fn supported() -> Vec<&'static str> {
        Self::ALL.iter().map(|t| t.namespace()).collect()
    }
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

impl FromStr for SubscriptionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.namespace() == wanted)
            .ok_or_else(|| format!("unknown subscription type '{s}'"))
    }
}

/// System-wide topic shared by every client that subscribes to `system`.
pub const SYSTEM_TOPIC: &str = "system";
