//! Scope selectors: the `target_id` of a subscription request, parsed once.

use crate::error::{RealtimeError, RealtimeResult};
use crate::realtime::topics::{SubscriptionType, SYSTEM_TOPIC};

/// What a subscription is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeSelector {
    /// `"all"` or no target: the unqualified namespace topic.
    All,
    Line(String),
    Equipment(String),
    Escalation(String),
    Priority(String),
    /// No recognized prefix. Used verbatim as the qualifier, which makes it
    /// a line id for `downtime` and a priority tier for `escalation`.
    Bare(String),
}

impl ScopeSelector {
    pub fn parse(target_id: Option<&str>) -> RealtimeResult<Self> {
        let Some(raw) = target_id.map(str::trim) else {
            return Ok(Self::All);
        };
        if raw.is_empty() {
            return Err(RealtimeError::validation("target_id must not be empty"));
        }
        if raw.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }

        let prefixed = raw.split_once(':').and_then(|(prefix, value)| {
            let make: fn(String) -> Self = match prefix {
                "line" => Self::Line,
                "equipment" => Self::Equipment,
                "escalation" => Self::Escalation,
                "priority" => Self::Priority,
                _ => return None,
            };
            Some((make, value.trim()))
        });

        match prefixed {
            Some((_, "")) => Err(RealtimeError::validation(format!(
                "target_id '{raw}' has an empty value"
            ))),
            Some((make, value)) => Ok(make(value.to_string())),
            None => Ok(Self::Bare(raw.to_string())),
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Line(_) => "line",
            Self::Equipment(_) => "equipment",
            Self::Escalation(_) => "escalation",
            Self::Priority(_) => "priority",
            Self::Bare(_) => "bare",
        }
    }

    fn value(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Line(v)
            | Self::Equipment(v)
            | Self::Escalation(v)
            | Self::Priority(v)
            | Self::Bare(v) => Some(v),
        }
    }

    fn applies_to(&self, kind: SubscriptionType) -> bool {
        use SubscriptionType as T;
        match self {
            Self::All | Self::Bare(_) => true,
            Self::Line(_) => matches!(
                kind,
                T::Line
                    | T::Production
                    | T::Oee
                    | T::Downtime
                    | T::Andon
                    | T::Quality
                    | T::Changeover
            ),
            Self::Equipment(_) => {
                matches!(kind, T::Equipment | T::Production | T::Oee | T::Downtime)
            }
            Self::Escalation(_) | Self::Priority(_) => kind == T::Escalation,
        }
    }
}

/// Topic key for a subscription of `kind` scoped by `scope`.
///
/// `system` subscriptions always map to the shared system topic. Scopes
/// whose prefix does not apply to `kind` are rejected.
pub fn subscription_topic(kind: SubscriptionType, scope: &ScopeSelector) -> RealtimeResult<String> {
    if kind == SubscriptionType::System {
        return Ok(SYSTEM_TOPIC.to_string());
    }
    if !scope.applies_to(kind) {
        return Err(RealtimeError::validation(format!(
            "'{}:' scope is not valid for '{kind}' subscriptions",
            scope.prefix()
        )));
    }
    Ok(match scope.value() {
        None => kind.wildcard_topic(),
        Some(value) => kind.topic(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(kind: &str, target: Option<&str>) -> RealtimeResult<String> {
        let kind: SubscriptionType = kind.parse().unwrap();
        subscription_topic(kind, &ScopeSelector::parse(target)?)
    }

    #[test]
    fn parses_prefixes() {
        assert_eq!(
            ScopeSelector::parse(Some("line:L7")).unwrap(),
            ScopeSelector::Line("L7".into())
        );
        assert_eq!(
            ScopeSelector::parse(Some("priority:high")).unwrap(),
            ScopeSelector::Priority("high".into())
        );
        assert_eq!(ScopeSelector::parse(Some("ALL")).unwrap(), ScopeSelector::All);
        assert_eq!(ScopeSelector::parse(None).unwrap(), ScopeSelector::All);
    }

    #[test]
    fn unknown_prefix_is_kept_bare() {
        assert_eq!(
            ScopeSelector::parse(Some("cell:C2")).unwrap(),
            ScopeSelector::Bare("cell:C2".into())
        );
    }

    #[test]
    fn empty_values_are_rejected() {
        assert!(ScopeSelector::parse(Some("  ")).is_err());
        assert!(ScopeSelector::parse(Some("line:")).is_err());
    }

    #[test]
    fn downtime_line_scope_maps_to_downtime_topic() {
        assert_eq!(topic("downtime", Some("line:L7")).unwrap(), "downtime:L7");
        assert_eq!(topic("downtime", Some("equipment:EQ-1")).unwrap(), "downtime:EQ-1");
    }

    #[test]
    fn bare_fallback_is_preserved() {
        assert_eq!(topic("downtime", Some("L7")).unwrap(), "downtime:L7");
        assert_eq!(topic("escalation", Some("high")).unwrap(), "escalation:high");
    }

    #[test]
    fn escalation_scopes() {
        assert_eq!(topic("escalation", Some("priority:high")).unwrap(), "escalation:high");
        assert_eq!(topic("escalation", Some("escalation:ESC-9")).unwrap(), "escalation:ESC-9");
    }

    #[test]
    fn all_maps_to_namespace_topic() {
        assert_eq!(topic("andon", Some("all")).unwrap(), "andon");
        assert_eq!(topic("job", None).unwrap(), "job");
    }

    #[test]
    fn system_ignores_scope() {
        assert_eq!(topic("system", Some("whatever")).unwrap(), SYSTEM_TOPIC);
        assert_eq!(topic("system", Some("priority:high")).unwrap(), SYSTEM_TOPIC);
    }

    #[test]
    fn inapplicable_prefixes_are_rejected() {
        let err = topic("downtime", Some("priority:high")).unwrap_err();
        assert!(matches!(err, RealtimeError::Validation(_)));
        assert!(topic("job", Some("line:L1")).is_err());
        assert!(topic("equipment", Some("line:L1")).is_err());
        assert!(topic("line", Some("escalation:E1")).is_err());
    }
}
