use serde::{Serialize, Serializer};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Outcome {
    Allow,
    Deny,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Allow => "allow",
            Outcome::Deny => "deny",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DecisionReason {
    /// A rule matched; see [`Decision::matched_rule`].
    RuleMatched,
    /// Default deny.
    NoMatchingRule,
    /// The token failed verification. Rules were not consulted.
    InvalidToken,
    /// The engine faulted while deciding.
    InternalError,
}

impl DecisionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionReason::RuleMatched => "RuleMatched",
            DecisionReason::NoMatchingRule => "NoMatchingRule",
            DecisionReason::InvalidToken => "InvalidToken",
            DecisionReason::InternalError => "InternalError",
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one authorization call. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    outcome: Outcome,
    matched_rule: Option<String>,
    reason: DecisionReason,
    #[serde(rename = "evaluated_at_ms", serialize_with = "serialize_epoch_ms")]
    evaluated_at: SystemTime,
}

impl Decision {
    pub fn allow(rule: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Allow,
            matched_rule: Some(rule.into()),
            reason: DecisionReason::RuleMatched,
            evaluated_at: SystemTime::now(),
        }
    }

    pub fn deny(reason: DecisionReason) -> Self {
        Self {
            outcome: Outcome::Deny,
            matched_rule: None,
            reason,
            evaluated_at: SystemTime::now(),
        }
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }

    pub fn matched_rule(&self) -> Option<&str> {
        self.matched_rule.as_deref()
    }

    pub fn reason(&self) -> DecisionReason {
        self.reason
    }

    pub fn evaluated_at(&self) -> SystemTime {
        self.evaluated_at
    }

    /// Outcome, rule and reason, ignoring the timestamp.
    pub fn same_verdict(&self, other: &Decision) -> bool {
        self.outcome == other.outcome
            && self.matched_rule == other.matched_rule
            && self.reason == other.reason
    }
}

fn serialize_epoch_ms<S: Serializer>(at: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    let millis = at
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0);
    serializer.serialize_u64(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_carries_rule_name() {
        let decision = Decision::allow("self-access");
        assert!(decision.is_allowed());
        assert_eq!(decision.matched_rule(), Some("self-access"));
        assert_eq!(decision.reason(), DecisionReason::RuleMatched);
    }

    #[test]
    fn deny_has_no_rule() {
        let decision = Decision::deny(DecisionReason::InvalidToken);
        assert_eq!(decision.outcome(), Outcome::Deny);
        assert_eq!(decision.matched_rule(), None);
        assert!(decision.same_verdict(&Decision::deny(DecisionReason::InvalidToken)));
        assert!(!decision.same_verdict(&Decision::deny(DecisionReason::NoMatchingRule)));
    }

    #[test]
    fn serializes_reason_and_timestamp() {
        let value = serde_json::to_value(Decision::deny(DecisionReason::NoMatchingRule))
            .expect("serialize");
        assert_eq!(value["outcome"], "Deny");
        assert_eq!(value["reason"], "NoMatchingRule");
        assert!(value["matched_rule"].is_null());
        assert!(value["evaluated_at_ms"].as_u64().unwrap_or(0) > 0);
    }
}
