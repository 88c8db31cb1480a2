use crate::decision::{Decision, DecisionReason};
use crate::errors::AuthzError;
use crate::registry::RuleSet;
use crate::request::AuthorizationRequest;
use crate::rule::Rule;
use crate::token::ClaimSet;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Default-deny, first-match OR over a rule set snapshot.
///
/// A rule that returns an error or panics counts as a non-match; the fault is
/// logged and counted but never turns into an Allow.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleEvaluator;

impl RuleEvaluator {
    pub fn evaluate(
        &self,
        request: &AuthorizationRequest,
        claims: &ClaimSet,
        rules: &RuleSet,
    ) -> Decision {
        for rule in rules.rules() {
            if rule_matches(rule.as_ref(), request, claims) {
                return Decision::allow(rule.name());
            }
        }
        Decision::deny(DecisionReason::NoMatchingRule)
    }
}

fn rule_matches(rule: &dyn Rule, request: &AuthorizationRequest, claims: &ClaimSet) -> bool {
    let outcome = catch_unwind(AssertUnwindSafe(|| rule.matches(request, claims)));
    let err = match outcome {
        Ok(Ok(matched)) => return matched,
        Ok(Err(err)) => err,
        Err(panic) => AuthzError::rule_fault(rule.name(), panic_message(panic.as_ref())),
    };
    tracing::warn!(rule = %rule.name(), error = %err, "rule evaluation failed; treating as no match");
    metrics::counter!("warden_rule_errors_total", "rule" => rule.name().to_string()).increment(1);
    false
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AuthzResult;
    use crate::registry::RuleRegistry;
    use crate::request::Method;
    use crate::rule::{AdminOverrideRule, FnRule, SelfAccessRule};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(path: &str) -> AuthorizationRequest {
        AuthorizationRequest::new(Method::Get, "api").with_path(path)
    }

    fn evaluate(rules: Vec<Arc<dyn Rule>>, request: &AuthorizationRequest, claims: &ClaimSet) -> Decision {
        let registry = RuleRegistry::new();
        let set = registry.load("test", rules);
        RuleEvaluator.evaluate(request, claims, &set)
    }

    #[test]
    fn empty_set_denies() {
        let claims = ClaimSet::for_tests("u1", None, "admin");
        let decision = evaluate(Vec::new(), &request("/api/v1/users/u1"), &claims);
        assert!(!decision.is_allowed());
        assert_eq!(decision.reason(), DecisionReason::NoMatchingRule);
    }

    #[test]
    fn always_true_rule_flips_to_allow() {
        let claims = ClaimSet::for_tests("u1", None, "user");
        let decision = evaluate(
            vec![Arc::new(FnRule::new("always", |_, _| Ok(true)))],
            &request("/anything"),
            &claims,
        );
        assert!(decision.is_allowed());
        assert_eq!(decision.matched_rule(), Some("always"));
    }

    #[test]
    fn first_matching_rule_is_reported() {
        let claims = ClaimSet::for_tests("u1", None, "admin");
        let decision = evaluate(
            vec![
                Arc::new(SelfAccessRule::new("self-access")),
                Arc::new(AdminOverrideRule::new("admin-override")),
            ],
            &request("/api/v1/users/u1"),
            &claims,
        );
        assert_eq!(decision.matched_rule(), Some("self-access"));
    }

    #[test]
    fn short_circuit_is_not_observable_in_outcome() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let claims = ClaimSet::for_tests("u1", None, "user");
        let rules: Vec<Arc<dyn Rule>> = vec![
            Arc::new(FnRule::new("yes", |_, _| Ok(true))),
            Arc::new(FnRule::new("counted", move |_, _| {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            })),
        ];
        let decision = evaluate(rules, &request("/"), &claims);
        assert!(decision.is_allowed());
        assert_eq!(decision.matched_rule(), Some("yes"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn erroring_rule_is_a_non_match() {
        let claims = ClaimSet::for_tests("u1", None, "user");
        let failing: Arc<dyn Rule> = Arc::new(FnRule::new("broken", |_, _| -> AuthzResult<bool> {
            Err(AuthzError::rule_fault("broken", "lookup failed"))
        }));
        let decision = evaluate(vec![failing.clone()], &request("/"), &claims);
        assert_eq!(decision.reason(), DecisionReason::NoMatchingRule);

        let decision = evaluate(
            vec![failing, Arc::new(FnRule::new("fallback", |_, _| Ok(true)))],
            &request("/"),
            &claims,
        );
        assert_eq!(decision.matched_rule(), Some("fallback"));
    }

    #[test]
    fn panicking_rule_is_a_non_match() {
        let claims = ClaimSet::for_tests("u1", None, "user");
        let decision = evaluate(
            vec![
                Arc::new(FnRule::new("explodes", |_, _| panic!("rule bug"))),
                Arc::new(SelfAccessRule::new("self-access")),
            ],
            &request("/api/v1/users/u1"),
            &claims,
        );
        assert_eq!(decision.matched_rule(), Some("self-access"));
    }

    #[test]
    fn panic_message_extracts_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "panic");
    }
}
