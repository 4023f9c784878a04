//! 策略求值引擎
//!
//! 纯函数：只读取上下文与策略包，不产生副作用。
//! 顺序：策略包按给定顺序、规则按声明顺序；第一条 deny 决定 allow=false 与提示消息，
//! 之后命中的规则仍记录到 actions；改道以最早声明者为准。

use crate::policy::types::{PolicyBundle, PolicyContext, PolicyDecision, RuleEffect, RuleHit};

pub fn evaluate<'b, I>(bundles: I, ctx: &PolicyContext<'_>) -> PolicyDecision
where
    I: IntoIterator<Item = &'b PolicyBundle>,
{
    let mut decision = PolicyDecision::default();

    for bundle in bundles {
        for rule in &bundle.rules {
            if !rule.when.matches(ctx) {
                continue;
            }
            decision.actions.push(RuleHit {
                rule_id: rule.id.clone(),
                action: rule.action.clone(),
            });

            match RuleEffect::from_action(&rule.action) {
                Some(RuleEffect::Deny { message }) => {
                    if decision.allow {
                        decision.allow = false;
                        decision.message = message;
                        decision.denied_by = Some(rule.id.clone());
                    }
                }
                Some(RuleEffect::Route(target)) => {
                    if decision.route_override.is_none() {
                        decision.route_override = Some(target);
                    }
                }
                Some(RuleEffect::Note) | None => {}
            }
        }
    }

    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::TurnContext;
    use crate::policy::types::{Condition, PolicyRule, RouteOverride};

    fn rule(id: &str, when: Condition, action: &str) -> PolicyRule {
        PolicyRule {
            id: id.to_string(),
            when,
            action: action.to_string(),
        }
    }

    fn bundle(name: &str, rules: Vec<PolicyRule>) -> PolicyBundle {
        PolicyBundle {
            name: name.to_string(),
            rules,
        }
    }

    #[test]
    fn test_no_match_allows() {
        let bundles = vec![bundle(
            "b",
            vec![rule("r1", Condition::Never, "deny")],
        )];
        let turn = TurnContext::new("u1");
        let decision = evaluate(&bundles, &PolicyContext::from_turn("main", "memory.record", &turn));
        assert!(decision.allow);
        assert!(decision.actions.is_empty());
        assert_eq!(decision.route_override, None);
    }

    #[test]
    fn test_deny_wins_over_later_and_earlier_allows() {
        let bundles = vec![
            bundle("first", vec![rule("note", Condition::Always, "log:seen")]),
            bundle(
                "second",
                vec![
                    rule("block", Condition::Capability("email.send".into()), "block_with_message:consent_needed"),
                    rule("block-2", Condition::Always, "deny"),
                    rule("tone", Condition::Always, "tone:warm"),
                ],
            ),
        ];
        let turn = TurnContext::new("u1");
        let decision = evaluate(&bundles, &PolicyContext::from_turn("main", "email.send", &turn));
        assert!(!decision.allow);
        assert_eq!(decision.denied_by.as_deref(), Some("block"));
        assert!(decision.message.as_deref().unwrap_or_default().contains("permission"));
        let ids: Vec<_> = decision.actions.iter().map(|a| a.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["note", "block", "block-2", "tone"]);
    }

    #[test]
    fn test_first_route_override_wins() {
        let bundles = vec![bundle(
            "b",
            vec![
                rule("to-assessment", Condition::Always, "route:assessment"),
                rule("to-crisis", Condition::Always, "route:crisis"),
            ],
        )];
        let turn = TurnContext::new("u1");
        let decision = evaluate(&bundles, &PolicyContext::from_turn("main", "memory.record", &turn));
        assert!(decision.allow);
        assert_eq!(decision.route_override, Some(RouteOverride::Assessment));
        assert_eq!(decision.actions.len(), 2);
    }

    #[test]
    fn test_bundle_order_precedes_rule_order() {
        let bundles = vec![
            bundle("a", vec![rule("a1", Condition::Always, "route:crisis")]),
            bundle("b", vec![rule("b1", Condition::Always, "route:assessment")]),
        ];
        let turn = TurnContext::new("u1");
        let decision = evaluate(bundles.iter().rev(), &PolicyContext::from_turn("main", "x", &turn));
        assert_eq!(decision.route_override, Some(RouteOverride::Assessment));
    }

    #[test]
    fn test_crisis_text_routes() {
        let bundles = vec![bundle(
            "b",
            vec![rule("crisis", Condition::CrisisSignal(true), "route:crisis")],
        )];
        let turn = TurnContext::new("u1").with_text("I think about suicide a lot");
        let decision = evaluate(&bundles, &PolicyContext::from_turn("main", "memory.record", &turn));
        assert_eq!(decision.route_override, Some(RouteOverride::Crisis));
    }

    #[test]
    fn test_deny_is_monotonic_across_allow_rules() {
        let allow_only = vec![
            rule("n1", Condition::Always, "log:a"),
            rule("n2", Condition::Always, "flag:b"),
        ];
        let mut with_deny = allow_only.clone();
        with_deny.insert(1, rule("d", Condition::Always, "deny"));

        let turn = TurnContext::new("u1");
        let ctx = PolicyContext::from_turn("main", "x", &turn);
        assert!(evaluate(&[bundle("b", allow_only)], &ctx).allow);
        assert!(!evaluate(&[bundle("b", with_deny)], &ctx).allow);
    }
}
