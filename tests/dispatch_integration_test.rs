//! 调度流水线集成测试：内存端口 + 内置策略包 + 内置能力

use std::sync::Arc;
use std::time::Duration;

use care_harness::capabilities::{Channel, ConsentFlags, TurnContext};
use care_harness::core::{
    BudgetResource, DispatchRequest, DispatchState, Dispatcher, HarnessError, MemoryTraceSink, RetryAdvisor,
    RetryDecision, RetryPolicy, ToolCallCounter,
};
use care_harness::policy::RouteOverride;
use care_harness::ports::{FixedClock, InMemoryStore, RecordingTransport};
use care_harness::scheduler::{FollowUpPoller, InMemoryJobQueue, JobQueue};
use care_harness::services::{
    AssessmentDefinition, AssessmentQuestion, AssessmentService, InterventionCatalog, QuestionKind, Services,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

struct Harness {
    dispatcher: Arc<Dispatcher>,
    store: Arc<InMemoryStore>,
    transport: Arc<RecordingTransport>,
    queue: Arc<InMemoryJobQueue>,
    clock: Arc<FixedClock>,
    sink: Arc<MemoryTraceSink>,
}

fn question(id: &str) -> AssessmentQuestion {
    AssessmentQuestion {
        id: id.to_string(),
        prompt: format!("Question {id}"),
        kind: QuestionKind::Scale,
        min: Some(0.0),
        max: Some(4.0),
    }
}

fn assessment_service() -> AssessmentService {
    let mut service = AssessmentService::with_builtin();
    service.add(AssessmentDefinition {
        id: "short_v1".to_string(),
        title: "Two question check".to_string(),
        questions: vec![question("q1"), question("q2")],
    });
    service
}

fn harness_at(now: DateTime<Utc>) -> Harness {
    let services = Services {
        assessment: assessment_service(),
        interventions: InterventionCatalog::builtin(),
    };
    let store = Arc::new(InMemoryStore::new(services.assessment.clone()));
    let transport = Arc::new(RecordingTransport::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let clock = Arc::new(FixedClock::new(now));
    let sink = Arc::new(MemoryTraceSink::new());
    let dispatcher = Arc::new(
        Dispatcher::builder()
            .services(services)
            .store(store.clone())
            .transport(transport.clone())
            .scheduler(queue.clone())
            .clock(clock.clone())
            .trace_sink(sink.clone())
            .build(),
    );
    Harness {
        dispatcher,
        store,
        transport,
        queue,
        clock,
        sink,
    }
}

fn harness() -> Harness {
    harness_at(Utc::now())
}

fn memory_input(importance: u8) -> Value {
    json!({ "category": "care_routine", "content": "Dad's physio is on Fridays", "importance": importance })
}

#[tokio::test]
async fn test_unknown_capability_has_no_side_effects() {
    let h = harness();
    let counter = ToolCallCounter::new();
    let report = h
        .dispatcher
        .dispatch(
            DispatchRequest::new("memory.forget", json!({})),
            TurnContext::new("u1"),
            &counter,
        )
        .await;

    assert_eq!(
        report.result,
        Err(HarnessError::CapabilityNotFound("memory.forget".to_string()))
    );
    assert_eq!(report.state, DispatchState::Failed);
    assert_eq!(report.executed, None);
    assert_eq!(report.event_names(), vec!["dispatch.received", "dispatch.failed"]);
    assert_eq!(counter.issued(), 0);
    assert!(h.store.memories().await.is_empty());
    assert!(h.transport.messages().await.is_empty());
}

#[tokio::test]
async fn test_budget_exhausted_skips_handler() {
    let h = harness();
    let counter = ToolCallCounter::new();
    let turn = TurnContext::new("u1");

    let first = h
        .dispatcher
        .dispatch(
            DispatchRequest::new("memory.record", memory_input(3)).for_agent("crisis"),
            turn.clone(),
            &counter,
        )
        .await;
    assert!(first.is_ok());

    let second = h
        .dispatcher
        .dispatch(
            DispatchRequest::new("memory.record", memory_input(3)).for_agent("crisis"),
            turn,
            &counter,
        )
        .await;
    assert_eq!(
        second.result,
        Err(HarnessError::BudgetExceeded {
            resource: BudgetResource::ToolCalls,
            used: 1,
            limit: 1,
        })
    );
    assert!(!second.event_names().contains(&"capability.invoke"));
    assert_eq!(h.store.memories().await.len(), 1);
    assert_eq!(counter.issued(), 1);
}

#[tokio::test]
async fn test_explicit_budget_overrides_agent_table() {
    let h = harness();
    let counter = ToolCallCounter::new();
    let turn = TurnContext::new("u1").with_budget(care_harness::core::Budget {
        max_input_tokens: 4000,
        max_output_tokens: 1000,
        max_tools: 0,
    });
    let report = h
        .dispatcher
        .dispatch(DispatchRequest::new("memory.record", memory_input(2)), turn, &counter)
        .await;
    assert!(matches!(
        report.result,
        Err(HarnessError::BudgetExceeded { limit: 0, .. })
    ));
}

#[tokio::test]
async fn test_deny_wins_over_route_override() {
    let h = harness();
    let counter = ToolCallCounter::new();
    // crisis-route 命中，但 admin-web-only 拒绝
    let turn = TurnContext::new("u1")
        .with_channel(Channel::Sms)
        .with_text("some days I want to die");
    let report = h
        .dispatcher
        .dispatch(DispatchRequest::new("admin.metrics", Value::Null), turn, &counter)
        .await;

    assert!(matches!(
        &report.result,
        Err(HarnessError::PolicyViolation { rule_id: Some(rule), .. }) if rule == "admin-web-only"
    ));
    let decision = report.decision.as_ref().unwrap();
    assert!(!decision.allow);
    assert_eq!(decision.route_override, Some(RouteOverride::Crisis));
    assert!(!report.event_names().contains(&"policy.redirected"));
    assert_eq!(report.executed, None);
    assert_eq!(counter.issued(), 0);
}

#[tokio::test]
async fn test_marketing_email_needs_marketing_consent() {
    let h = harness();
    let counter = ToolCallCounter::new();
    let turn = TurnContext::new("u1")
        .with_channel(Channel::Web)
        .consented()
        .with_metadata("purpose", json!("marketing"));
    let report = h
        .dispatcher
        .dispatch(
            DispatchRequest::new(
                "email.send",
                json!({ "to": "care@example.com", "subject": "News", "text": "Our spring newsletter" }),
            ),
            turn,
            &counter,
        )
        .await;

    match &report.result {
        Err(HarnessError::PolicyViolation { rule_id, message }) => {
            assert_eq!(rule_id.as_deref(), Some("marketing-email-consent"));
            assert!(message.as_deref().unwrap_or_default().contains("permission"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(h.transport.emails().await.is_empty());
}

#[tokio::test]
async fn test_record_answer_until_complete() {
    let h = harness();
    h.store.open_session("s1", "u1", "short_v1").await;
    let counter = ToolCallCounter::new();

    let first = h
        .dispatcher
        .dispatch(
            DispatchRequest::new(
                "assessment.recordAnswer",
                json!({ "sessionId": "s1", "questionId": "q1", "value": 4 }),
            ),
            TurnContext::new("u1"),
            &counter,
        )
        .await;
    let output = first.result.unwrap();
    assert_eq!(output["completed"], json!(false));
    assert_eq!(output["nextQuestion"]["id"], json!("q2"));

    let second = h
        .dispatcher
        .dispatch(
            DispatchRequest::new(
                "assessment.recordAnswer",
                json!({ "sessionId": "s1", "questionId": "q2", "value": 2 }),
            ),
            TurnContext::new("u1"),
            &counter,
        )
        .await;
    let output = second.result.unwrap();
    assert_eq!(output["completed"], json!(true));
    assert_eq!(output["score"], json!(75.0));
    assert_eq!(output["band"], json!("mild"));
    assert_eq!(output["nextQuestion"], Value::Null);
}

#[tokio::test]
async fn test_out_of_order_answer_is_fatal() {
    let h = harness();
    h.store.open_session("s1", "u1", "short_v1").await;
    let report = h
        .dispatcher
        .dispatch(
            DispatchRequest::new(
                "assessment.recordAnswer",
                json!({ "sessionId": "s1", "questionId": "q2", "value": 1 }),
            ),
            TurnContext::new("u1"),
            &ToolCallCounter::new(),
        )
        .await;
    assert!(matches!(&report.result, Err(HarnessError::ToolFailed { reason, .. }) if reason.contains("Question mismatch")));
    assert!(!report.retryable());
}

#[tokio::test]
async fn test_out_of_range_answer_does_not_break_session() {
    let h = harness();
    h.store.open_session("s1", "u1", "short_v1").await;
    let counter = ToolCallCounter::new();
    let answer = |question: &str, value: f64| {
        DispatchRequest::new(
            "assessment.recordAnswer",
            json!({ "sessionId": "s1", "questionId": question, "value": value }),
        )
    };

    let rejected = h
        .dispatcher
        .dispatch(answer("q1", 9.0), TurnContext::new("u1"), &counter)
        .await;
    assert!(matches!(&rejected.result, Err(HarnessError::ToolFailed { reason, .. }) if reason.contains("out of range")));

    let first = h
        .dispatcher
        .dispatch(answer("q1", 2.0), TurnContext::new("u1"), &counter)
        .await;
    assert_eq!(first.result.unwrap()["nextQuestion"]["id"], json!("q2"));

    let last = h
        .dispatcher
        .dispatch(answer("q2", 2.0), TurnContext::new("u1"), &counter)
        .await;
    let output = last.result.unwrap();
    assert_eq!(output["completed"], json!(true));
    assert_eq!(output["score"], json!(50.0));
    assert_eq!(output["band"], json!("moderate"));
}

#[tokio::test]
async fn test_crisis_signal_redirects_to_crisis_capability() {
    let h = harness();
    let counter = ToolCallCounter::new();
    let turn = TurnContext::new("u1").with_text("I can't do this anymore, I want to end it");
    let report = h
        .dispatcher
        .dispatch(DispatchRequest::new("memory.record", memory_input(3)), turn, &counter)
        .await;

    assert!(report.is_ok(), "{:?}", report.result);
    assert_eq!(report.requested, "memory.record");
    assert_eq!(report.executed.as_deref(), Some("crisis.escalate"));
    assert!(report.event_names().contains(&"policy.redirected"));
    let output = report.result.as_ref().unwrap();
    assert_eq!(output["detectedTerms"], json!(["end it"]));
    assert!(h.store.memories().await.is_empty());

    let redirected = report
        .events
        .iter()
        .find(|e| e.name == "policy.redirected")
        .unwrap();
    assert_eq!(redirected.payload["from"], json!("memory.record"));
    assert_eq!(redirected.payload["to"], json!("crisis.escalate"));
}

#[tokio::test]
async fn test_unknown_turn_bundle_keeps_configured_policy() {
    let h = harness();
    let turn = TurnContext::new("u1")
        .with_text("I want to kill myself")
        .with_policy_bundle("trauma_informed_v2");
    let report = h
        .dispatcher
        .dispatch(
            DispatchRequest::new("memory.record", memory_input(3)),
            turn,
            &ToolCallCounter::new(),
        )
        .await;

    assert_eq!(report.executed.as_deref(), Some("crisis.escalate"));
    let names = report.event_names();
    assert!(names.contains(&"policy.bundles_fallback"));
    assert!(names.contains(&"policy.redirected"));
    assert!(h.store.memories().await.is_empty());
}

#[tokio::test]
async fn test_unresolvable_bundles_deny() {
    let dispatcher = Dispatcher::builder()
        .active_bundles(vec!["not_loaded".to_string()])
        .build();
    let counter = ToolCallCounter::new();
    let report = dispatcher
        .dispatch(
            DispatchRequest::new("memory.record", memory_input(3)),
            TurnContext::new("u1").with_policy_bundle("also_missing"),
            &counter,
        )
        .await;

    assert!(matches!(
        &report.result,
        Err(HarnessError::PolicyViolation { rule_id: None, message: Some(msg) }) if msg.contains("not_loaded")
    ));
    assert_eq!(counter.issued(), 0);
}

#[tokio::test]
async fn test_upstream_crisis_flag_redirects() {
    let h = harness();
    let report = h
        .dispatcher
        .dispatch(
            DispatchRequest::new("interventions.suggest", json!({ "pressureZones": ["work"] })),
            TurnContext::new("u1").flag_crisis(),
            &ToolCallCounter::new(),
        )
        .await;
    assert_eq!(report.executed.as_deref(), Some("crisis.escalate"));
}

#[tokio::test]
async fn test_assessment_request_redirects_to_start() {
    let h = harness();
    let report = h
        .dispatcher
        .dispatch(
            DispatchRequest::new("interventions.suggest", json!({ "pressureZones": ["home"] })),
            TurnContext::new("u1").with_text("Can I take the assessment again?"),
            &ToolCallCounter::new(),
        )
        .await;
    assert_eq!(report.executed.as_deref(), Some("assessment.start"));
    let output = report.result.unwrap();
    assert_eq!(output["question"]["id"], json!("energy"));
}

#[tokio::test]
async fn test_consent_required_never_invokes_handler() {
    let h = harness();
    let counter = ToolCallCounter::new();
    let report = h
        .dispatcher
        .dispatch(
            DispatchRequest::new("schedule.checkIn", json!({ "cadence": "weekly" })),
            TurnContext::new("u1"),
            &counter,
        )
        .await;

    assert_eq!(
        report.result,
        Err(HarnessError::ConsentRequired {
            capability: "schedule.checkIn".to_string()
        })
    );
    let names = report.event_names();
    assert!(names.contains(&"consent.checked"));
    assert_eq!(names.last(), Some(&"dispatch.failed"));
    assert!(h.queue.pending().await.unwrap().is_empty());
    assert_eq!(counter.issued(), 0);

    let recorded = h.sink.recorded();
    assert!(recorded
        .iter()
        .any(|(trace_id, name)| trace_id == &report.trace_id && name == "dispatch.failed"));
}

#[tokio::test]
async fn test_transient_failure_is_retry_eligible() {
    let h = harness();
    h.store.fail_next(1);
    let report = h
        .dispatcher
        .dispatch(
            DispatchRequest::new("memory.record", memory_input(4)),
            TurnContext::new("u1"),
            &ToolCallCounter::new(),
        )
        .await;

    assert!(matches!(report.result, Err(HarnessError::TransientToolError { .. })));
    assert!(report.retryable());
    assert!(h.store.memories().await.is_empty());

    let failed = report.events.last().unwrap();
    assert_eq!(failed.payload["retryable"], json!(true));

    let advisor = RetryAdvisor::new(RetryPolicy {
        max_retries: 1,
        ..RetryPolicy::default()
    });
    let err = report.result.unwrap_err();
    assert_eq!(advisor.advise(&err, 0), RetryDecision::RetryAfter(Duration::from_millis(500)));
    assert_eq!(advisor.advise(&err, 1), RetryDecision::GiveUp);
}

#[tokio::test]
async fn test_schema_rejection_never_reaches_handler() {
    let h = harness();
    let counter = ToolCallCounter::new();
    for bad in [
        memory_input(9),
        json!({ "category": "care_routine", "content": "x" }),
        json!({ "category": "care_routine", "content": "x", "importance": 2, "extra": true }),
        json!("just text"),
    ] {
        let report = h
            .dispatcher
            .dispatch(DispatchRequest::new("memory.record", bad), TurnContext::new("u1"), &counter)
            .await;
        assert!(matches!(report.result, Err(HarnessError::InvalidInput { .. })));
        assert!(!report.event_names().contains(&"capability.invoke"));
    }
    assert!(h.store.memories().await.is_empty());
    assert_eq!(counter.issued(), 0);
}

#[tokio::test]
async fn test_out_of_range_check_in_time_rejected_before_handler() {
    let h = harness();
    let counter = ToolCallCounter::new();
    for bad in [
        json!({ "cadence": "daily", "preferredHour": 24 }),
        json!({ "cadence": "weekly", "preferredMinute": 60 }),
    ] {
        let report = h
            .dispatcher
            .dispatch(
                DispatchRequest::new("schedule.checkIn", bad),
                TurnContext::new("u1").consented(),
                &counter,
            )
            .await;
        assert!(matches!(report.result, Err(HarnessError::InvalidInput { .. })));
        assert!(!report.event_names().contains(&"capability.invoke"));
    }
    assert_eq!(counter.issued(), 0);
    assert!(h.queue.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scheduled_check_in_round_trip() {
    let now = DateTime::parse_from_rfc3339("2026-03-02T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let h = harness_at(now);
    let turn = TurnContext::new("u1").with_consent(ConsentFlags {
        recorded: true,
        ..ConsentFlags::default()
    });

    let report = h
        .dispatcher
        .dispatch(
            DispatchRequest::new(
                "schedule.checkIn",
                json!({ "timezone": "America/New_York", "cadence": "daily", "preferredHour": 9 }),
            ),
            turn,
            &ToolCallCounter::new(),
        )
        .await;
    let output = report.result.unwrap();
    assert_eq!(output["runAt"], json!("2026-03-02T14:00:00Z"));
    assert_eq!(output["description"], json!("Every day at 9:00 America/New_York"));

    let poller = FollowUpPoller::new(h.queue.clone(), h.dispatcher.clone(), h.clock.clone());
    assert_eq!(poller.poll_once().await.unwrap().due, 0);

    h.clock.advance(chrono::Duration::hours(3));
    let summary = poller.poll_once().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.rescheduled, 1);
    assert_eq!(h.transport.messages().await.len(), 1);

    let pending = h.queue.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].run_at.to_rfc3339(), "2026-03-03T14:00:00+00:00");
}

#[tokio::test]
async fn test_registry_listing_covers_builtins() {
    let h = harness();
    let names = h.dispatcher.registry().names();
    for expected in [
        "admin.metrics",
        "alerts.processPending",
        "assessment.recordAnswer",
        "assessment.score",
        "assessment.start",
        "billing.refreshEntitlements",
        "checkin.deliver",
        "crisis.escalate",
        "email.send",
        "interventions.suggest",
        "memory.record",
        "schedule.checkIn",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing {expected}");
    }
}
