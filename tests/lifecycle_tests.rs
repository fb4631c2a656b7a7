//! Boundary behaviors and quantified invariants of the processing cycle.

mod common;

use common::{applies, assert_offsets_gap_free, listed, shape, Harness, RuleBasedGenerator};
use converse::engine::EventPublisher;
use converse::storage::SessionStore;
use converse::{
    Agent, CorrelationScope, EngineError, EngineSettings, EventSource, Guideline,
    GuidelineContent, Status,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

/// With `max_engine_iterations = 1` the convergence check never runs and
/// exactly one iteration executes, even though new matches appeared.
#[tokio::test(start_paused = true)]
async fn iteration_cap_of_one_runs_single_iteration() {
    let generator = RuleBasedGenerator::new()
        .respond(&listed("the customer greets the agent"), applies("greeting"))
        .respond(
            "You are composing the next reply",
            serde_json::json!({"message": "Hello!"}),
        );

    let harness = Harness::new(
        Agent::new("Support").with_max_engine_iterations(1),
        generator,
    )
    .await;
    harness
        .guidelines
        .add(Guideline::new(GuidelineContent::new(
            "the customer greets the agent",
            "greet them back",
        )))
        .await;

    let session_id = harness.create_session().await;
    harness.add_customer_message(session_id, "hi!").await;

    let completed = assert_ok!(harness.process(session_id).await);
    assert!(completed);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let inspections = harness.sessions.inspections().await;
    assert_eq!(inspections.len(), 1);
    assert_eq!(inspections[0].iterations.len(), 1);
}

/// An empty guideline set reaches the reply without a single matching call.
#[tokio::test(start_paused = true)]
async fn empty_guideline_set_makes_no_matching_calls() {
    let generator = RuleBasedGenerator::new().respond(
        "You are composing the next reply",
        serde_json::json!({"message": "How can I help?"}),
    );

    let harness = Harness::new(Agent::new("Support"), generator).await;
    let session_id = harness.create_session().await;
    harness.add_customer_message(session_id, "hello").await;

    assert!(harness.process(session_id).await.unwrap());

    let shapes: Vec<String> = harness
        .engine_events(session_id)
        .await
        .iter()
        .map(shape)
        .collect();
    assert_eq!(shapes, vec!["acknowledged", "typing", "message", "ready"]);

    for prompt in harness.generator.prompts() {
        assert!(
            !prompt.contains("For every rule return one check"),
            "no batch evaluation may run for an empty guideline set"
        );
    }
}

/// A draft with a blank line splits into chunks, each followed by `ready`,
/// with exactly one `typing` in every inter-chunk gap.
#[tokio::test(start_paused = true)]
async fn multi_chunk_reply_paces_typing_and_ready() {
    let generator = RuleBasedGenerator::new().respond(
        "You are composing the next reply",
        serde_json::json!({"message": "First thought here.\n\nAnd a second one."}),
    );

    let harness = Harness::new(Agent::new("Support"), generator).await;
    let session_id = harness.create_session().await;
    harness.add_customer_message(session_id, "tell me things").await;

    assert!(harness.process(session_id).await.unwrap());

    let engine_events = harness.engine_events(session_id).await;
    let shapes: Vec<String> = engine_events.iter().map(shape).collect();
    assert_eq!(
        shapes,
        vec![
            "acknowledged",
            "typing",
            "message",
            "ready",
            "typing",
            "message",
            "ready",
        ]
    );

    let texts: Vec<String> = engine_events
        .iter()
        .filter_map(|e| e.as_message())
        .map(|m| m.message)
        .collect();
    assert_eq!(texts, vec!["First thought here.", "And a second one."]);

    assert_offsets_gap_free(&harness.events(session_id).await);
}

/// With no prior wait cycles the preamble is required: a preamble-tagged
/// message and an "Interpreting" status go out before the reply.
#[tokio::test(start_paused = true)]
async fn preamble_emitted_for_fresh_session() {
    let generator = RuleBasedGenerator::new()
        .respond(
            "Write one very short holding message",
            serde_json::json!({"message": "One moment while I check."}),
        )
        .respond(
            "You are composing the next reply",
            serde_json::json!({"message": "Here is your answer."}),
        );

    let mut settings = EngineSettings::default();
    settings.preamble_enabled = true;

    let harness =
        Harness::with_settings(Agent::new("Support"), generator, settings).await;
    let session_id = harness.create_session().await;
    harness.add_customer_message(session_id, "hello there").await;

    assert!(harness.process(session_id).await.unwrap());

    let engine_events = harness.engine_events(session_id).await;

    let preamble_position = engine_events
        .iter()
        .position(|e| e.as_message().map(|m| m.is_preamble()).unwrap_or(false))
        .expect("a preamble message went out");
    let interpreting_position = engine_events
        .iter()
        .position(|e| {
            e.as_status()
                .and_then(|s| s.data.stage)
                .as_deref()
                == Some("Interpreting")
        })
        .expect("the Interpreting status went out");
    let reply_position = engine_events
        .iter()
        .position(|e| {
            e.as_message()
                .map(|m| !m.is_preamble())
                .unwrap_or(false)
        })
        .expect("the real reply went out");

    assert!(preamble_position < interpreting_position);
    assert!(interpreting_position < reply_position);

    // The cycle still ends with exactly one trailing ready.
    let last = engine_events.last().unwrap();
    assert_eq!(last.as_status().unwrap().status, Status::Ready);
}

/// An exceeded deadline cancels the cycle and records an `error` status.
#[tokio::test(start_paused = true)]
async fn timeout_records_error_status() {
    let gate = Arc::new(Semaphore::new(0));
    let generator = RuleBasedGenerator::new()
        .respond(&listed("the customer greets the agent"), applies("greeting"))
        .gated(gate);

    let harness = Harness::new(Agent::new("Support"), generator).await;
    harness
        .guidelines
        .add(Guideline::new(GuidelineContent::new(
            "the customer greets the agent",
            "greet them back",
        )))
        .await;

    let session_id = harness.create_session().await;
    harness.add_customer_message(session_id, "hi").await;

    let scope = CorrelationScope::root().push("process");
    let emitter = Arc::new(EventPublisher::new(
        harness.sessions.clone(),
        session_id,
        EventSource::AiAgent,
    ));
    let result = harness
        .engine
        .process_with_timeout(
            &scope,
            session_id,
            harness.agent_id,
            emitter,
            CancellationToken::new(),
            Duration::from_secs(1),
        )
        .await;

    assert!(matches!(result, Err(EngineError::Timeout(_))));

    let engine_events = harness.engine_events(session_id).await;
    let last = engine_events.last().unwrap().as_status().unwrap();
    assert_eq!(last.status, Status::Error);
    assert!(last.data.exception.is_some());
}

/// Replaying a cycle over identical stores yields the same applied
/// guideline ids (the generator is deterministic).
#[tokio::test(start_paused = true)]
async fn replay_produces_same_applied_guidelines() {
    async fn run_once() -> std::collections::HashSet<converse::GuidelineId> {
        let generator = RuleBasedGenerator::new()
            .respond(&listed("the customer greets the agent"), applies("greeting"))
            .respond(
                "You are composing the next reply",
                serde_json::json!({"message": "Hello!"}),
            )
            .respond(
                "For each required action",
                serde_json::json!({"checks": [
                    {"guideline_number": 1, "fulfilled": true, "missing_part": null, "classification": null}
                ]}),
            );

        let harness = Harness::new(Agent::new("Support"), generator).await;
        let mut guideline = Guideline::new(GuidelineContent::new(
            "the customer greets the agent",
            "greet them back",
        ));
        guideline.id = "greet-rule".into();
        harness.guidelines.add(guideline).await;

        let session_id = harness.create_session().await;
        harness.add_customer_message(session_id, "hi!").await;
        assert!(harness.process(session_id).await.unwrap());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let session = harness.sessions.read_session(&session_id).await.unwrap();
        assert_eq!(session.agent_states.len(), 1, "one state per cycle");
        session.agent_states[0].applied_guideline_ids.clone()
    }

    let first = run_once().await;
    let second = run_once().await;

    assert_eq!(first, second);
    assert!(first.contains(&converse::GuidelineId::from("greet-rule")));
}
