//! 整轮链路集成测试：内存库 + 脚本化 Mock 客户端

use std::sync::Arc;

use sage::cache::{InstructionCacheManager, MockCacheBackend};
use sage::clock::{ManualClock, SharedClock};
use sage::config::{DirectivesSection, RoutingSection, SynthesisSection};
use sage::context::ContextAssembler;
use sage::adapt::DirectiveGenerator;
use sage::mastery::MasteryCalculator;
use sage::model::{
    Agent, AgentCapabilities, AgentRole, Interaction, Lesson, StudentProfile, TurnRequest,
};
use sage::llm::MockLlmClient;
use sage::response::ResponseFacade;
use sage::router::{RouteReason, Router};
use sage::store::{AgentCache, Store};
use sage::synthesis::MockSpeechClient;
use sage::tasks::BackgroundRunner;
use sage::validator::Validator;
use sage::{SageError, TurnEngine};

struct Harness {
    store: Store,
    engine: TurnEngine,
    router_llm: Arc<MockLlmClient>,
    tutor_llm: Arc<MockLlmClient>,
    validator_llm: Arc<MockLlmClient>,
    speech: Arc<MockSpeechClient>,
    runner: BackgroundRunner,
}

async fn harness() -> Harness {
    sage::observability::init();
    let store = Store::in_memory().await.unwrap();
    let clock: SharedClock = Arc::new(ManualClock::new(1_000_000));

    seed(&store).await;

    let router_llm = Arc::new(MockLlmClient::new());
    let tutor_llm = Arc::new(MockLlmClient::new());
    let validator_llm = Arc::new(MockLlmClient::new());
    let speech = Arc::new(MockSpeechClient::new());
    let runner = BackgroundRunner::new();

    let agents = Arc::new(AgentCache::new(store.clone(), clock.clone(), 300));
    let mastery = Arc::new(MasteryCalculator::new(store.clone(), clock.clone(), 60));
    let assembler = ContextAssembler::new(
        store.clone(),
        mastery.clone(),
        DirectiveGenerator::new(DirectivesSection::default().struggle_indicators),
        10,
    );
    let router = Router::new(
        store.clone(),
        agents,
        router_llm.clone(),
        RoutingSection::default(),
    );
    let facade = ResponseFacade::new(tutor_llm.clone());
    let validator = Arc::new(Validator::new(
        validator_llm.clone(),
        store.clone(),
        "sage-validator-1".to_string(),
        10,
    ));
    let cache = Arc::new(InstructionCacheManager::new(
        Arc::new(MockCacheBackend::new()),
        clock,
        7200,
        5400,
    ));

    let engine = TurnEngine::new(
        store.clone(),
        assembler,
        router,
        facade,
        validator,
        mastery,
        cache,
        speech.clone(),
        SynthesisSection::default(),
        runner.clone(),
    );

    Harness {
        store,
        engine,
        router_llm,
        tutor_llm,
        validator_llm,
        speech,
        runner,
    }
}

async fn seed(store: &Store) {
    for (name, role, subject) in [
        ("coordinator", AgentRole::Coordinator, None),
        ("math_tutor", AgentRole::Subject, Some("math")),
        ("general_tutor", AgentRole::Subject, None),
    ] {
        store
            .upsert_agent(&Agent {
                name: name.to_string(),
                role,
                model: "sage-tutor-1".to_string(),
                instructions: format!("You are {}.", name),
                subject: subject.map(String::from),
                capabilities: AgentCapabilities::default(),
            })
            .await
            .unwrap();
    }
    store
        .upsert_lesson(&Lesson {
            id: "l1".to_string(),
            subject: "math".to_string(),
            grade: "5".to_string(),
            title: "Fractions".to_string(),
            topic: "adding fractions".to_string(),
        })
        .await
        .unwrap();
    store
        .upsert_profile(&StudentProfile {
            student_id: "s1".to_string(),
            name: "Maya".to_string(),
            grade: "5".to_string(),
            learning_style: Some("visual".to_string()),
            strengths: vec!["multiplication".to_string()],
            struggles: vec!["word problems".to_string()],
        })
        .await
        .unwrap();
}

fn request(message: Option<&str>) -> TurnRequest {
    TurnRequest {
        session_id: "sess1".to_string(),
        student_id: "s1".to_string(),
        lesson_id: "l1".to_string(),
        message: message.map(String::from),
        media: Vec::new(),
        speak: false,
        session_started_at: 1_000_000,
    }
}

const TUTOR_REPLY: &str = r#"{"speech_text": "Great question. Let's add the fractions.",
    "display_text": "1/2 + 1/4 = 3/4",
    "lesson_complete": false,
    "evidence": [{"kind": "correct_answer", "quality": 85.0}]}"#;

const APPROVE: &str = r#"{"approved": true, "confidence": 0.9, "issues": [], "required_fixes": []}"#;

#[tokio::test]
async fn test_continuity_turn_end_to_end() {
    let h = harness().await;
    // 上一轮由 math_tutor 应答，本轮走连续性快路径
    h.store
        .append_interaction(&Interaction::new("sess1", "hi", "hello", "math_tutor"))
        .await
        .unwrap();
    h.tutor_llm.push_text(TUTOR_REPLY);
    h.validator_llm.push_text(APPROVE);

    let out = h
        .engine
        .handle_turn(request(Some("what is 1/2 + 1/4?")))
        .await
        .unwrap();

    assert_eq!(out.route_reason, RouteReason::Continuity);
    assert_eq!(out.response.responder, "math_tutor");
    assert_eq!(out.response.display_text, "1/2 + 1/4 = 3/4");
    assert!(out.audio.is_none());
    // 协调者从未被调用
    assert!(h.router_llm.seen_systems.lock().unwrap().is_empty());

    h.runner.idle().await;

    // 旁路副作用：交互追加、证据落库、校验通过（无修正入队）
    let history = h.store.recent_interactions("sess1", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history
        .iter()
        .any(|i| i.agent_response == "1/2 + 1/4 = 3/4"));
    let evidence = h.store.evidence_for("s1", "l1").await.unwrap();
    assert_eq!(evidence.len(), 1);
    assert_eq!(evidence[0].quality_score, 85.0);
    assert!(h
        .store
        .oldest_pending_correction("sess1")
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.validator_llm.seen_systems.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_no_text_turn_routes_by_lesson_subject() -> anyhow::Result<()> {
    let h = harness().await;
    h.tutor_llm.push_text(TUTOR_REPLY);
    h.validator_llm.push_text(APPROVE);

    let out = h.engine.handle_turn(request(None)).await?;

    assert_eq!(out.route_reason, RouteReason::SubjectDefault);
    assert_eq!(out.response.responder, "math_tutor");
    h.runner.idle().await;
    Ok(())
}

#[tokio::test]
async fn test_rejected_turn_is_corrected_next_turn() {
    let h = harness().await;
    h.store
        .append_interaction(&Interaction::new("sess1", "hi", "hello", "math_tutor"))
        .await
        .unwrap();

    // 第一轮：校验拒绝
    h.tutor_llm
        .push_text(r#"{"speech_text": "Half plus a quarter is two sixths.", "display_text": "1/2+1/4=2/6"}"#);
    h.validator_llm.push_text(
        r#"{"approved": false, "confidence": 0.95,
            "issues": ["wrong denominator"], "required_fixes": ["recompute with common denominator"]}"#,
    );
    h.engine
        .handle_turn(request(Some("what is 1/2 + 1/4?")))
        .await
        .unwrap();
    h.runner.idle().await;

    let pending = h
        .store
        .oldest_pending_correction("sess1")
        .await
        .unwrap()
        .expect("rejection should queue a correction");
    assert_eq!(pending.issues, vec!["wrong denominator"]);

    // 第二轮：修正块注入提示词，应答后标记交付
    h.tutor_llm.push_text(TUTOR_REPLY);
    h.validator_llm.push_text(APPROVE);
    h.engine
        .handle_turn(request(Some("are you sure?")))
        .await
        .unwrap();
    h.runner.idle().await;

    let systems = h.tutor_llm.seen_systems.lock().unwrap().clone();
    assert!(systems[1].contains("[SELF-CORRECTION REQUIRED]"));
    assert!(systems[1].contains("wrong denominator"));
    assert!(!systems[0].contains("[SELF-CORRECTION REQUIRED]"));

    assert!(h
        .store
        .oldest_pending_correction("sess1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_spoken_turn_streams_progressive_audio() {
    let h = harness().await;
    h.store
        .append_interaction(&Interaction::new("sess1", "hi", "hello", "math_tutor"))
        .await
        .unwrap();
    h.tutor_llm.push_fragments(vec![
        "{\"speech_text\": \"First we find a co",
        "mmon denominator. Then we add the tops.\", ",
        "\"display_text\": \"1/2 + 1/4 = 3/4\"}",
    ]);
    h.validator_llm.push_text(APPROVE);

    let mut req = request(Some("walk me through it"));
    req.speak = true;
    let out = h.engine.handle_turn(req).await.unwrap();

    assert_eq!(
        out.audio.as_deref(),
        Some(&b"First we find a common denominator.Then we add the tops."[..])
    );
    assert_eq!(out.response.display_text, "1/2 + 1/4 = 3/4");
    // 两句各自合成，而非整段一次
    assert_eq!(h.speech.call_count(), 2);
    h.runner.idle().await;
}

#[tokio::test]
async fn test_missing_lesson_is_fatal() {
    let h = harness().await;
    let mut req = request(Some("hello"));
    req.lesson_id = "nope".to_string();

    let err = h.engine.handle_turn(req).await.unwrap_err();
    assert!(matches!(err, SageError::LessonNotFound(_)));
}

#[tokio::test]
async fn test_generation_failure_yields_apology() {
    let h = harness().await;
    h.store
        .append_interaction(&Interaction::new("sess1", "hi", "hello", "math_tutor"))
        .await
        .unwrap();
    h.tutor_llm.push_error("backend exploded");

    let out = h
        .engine
        .handle_turn(request(Some("what now?")))
        .await
        .unwrap();

    assert!(out.response.display_text.contains("sorry"));
    assert!(!out.response.lesson_complete);
    h.runner.idle().await;
    // 致歉也要进交互日志
    let history = h.store.recent_interactions("sess1", 10).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_self_reported_completion_checked_by_rules() {
    let h = harness().await;
    h.store
        .append_interaction(&Interaction::new("sess1", "hi", "hello", "math_tutor"))
        .await
        .unwrap();
    // 模型自称完课，但证据远不满足规则
    h.tutor_llm.push_text(
        r#"{"speech_text": "We finished the lesson!", "display_text": "Done.", "lesson_complete": true}"#,
    );
    h.validator_llm.push_text(APPROVE);

    let out = h
        .engine
        .handle_turn(request(Some("i think we're done")))
        .await
        .unwrap();

    assert!(out.response.lesson_complete);
    let verdict = out.mastery_verdict.expect("rules verdict expected");
    assert!(!verdict.has_mastered);
    assert_eq!(verdict.confidence, 1.0);
    h.runner.idle().await;
}
