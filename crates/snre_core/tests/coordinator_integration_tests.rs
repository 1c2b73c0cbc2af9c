//! Integration tests for the refactoring loop, driven by scripted agents.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use tokio_util::sync::CancellationToken;

use snre_core::{
    AgentAnalysis, AgentPhase, AgentRegistry, Change, ChangeId, ChangeKind, Coordinator,
    CoreError, CoreResult, EvolutionConfig, EvolutionRecorder, InMemorySessionRepository,
    MemoryEvolutionStore, RefactorAgent, RefactorService, RefactorSession, RefactorStatus,
    SessionId, SessionRepository, SnreConfig, StopReason, UpdateFn,
};

const LOOP: &str = "for i in range(len(xs)): y.append(xs[i]*2)";
const ENUMERATED: &str = "for i, x in enumerate(xs): y.append(x*2)";
const TWO_ISSUES: &str = "x = 1\nif y == None:\n    pass\nresult = eval(data)";

type ScoreFn = dyn Fn(&Change) -> f64 + Send + Sync;
type ValidateFn = dyn Fn(&str, &str) -> bool + Send + Sync;

/// Agent that rewrites exact lines and votes by a fixed rule.
struct ScriptedAgent {
    id: String,
    rules: Vec<(String, String, f64)>,
    score: Box<ScoreFn>,
    validate: Box<ValidateFn>,
    fail_analyze: bool,
    fail_propose: bool,
    withhold_votes: bool,
}

impl ScriptedAgent {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            rules: Vec::new(),
            score: Box::new(|_| 0.9),
            validate: Box::new(|_, _| true),
            fail_analyze: false,
            fail_propose: false,
            withhold_votes: false,
        }
    }

    fn rule(mut self, line: &str, replacement: &str, confidence: f64) -> Self {
        self.rules
            .push((line.to_string(), replacement.to_string(), confidence));
        self
    }

    fn votes(mut self, score: impl Fn(&Change) -> f64 + Send + Sync + 'static) -> Self {
        self.score = Box::new(score);
        self
    }

    fn validates(mut self, check: impl Fn(&str, &str) -> bool + Send + Sync + 'static) -> Self {
        self.validate = Box::new(check);
        self
    }

    fn failing(mut self) -> Self {
        self.fail_propose = true;
        self
    }

    fn failing_analysis(mut self) -> Self {
        self.fail_analyze = true;
        self
    }

    fn withholding_votes(mut self) -> Self {
        self.withhold_votes = true;
        self
    }
}

impl RefactorAgent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn analyze(&self, code: &str) -> anyhow::Result<AgentAnalysis> {
        if self.fail_analyze {
            anyhow::bail!("scripted analysis failure");
        }
        let mut analysis = AgentAnalysis::new(&self.id);
        for line in code.split('\n') {
            if self.rules.iter().any(|(from, _, _)| from == line) {
                analysis = analysis.with_pattern(format!("rewrite: {}", line));
            }
        }
        Ok(analysis)
    }

    fn suggest_changes(&self, code: &str) -> anyhow::Result<Vec<Change>> {
        if self.fail_propose {
            anyhow::bail!("scripted failure");
        }
        let mut changes = Vec::new();
        for (idx, line) in code.split('\n').enumerate() {
            for (from, to, confidence) in &self.rules {
                if from == line {
                    changes.push(Change::new(
                        self.id.as_str(),
                        ChangeKind::Other,
                        idx..idx + 1,
                        line,
                        to.as_str(),
                        *confidence,
                    )?);
                }
            }
        }
        Ok(changes)
    }

    fn vote(&self, changes: &[Change]) -> anyhow::Result<HashMap<ChangeId, f64>> {
        if self.withhold_votes {
            return Ok(HashMap::new());
        }
        Ok(changes.iter().map(|c| (c.id(), (self.score)(c))).collect())
    }

    fn validate_result(&self, original: &str, modified: &str) -> bool {
        (self.validate)(original, modified)
    }
}

fn registry(agents: Vec<(ScriptedAgent, i32)>) -> Arc<AgentRegistry> {
    let mut registry = AgentRegistry::new();
    for (agent, priority) in agents {
        registry.register(Arc::new(agent), priority, 0.5).unwrap();
    }
    Arc::new(registry)
}

fn config(max_iterations: u32) -> SnreConfig {
    SnreConfig {
        max_iterations,
        persist_backoff_ms: 1,
        ..Default::default()
    }
}

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn two_issue_agents() -> Arc<AgentRegistry> {
    registry(vec![
        (
            ScriptedAgent::new("style").rule("if y == None:", "if y is None:", 0.9),
            6,
        ),
        (
            ScriptedAgent::new("security").rule("result = eval(data)", "result = int(data)", 0.9),
            9,
        ),
    ])
}

/// Test a single accepted change followed by convergence.
#[tokio::test]
async fn test_scenario_single_change_converges() {
    let registry = registry(vec![
        (
            ScriptedAgent::new("loop")
                .rule(LOOP, ENUMERATED, 0.9)
                .votes(|_| 0.85),
            6,
        ),
        (ScriptedAgent::new("reviewer").votes(|_| 0.8), 5),
    ]);
    let repo = Arc::new(InMemorySessionRepository::default());
    let coordinator = Coordinator::new(registry, repo.clone(), config(10));

    let session = coordinator
        .refactor("loop.py", LOOP, &ids(&["loop", "reviewer"]))
        .await
        .unwrap();

    assert_eq!(session.status, RefactorStatus::Completed);
    assert_eq!(session.stop_reason, Some(StopReason::Converged));
    assert_eq!(session.current_code, ENUMERATED);
    assert_eq!(session.steps.len(), 1);

    let step = &session.steps[0];
    assert_eq!(step.iteration, 0);
    assert!(step.decision.accepted);
    assert_eq!(step.decision.votes.len(), 2);
    assert!((step.decision.score - 0.825).abs() < 1e-9);
    assert_eq!(step.applied.as_ref().unwrap().agent_id(), "loop");

    let metrics = session.metrics.as_ref().unwrap();
    assert_eq!(metrics.lines_changed, 1);
    assert_eq!(metrics.applied_confidences, vec![0.9]);
    assert_eq!(metrics.agent_contributions.get("loop"), Some(&1));
    assert_eq!(metrics.issues_fixed, 1);

    // what was persisted matches what was returned
    assert_eq!(repo.load(session.id).await.unwrap(), session);
    assert!(repo.list_active().await.unwrap().is_empty());
}

/// Test that proposer priority decides between equally scored changes.
#[tokio::test]
async fn test_scenario_priority_breaks_tie() {
    let repo = Arc::new(InMemorySessionRepository::default());
    let coordinator = Coordinator::new(two_issue_agents(), repo, config(10));

    let session = coordinator
        .refactor("app.py", TWO_ISSUES, &ids(&["style", "security"]))
        .await
        .unwrap();

    let applied: Vec<&str> = session.applied_changes().map(|c| c.agent_id()).collect();
    assert_eq!(applied, vec!["security", "style"]);
    assert_eq!(session.steps[0].candidates, 2);
    assert_eq!(
        session.current_code,
        "x = 1\nif y is None:\n    pass\nresult = int(data)"
    );
    assert_eq!(session.stop_reason, Some(StopReason::Converged));
}

/// Test that a vetoed change is rolled back and never proposed again.
#[tokio::test]
async fn test_scenario_rejected_change_is_excluded() {
    let registry = registry(vec![
        (ScriptedAgent::new("loop").rule(LOOP, ENUMERATED, 0.9), 6),
        (
            ScriptedAgent::new("guard").validates(|_, modified| !modified.contains("enumerate")),
            5,
        ),
    ]);
    let store = Arc::new(MemoryEvolutionStore::new());
    let recorder = Arc::new(EvolutionRecorder::new(store, EvolutionConfig::default()));
    let repo = Arc::new(InMemorySessionRepository::default());
    let coordinator =
        Coordinator::new(registry, repo, config(10)).with_listener(recorder.clone());

    let session = coordinator
        .refactor("loop.py", LOOP, &ids(&["loop", "guard"]))
        .await
        .unwrap();

    assert_eq!(session.status, RefactorStatus::Completed);
    assert_eq!(session.current_code, LOOP);
    assert_eq!(session.steps.len(), 1);

    let step = &session.steps[0];
    assert!(step.applied.is_none());
    assert_eq!(step.rejections.len(), 1);
    assert_eq!(step.rejections[0].rejected_by, vec!["guard".to_string()]);
    assert!(session.excluded_changes.contains(&step.rejections[0].change_id));

    let history = recorder.history(session.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(recorder.snapshot(session.id, 0).await.unwrap(), LOOP);
}

/// Test that the iteration budget stops the loop with the exhaustion flag.
#[tokio::test]
async fn test_scenario_iteration_budget() {
    let repo = Arc::new(InMemorySessionRepository::default());
    let coordinator = Coordinator::new(two_issue_agents(), repo, config(1));

    let session = coordinator
        .refactor("app.py", TWO_ISSUES, &ids(&["style", "security"]))
        .await
        .unwrap();

    assert_eq!(session.status, RefactorStatus::Completed);
    assert!(session.budget_exhausted());
    assert_eq!(session.applied_changes().count(), 1);
    assert!(session.current_code.contains("int(data)"));
    assert!(session.current_code.contains("== None"));
}

/// Test that identical inputs replay to identical outcomes.
#[tokio::test]
async fn test_replay_is_deterministic() {
    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let repo = Arc::new(InMemorySessionRepository::default());
        let coordinator = Coordinator::new(two_issue_agents(), repo, config(10));
        let session = coordinator
            .refactor("app.py", TWO_ISSUES, &ids(&["security", "style"]))
            .await
            .unwrap();
        let decisions: Vec<_> = session.steps.iter().map(|s| s.decision.clone()).collect();
        outcomes.push((session.current_code, decisions));
    }
    assert_eq!(outcomes[0], outcomes[1]);
    assert_eq!(outcomes[1], outcomes[2]);
}

/// Test that one failing agent does not abort the session.
#[tokio::test]
async fn test_faulty_agent_is_recorded_and_skipped() {
    let registry = registry(vec![
        (ScriptedAgent::new("loop").rule(LOOP, ENUMERATED, 0.9), 6),
        (ScriptedAgent::new("flaky").failing(), 3),
        (ScriptedAgent::new("lazy").withholding_votes(), 2),
        (ScriptedAgent::new("blind").failing_analysis(), 1),
    ]);
    let repo = Arc::new(InMemorySessionRepository::default());
    let coordinator = Coordinator::new(registry, repo.clone(), config(10));

    let session = coordinator
        .refactor("loop.py", LOOP, &ids(&["loop", "flaky", "lazy", "blind"]))
        .await
        .unwrap();

    assert_eq!(session.status, RefactorStatus::Completed);
    assert_eq!(session.current_code, ENUMERATED);

    let failures = &session.steps[0].agent_failures;
    assert!(failures
        .iter()
        .any(|f| f.agent_id == "flaky" && f.phase == AgentPhase::Propose));
    assert!(failures
        .iter()
        .any(|f| f.agent_id == "lazy" && f.phase == AgentPhase::Vote));
    assert!(!session.steps[0].decision.votes.contains_key("lazy"));

    // analysis failures are kept on the session, for both ends of the run
    assert!(session.initial_analysis.iter().all(|a| a.agent_id != "blind"));
    let blind: Vec<_> = session
        .analysis_failures
        .iter()
        .filter(|f| f.agent_id == "blind")
        .collect();
    assert_eq!(blind.len(), 2);
    assert!(blind.iter().all(|f| f.phase == AgentPhase::Analyze));
    assert!(blind[0].message.contains("scripted analysis failure"));
    let stored = repo.load(session.id).await.unwrap();
    assert_eq!(stored.analysis_failures.len(), 2);
}

/// Test that a session fails when every agent fails a phase.
#[tokio::test]
async fn test_all_agents_failed() {
    let registry = registry(vec![(ScriptedAgent::new("flaky").failing(), 1)]);
    let repo = Arc::new(InMemorySessionRepository::default());
    let coordinator = Coordinator::new(registry, repo.clone(), config(10));

    let session = coordinator
        .refactor("a.py", LOOP, &ids(&["flaky"]))
        .await
        .unwrap();

    assert_eq!(session.status, RefactorStatus::Failed);
    assert_eq!(session.stop_reason, Some(StopReason::Failed));
    assert!(session.error.as_ref().unwrap().contains("All agents failed during propose"));
    assert_eq!(repo.load(session.id).await.unwrap().status, RefactorStatus::Failed);
}

/// Test that unknown agents are rejected before a session exists.
#[tokio::test]
async fn test_unknown_agent_rejected_up_front() {
    let repo = Arc::new(InMemorySessionRepository::default());
    let coordinator = Coordinator::new(two_issue_agents(), repo.clone(), config(10));

    let err = coordinator
        .refactor("a.py", LOOP, &ids(&["style", "ghost"]))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::UnknownAgent(id) if id == "ghost"));
    assert!(repo.list_active().await.unwrap().is_empty());
}

/// Test cancellation through the in-process token and the persisted flag.
#[tokio::test]
async fn test_cancellation_is_observed() {
    let repo = Arc::new(InMemorySessionRepository::default());
    let coordinator = Coordinator::new(two_issue_agents(), repo.clone(), config(10));
    let agents = ids(&["style", "security"]);

    let session = coordinator.create_session("a.py", TWO_ISSUES, &agents).await.unwrap();
    let token = CancellationToken::new();
    token.cancel();
    let cancelled = coordinator.run(session, token).await.unwrap();
    assert_eq!(cancelled.status, RefactorStatus::Cancelled);
    assert_eq!(cancelled.current_code, TWO_ISSUES);

    let session = coordinator.create_session("b.py", TWO_ISSUES, &agents).await.unwrap();
    repo.update(
        session.id,
        Box::new(|s| {
            s.cancel_requested = true;
            Ok(())
        }),
    )
    .await
    .unwrap();
    let cancelled = coordinator.run(session, CancellationToken::new()).await.unwrap();
    assert_eq!(cancelled.status, RefactorStatus::Cancelled);
    assert_eq!(cancelled.stop_reason, Some(StopReason::Cancelled));
    assert!(cancelled.steps.is_empty());
}

/// Test that cancellation raised while validating stops the change from landing.
#[tokio::test]
async fn test_cancel_during_validation_applies_nothing() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let registry = registry(vec![
        (ScriptedAgent::new("loop").rule(LOOP, ENUMERATED, 0.9), 6),
        (
            ScriptedAgent::new("guard").validates(move |_, _| {
                trigger.cancel();
                true
            }),
            5,
        ),
    ]);
    let repo = Arc::new(InMemorySessionRepository::default());
    let coordinator = Coordinator::new(registry, repo.clone(), config(10));

    let session = coordinator
        .create_session("loop.py", LOOP, &ids(&["loop", "guard"]))
        .await
        .unwrap();
    let session = coordinator.run(session, token).await.unwrap();

    assert_eq!(session.status, RefactorStatus::Cancelled);
    assert_eq!(session.stop_reason, Some(StopReason::Cancelled));
    assert_eq!(session.current_code, LOOP);
    assert_eq!(session.applied_changes().count(), 0);
    assert!(session.steps.is_empty());
    assert_eq!(repo.load(session.id).await.unwrap().current_code, LOOP);
}

/// Test that the session deadline also bounds the post-apply retry loop.
#[tokio::test]
async fn test_timeout_stops_retry_loop() {
    let registry = registry(vec![
        (
            ScriptedAgent::new("pair")
                .rule("if y == None:", "if y is None:", 0.9)
                .rule("result = eval(data)", "result = int(data)", 0.9),
            6,
        ),
        (
            ScriptedAgent::new("slow_guard").validates(|_, _| {
                std::thread::sleep(Duration::from_millis(1100));
                false
            }),
            5,
        ),
    ]);
    let config = SnreConfig {
        timeout_secs: 1,
        ..config(10)
    };
    let repo = Arc::new(InMemorySessionRepository::default());
    let coordinator = Coordinator::new(registry, repo, config);

    let session = coordinator
        .refactor("a.py", TWO_ISSUES, &ids(&["pair", "slow_guard"]))
        .await
        .unwrap();

    assert_eq!(session.stop_reason, Some(StopReason::TimedOut));
    assert_eq!(session.current_code, TWO_ISSUES);
    assert_eq!(session.steps.len(), 1);
    // the second candidate was never validated
    assert_eq!(session.steps[0].rejections.len(), 1);
    assert!(session.steps[0].applied.is_none());
}

/// Test the front-end facade over a background run.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_service_lifecycle() {
    let repo = Arc::new(InMemorySessionRepository::default());
    let coordinator = Arc::new(Coordinator::new(two_issue_agents(), repo, config(10)));
    let service = RefactorService::new(coordinator.clone());
    let agents = ids(&["style", "security"]);

    let id = service.start_session("app.py", TWO_ISSUES, &agents).await.unwrap();
    let session = service.wait(id).await.unwrap();
    assert_eq!(session.status, RefactorStatus::Completed);

    let status = service.get_status(id).await.unwrap();
    assert_eq!(status.iteration, 2);
    let result = service.get_result(id).await.unwrap();
    assert!(result.diff.contains("-result = eval(data)\n+result = int(data)"));
    assert_eq!(result.metrics.lines_changed, 2);
    assert!(!result.budget_exhausted);

    // a pending session with no live run is cancelled directly
    let pending = coordinator.create_session("b.py", TWO_ISSUES, &agents).await.unwrap();
    assert!(matches!(
        service.get_result(pending.id).await,
        Err(CoreError::NotTerminal { .. })
    ));
    assert_eq!(service.list_active().await.unwrap(), vec![pending.id]);

    service.cancel(pending.id).await.unwrap();
    let status = service.get_status(pending.id).await.unwrap();
    assert_eq!(status.status, RefactorStatus::Cancelled);
    assert!(status.cancel_requested);
    assert!(matches!(
        service.cancel(pending.id).await,
        Err(CoreError::SessionTerminal { .. })
    ));
    assert!(service.list_active().await.unwrap().is_empty());
}

mock! {
    pub Repo {}

    #[async_trait]
    impl SessionRepository for Repo {
        async fn save(&self, session: &RefactorSession) -> CoreResult<()>;
        async fn load(&self, id: SessionId) -> CoreResult<RefactorSession>;
        async fn list_active(&self) -> CoreResult<Vec<SessionId>>;
        async fn delete(&self, id: SessionId) -> CoreResult<()>;
        async fn update(&self, id: SessionId, apply: UpdateFn) -> CoreResult<RefactorSession>;
    }
}

fn contention(session: &RefactorSession) -> CoreError {
    CoreError::LockContention {
        session_id: session.id,
        waited_ms: 5,
    }
}

/// Test that lock contention on persist is retried with backoff.
#[tokio::test]
async fn test_persist_retries_lock_contention() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let mut repo = MockRepo::new();
    repo.expect_save().returning(move |session| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(contention(session))
        } else {
            Ok(())
        }
    });
    repo.expect_load()
        .returning(|id| Err(CoreError::SessionNotFound(id)));

    let coordinator = Coordinator::new(two_issue_agents(), Arc::new(repo), config(10));
    let session = coordinator
        .refactor("a.py", TWO_ISSUES, &ids(&["style"]))
        .await
        .unwrap();

    assert_eq!(session.status, RefactorStatus::Completed);
    assert_eq!(session.applied_changes().count(), 1);
    // two contended attempts, create, in-progress, one step, final
    assert_eq!(attempts.load(Ordering::SeqCst), 6);
}

/// Test that persistent contention surfaces after the retry budget.
#[tokio::test]
async fn test_persist_gives_up_after_retries() {
    let mut repo = MockRepo::new();
    repo.expect_save()
        .times(3)
        .returning(|session| Err(contention(session)));

    let config = SnreConfig {
        persist_retries: 2,
        ..config(10)
    };
    let coordinator = Coordinator::new(two_issue_agents(), Arc::new(repo), config);
    let err = coordinator
        .create_session("a.py", TWO_ISSUES, &ids(&["style"]))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::LockContention { .. }));
}
