use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use upgrade_engine::{EngineError, StepOrderer, UpgradeManager, APPLY_CANCELLED};
use upgrade_step::{
    BuildBreakRisk, CancellationToken, ProjectRef, StatusResult, StepScope, StepSpec,
    UpgradeContext, UpgradeStepStatus,
};
use upgrade_test_utils::{Scripted, ScriptedStep, VisitLog};

fn build(specs: Vec<StepSpec>, context: UpgradeContext) -> UpgradeManager {
    let mut orderer = StepOrderer::new();
    for spec in specs {
        assert!(orderer.register(spec));
    }
    orderer.build(context).expect("valid step graph")
}

/// Apply every returned step until none remain, returning the applied ids
async fn drain(manager: &mut UpgradeManager, limit: usize) -> Vec<String> {
    let cancel = CancellationToken::new();
    let mut applied = Vec::new();
    while let Some(index) = manager.next_step(&cancel).await.unwrap() {
        applied.push(manager.step(index).unwrap().id().to_string());
        manager.apply(index, &cancel).await.unwrap();
        assert!(applied.len() <= limit, "runaway loop: {applied:?}");
    }
    applied
}

fn step(id: &str, log: &VisitLog) -> StepSpec {
    StepSpec::new(ScriptedStep::new(id).with_log(log))
}

#[tokio::test]
async fn children_run_before_parents_left_to_right() {
    let log = VisitLog::default();
    let mut manager = build(
        vec![
            step("Step1", &log)
                .with_sub_step(step("SubA", &log))
                .with_sub_step(
                    step("SubB", &log)
                        .with_sub_step(step("C", &log))
                        .with_sub_step(step("D", &log)),
                )
                .with_sub_step(step("SubE", &log)),
            step("Step2", &log),
            step("Step3", &log).with_sub_step(step("SubF", &log)),
        ],
        UpgradeContext::default(),
    );

    let applied = drain(&mut manager, 20).await;
    assert_eq!(
        applied,
        vec!["SubA", "C", "D", "SubB", "SubE", "Step1", "Step2", "SubF", "Step3"]
    );
    assert_eq!(log.applied(), applied);
}

#[tokio::test]
async fn failed_step_stays_next_until_it_succeeds() {
    let mut manager = build(
        vec![
            StepSpec::new(ScriptedStep::new("flaky").applies([
                Scripted::Error("file locked".into()),
                Scripted::Error("file locked".into()),
            ])),
            StepSpec::new(ScriptedStep::new("after")),
        ],
        UpgradeContext::default(),
    );
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        let next = manager.next_step(&cancel).await.unwrap().unwrap();
        assert!(!manager.apply(next, &cancel).await.unwrap());
        let node = manager.step(next).unwrap();
        assert_eq!(node.id().as_str(), "flaky");
        assert_eq!(node.status(), UpgradeStepStatus::Failed);
        assert_eq!(node.details(), "file locked");
    }

    assert_eq!(drain(&mut manager, 5).await, vec!["flaky", "after"]);
}

#[tokio::test]
async fn failed_step_between_skipped_and_incomplete_is_returned_again() {
    let mut manager = build(
        vec![
            StepSpec::new(ScriptedStep::new("na").initializes_to(StatusResult::skipped("n/a"))),
            StepSpec::new(
                ScriptedStep::new("analyzer")
                    .initializes_to(StatusResult::failed("analyzer crashed"))
                    .applies_with(Scripted::Error("analyzer crashed again".into())),
            ),
            StepSpec::new(ScriptedStep::new("todo")),
        ],
        UpgradeContext::default(),
    );
    let cancel = CancellationToken::new();

    let first = manager.next_step(&cancel).await.unwrap().unwrap();
    let node = manager.step(first).unwrap();
    assert_eq!(node.id().as_str(), "analyzer");
    assert_eq!(node.status(), UpgradeStepStatus::Failed);

    assert!(!manager.apply(first, &cancel).await.unwrap());

    let second = manager.next_step(&cancel).await.unwrap().unwrap();
    assert_eq!(second, first);
    let node = manager.step(second).unwrap();
    assert_eq!(node.status(), UpgradeStepStatus::Failed);
    assert_eq!(node.details(), "analyzer crashed again");

    let todo = manager.find("todo").unwrap();
    assert_eq!(manager.step(todo).unwrap().status(), UpgradeStepStatus::Unknown);
}

#[test]
fn sub_step_depending_on_its_parent_is_rejected() {
    let mut orderer = StepOrderer::new();
    orderer.register(
        StepSpec::new(ScriptedStep::new("parent"))
            .with_sub_step(StepSpec::new(ScriptedStep::new("child")).depends_on("parent")),
    );

    let err = orderer.build(UpgradeContext::default()).unwrap_err();
    assert!(err.is_configuration_error());
    let EngineError::CyclicDependency { cycle } = &err else {
        panic!("expected CyclicDependency, got {err:?}");
    };
    let cycle: Vec<&str> = cycle.iter().map(|id| id.as_str()).collect();
    assert_eq!(cycle, vec!["parent", "child"]);
}

#[test]
fn sub_steps_waiting_on_each_others_parents_are_rejected() {
    let mut orderer = StepOrderer::new();
    orderer.register(
        StepSpec::new(ScriptedStep::new("a"))
            .with_sub_step(StepSpec::new(ScriptedStep::new("a1")).depends_on("b")),
    );
    orderer.register(
        StepSpec::new(ScriptedStep::new("b"))
            .with_sub_step(StepSpec::new(ScriptedStep::new("b1")).depends_on("a")),
    );

    let err = orderer.ordered_steps().unwrap_err();
    assert!(matches!(err, EngineError::CyclicDependency { ref cycle } if cycle.len() == 4));
}

#[tokio::test]
async fn stalled_prerequisites_are_an_error_not_completion() {
    // Applicability that flips on every check: never applicable when the
    // walk reaches the step, always applicable when checked as a prerequisite.
    let checks = Arc::new(AtomicUsize::new(0));
    let flicker = {
        let checks = Arc::clone(&checks);
        StepSpec::new(ScriptedStep::new("flicker"))
            .applicable_when(move |_| checks.fetch_add(1, Ordering::SeqCst) % 2 == 1)
    };
    let mut manager = build(
        vec![
            flicker,
            StepSpec::new(ScriptedStep::new("waiting")).depends_on("flicker"),
        ],
        UpgradeContext::default(),
    );

    let err = manager.next_step(&CancellationToken::new()).await.unwrap_err();
    assert!(err.is_configuration_error());
    let EngineError::Stalled { blocked } = &err else {
        panic!("expected Stalled, got {err:?}");
    };
    assert_eq!(blocked[0].as_str(), "waiting");
}

#[tokio::test]
async fn prerequisite_completed_later_in_the_same_walk_unblocks() {
    let mut manager = build(
        vec![
            StepSpec::new(ScriptedStep::new("group")).with_sub_step(
                StepSpec::new(ScriptedStep::new("needs-tool")).depends_on("tool"),
            ),
            StepSpec::new(
                ScriptedStep::new("tool").initializes_to(StatusResult::complete("Installed")),
            ),
        ],
        UpgradeContext::default(),
    );

    assert_eq!(drain(&mut manager, 5).await, vec!["needs-tool", "group"]);
}

#[tokio::test]
async fn prerequisite_under_inapplicable_parent_counts_as_done() {
    let mut manager = build(
        vec![
            StepSpec::new(ScriptedStep::new("optional").applicable(false))
                .with_sub_step(StepSpec::new(ScriptedStep::new("optional.part"))),
            StepSpec::new(ScriptedStep::new("main")).depends_on("optional.part"),
        ],
        UpgradeContext::default(),
    );

    assert_eq!(drain(&mut manager, 5).await, vec!["main"]);
}

#[tokio::test]
async fn exhausted_when_every_step_is_terminal() {
    let mut manager = build(
        vec![
            StepSpec::new(ScriptedStep::new("done").initializes_to(StatusResult::complete("ok"))),
            StepSpec::new(ScriptedStep::new("na").initializes_to(StatusResult::skipped("n/a"))),
            StepSpec::new(ScriptedStep::new("todo")),
        ],
        UpgradeContext::default(),
    );

    assert_eq!(drain(&mut manager, 5).await, vec!["todo"]);
    assert_eq!(manager.next_step(&CancellationToken::new()).await.unwrap(), None);
}

#[tokio::test]
async fn unknown_after_initialize_is_fatal() {
    let mut manager = build(
        vec![StepSpec::new(ScriptedStep::new("broken").initializes_to(StatusResult::new(
            UpgradeStepStatus::Unknown,
            "",
            BuildBreakRisk::Unknown,
        )))],
        UpgradeContext::default(),
    );

    let err = manager.next_step(&CancellationToken::new()).await.unwrap_err();
    assert!(err.is_contract_violation());
    assert!(err.to_string().contains("broken"));
}

#[tokio::test]
async fn skipped_parent_is_not_descended_into_again() {
    let log = VisitLog::default();
    let mut manager = build(
        vec![
            step("parent", &log).with_sub_step(step("child", &log)),
            step("next", &log),
        ],
        UpgradeContext::default(),
    );
    let cancel = CancellationToken::new();

    let child = manager.next_step(&cancel).await.unwrap().unwrap();
    let parent = manager.step(child).unwrap().parent().unwrap();
    assert!(manager.skip(parent, &cancel).unwrap());

    assert_eq!(drain(&mut manager, 5).await, vec!["next"]);
    assert!(!log.applied().contains(&"child".to_string()));
}

#[tokio::test]
async fn cross_group_prerequisite_defers_sub_step_and_parent() {
    let mut manager = build(
        vec![
            StepSpec::new(ScriptedStep::new("group"))
                .with_sub_step(StepSpec::new(ScriptedStep::new("needs-tool")).depends_on("tool")),
            StepSpec::new(ScriptedStep::new("tool")),
        ],
        UpgradeContext::default(),
    );

    assert_eq!(drain(&mut manager, 5).await, vec!["tool", "needs-tool", "group"]);
}

#[tokio::test]
async fn inapplicable_prerequisite_counts_as_done() {
    let mut manager = build(
        vec![
            StepSpec::new(ScriptedStep::new("optional").applicable(false)),
            StepSpec::new(ScriptedStep::new("main")).depends_on("optional"),
        ],
        UpgradeContext::default(),
    );

    assert_eq!(drain(&mut manager, 5).await, vec!["main"]);
}

#[tokio::test]
async fn dependency_of_places_step_first() {
    let mut manager = build(
        vec![
            StepSpec::new(ScriptedStep::new("a")),
            StepSpec::new(ScriptedStep::new("b")).dependency_of("a"),
        ],
        UpgradeContext::default(),
    );

    assert_eq!(drain(&mut manager, 5).await, vec!["b", "a"]);
}

#[tokio::test]
async fn cancelled_apply_keeps_step_retryable() {
    let mut manager = build(
        vec![StepSpec::new(ScriptedStep::new("slow").applies([Scripted::Cancelled]))],
        UpgradeContext::default(),
    );
    let cancel = CancellationToken::new();

    let next = manager.next_step(&cancel).await.unwrap().unwrap();
    assert!(!manager.apply(next, &cancel).await.unwrap());
    let node = manager.step(next).unwrap();
    assert_eq!(node.status(), UpgradeStepStatus::Incomplete);
    assert_eq!(node.details(), APPLY_CANCELLED);

    assert_eq!(drain(&mut manager, 3).await, vec!["slow"]);
}

#[tokio::test]
async fn project_loop_visits_each_project() {
    let log = VisitLog::default();
    let select = ScriptedStep::new("select")
        .with_log(&log)
        .initializes([
            Scripted::Result(StatusResult::incomplete("Projects remain", BuildBreakRisk::None)),
            Scripted::Result(StatusResult::incomplete("Projects remain", BuildBreakRisk::None)),
        ])
        .initializes_with(Scripted::Result(StatusResult::complete("All projects processed")))
        .on_apply(|ctx| {
            let processed = *ctx.properties_mut().get_or_default::<usize>("processed");
            let project = ctx.projects()[processed].clone();
            *ctx.properties_mut().get_or_default::<usize>("processed") += 1;
            ctx.set_current_project(Some(project));
        });
    let work = ScriptedStep::new("work").with_log(&log);
    let work_calls = work.calls();

    let context = UpgradeContext::new("/src/app.sln").with_projects(vec![
        ProjectRef::from_path("/src/A/A.csproj"),
        ProjectRef::from_path("/src/B/B.csproj"),
    ]);
    let mut manager = build(
        vec![
            StepSpec::new(select)
                .with_scope(StepScope::Project)
                .applicable_when(|ctx| ctx.current_project().is_none()),
            StepSpec::new(work)
                .with_scope(StepScope::Project)
                .applicable_when(|ctx| ctx.current_project().is_some()),
        ],
        context,
    );

    let applied = drain(&mut manager, 10).await;
    assert_eq!(applied, vec!["select", "work", "select", "work"]);
    assert_eq!(work_calls.init_calls(), 2);
    assert!(manager.context().current_project().is_none());
}

#[tokio::test]
async fn reset_returns_subtree_to_unknown() {
    let mut manager = build(
        vec![StepSpec::new(ScriptedStep::new("p"))
            .with_sub_step(StepSpec::new(ScriptedStep::new("c")))],
        UpgradeContext::default(),
    );
    drain(&mut manager, 5).await;

    let p = manager.find("p").unwrap();
    manager.reset(p).unwrap();
    let c = manager.find("c").unwrap();
    assert_eq!(manager.step(p).unwrap().status(), UpgradeStepStatus::Unknown);
    assert_eq!(manager.step(c).unwrap().status(), UpgradeStepStatus::Unknown);

    assert_eq!(drain(&mut manager, 5).await, vec!["c", "p"]);
}

#[tokio::test]
async fn apply_before_initialize_is_rejected() {
    let mut manager = build(
        vec![StepSpec::new(ScriptedStep::new("a"))],
        UpgradeContext::default(),
    );
    let a = manager.find("a").unwrap();
    let err = manager.apply(a, &CancellationToken::new()).await.unwrap_err();
    assert!(err.is_contract_violation());
}

#[tokio::test]
async fn report_carries_max_risk_of_active_sub_steps() {
    let mut manager = build(
        vec![StepSpec::new(ScriptedStep::new("p"))
            .with_sub_step(StepSpec::new(ScriptedStep::new("low")))
            .with_sub_step(StepSpec::new(ScriptedStep::new("high").initializes_to(
                StatusResult::incomplete("Breaking API", BuildBreakRisk::High),
            )))],
        UpgradeContext::default(),
    );
    let cancel = CancellationToken::new();
    let reports = manager.analyze(&cancel).await.unwrap();
    assert_eq!(reports[0].risk, BuildBreakRisk::High);

    let high = manager.find("high").unwrap();
    let p = manager.find("p").unwrap();
    manager.skip(high, &cancel).unwrap();
    assert_eq!(manager.report(p).risk, BuildBreakRisk::Low);
}
