// tests/driver_fake_service.rs

use std::error::Error;
use std::time::Duration;

use batchdag::dag::{FailureReason, UnitState, WorkGraph, WorkUnit};
use batchdag::engine::{Driver, JobOutcome, RunOptions, run_dag};
use batchdag::errors::BatchDagError;
use batchdag::exec::ServiceError;
use batchdag::types::SubmissionMode;
use batchdag_test_utils::builders::{add_named, add_tolerant, chain};
use batchdag_test_utils::{FakeBatchService, Fault, init_tracing};

type TestResult = Result<(), Box<dyn Error>>;

const JOB: &str = "job-1";

fn options(mode: SubmissionMode) -> RunOptions {
    RunOptions {
        poll_interval: Duration::from_secs(1),
        query_retry_delay: Duration::from_millis(100),
        mode,
        ..RunOptions::default()
    }
}

fn driver(service: &FakeBatchService, mode: SubmissionMode) -> Driver<FakeBatchService> {
    Driver::new(service.clone(), options(mode))
}

fn event_pos(service: &FakeBatchService, event: &str) -> usize {
    service
        .events()
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("event '{event}' not recorded: {:?}", service.events()))
}

fn parent_child(tolerant_parent: bool) -> WorkGraph {
    let mut graph = WorkGraph::new();
    let parent = if tolerant_parent {
        add_tolerant(&mut graph, "parent")
    } else {
        add_named(&mut graph, "parent")
    };
    let child = add_named(&mut graph, "child");
    graph.before(parent, child).unwrap();
    graph
}

#[tokio::test(start_paused = true)]
async fn chain_runs_to_completion_in_order() -> TestResult {
    init_tracing();
    let (graph, _) = chain(&["a", "b", "c"]);
    let service = FakeBatchService::new().succeed_after("b", 2);

    let result = driver(&service, SubmissionMode::Gated)
        .run_dag(&graph, JOB)
        .await?;

    assert!(result.is_success());
    assert_eq!(result.outcome, JobOutcome::Completed);
    assert_eq!(service.submitted_ids(), ["a", "b", "c"]);

    let events = service.events();
    assert_eq!(events[0], format!("job_exists:{JOB}"));
    assert_eq!(events[1], format!("ensure_job:{JOB}"));

    let b = service.submission("b").unwrap();
    assert_eq!(b.dependencies, ["a"]);
    assert!(b.upstream_terminal);
    assert_eq!(b.command, "echo b");
    assert_eq!(result.summary().succeeded, 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_parent_blocks_child_without_submitting_it() -> TestResult {
    init_tracing();
    let graph = parent_child(false);
    let service = FakeBatchService::new().fail("parent", 2);

    let result = driver(&service, SubmissionMode::Gated)
        .run_dag(&graph, JOB)
        .await?;

    assert_eq!(service.submitted_ids(), ["parent"]);
    assert_eq!(
        result.state_of("parent"),
        Some(&UnitState::Failed(FailureReason::Execution {
            exit_code: Some(2)
        }))
    );
    assert_eq!(
        result.state_of("child"),
        Some(&UnitState::Blocked {
            upstream: "parent".into()
        })
    );
    match &result.outcome {
        JobOutcome::CompletedWithFailures { failures } => {
            let ids: Vec<&str> = failures.iter().map(|f| f.task_id.as_str()).collect();
            assert_eq!(ids, ["parent", "child"]);
        }
        other => panic!("expected failures, got {other:?}"),
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn tolerant_parent_failure_still_runs_child() -> TestResult {
    init_tracing();
    let graph = parent_child(true);
    let service = FakeBatchService::new().fail_after("parent", 1, 3);

    let result = driver(&service, SubmissionMode::Gated)
        .run_dag(&graph, JOB)
        .await?;

    let child = service.submission("child").expect("child submitted");
    assert!(child.upstream_terminal);
    assert!(event_pos(&service, "submit:child") > event_pos(&service, "query:parent"));
    assert!(service.submission("parent").unwrap().run_dependents_on_failure);

    assert_eq!(result.state_of("child"), Some(&UnitState::Succeeded));
    assert_eq!(result.failures().len(), 1);
    assert_eq!(result.failures()[0].task_id, "parent");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn tolerant_parent_child_failure_is_its_own() -> TestResult {
    init_tracing();
    let graph = parent_child(true);
    let service = FakeBatchService::new().fail("parent", 1).fail("child", 4);

    let result = driver(&service, SubmissionMode::Gated)
        .run_dag(&graph, JOB)
        .await?;

    assert_eq!(
        result.state_of("child"),
        Some(&UnitState::Failed(FailureReason::Execution {
            exit_code: Some(4)
        }))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cycle_is_reported_before_any_remote_call() {
    init_tracing();
    let (mut graph, ids) = chain(&["a", "b"]);
    graph.before(ids[1], ids[0]).unwrap();
    let service = FakeBatchService::new();

    let err = driver(&service, SubmissionMode::Gated)
        .run_dag(&graph, JOB)
        .await
        .unwrap_err();

    assert!(matches!(err, BatchDagError::CyclicDependency { .. }));
    assert!(err.is_graph_error());
    assert!(service.events().is_empty());
    assert!(!service.has_job(JOB));
}

#[tokio::test(start_paused = true)]
async fn duplicate_names_submit_nothing() {
    init_tracing();
    let mut graph = WorkGraph::new();
    add_named(&mut graph, "same");
    add_named(&mut graph, "same");
    let service = FakeBatchService::new();

    let err = driver(&service, SubmissionMode::Gated)
        .run_dag(&graph, JOB)
        .await
        .unwrap_err();

    assert!(matches!(err, BatchDagError::DuplicateTaskName(name) if name == "same"));
    assert!(service.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn timeout_marks_running_units_and_leaves_them_alone() -> TestResult {
    init_tracing();
    let mut graph = WorkGraph::new();
    add_named(&mut graph, "slow-1");
    add_named(&mut graph, "slow-2");
    let service = FakeBatchService::new()
        .never_finish("slow-1")
        .never_finish("slow-2");

    let mut opts = options(SubmissionMode::Gated);
    opts.poll_interval = Duration::from_secs(5);
    opts.timeout = Some(Duration::from_secs(30));
    opts.delete_job_when_done = true;

    let result = Driver::new(service.clone(), opts).run_dag(&graph, JOB).await?;

    assert_eq!(result.state_of("slow-1"), Some(&UnitState::TimedOut));
    assert_eq!(result.state_of("slow-2"), Some(&UnitState::TimedOut));
    assert_eq!(result.summary().timed_out, 2);
    assert!(!result.is_success());
    assert!(result.elapsed >= Duration::from_secs(30));

    // Nothing was deleted while tasks may still be running remotely.
    assert!(service.deleted_jobs().is_empty());
    assert!(service.has_job(JOB));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn timeout_covers_units_never_submitted() -> TestResult {
    init_tracing();
    let (graph, _) = chain(&["a", "b"]);
    let service = FakeBatchService::new().never_finish("a");

    let mut opts = options(SubmissionMode::Gated);
    opts.timeout = Some(Duration::from_secs(3));
    let result = Driver::new(service.clone(), opts).run_dag(&graph, JOB).await?;

    assert_eq!(service.submitted_ids(), ["a"]);
    assert_eq!(result.state_of("a"), Some(&UnitState::TimedOut));
    assert_eq!(result.state_of("b"), Some(&UnitState::TimedOut));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unbounded_timeout_means_no_deadline() -> TestResult {
    init_tracing();
    let (graph, _) = chain(&["a"]);
    let service = FakeBatchService::new().succeed_after("a", 2);

    let result = run_dag(
        service.clone(),
        &graph,
        JOB,
        Some(Duration::MAX),
        Some(Duration::from_secs(1)),
    )
    .await?;

    assert!(result.is_success());
    assert_eq!(result.state_of("a"), Some(&UnitState::Succeeded));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn zero_poll_interval_is_rejected_before_any_remote_call() {
    init_tracing();
    let (graph, _) = chain(&["a"]);
    let service = FakeBatchService::new().never_finish("a");

    let err = run_dag(service.clone(), &graph, JOB, None, Some(Duration::ZERO))
        .await
        .unwrap_err();

    assert!(matches!(err, BatchDagError::ConfigError(msg) if msg.contains("poll_interval")));
    assert!(service.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn existing_job_is_reused() -> TestResult {
    init_tracing();
    let (graph, _) = chain(&["a"]);
    let service = FakeBatchService::new().with_existing_job(JOB);

    driver(&service, SubmissionMode::Gated)
        .run_dag(&graph, JOB)
        .await?;

    assert!(!service.events().iter().any(|e| e.starts_with("ensure_job")));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn existence_check_failure_falls_back_to_ensure() -> TestResult {
    init_tracing();
    let (graph, _) = chain(&["a"]);
    let service = FakeBatchService::new().fail_job_exists(Fault::Unavailable("flaky".into()));

    let result = driver(&service, SubmissionMode::Gated)
        .run_dag(&graph, JOB)
        .await?;

    assert!(result.is_success());
    assert!(service.has_job(JOB));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn job_creation_failure_is_fatal() {
    init_tracing();
    let (graph, _) = chain(&["a"]);
    let service =
        FakeBatchService::new().fail_ensure_job(Fault::PoolUnusable("pool deleted".into()));

    let err = driver(&service, SubmissionMode::Gated)
        .run_dag(&graph, JOB)
        .await
        .unwrap_err();

    match err {
        BatchDagError::JobCreation { job_id, source } => {
            assert_eq!(job_id, JOB);
            assert!(matches!(source, ServiceError::PoolUnusable(_)));
        }
        other => panic!("expected JobCreation, got {other:?}"),
    }
    assert!(service.submissions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejected_submission_is_recorded_per_unit() -> TestResult {
    init_tracing();
    let mut graph = WorkGraph::new();
    let a = add_named(&mut graph, "a");
    let b = add_named(&mut graph, "b");
    add_named(&mut graph, "independent");
    graph.before(a, b)?;
    let service = FakeBatchService::new().reject_submit("a", Fault::Rejected("bad image".into()));

    let result = driver(&service, SubmissionMode::Gated)
        .run_dag(&graph, JOB)
        .await?;

    assert!(matches!(
        result.state_of("a"),
        Some(UnitState::Failed(FailureReason::SubmissionRejected(cause))) if cause.contains("bad image")
    ));
    assert_eq!(
        result.state_of("b"),
        Some(&UnitState::Blocked { upstream: "a".into() })
    );
    assert_eq!(result.state_of("independent"), Some(&UnitState::Succeeded));
    assert_eq!(service.submitted_ids(), ["independent"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn job_level_submission_error_aborts_run() {
    init_tracing();
    let (graph, _) = chain(&["a", "b"]);
    let service = FakeBatchService::new().reject_submit("b", Fault::JobNotFound);

    let err = driver(&service, SubmissionMode::Gated)
        .run_dag(&graph, JOB)
        .await
        .unwrap_err();

    match err {
        BatchDagError::Submission { unit_id, source } => {
            assert_eq!(unit_id, "b");
            assert!(source.is_job_fatal());
        }
        other => panic!("expected Submission error, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn transient_query_errors_are_retried_within_a_cycle() -> TestResult {
    init_tracing();
    let (graph, _) = chain(&["a"]);
    let service = FakeBatchService::new().flaky_queries("a", 2);

    let result = driver(&service, SubmissionMode::Gated)
        .run_dag(&graph, JOB)
        .await?;

    assert!(result.is_success());
    assert_eq!(service.query_count("a"), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn persistent_query_errors_fail_the_unit() -> TestResult {
    init_tracing();
    let (graph, _) = chain(&["a", "b"]);
    let service =
        FakeBatchService::new().broken_queries("a", Fault::Unavailable("gateway down".into()));

    let opts = options(SubmissionMode::Gated);
    let result = Driver::new(service.clone(), opts).run_dag(&graph, JOB).await?;

    assert!(matches!(
        result.state_of("a"),
        Some(UnitState::Failed(FailureReason::StateUnknown(_)))
    ));
    assert_eq!(
        result.state_of("b"),
        Some(&UnitState::Blocked { upstream: "a".into() })
    );
    let per_cycle = (opts.query_retries + 1) as usize;
    assert_eq!(
        service.query_count("a"),
        per_cycle * opts.max_unknown_polls as usize
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn lost_job_while_monitoring_aborts_run() {
    init_tracing();
    let (graph, _) = chain(&["a"]);
    let service = FakeBatchService::new().broken_queries("a", Fault::JobNotFound);

    let err = driver(&service, SubmissionMode::Gated)
        .run_dag(&graph, JOB)
        .await
        .unwrap_err();

    assert!(matches!(err, BatchDagError::Query { ref unit_id, .. } if unit_id == "a"));
    // Job-level errors are not retried.
    assert_eq!(service.query_count("a"), 1);
}

#[tokio::test(start_paused = true)]
async fn eager_mode_submits_children_with_parent_handles() -> TestResult {
    init_tracing();
    let (graph, _) = chain(&["a", "b"]);
    let service = FakeBatchService::new().succeed_after("a", 2);

    let result = driver(&service, SubmissionMode::Eager)
        .run_dag(&graph, JOB)
        .await?;

    assert!(result.is_success());
    assert!(event_pos(&service, "submit:b") < event_pos(&service, "query:a"));

    let b = service.submission("b").unwrap();
    assert_eq!(b.dependencies, ["a"]);
    assert!(!b.upstream_terminal);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn eager_mode_blocks_submitted_child_of_failed_parent() -> TestResult {
    init_tracing();
    let (graph, _) = chain(&["a", "b"]);
    let service = FakeBatchService::new().fail("a", 1);

    let result = driver(&service, SubmissionMode::Eager)
        .run_dag(&graph, JOB)
        .await?;

    assert_eq!(service.submitted_ids(), ["a", "b"]);
    assert_eq!(
        result.state_of("b"),
        Some(&UnitState::Blocked { upstream: "a".into() })
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn job_is_deleted_when_asked() -> TestResult {
    init_tracing();
    let (graph, _) = chain(&["a"]);
    let service = FakeBatchService::new();

    let mut opts = options(SubmissionMode::Gated);
    opts.delete_job_when_done = true;
    Driver::new(service.clone(), opts).run_dag(&graph, JOB).await?;

    assert_eq!(service.deleted_jobs(), [JOB]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn deletion_failure_does_not_fail_the_run() -> TestResult {
    init_tracing();
    let (graph, _) = chain(&["a"]);
    let service = FakeBatchService::new().fail_delete(Fault::Unavailable("try later".into()));

    let mut opts = options(SubmissionMode::Gated);
    opts.delete_job_when_done = true;
    let result = Driver::new(service.clone(), opts).run_dag(&graph, JOB).await?;

    assert!(result.is_success());
    assert!(service.deleted_jobs().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn batch_subset_runs_only_members() -> TestResult {
    init_tracing();
    let mut graph = WorkGraph::new();
    let a = add_named(&mut graph, "a");
    add_named(&mut graph, "skipped");
    let c = graph.add(WorkUnit::new("echo c"));
    graph.before(a, c)?;
    let service = FakeBatchService::new();

    let result = driver(&service, SubmissionMode::Gated)
        .run_batch(&graph, &[a, c], JOB)
        .await?;

    assert_eq!(service.submitted_ids(), ["a", "task-2"]);
    assert_eq!(result.units.len(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn free_function_uses_given_poll_interval() -> TestResult {
    init_tracing();
    let (graph, _) = chain(&["a"]);
    let service = FakeBatchService::new().succeed_after("a", 3);

    let result = run_dag(
        service.clone(),
        &graph,
        JOB,
        None,
        Some(Duration::from_secs(2)),
    )
    .await?;

    assert!(result.is_success());
    // Three `Running` answers, then success on the fourth poll.
    assert_eq!(service.query_count("a"), 4);
    assert!(result.elapsed >= Duration::from_secs(8));
    assert!(result.elapsed < Duration::from_secs(9));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn report_renders_every_unit() -> TestResult {
    init_tracing();
    let graph = parent_child(false);
    let service = FakeBatchService::new().fail("parent", 9);

    let result = driver(&service, SubmissionMode::Gated)
        .run_dag(&graph, JOB)
        .await?;
    let text = result.to_string();

    assert!(text.contains("completed with failures"));
    assert!(text.contains("parent: failed: execution failed (exit code 9)"));
    assert!(text.contains("child: blocked by 'parent'"));
    Ok(())
}
