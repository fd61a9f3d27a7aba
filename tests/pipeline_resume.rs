use std::fs;
use std::path::Path;
use stepmark::{
    Argv, Command, DirMarkerStore, ExecutionContext, Failure, MarkerStore, Pipeline,
    PipelineError, Sink, Verbosity,
};
use tempfile::TempDir;

fn context(dir: &Path) -> ExecutionContext {
    ExecutionContext::default()
        .with_working_dir(dir)
        .with_stderr(Sink::Null)
}

fn pipeline(dir: &Path, steps: &[(&str, &str)]) -> Pipeline {
    let mut pipeline =
        Pipeline::new(Verbosity::Quiet).with_marker_store(DirMarkerStore::new(dir.join("markers")));
    for (text, id) in steps {
        pipeline.append(Command::shell(*text, id).unwrap());
    }
    pipeline
}

fn order(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("order.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_steps_run_one_after_another() {
    let dir = TempDir::new().unwrap();
    let steps = [
        ("echo A-start >> order.log; sleep 0.2; echo A-end >> order.log", "a"),
        ("echo B-start >> order.log; echo B-end >> order.log", "b"),
        ("echo C-start >> order.log; echo C-end >> order.log", "c"),
    ];
    pipeline(dir.path(), &steps)
        .run_in(&context(dir.path()))
        .unwrap();
    assert_eq!(
        order(dir.path()),
        vec!["A-start", "A-end", "B-start", "B-end", "C-start", "C-end"]
    );
}

#[test]
fn test_failing_step_resumes_on_next_run() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    let steps = [
        ("echo step1 >> order.log", "m1"),
        ("false", "m2"),
        ("echo step3 >> order.log", "m3"),
    ];
    let mut pipeline = pipeline(dir.path(), &steps);

    let PipelineError::Execution(err) = pipeline.run_in(&ctx).unwrap_err() else {
        panic!("expected an execution error");
    };
    assert_eq!(err.marker_id, "m2");
    assert_eq!(err.invocation, "false");
    assert_eq!(err.failure, Failure::Exited(1));

    let store = DirMarkerStore::new(dir.path().join("markers"));
    assert!(store.exists("m1").unwrap());
    assert!(!store.exists("m2").unwrap());
    assert!(!store.exists("m3").unwrap());
    assert_eq!(order(dir.path()), vec!["step1"]);

    // Same pipeline again: step1 is skipped, m2 is retried and fails again.
    let err = pipeline.run_in(&ctx).unwrap_err();
    assert!(matches!(err, PipelineError::Execution(ref e) if e.marker_id == "m2"));
    assert_eq!(order(dir.path()), vec!["step1"]);
    assert!(!store.exists("m3").unwrap());
}

#[test]
fn test_fixed_step_lets_a_new_process_finish() {
    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path());
    fs::write(dir.path().join("input.txt"), "").unwrap();

    let steps = [
        ("echo align >> order.log", "align"),
        ("test -s input.txt && echo call >> order.log", "call"),
        ("echo filter >> order.log", "filter"),
    ];
    assert!(pipeline(dir.path(), &steps).run_in(&ctx).is_err());

    // The operator fixes the input; a freshly built pipeline picks up the markers.
    fs::write(dir.path().join("input.txt"), "reads\n").unwrap();
    let report = pipeline(dir.path(), &steps).run_in(&ctx).unwrap();
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.executed(), 2);
    assert_eq!(order(dir.path()), vec!["align", "call", "filter"]);

    let report = pipeline(dir.path(), &steps).run_in(&ctx).unwrap();
    assert_eq!(report.executed(), 0);
    assert_eq!(order(dir.path()), vec!["align", "call", "filter"]);
}

#[test]
fn test_failing_pipe_stage_fails_the_step() {
    let dir = TempDir::new().unwrap();
    let mut pipeline =
        Pipeline::new(Verbosity::Quiet).with_marker_store(DirMarkerStore::new(dir.path()));
    pipeline.append(
        Command::pipe(
            vec![
                Argv::new("cat", ["missing-input.txt"]),
                Argv::new("wc", ["-l"]),
            ],
            "count",
        )
        .unwrap(),
    );
    let ctx = context(dir.path()).with_stdout(Sink::Null);

    let err = pipeline.run_in(&ctx).unwrap_err();
    assert!(matches!(err, PipelineError::Execution(ref e) if e.marker_id == "count"));
    assert!(!DirMarkerStore::new(dir.path()).exists("count").unwrap());
}

#[test]
fn test_markers_record_the_invocation_fingerprint() {
    let dir = TempDir::new().unwrap();
    let command = Command::argv("true", Vec::<String>::new(), "t").unwrap();
    let fingerprint = command.fingerprint();

    let mut pipeline =
        Pipeline::new(Verbosity::Quiet).with_marker_store(DirMarkerStore::new(dir.path()));
    pipeline.append(command);
    pipeline.run_in(&context(dir.path())).unwrap();

    let stored = DirMarkerStore::new(dir.path()).read("t").unwrap();
    assert_eq!(stored, Some(fingerprint));
}
