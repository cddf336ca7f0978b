//! Тесты сопровождения процесса
//!
//! Вместо скрипта Hallo2 запускаются shell-заглушки через `sh`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::OutputCheck;
use crate::events::{EventReporter, PipelineEvent, PipelineObserver, StreamKind};
use crate::services::video::{GenerationJob, JobOutcome, JobState, WorkerCommand, WorkerRunner};

/// Наблюдатель, запоминающий строки вывода и время их получения
#[derive(Default)]
struct LineRecorder {
    lines: Mutex<Vec<(StreamKind, String, Instant)>>,
    states: Mutex<Vec<JobState>>,
}

impl PipelineObserver for LineRecorder {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::WorkerLine { stream, line } => {
                self.lines.lock().push((*stream, line.clone(), Instant::now()))
            }
            PipelineEvent::JobStateChanged(state) => self.states.lock().push(*state),
            _ => {}
        }
    }
}

fn write_stub(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("worker.sh");
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    path
}

fn job_in(dir: &Path) -> GenerationJob {
    GenerationJob::new(dir.join("avatar.png"), dir.join("speech.mp3"), dir.join("video.mp4"))
}

fn runner(script: PathBuf) -> WorkerRunner {
    WorkerRunner::new(WorkerCommand::new("sh", script))
}

#[tokio::test]
async fn test_success_returns_requested_output() {
    let dir = tempfile::tempdir().unwrap();
    // Скрипт пишет заглушку в путь после --output
    let script = write_stub(
        dir.path(),
        r#"while [ $# -gt 0 ]; do
  if [ "$1" = "--output" ]; then echo fake-video > "$2"; fi
  shift
done
echo done"#,
    );
    let job = job_in(dir.path());
    let expected = job.output_path().to_path_buf();

    let reporter = EventReporter::new();
    let recorder = Arc::new(LineRecorder::default());
    reporter.add_observer(recorder.clone());

    let outcome = runner(script)
        .with_output_check(OutputCheck::RequireFile)
        .run(job, &reporter)
        .await;

    assert_eq!(outcome, JobOutcome::Succeeded { output: expected.clone() });
    assert_eq!(fs::read_to_string(expected).unwrap(), "fake-video\n");
    assert_eq!(
        *recorder.states.lock(),
        vec![JobState::Running, JobState::Succeeded]
    );
}

#[tokio::test]
async fn test_nonzero_exit_carries_code_and_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_stub(dir.path(), "echo working\necho ERR123 >&2\nexit 1");
    let reporter = EventReporter::new();

    let outcome = runner(script).run(job_in(dir.path()), &reporter).await;

    match &outcome {
        JobOutcome::Failed {
            exit_code,
            stderr,
            stdout_tail,
        } => {
            assert_eq!(*exit_code, 1);
            assert!(stderr.contains("ERR123"));
            assert!(!stderr.contains("working"));
            assert_eq!(stdout_tail, "working");
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(outcome.state(), JobState::Failed);
}

#[tokio::test]
async fn test_missing_script_is_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let reporter = EventReporter::new();
    let recorder = Arc::new(LineRecorder::default());
    reporter.add_observer(recorder.clone());

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        runner(dir.path().join("missing.sh")).run(job_in(dir.path()), &reporter),
    )
    .await
    .expect("spawn failure must not hang");

    match outcome {
        JobOutcome::SpawnFailed { diagnostic } => assert!(diagnostic.contains("missing.sh")),
        other => panic!("expected spawn failure, got {:?}", other),
    }
    assert_eq!(*recorder.states.lock(), vec![JobState::SpawnFailed]);
}

#[tokio::test]
async fn test_missing_interpreter_is_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_stub(dir.path(), "exit 0");
    let reporter = EventReporter::new();
    let worker = WorkerCommand::new(dir.path().join("no-such-python"), script);

    let outcome = WorkerRunner::new(worker).run(job_in(dir.path()), &reporter).await;
    assert!(matches!(outcome, JobOutcome::SpawnFailed { .. }));
}

#[tokio::test]
async fn test_lines_are_relayed_while_worker_runs() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_stub(
        dir.path(),
        "for i in 1 2 3 4 5 6 7 8 9 10; do echo \"step $i\"; sleep 0.1; done",
    );
    let reporter = EventReporter::new();
    let recorder = Arc::new(LineRecorder::default());
    reporter.add_observer(recorder.clone());

    let outcome = runner(script).run(job_in(dir.path()), &reporter).await;
    let finished = Instant::now();
    assert!(outcome.is_success());

    let lines = recorder.lines.lock();
    assert_eq!(lines.len(), 10);
    assert_eq!(lines[0].1, "step 1");
    assert_eq!(lines[9].1, "step 10");

    // Строки приходят по мере вывода, а не пачкой после завершения
    let first_seen = lines[0].2;
    let early = lines
        .iter()
        .filter(|(_, _, seen)| finished.duration_since(*seen) >= Duration::from_millis(300))
        .count();
    assert!(early >= 5, "only {} lines observed before exit", early);
    assert!(lines[9].2.duration_since(first_seen) >= Duration::from_millis(500));
}

#[tokio::test]
async fn test_both_streams_drain_without_deadlock() {
    let dir = tempfile::tempdir().unwrap();
    // Больше, чем вмещает буфер канала, в оба потока
    let script = write_stub(
        dir.path(),
        "i=0; while [ $i -lt 4000 ]; do echo \"out line $i with some padding to fill the pipe\"; echo \"err line $i with some padding to fill the pipe\" >&2; i=$((i+1)); done",
    );
    let reporter = EventReporter::new();
    let recorder = Arc::new(LineRecorder::default());
    reporter.add_observer(recorder.clone());

    let outcome = tokio::time::timeout(
        Duration::from_secs(30),
        runner(script).run(job_in(dir.path()), &reporter),
    )
    .await
    .expect("worker must not deadlock on full pipes");

    assert!(outcome.is_success());
    let lines = recorder.lines.lock();
    let stdout = lines.iter().filter(|(s, _, _)| *s == StreamKind::Stdout).count();
    let stderr = lines.iter().filter(|(s, _, _)| *s == StreamKind::Stderr).count();
    assert_eq!(stdout, 4000);
    assert_eq!(stderr, 4000);
}

#[tokio::test]
async fn test_timeout_kills_worker() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_stub(dir.path(), "echo loading models >&2\nexec sleep 30");
    let reporter = EventReporter::new();

    let started = Instant::now();
    let outcome = runner(script)
        .run_with_timeout(job_in(dir.path()), &reporter, Duration::from_millis(300))
        .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    match outcome {
        JobOutcome::TimedOut { after, stderr } => {
            assert_eq!(after, Duration::from_millis(300));
            assert!(stderr.contains("loading models"));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_blank_stderr_stays_blank() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_stub(
        dir.path(),
        "i=0; while [ $i -lt 30 ]; do echo \"progress $i\"; i=$((i+1)); done\necho 'Traceback: KeyError'\nexit 3",
    );
    let reporter = EventReporter::new();

    let outcome = runner(script).run(job_in(dir.path()), &reporter).await;
    match &outcome {
        JobOutcome::Failed {
            exit_code,
            stderr,
            stdout_tail,
        } => {
            assert_eq!(*exit_code, 3);
            assert!(stderr.is_empty());
            assert_eq!(stdout_tail.lines().count(), 20);
            assert!(stdout_tail.ends_with("Traceback: KeyError"));
            assert!(stdout_tail.starts_with("progress 11\n"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    let diagnostic = outcome.diagnostic().unwrap();
    assert!(diagnostic.ends_with("Traceback: KeyError"));
}

#[tokio::test]
async fn test_timeout_is_not_held_by_lingering_children() {
    let dir = tempfile::tempdir().unwrap();
    // Без exec: sleep остаётся потомком и держит каналы открытыми
    let script = write_stub(dir.path(), "echo loading models >&2\nsleep 8");
    let reporter = EventReporter::new();

    let started = Instant::now();
    let outcome = runner(script)
        .run_with_timeout(job_in(dir.path()), &reporter, Duration::from_millis(300))
        .await;

    assert!(started.elapsed() < Duration::from_secs(3));
    match outcome {
        JobOutcome::TimedOut { stderr, .. } => assert!(stderr.contains("loading models")),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_exit_is_not_held_by_background_children() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_stub(dir.path(), "echo started\nsleep 8 &\nexit 0");
    let reporter = EventReporter::new();
    let recorder = Arc::new(LineRecorder::default());
    reporter.add_observer(recorder.clone());

    let started = Instant::now();
    let outcome = runner(script).run(job_in(dir.path()), &reporter).await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(outcome.is_success());
    assert_eq!(recorder.lines.lock()[0].1, "started");
}

#[tokio::test]
async fn test_signal_termination_is_not_an_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_stub(dir.path(), "kill -9 $$");
    let reporter = EventReporter::new();

    let outcome = runner(script).run(job_in(dir.path()), &reporter).await;
    assert!(matches!(outcome, JobOutcome::Terminated { .. }));
    assert_eq!(outcome.state(), JobState::SpawnFailed);
}

#[tokio::test]
async fn test_missing_output_policy() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_stub(dir.path(), "exit 0");
    let reporter = EventReporter::new();

    let trusted = runner(script.clone()).run(job_in(dir.path()), &reporter).await;
    assert!(trusted.is_success());

    let checked = runner(script)
        .with_output_check(OutputCheck::RequireFile)
        .run(job_in(dir.path()), &reporter)
        .await;
    assert_eq!(
        checked,
        JobOutcome::MissingOutput {
            output: dir.path().join("video.mp4")
        }
    );
}

#[tokio::test]
async fn test_arguments_reach_worker() {
    let dir = tempfile::tempdir().unwrap();
    let args_file = dir.path().join("args.txt");
    let script = write_stub(
        dir.path(),
        &format!("echo \"$@\" > '{}'", args_file.display()),
    );
    let job = job_in(dir.path())
        .with_frame_rate(30)
        .unwrap()
        .with_lip_weight(1.5)
        .unwrap();
    let reporter = EventReporter::new();

    assert!(runner(script).run(job, &reporter).await.is_success());
    let args = fs::read_to_string(args_file).unwrap();
    assert!(args.contains("--fps 30"));
    assert!(args.contains("--steps 40"));
    assert!(args.contains("--lip-weight 1.5"));
    assert!(!args.contains("--cfg-scale"));
}
