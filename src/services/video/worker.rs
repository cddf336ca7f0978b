//! Этап 2: запуск и сопровождение внешнего процесса генерации видео
//!
//! stdout и stderr читаются двумя независимыми задачами, строки пересылаются
//! наблюдателям по мере поступления и параллельно ожидается завершение
//! процесса. Блокирующего чтения одного потока перед другим нет, поэтому
//! переполненный канал не может остановить процесс.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{OutputCheck, PipelineConfig};
use crate::events::{EventReporter, PipelineEvent, Stage, StreamKind};
use crate::utils::common::check_file_exists_and_valid;

use super::job::{GenerationJob, JobLifecycle, JobOutcome};

/// Пути, где ищется скрипт генерации, если он не задан явно
pub const SCRIPT_CANDIDATES: &[&str] = &[
    "python/hallo2_inference.py",
    "hallo2/scripts/inference_long.py",
    "hallo2/scripts/inference.py",
];

/// Сколько дочитывать вывод после завершения процесса
const READER_GRACE: Duration = Duration::from_secs(1);

/// Сколько последних строк stdout сохраняется при неудаче
const STDOUT_TAIL_LINES: usize = 20;

/// Интерпретатор и скрипт внешнего процесса
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    interpreter: PathBuf,
    script: PathBuf,
}

impl WorkerCommand {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
        }
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Найти интерпретатор и скрипт по конфигурации
    ///
    /// Ошибка содержит диагностику для итога `SpawnFailed`.
    pub fn locate(config: &PipelineConfig) -> Result<Self, String> {
        let script = match &config.worker_script {
            Some(script) if script.is_file() => script.clone(),
            Some(script) => {
                return Err(format!("Worker script not found: {}", script.display()));
            }
            None => SCRIPT_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.is_file())
                .ok_or_else(|| {
                    format!(
                        "Worker script not found, looked for: {}",
                        SCRIPT_CANDIDATES.join(", ")
                    )
                })?,
        };
        log::debug!("Using worker script {}", script.display());

        let interpreter = match &config.worker_interpreter {
            Some(interpreter) if interpreter.components().count() > 1 => interpreter.clone(),
            Some(name) => which::which(name)
                .map_err(|e| format!("Interpreter {} not found: {}", name.display(), e))?,
            None => which::which("python3")
                .or_else(|_| which::which("python"))
                .map_err(|_| "Python interpreter not found in PATH".to_string())?,
        };
        log::debug!("Using interpreter {}", interpreter.display());

        Ok(Self::new(interpreter, script))
    }

    fn command(&self, job: &GenerationJob) -> Command {
        let mut command = Command::new(&self.interpreter);
        command
            .arg(&self.script)
            .args(job.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// Запускает задания и превращает результат процесса в `JobOutcome`
#[derive(Debug, Clone)]
pub struct WorkerRunner {
    worker: WorkerCommand,
    output_check: OutputCheck,
}

/// Как закончилось ожидание процесса
enum Exit {
    Status(std::io::Result<ExitStatus>),
    TimedOut(Duration),
}

impl WorkerRunner {
    pub fn new(worker: WorkerCommand) -> Self {
        Self {
            worker,
            output_check: OutputCheck::Trust,
        }
    }

    pub fn with_output_check(mut self, output_check: OutputCheck) -> Self {
        self.output_check = output_check;
        self
    }

    pub fn worker(&self) -> &WorkerCommand {
        &self.worker
    }

    /// Выполнить задание без ограничения времени
    pub async fn run(&self, job: GenerationJob, reporter: &EventReporter) -> JobOutcome {
        self.supervise(job, reporter, None).await
    }

    /// Выполнить задание; по истечении `timeout` процесс убивается
    pub async fn run_with_timeout(
        &self,
        job: GenerationJob,
        reporter: &EventReporter,
        timeout: Duration,
    ) -> JobOutcome {
        self.supervise(job, reporter, Some(timeout)).await
    }

    async fn supervise(
        &self,
        job: GenerationJob,
        reporter: &EventReporter,
        deadline: Option<Duration>,
    ) -> JobOutcome {
        reporter.notify(PipelineEvent::StageStarted(Stage::VideoGeneration));
        let mut lifecycle = JobLifecycle::new();
        let label = job.label();

        let outcome = self.execute(&job, reporter, &mut lifecycle, deadline).await;

        match lifecycle.finish(&outcome) {
            Ok(state) => reporter.notify(PipelineEvent::JobStateChanged(state)),
            Err(e) => log::error!("{}: {}", label, e),
        }
        match &outcome {
            JobOutcome::Succeeded { output } => {
                log::info!("{} finished, output at {}", label, output.display())
            }
            other => log::error!("{} did not succeed: {:?}", label, other.state()),
        }
        outcome
    }

    async fn execute(
        &self,
        job: &GenerationJob,
        reporter: &EventReporter,
        lifecycle: &mut JobLifecycle,
        deadline: Option<Duration>,
    ) -> JobOutcome {
        let script = self.worker.script();
        if !script.is_file() {
            return JobOutcome::SpawnFailed {
                diagnostic: format!("Worker script not found: {}", script.display()),
            };
        }

        let mut command = self.worker.command(job);
        log::info!("Starting worker: {:?}", command.as_std());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return JobOutcome::SpawnFailed {
                    diagnostic: format!(
                        "Failed to start {}: {}",
                        self.worker.interpreter().display(),
                        e
                    ),
                };
            }
        };

        if let Ok(state) = lifecycle.start() {
            reporter.notify(PipelineEvent::JobStateChanged(state));
        }
        reporter.notify(PipelineEvent::WorkerStarted { pid: child.id() });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let readers: Vec<JoinHandle<()>> = [
            child
                .stdout
                .take()
                .map(|pipe| spawn_reader(pipe, StreamKind::Stdout, tx.clone())),
            child
                .stderr
                .take()
                .map(|pipe| spawn_reader(pipe, StreamKind::Stderr, tx.clone())),
        ]
        .into_iter()
        .flatten()
        .collect();
        drop(tx);

        let mut captured = Captured::default();
        let wait = async {
            match deadline {
                Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                    Ok(status) => Exit::Status(status),
                    Err(_) => {
                        log::warn!("Worker exceeded {:?}, killing it", limit);
                        if let Err(e) = child.kill().await {
                            log::error!("Failed to kill worker: {}", e);
                        }
                        Exit::TimedOut(limit)
                    }
                },
                None => Exit::Status(child.wait().await),
            }
        };
        tokio::pin!(wait);

        // Строки пересылаются, пока процесс работает
        let exit = loop {
            tokio::select! {
                exit = &mut wait => break exit,
                Some((stream, line)) = rx.recv() => captured.relay(reporter, stream, line),
            }
        };

        // Потомки процесса могут держать каналы открытыми, поэтому остаток
        // вывода дочитывается с ограничением по времени
        let drain = async {
            while let Some((stream, line)) = rx.recv().await {
                captured.relay(reporter, stream, line);
            }
        };
        if tokio::time::timeout(READER_GRACE, drain).await.is_err() {
            log::warn!(
                "Worker output still open {:?} after exit, detaching readers",
                READER_GRACE
            );
        }
        for reader in readers {
            reader.abort();
        }

        let Captured { stdout, stderr } = captured;
        match exit {
            Exit::TimedOut(after) => JobOutcome::TimedOut { after, stderr },
            Exit::Status(Err(e)) => JobOutcome::SpawnFailed {
                diagnostic: format!("Failed to wait for worker: {}", e),
            },
            Exit::Status(Ok(status)) => match status.code() {
                Some(0) => self.check_output(job).await,
                Some(exit_code) => JobOutcome::Failed {
                    exit_code,
                    stderr,
                    stdout_tail: tail(&stdout, STDOUT_TAIL_LINES),
                },
                None => JobOutcome::Terminated { stderr },
            },
        }
    }

    async fn check_output(&self, job: &GenerationJob) -> JobOutcome {
        let output = job.output_path().to_path_buf();
        if self.output_check == OutputCheck::RequireFile && !check_file_exists_and_valid(&output).await {
            return JobOutcome::MissingOutput { output };
        }
        JobOutcome::Succeeded { output }
    }
}

/// Весь вывод процесса, полученный к моменту завершения
#[derive(Default)]
struct Captured {
    stdout: String,
    stderr: String,
}

impl Captured {
    fn relay(&mut self, reporter: &EventReporter, stream: StreamKind, line: String) {
        let text = match stream {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        };
        text.push_str(&line);
        text.push('\n');
        reporter.notify(PipelineEvent::WorkerLine { stream, line });
    }
}

/// Последние `lines` строк текста
fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Читать поток построчно и пересылать строки
fn spawn_reader<R>(
    pipe: R,
    stream: StreamKind,
    tx: mpsc::UnboundedSender<(StreamKind, String)>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Error reading worker {:?}: {}", stream, e);
                    break;
                }
            }
        }
    })
}
