//! Задание на генерацию видео и его итог

use std::ffi::OsString;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::error::{PipelineError, Result};

use super::preset::QualityPreset;

/// Частота кадров по умолчанию
pub const DEFAULT_FPS: u32 = 25;

/// Одно задание для внешнего процесса генерации видео
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationJob {
    source_image: PathBuf,
    source_audio: PathBuf,
    output_path: PathBuf,
    frame_rate: NonZeroU32,
    diffusion_steps: NonZeroU32,
    resolution: Option<NonZeroU32>,
    lip_weight: Option<f32>,
    guidance_scale: Option<f32>,
}

impl GenerationJob {
    /// Задание с частотой 25 кадров и количеством шагов профиля `Balanced`
    pub fn new(
        source_image: impl Into<PathBuf>,
        source_audio: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        let steps = QualityPreset::Balanced.values().steps;
        Self {
            source_image: source_image.into(),
            source_audio: source_audio.into(),
            output_path: output_path.into(),
            frame_rate: NonZeroU32::new(DEFAULT_FPS).unwrap_or(NonZeroU32::MIN),
            diffusion_steps: NonZeroU32::new(steps).unwrap_or(NonZeroU32::MIN),
            resolution: None,
            lip_weight: None,
            guidance_scale: None,
        }
    }

    /// Задание, все настройки качества которого взяты из профиля
    pub fn from_preset(
        source_image: impl Into<PathBuf>,
        source_audio: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        preset: QualityPreset,
    ) -> Self {
        let values = preset.values();
        let mut job = Self::new(source_image, source_audio, output_path);
        job.diffusion_steps = NonZeroU32::new(values.steps).unwrap_or(job.diffusion_steps);
        job.resolution = NonZeroU32::new(values.resolution);
        job.lip_weight = Some(values.lip_weight);
        job.guidance_scale = Some(values.cfg_scale);
        job
    }

    pub fn with_frame_rate(mut self, fps: u32) -> Result<Self> {
        self.frame_rate = positive_int("fps", fps)?;
        Ok(self)
    }

    pub fn with_steps(mut self, steps: u32) -> Result<Self> {
        self.diffusion_steps = positive_int("steps", steps)?;
        Ok(self)
    }

    pub fn with_resolution(mut self, resolution: u32) -> Result<Self> {
        self.resolution = Some(positive_int("resolution", resolution)?);
        Ok(self)
    }

    pub fn with_lip_weight(mut self, weight: f32) -> Result<Self> {
        self.lip_weight = Some(positive_real("lip-weight", weight)?);
        Ok(self)
    }

    pub fn with_guidance_scale(mut self, scale: f32) -> Result<Self> {
        self.guidance_scale = Some(positive_real("cfg-scale", scale)?);
        Ok(self)
    }

    pub fn source_image(&self) -> &Path {
        &self.source_image
    }

    pub fn source_audio(&self) -> &Path {
        &self.source_audio
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate.get()
    }

    pub fn diffusion_steps(&self) -> u32 {
        self.diffusion_steps.get()
    }

    pub fn resolution(&self) -> Option<u32> {
        self.resolution.map(NonZeroU32::get)
    }

    pub fn lip_weight(&self) -> Option<f32> {
        self.lip_weight
    }

    pub fn guidance_scale(&self) -> Option<f32> {
        self.guidance_scale
    }

    /// Короткое имя задания для логов и ошибок
    pub fn label(&self) -> String {
        format!("job {}", self.output_path.display())
    }

    /// Аргументы командной строки процесса (без интерпретатора и скрипта)
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--image".into(),
            self.source_image.clone().into(),
            "--audio".into(),
            self.source_audio.clone().into(),
            "--output".into(),
            self.output_path.clone().into(),
            "--fps".into(),
            self.frame_rate.to_string().into(),
            "--steps".into(),
            self.diffusion_steps.to_string().into(),
        ];
        if let Some(weight) = self.lip_weight {
            args.push("--lip-weight".into());
            args.push(weight.to_string().into());
        }
        if let Some(scale) = self.guidance_scale {
            args.push("--cfg-scale".into());
            args.push(scale.to_string().into());
        }
        if let Some(resolution) = self.resolution {
            args.push("--resolution".into());
            args.push(resolution.to_string().into());
        }
        args
    }
}

fn positive_int(name: &str, value: u32) -> Result<NonZeroU32> {
    NonZeroU32::new(value)
        .ok_or_else(|| PipelineError::InvalidJob(format!("--{} must be a positive integer", name)))
}

fn positive_real(name: &str, value: f32) -> Result<f32> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(PipelineError::InvalidJob(format!(
            "--{} must be a positive number, got {}",
            name, value
        )))
    }
}

/// Параметры видео, известные до получения речи
#[derive(Debug, Clone, Default)]
pub struct VideoSpec {
    pub image: PathBuf,
    pub output: PathBuf,
    pub preset: QualityPreset,
    pub frame_rate: Option<u32>,
    pub steps: Option<u32>,
    pub resolution: Option<u32>,
    pub lip_weight: Option<f32>,
    pub guidance_scale: Option<f32>,
}

impl VideoSpec {
    pub fn new(image: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    /// Проверить параметры до получения речи
    pub fn validate(&self) -> Result<()> {
        self.clone().into_job(PathBuf::new()).map(|_| ())
    }

    /// Собрать задание, когда аудио уже получено; явные значения важнее профиля
    pub fn into_job(self, audio: impl Into<PathBuf>) -> Result<GenerationJob> {
        let mut job = GenerationJob::from_preset(self.image, audio, self.output, self.preset);
        if let Some(fps) = self.frame_rate {
            job = job.with_frame_rate(fps)?;
        }
        if let Some(steps) = self.steps {
            job = job.with_steps(steps)?;
        }
        if let Some(resolution) = self.resolution {
            job = job.with_resolution(resolution)?;
        }
        if let Some(weight) = self.lip_weight {
            job = job.with_lip_weight(weight)?;
        }
        if let Some(scale) = self.guidance_scale {
            job = job.with_guidance_scale(scale)?;
        }
        Ok(job)
    }
}

/// Состояние задания
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    SpawnFailed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::SpawnFailed)
    }
}

/// Недопустимый переход состояния
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid job transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// Жизненный цикл одного задания: терминальное состояние записывается один раз
#[derive(Debug)]
pub struct JobLifecycle {
    state: JobState,
}

impl JobLifecycle {
    pub fn new() -> Self {
        Self {
            state: JobState::Pending,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Pending -> Running
    pub fn start(&mut self) -> std::result::Result<JobState, InvalidTransition> {
        self.transition(JobState::Running)
    }

    /// Running -> итог; SpawnFailed допустим и из Pending
    pub fn finish(&mut self, outcome: &JobOutcome) -> std::result::Result<JobState, InvalidTransition> {
        self.transition(outcome.state())
    }

    fn transition(&mut self, to: JobState) -> std::result::Result<JobState, InvalidTransition> {
        let allowed = match (self.state, to) {
            (JobState::Pending, JobState::Running) => true,
            (JobState::Pending, JobState::SpawnFailed) => true,
            (JobState::Running, next) => next.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(to)
    }
}

impl Default for JobLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Итог задания
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Процесс завершился с кодом 0
    Succeeded { output: PathBuf },
    /// Процесс завершился с ненулевым кодом
    ///
    /// `stderr` хранится целиком, от stdout только последние строки:
    /// скрипты Hallo2 иногда печатают трассировку туда.
    Failed {
        exit_code: i32,
        stderr: String,
        stdout_tail: String,
    },
    /// Процесс не удалось запустить
    SpawnFailed { diagnostic: String },
    /// Процесс завершён извне (сигналом), кода возврата нет
    Terminated { stderr: String },
    /// Процесс остановлен по таймауту
    TimedOut { after: Duration, stderr: String },
    /// Код 0, но выходного файла нет (только при `OutputCheck::RequireFile`)
    MissingOutput { output: PathBuf },
}

impl JobOutcome {
    /// Терминальное состояние, соответствующее итогу
    pub fn state(&self) -> JobState {
        match self {
            Self::Succeeded { .. } => JobState::Succeeded,
            Self::Failed { .. } | Self::TimedOut { .. } | Self::MissingOutput { .. } => {
                JobState::Failed
            }
            Self::SpawnFailed { .. } | Self::Terminated { .. } => JobState::SpawnFailed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn output(&self) -> Option<&Path> {
        match self {
            Self::Succeeded { output } => Some(output),
            _ => None,
        }
    }

    /// Диагностика неудачи, если она есть
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::Succeeded { .. } | Self::MissingOutput { .. } => None,
            Self::Failed {
                stderr,
                stdout_tail,
                ..
            } if stderr.trim().is_empty() => Some(stdout_tail),
            Self::Failed { stderr, .. }
            | Self::Terminated { stderr }
            | Self::TimedOut { stderr, .. } => Some(stderr),
            Self::SpawnFailed { diagnostic } => Some(diagnostic),
        }
    }

    /// Превратить итог в `Result`, добавив имя задания
    pub fn into_result(self, job: &str) -> Result<PathBuf> {
        let job = job.to_string();
        match self {
            Self::Succeeded { output } => Ok(output),
            Self::Failed {
                exit_code,
                stderr,
                stdout_tail,
            } => Err(PipelineError::WorkerFailure {
                job,
                exit_code,
                stderr,
                stdout_tail,
            }),
            Self::SpawnFailed { diagnostic } => Err(PipelineError::Spawn { job, diagnostic }),
            Self::Terminated { stderr } => Err(PipelineError::Spawn {
                job,
                diagnostic: format!("worker was terminated by a signal: {}", stderr.trim()),
            }),
            Self::TimedOut { after, .. } => Err(PipelineError::Timeout { job, after }),
            Self::MissingOutput { output } => Err(PipelineError::MissingOutput { job, output }),
        }
    }
}
