//! Оркестратор конвейера: речь, затем видео
//!
//! Этапы строго последовательны, второй этап использует артефакт первого.
//! Клиент TTS принадлежит точке сборки приложения и передаётся по ссылке.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::events::{EventReporter, PipelineEvent, PipelineObserver, Stage};
use crate::services::tts::{acquire_speech, ArtifactCache, SpeechRequest, SpeechSynthesizer};
use crate::services::video::{
    GenerationJob, JobOutcome, JobState, VideoSpec, WorkerCommand, WorkerRunner,
};

/// Полный запрос: что сказать и как это показать
#[derive(Debug, Clone)]
pub struct AvatarRequest {
    pub speech: SpeechRequest,
    pub video: VideoSpec,
}

impl AvatarRequest {
    pub fn new(speech: SpeechRequest, video: VideoSpec) -> Self {
        Self { speech, video }
    }
}

/// Основная структура для работы с библиотекой
pub struct Pipeline<'a> {
    /// Конфигурация
    config: PipelineConfig,
    /// Кэш речи
    cache: ArtifactCache,
    /// Удалённый синтезатор речи
    synthesizer: &'a dyn SpeechSynthesizer,
    /// Явно заданный процесс; иначе ищется по конфигурации при каждом запуске
    worker: Option<WorkerCommand>,
    reporter: EventReporter,
}

impl<'a> Pipeline<'a> {
    /// Создать конвейер с указанной конфигурацией и синтезатором
    pub fn new(config: PipelineConfig, synthesizer: &'a dyn SpeechSynthesizer) -> Self {
        let cache = ArtifactCache::new(config.cache_dir.clone(), config.audio_format);
        Self {
            config,
            cache,
            synthesizer,
            worker: None,
            reporter: EventReporter::new(),
        }
    }

    /// Использовать заданный процесс вместо поиска по конфигурации
    pub fn with_worker(mut self, worker: WorkerCommand) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Добавить наблюдателя событий
    pub fn add_observer(&self, observer: Arc<dyn PipelineObserver>) -> usize {
        self.reporter.add_observer(observer)
    }

    /// Удалить наблюдателя событий
    pub fn remove_observer(&self, id: usize) -> Option<Arc<dyn PipelineObserver>> {
        self.reporter.remove_observer(id)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Этап 1: получить речь (кэш или TTS)
    pub async fn acquire_speech(&self, request: &SpeechRequest) -> Result<PathBuf> {
        acquire_speech(&self.cache, self.synthesizer, request, &self.reporter).await
    }

    /// Этап 2: выполнить задание генерации видео
    ///
    /// Никогда не возвращает ошибку: любой исход описан `JobOutcome`.
    /// Ограничение времени берётся из конфигурации.
    pub async fn run_generation(&self, job: GenerationJob) -> JobOutcome {
        self.generate(job, self.config.worker_timeout()).await
    }

    /// Этап 2 с явным ограничением времени
    pub async fn run_generation_with_timeout(
        &self,
        job: GenerationJob,
        timeout: Duration,
    ) -> JobOutcome {
        self.generate(job, Some(timeout)).await
    }

    async fn generate(&self, job: GenerationJob, timeout: Option<Duration>) -> JobOutcome {
        let worker = match &self.worker {
            Some(worker) => worker.clone(),
            None => match WorkerCommand::locate(&self.config) {
                Ok(worker) => worker,
                Err(diagnostic) => {
                    log::error!("{}", diagnostic);
                    self.reporter
                        .notify(PipelineEvent::StageStarted(Stage::VideoGeneration));
                    self.reporter
                        .notify(PipelineEvent::JobStateChanged(JobState::SpawnFailed));
                    return JobOutcome::SpawnFailed { diagnostic };
                }
            },
        };

        let runner = WorkerRunner::new(worker).with_output_check(self.config.output_check);
        match timeout {
            Some(timeout) => runner.run_with_timeout(job, &self.reporter, timeout).await,
            None => runner.run(job, &self.reporter).await,
        }
    }

    /// Полный конвейер: текст → речь → видео
    pub async fn run(&self, request: AvatarRequest) -> Result<PathBuf> {
        log::info!("Starting avatar pipeline");

        // Неверные параметры видео не должны стоить запроса к TTS
        request.video.validate()?;

        let audio = self.acquire_speech(&request.speech).await?;
        log::info!("Speech ready at {}", audio.display());

        let job = request.video.into_job(audio)?;
        let label = job.label();
        let output = self.run_generation(job).await.into_result(&label)?;

        log::info!("Avatar video ready at {}", output.display());
        Ok(output)
    }
}
