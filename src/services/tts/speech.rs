//! Этап 1: получение речи
//!
//! Отпечаток запроса → проверка кэша → (при промахе) запрос к TTS → запись в кэш.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{TtsModel, TtsVoice};
use crate::error::{PipelineError, Result};
use crate::events::{EventReporter, PipelineEvent, Stage};

use super::cache::{write_atomically, ArtifactCache, Fingerprint};
use super::openai::{SpeechSynthesizer, SynthesisError};

/// Запрос на синтез речи
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    /// Текст для озвучивания
    pub content: String,
    /// Голос
    pub voice: TtsVoice,
    /// Модель
    pub model: TtsModel,
    /// Куда дополнительно положить готовое аудио
    pub destination: Option<PathBuf>,
}

impl SpeechRequest {
    pub fn new(content: impl Into<String>, voice: TtsVoice, model: TtsModel) -> Self {
        Self {
            content: content.into(),
            voice,
            model,
            destination: None,
        }
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Отпечаток запроса (ключ кэша)
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.content, self.voice.as_str(), self.model.as_str())
    }
}

/// Получить речь для запроса: из кэша или от TTS сервиса
///
/// Возвращает путь к артефакту в кэше, либо `destination`, если он задан.
pub async fn acquire_speech(
    cache: &ArtifactCache,
    synthesizer: &dyn SpeechSynthesizer,
    request: &SpeechRequest,
    reporter: &EventReporter,
) -> Result<PathBuf> {
    reporter.notify(PipelineEvent::StageStarted(Stage::SpeechAcquisition));
    let fingerprint = request.fingerprint();

    let artifact = match cache.lookup(&fingerprint) {
        Some(path) => {
            log::info!("Cache hit for {}, skipping TTS request", fingerprint);
            reporter.notify(PipelineEvent::CacheHit {
                fingerprint: fingerprint.to_string(),
                path: path.clone(),
            });
            path
        }
        None => {
            log::info!("Cache miss for {}", fingerprint);
            reporter.notify(PipelineEvent::CacheMiss {
                fingerprint: fingerprint.to_string(),
            });

            let audio = synthesizer
                .synthesize(
                    &request.content,
                    request.voice.as_str(),
                    request.model.as_str(),
                    cache.format(),
                )
                .await
                .map_err(|e| stage_error(&fingerprint, e))?;

            let path = {
                let cache = cache.clone();
                let fingerprint = fingerprint.clone();
                off_runtime(cache.dir().to_path_buf(), move || {
                    cache.store(&fingerprint, &audio)
                })
                .await?
            };
            reporter.notify(PipelineEvent::ArtifactStored {
                fingerprint: fingerprint.to_string(),
                path: path.clone(),
            });
            path
        }
    };

    match &request.destination {
        Some(destination) => {
            let target = destination.clone();
            off_runtime(destination.clone(), move || deliver(&artifact, &target)).await?;
            Ok(destination.clone())
        }
        None => Ok(artifact),
    }
}

fn stage_error(fingerprint: &Fingerprint, error: SynthesisError) -> PipelineError {
    match error {
        SynthesisError::MissingCredential => PipelineError::Configuration(format!(
            "speech acquisition for {} needs OPENAI_API_KEY",
            fingerprint
        )),
        other => PipelineError::RemoteService {
            fingerprint: fingerprint.to_string(),
            message: format!("speech acquisition: {}", other),
        },
    }
}

/// Выполнить запись на диск в пуле блокирующих задач tokio
async fn off_runtime<T, F>(path: PathBuf, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PipelineError::storage(path, io::Error::new(io::ErrorKind::Other, e)))?
}

/// Скопировать артефакт в указанное место, не трогая сам кэш
fn deliver(artifact: &Path, destination: &Path) -> Result<()> {
    if artifact == destination {
        return Ok(());
    }
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| PipelineError::storage(&dir, e))?;
    let bytes = fs::read(artifact).map_err(|e| PipelineError::storage(artifact, e))?;
    write_atomically(&dir, destination, &bytes)?;
    log::debug!("Copied {} to {}", artifact.display(), destination.display());
    Ok(())
}
