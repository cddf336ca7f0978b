//! Модуль обработки ошибок библиотеки atenea
//!
//! Каждая ошибка несёт контекст этапа (какой этап, какой отпечаток или задание),
//! чтобы вызывающая сторона могла по ней действовать. Повторов внутри библиотеки нет.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Ошибки конвейера atenea
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Ошибка конфигурации (например, нет API ключа при первом обращении к сервису)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Удалённый TTS сервис отклонил запрос или недоступен
    #[error("Speech synthesis failed for {fingerprint}: {message}")]
    RemoteService {
        fingerprint: String,
        message: String,
    },

    /// Не удалось создать директорию или записать файл артефакта
    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Внешний процесс не удалось запустить
    #[error("Failed to start worker for {job}: {diagnostic}")]
    Spawn { job: String, diagnostic: String },

    /// Внешний процесс завершился с ненулевым кодом
    #[error("Worker failed for {job} with exit code {exit_code}: {stderr}")]
    WorkerFailure {
        job: String,
        exit_code: i32,
        stderr: String,
        /// Последние строки stdout
        stdout_tail: String,
    },

    /// Процесс не уложился в отведённое время
    #[error("Worker for {job} timed out after {after:?}")]
    Timeout { job: String, after: Duration },

    /// Процесс завершился успешно, но выходной файл не появился
    #[error("Worker for {job} exited successfully but produced no output at {}", output.display())]
    MissingOutput { job: String, output: PathBuf },

    /// Неверные параметры задания
    #[error("Invalid job parameter: {0}")]
    InvalidJob(String),
}

impl PipelineError {
    /// Обернуть ошибку ввода-вывода путём, с которым работали
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Storage {
            path: path.into(),
            source,
        }
    }

    /// Ошибка относится к самой работе процесса (а не к его запуску)
    pub fn is_worker_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::WorkerFailure { .. }
                | PipelineError::Timeout { .. }
                | PipelineError::MissingOutput { .. }
        )
    }
}

/// Тип Result для библиотеки atenea
pub type Result<T> = std::result::Result<T, PipelineError>;
