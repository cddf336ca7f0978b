//! Модуль событий конвейера
//!
//! Реализация паттерна Observer: этапы конвейера сообщают о попаданиях в кэш,
//! запуске процесса и каждой строке его вывода, а наблюдатели получают эти
//! события сразу, не дожидаясь завершения процесса.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::services::video::JobState;

/// Этап конвейера
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    /// Получение речи (кэш или TTS)
    SpeechAcquisition,
    /// Генерация видео внешним процессом
    VideoGeneration,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpeechAcquisition => "speech",
            Self::VideoGeneration => "video",
        }
    }
}

/// Поток вывода процесса
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Событие конвейера
#[derive(Debug, Clone, Serialize)]
pub enum PipelineEvent {
    /// Начат этап
    StageStarted(Stage),
    /// Речь найдена в кэше, запрос к API не нужен
    CacheHit { fingerprint: String, path: PathBuf },
    /// Речи нет в кэше
    CacheMiss { fingerprint: String },
    /// Новый артефакт записан в кэш
    ArtifactStored { fingerprint: String, path: PathBuf },
    /// Процесс запущен
    WorkerStarted { pid: Option<u32> },
    /// Очередная строка вывода процесса
    WorkerLine { stream: StreamKind, line: String },
    /// Смена состояния задания
    JobStateChanged(JobState),
}

/// Наблюдатель, получающий события конвейера
pub trait PipelineObserver: Send + Sync {
    /// Вызывается для каждого события, в порядке их возникновения
    fn on_event(&self, event: &PipelineEvent);
}

/// Рассылает события всем зарегистрированным наблюдателям
pub struct EventReporter {
    observers: RwLock<HashMap<usize, Arc<dyn PipelineObserver>>>,
    next_id: AtomicUsize,
}

impl EventReporter {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Добавить наблюдателя
    ///
    /// Возвращает идентификатор, по которому наблюдателя можно удалить.
    pub fn add_observer(&self, observer: Arc<dyn PipelineObserver>) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.observers.write().insert(id, observer);
        id
    }

    /// Удалить наблюдателя по идентификатору
    pub fn remove_observer(&self, id: usize) -> Option<Arc<dyn PipelineObserver>> {
        self.observers.write().remove(&id)
    }

    /// Количество наблюдателей
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Уведомить всех наблюдателей
    pub fn notify(&self, event: PipelineEvent) {
        let observers = self.observers.read();
        for observer in observers.values() {
            observer.on_event(&event);
        }
    }
}

impl Default for EventReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Наблюдатель, пересылающий события в канал Tokio
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelObserver {
    /// Создать наблюдателя и приёмник событий
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl PipelineObserver for ChannelObserver {
    fn on_event(&self, event: &PipelineEvent) {
        // Приёмник мог быть закрыт, конвейер от этого не зависит
        let _ = self.tx.send(event.clone());
    }
}

/// Наблюдатель, пишущий события в лог
pub struct LogObserver;

impl PipelineObserver for LogObserver {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StageStarted(stage) => log::info!("Stage started: {}", stage.as_str()),
            PipelineEvent::CacheHit { fingerprint, path } => {
                log::info!("Reusing cached speech {} at {}", fingerprint, path.display())
            }
            PipelineEvent::CacheMiss { fingerprint } => {
                log::info!("No cached speech for {}, synthesizing", fingerprint)
            }
            PipelineEvent::ArtifactStored { fingerprint, path } => {
                log::info!("Stored speech {} at {}", fingerprint, path.display())
            }
            PipelineEvent::WorkerStarted { pid } => match pid {
                Some(pid) => log::info!("Worker started with pid {}", pid),
                None => log::info!("Worker started"),
            },
            PipelineEvent::WorkerLine { stream, line } => match stream {
                StreamKind::Stdout => log::info!(target: "atenea::worker", "{}", line),
                StreamKind::Stderr => log::warn!(target: "atenea::worker", "{}", line),
            },
            PipelineEvent::JobStateChanged(state) => log::debug!("Job state: {:?}", state),
        }
    }
}
