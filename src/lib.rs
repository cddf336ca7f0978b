//! Основной файл библиотеки atenea
//!
//! Текст превращается в речь через OpenAI TTS (с кэшем по отпечатку запроса),
//! затем внешний процесс Hallo2 делает из изображения и речи говорящее видео.

pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod services;
pub mod utils;

pub use crate::config::{AudioFormat, OutputCheck, PipelineConfig, TtsModel, TtsVoice};
pub use crate::error::{PipelineError, Result};
pub use crate::events::{
    ChannelObserver, EventReporter, LogObserver, PipelineEvent, PipelineObserver, Stage,
    StreamKind,
};
pub use crate::pipeline::{AvatarRequest, Pipeline};
pub use crate::services::tts::{
    ArtifactCache, Fingerprint, LazySynthesizer, OpenAiTts, SpeechRequest, SpeechSynthesizer,
    SynthesisError,
};
pub use crate::services::video::{
    GenerationJob, JobOutcome, JobState, QualityPreset, VideoSpec, WorkerCommand, WorkerRunner,
};
