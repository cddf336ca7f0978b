//! Модуль генерации видео внешним процессом (Hallo2)

pub mod job;
pub mod preset;
pub mod worker;

pub use job::{GenerationJob, JobLifecycle, JobOutcome, JobState, VideoSpec};
pub use preset::QualityPreset;
pub use worker::{WorkerCommand, WorkerRunner};

#[cfg(all(test, unix))]
mod tests;
