//! Модуль для работы с TTS
//!
//! Кэш артефактов речи, клиент OpenAI и этап получения речи.

pub mod cache;
pub mod openai;
pub mod speech;

pub use cache::{ArtifactCache, Fingerprint};
pub use openai::{LazySynthesizer, OpenAiTts, SpeechSynthesizer, SynthesisError};
pub use speech::{acquire_speech, SpeechRequest};

#[cfg(test)]
mod tests;
