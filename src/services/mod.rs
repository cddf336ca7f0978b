pub mod tts;
pub mod video;
