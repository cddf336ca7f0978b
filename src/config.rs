//! Модуль конфигурации библиотеки atenea
//!
//! Содержит модели и голоса TTS, формат аудио, политику проверки результата
//! и загрузку настроек из окружения (`.env`).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Базовый адрес OpenAI API
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Директория кэша речи по умолчанию
pub const DEFAULT_CACHE_DIR: &str = "cache/speech";

/// Модель TTS для использования с OpenAI API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TtsModel {
    /// Стандартная модель
    #[default]
    Standard,
    /// Модель высокого качества
    HighDefinition,
    /// gpt-4o-mini-tts
    Mini,
    /// Любой другой идентификатор модели
    Custom(String),
}

impl TtsModel {
    /// Получить строковое представление модели
    pub fn as_str(&self) -> &str {
        match self {
            Self::Standard => "tts-1",
            Self::HighDefinition => "tts-1-hd",
            Self::Mini => "gpt-4o-mini-tts",
            Self::Custom(name) => name,
        }
    }
}

impl FromStr for TtsModel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "tts-1" => Self::Standard,
            "tts-1-hd" => Self::HighDefinition,
            "gpt-4o-mini-tts" => Self::Mini,
            other => Self::Custom(other.to_string()),
        })
    }
}

impl fmt::Display for TtsModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Голос для использования с OpenAI API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TtsVoice {
    Alloy,
    Echo,
    Fable,
    Onyx,
    #[default]
    Nova,
    Shimmer,
    /// Голос, которого нет в списке (новые голоса API)
    Custom(String),
}

impl TtsVoice {
    /// Получить строковое представление голоса
    pub fn as_str(&self) -> &str {
        match self {
            Self::Alloy => "alloy",
            Self::Echo => "echo",
            Self::Fable => "fable",
            Self::Onyx => "onyx",
            Self::Nova => "nova",
            Self::Shimmer => "shimmer",
            Self::Custom(name) => name,
        }
    }
}

impl FromStr for TtsVoice {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "alloy" => Self::Alloy,
            "echo" => Self::Echo,
            "fable" => Self::Fable,
            "onyx" => Self::Onyx,
            "nova" => Self::Nova,
            "shimmer" => Self::Shimmer,
            other => Self::Custom(other.to_string()),
        })
    }
}

impl fmt::Display for TtsVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Формат аудио, который возвращает TTS сервис
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
    Opus,
    Aac,
    Flac,
}

impl AudioFormat {
    /// Значение поля `response_format` в запросе
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Opus => "opus",
            Self::Aac => "aac",
            Self::Flac => "flac",
        }
    }

    /// Расширение файла артефакта
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "wav" => Ok(Self::Wav),
            "opus" => Ok(Self::Opus),
            "aac" => Ok(Self::Aac),
            "flac" => Ok(Self::Flac),
            other => Err(format!("Unsupported audio format: {}", other)),
        }
    }
}

/// Что делать, если процесс завершился с кодом 0
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OutputCheck {
    /// Доверять коду возврата, файл не проверяется
    #[default]
    Trust,
    /// Требовать непустой выходной файл
    RequireFile,
}

/// Конфигурация конвейера
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// API ключ OpenAI; проверяется только при первом реальном запросе
    pub openai_api_key: Option<String>,
    /// Базовый адрес API (для совместимых сервисов)
    pub openai_base_url: String,
    /// Модель TTS
    pub tts_model: TtsModel,
    /// Голос TTS
    pub tts_voice: TtsVoice,
    /// Формат получаемого аудио
    pub audio_format: AudioFormat,
    /// Директория кэша речи
    pub cache_dir: PathBuf,
    /// Скрипт генерации видео
    pub worker_script: Option<PathBuf>,
    /// Интерпретатор для скрипта
    pub worker_interpreter: Option<PathBuf>,
    /// Политика проверки выходного файла
    pub output_check: OutputCheck,
    /// Ограничение времени работы процесса, в секундах
    pub worker_timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            tts_model: TtsModel::default(),
            tts_voice: TtsVoice::default(),
            audio_format: AudioFormat::default(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            worker_script: None,
            worker_interpreter: None,
            output_check: OutputCheck::default(),
            worker_timeout_secs: None,
        }
    }
}

impl PipelineConfig {
    /// Загрузить конфигурацию из окружения, предварительно прочитав `.env`
    pub fn from_env() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => log::debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => log::warn!("Failed to read .env file: {}", e),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Собрать конфигурацию из произвольного источника переменных
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.openai_api_key = get("OPENAI_API_KEY");
        if let Some(url) = get("OPENAI_BASE_URL") {
            config.openai_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(voice) = get("TTS_VOICE") {
            config.tts_voice = voice.parse().unwrap_or_default();
        }
        if let Some(model) = get("TTS_MODEL") {
            config.tts_model = model.parse().unwrap_or_default();
        }
        if let Some(format) = get("TTS_FORMAT") {
            match format.parse() {
                Ok(f) => config.audio_format = f,
                Err(e) => log::warn!("{}, falling back to mp3", e),
            }
        }
        if let Some(dir) = get("ATENEA_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        config.worker_script = get("ATENEA_WORKER_SCRIPT").map(PathBuf::from);
        config.worker_interpreter = get("ATENEA_PYTHON").map(PathBuf::from);
        if let Some(flag) = get("ATENEA_REQUIRE_OUTPUT") {
            if matches!(flag.trim(), "1" | "true" | "yes") {
                config.output_check = OutputCheck::RequireFile;
            }
        }
        config.worker_timeout_secs = get("ATENEA_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok());

        config
    }

    /// Ограничение времени работы процесса
    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker_timeout_secs.map(Duration::from_secs)
    }
}
