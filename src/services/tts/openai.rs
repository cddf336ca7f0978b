//! Модуль для интеграции с OpenAI TTS API
//!
//! `LazySynthesizer` создаётся один раз в точке сборки приложения и передаётся
//! по ссылке. Настоящий HTTP клиент появляется только при первом промахе кэша,
//! поэтому попадания в кэш не требуют API ключа.

use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::OnceCell;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;

use crate::config::{AudioFormat, PipelineConfig};

/// Ошибки удалённого синтеза речи
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Нет API ключа
    #[error("OPENAI_API_KEY is not set")]
    MissingCredential,

    /// Сервис ответил ошибкой
    #[error("TTS service rejected the request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    /// Сетевая ошибка
    #[error("TTS request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Удалённый сервис синтеза речи
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Синтезировать речь и вернуть сжатое аудио
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        model: &str,
        format: AudioFormat,
    ) -> Result<Bytes, SynthesisError>;
}

/// Клиент для работы с OpenAI TTS API
pub struct OpenAiTts {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiTts {
    /// Создает новый клиент OpenAI TTS
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, SynthesisError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Клиент с заранее настроенным `reqwest::Client`
    pub fn with_client(client: Client, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn speech_url(&self) -> String {
        format!("{}/audio/speech", self.base_url)
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiTts {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        model: &str,
        format: AudioFormat,
    ) -> Result<Bytes, SynthesisError> {
        log::info!(
            "Sending TTS request ({} chars, voice {}, model {})",
            text.chars().count(),
            voice,
            model
        );

        let response = self
            .client
            .post(self.speech_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": model,
                "voice": voice,
                "input": text,
                "response_format": format.as_str(),
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(text) => text,
                Err(e) => format!("Failed to read error response: {}", e),
            };
            log::error!("TTS API error (status {}): {}", status, body);
            return Err(SynthesisError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let audio = response.bytes().await?;
        log::debug!("Received {} bytes of audio", audio.len());
        Ok(audio)
    }
}

/// Клиент, который инициализируется при первом реальном запросе
pub struct LazySynthesizer {
    api_key: Option<String>,
    base_url: String,
    client: OnceCell<OpenAiTts>,
}

impl LazySynthesizer {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.into(),
            client: OnceCell::new(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.openai_api_key.clone(), config.openai_base_url.clone())
    }

    /// Был ли клиент уже создан
    pub fn is_initialized(&self) -> bool {
        self.client.get().is_some()
    }

    fn client(&self) -> Result<&OpenAiTts, SynthesisError> {
        self.client.get_or_try_init(|| {
            let api_key = self
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .ok_or(SynthesisError::MissingCredential)?;
            log::info!("Initializing TTS client for {}", self.base_url);
            OpenAiTts::new(api_key, self.base_url.clone())
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for LazySynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        model: &str,
        format: AudioFormat,
    ) -> Result<Bytes, SynthesisError> {
        self.client()?.synthesize(text, voice, model, format).await
    }
}
