//! Тесты этапа получения речи
//!
//! Вместо OpenAI используется подсчитывающий синтезатор.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::{AudioFormat, TtsModel, TtsVoice};
use crate::error::PipelineError;
use crate::events::{ChannelObserver, EventReporter, PipelineEvent};
use crate::services::tts::{
    acquire_speech, ArtifactCache, LazySynthesizer, SpeechRequest, SpeechSynthesizer,
    SynthesisError,
};

struct CountingSynthesizer {
    calls: AtomicUsize,
}

impl CountingSynthesizer {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for CountingSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        model: &str,
        _format: AudioFormat,
    ) -> Result<Bytes, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(format!("{}|{}|{}", text, voice, model)))
    }
}

struct RejectingSynthesizer;

#[async_trait]
impl SpeechSynthesizer for RejectingSynthesizer {
    async fn synthesize(
        &self,
        _text: &str,
        _voice: &str,
        _model: &str,
        _format: AudioFormat,
    ) -> Result<Bytes, SynthesisError> {
        Err(SynthesisError::Rejected {
            status: 429,
            body: "quota exceeded".to_string(),
        })
    }
}

fn request(text: &str) -> SpeechRequest {
    SpeechRequest::new(text, TtsVoice::Nova, TtsModel::Standard)
}

#[tokio::test]
async fn test_identical_requests_call_service_once() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path(), AudioFormat::Mp3);
    let synthesizer = CountingSynthesizer::new();
    let reporter = EventReporter::new();

    let first = acquire_speech(&cache, &synthesizer, &request("Hola"), &reporter)
        .await
        .unwrap();
    let second = acquire_speech(&cache, &synthesizer, &request("Hola"), &reporter)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(synthesizer.calls(), 1);
    assert_eq!(fs::read(&first).unwrap(), b"Hola|nova|tts-1");
}

#[tokio::test]
async fn test_different_voice_is_a_new_request() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path(), AudioFormat::Mp3);
    let synthesizer = CountingSynthesizer::new();
    let reporter = EventReporter::new();

    let nova = acquire_speech(&cache, &synthesizer, &request("Hola"), &reporter)
        .await
        .unwrap();
    let onyx = SpeechRequest::new("Hola", TtsVoice::Onyx, TtsModel::Standard);
    let onyx = acquire_speech(&cache, &synthesizer, &onyx, &reporter)
        .await
        .unwrap();

    assert_ne!(nova, onyx);
    assert_eq!(synthesizer.calls(), 2);
}

#[tokio::test]
async fn test_missing_credential_only_matters_on_miss() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path(), AudioFormat::Mp3);
    let reporter = EventReporter::new();
    let lazy = LazySynthesizer::new(None, "http://127.0.0.1:9/v1");
    let req = request("Sin clave");

    match acquire_speech(&cache, &lazy, &req, &reporter).await {
        Err(PipelineError::Configuration(message)) => {
            assert!(message.contains(req.fingerprint().as_str()))
        }
        other => panic!("expected configuration error, got {:?}", other),
    }
    assert!(cache.lookup(&req.fingerprint()).is_none());

    cache.store(&req.fingerprint(), b"cached audio").unwrap();
    let path = acquire_speech(&cache, &lazy, &req, &reporter).await.unwrap();
    assert_eq!(fs::read(path).unwrap(), b"cached audio");
    assert!(!lazy.is_initialized());
}

#[tokio::test]
async fn test_service_errors_are_wrapped_with_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path(), AudioFormat::Mp3);
    let reporter = EventReporter::new();
    let req = request("Hola");

    match acquire_speech(&cache, &RejectingSynthesizer, &req, &reporter).await {
        Err(PipelineError::RemoteService {
            fingerprint,
            message,
        }) => {
            assert_eq!(fingerprint, req.fingerprint().to_string());
            assert!(message.starts_with("speech acquisition"));
            assert!(message.contains("quota exceeded"));
        }
        other => panic!("expected remote service error, got {:?}", other),
    }
    assert!(cache.lookup(&req.fingerprint()).is_none());
}

#[tokio::test]
async fn test_destination_receives_copy() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path().join("cache"), AudioFormat::Mp3);
    let synthesizer = CountingSynthesizer::new();
    let reporter = EventReporter::new();
    let destination = dir.path().join("out").join("speech.mp3");

    let req = request("Hola").with_destination(&destination);
    let path = acquire_speech(&cache, &synthesizer, &req, &reporter)
        .await
        .unwrap();

    assert_eq!(path, destination);
    assert_eq!(fs::read(&destination).unwrap(), b"Hola|nova|tts-1");
    assert!(cache.lookup(&req.fingerprint()).is_some());
}

#[tokio::test]
async fn test_events_report_miss_then_hit() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path(), AudioFormat::Mp3);
    let synthesizer = CountingSynthesizer::new();
    let reporter = EventReporter::new();
    let (observer, mut rx) = ChannelObserver::new();
    reporter.add_observer(observer);

    acquire_speech(&cache, &synthesizer, &request("Hola"), &reporter)
        .await
        .unwrap();
    acquire_speech(&cache, &synthesizer, &request("Hola"), &reporter)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events[1], PipelineEvent::CacheMiss { .. }));
    assert!(matches!(events[2], PipelineEvent::ArtifactStored { .. }));
    assert!(matches!(events[4], PipelineEvent::CacheHit { .. }));
    assert_eq!(events.len(), 5);
}

/// Синтезатор, возвращающий крупный артефакт
struct LargeSynthesizer;

#[async_trait]
impl SpeechSynthesizer for LargeSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        _voice: &str,
        _model: &str,
        _format: AudioFormat,
    ) -> Result<Bytes, SynthesisError> {
        Ok(Bytes::from(text.repeat(1 << 20)))
    }
}

#[tokio::test(flavor = "current_thread")]
async fn test_large_artifacts_are_written_off_the_runtime_thread() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ArtifactCache::new(dir.path().join("cache"), AudioFormat::Mp3);
    let reporter = EventReporter::new();

    let texts = ["uno ", "dos ", "tres"];
    let requests: Vec<SpeechRequest> = texts
        .iter()
        .map(|text| {
            let destination = dir.path().join(format!("{}.mp3", text.trim()));
            request(text).with_destination(destination)
        })
        .collect();

    let results = acquire_three(&cache, &requests, &reporter).await;
    for (text, result) in texts.iter().zip(results) {
        let delivered = result.unwrap();
        let bytes = fs::read(&delivered).unwrap();
        assert_eq!(bytes.len(), text.len() << 20);
        assert_eq!(
            bytes,
            fs::read(cache.lookup(&request(text).fingerprint()).unwrap()).unwrap()
        );
    }
}

async fn acquire_three(
    cache: &ArtifactCache,
    requests: &[SpeechRequest],
    reporter: &EventReporter,
) -> Vec<crate::error::Result<std::path::PathBuf>> {
    let synthesizer = LargeSynthesizer;
    let (a, b, c) = tokio::join!(
        acquire_speech(cache, &synthesizer, &requests[0], reporter),
        acquire_speech(cache, &synthesizer, &requests[1], reporter),
        acquire_speech(cache, &synthesizer, &requests[2], reporter),
    );
    vec![a, b, c]
}
