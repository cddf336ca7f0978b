//! Модуль для кэширования результатов TTS
//!
//! Артефакт речи хранится по пути, который зависит только от отпечатка запроса:
//! `<cache_dir>/speech_<fingerprint>.<ext>`. Существующий артефакт никогда не
//! перезаписывается по частям: запись идёт во временный файл в той же
//! директории и затем атомарно переименовывается.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::config::AudioFormat;
use crate::error::{PipelineError, Result};

/// Длина отпечатка в шестнадцатеричных символах
pub const FINGERPRINT_LEN: usize = 16;

/// Отпечаток запроса синтеза
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Вычислить отпечаток для `(content, voice, model)`
    ///
    /// Каждое поле предваряется своей длиной, поэтому никакое содержимое
    /// не может выдать себя за границу между полями.
    pub fn compute(content: &str, voice: &str, model: &str) -> Self {
        let mut hasher = Sha256::new();
        for field in [content, voice, model] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        let digest = hasher.finalize();

        let mut hex = String::with_capacity(FINGERPRINT_LEN);
        for byte in digest.iter().take(FINGERPRINT_LEN / 2) {
            hex.push_str(&format!("{:02x}", byte));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Кэш артефактов речи на диске
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    /// Директория для кэша
    cache_dir: PathBuf,
    /// Формат (и расширение) артефактов
    format: AudioFormat,
}

impl ArtifactCache {
    /// Создать кэш; директория создаётся при первой записи
    pub fn new(cache_dir: impl Into<PathBuf>, format: AudioFormat) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            format,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Канонический путь артефакта для отпечатка
    pub fn artifact_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.cache_dir.join(format!(
            "speech_{}.{}",
            fingerprint,
            self.format.extension()
        ))
    }

    /// Найти артефакт; отсутствующий или недоступный файл считается промахом
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<PathBuf> {
        let path = self.artifact_path(fingerprint);
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => Some(path),
            _ => None,
        }
    }

    /// Записать артефакт и вернуть его путь
    pub fn store(&self, fingerprint: &Fingerprint, bytes: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| PipelineError::storage(&self.cache_dir, e))?;

        let path = self.artifact_path(fingerprint);
        write_atomically(&self.cache_dir, &path, bytes)?;

        log::debug!("Cached {} bytes at {}", bytes.len(), path.display());
        Ok(path)
    }
}

/// Записать байты во временный файл в `dir` и переименовать его в `path`
pub(crate) fn write_atomically(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| PipelineError::storage(dir, e))?;
    temp.write_all(bytes)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| PipelineError::storage(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| PipelineError::storage(path, e.error))?;
    Ok(())
}
