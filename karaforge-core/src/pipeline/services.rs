use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use url::Url;

use crate::lyrics::LyricEvent;

use super::error::{PipelineError, PipelineResult};

/// Seam for every external binary the pipeline shells out to. Tests
/// substitute a mock; production uses the system executor.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.output().await
    }
}

/// Fetches URL-supplied media into the track's output directory.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, url: &str, dest: &Path) -> PipelineResult<()>;
}

/// Plain streaming downloader with `file://` support, for direct media
/// URLs. Site-specific extractors plug in behind the same trait.
#[derive(Debug, Clone)]
pub struct HttpMediaDownloader {
    client: reqwest::Client,
}

impl HttpMediaDownloader {
    pub fn new() -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("karaforge/0.1")
            .build()
            .map_err(|err| PipelineError::Acquisition(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaDownloader for HttpMediaDownloader {
    async fn download(&self, url: &str, dest: &Path) -> PipelineResult<()> {
        if let Ok(parsed) = Url::parse(url) {
            if parsed.scheme() == "file" {
                let source = parsed
                    .to_file_path()
                    .map_err(|_| PipelineError::Acquisition("invalid file url".into()))?;
                fs::copy(&source, dest)
                    .await
                    .map_err(|source| PipelineError::io(dest, source))?;
                return Ok(());
            }
        }
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| PipelineError::Acquisition(err.to_string()))?;
        let mut stream = response.bytes_stream();
        let mut file = fs::File::create(dest)
            .await
            .map_err(|source| PipelineError::io(dest, source))?;
        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            let data = chunk.map_err(|err| PipelineError::Acquisition(err.to_string()))?;
            file.write_all(&data)
                .await
                .map_err(|source| PipelineError::io(dest, source))?;
        }
        Ok(())
    }
}

/// The exclusive stem-separation inference engine. Returns stem name →
/// produced path; any error string is wrapped into a separation error by
/// the caller.
#[async_trait]
pub trait SeparationEngine: Send + Sync {
    async fn separate(
        &self,
        audio: &Path,
        output_dir: &Path,
        model: &str,
        output_format: &str,
    ) -> Result<HashMap<String, PathBuf>, String>;
}

/// Invokes a separator CLI and reads the stem mapping from its JSON stdout.
pub struct CliSeparationEngine {
    binary: String,
    executor: std::sync::Arc<dyn CommandExecutor>,
}

impl CliSeparationEngine {
    pub fn new(binary: impl Into<String>, executor: std::sync::Arc<dyn CommandExecutor>) -> Self {
        Self {
            binary: binary.into(),
            executor,
        }
    }
}

#[async_trait]
impl SeparationEngine for CliSeparationEngine {
    async fn separate(
        &self,
        audio: &Path,
        output_dir: &Path,
        model: &str,
        output_format: &str,
    ) -> Result<HashMap<String, PathBuf>, String> {
        let mut command = Command::new(&self.binary);
        command
            .arg("--input")
            .arg(audio)
            .arg("--output-dir")
            .arg(output_dir)
            .arg("--model")
            .arg(model)
            .arg("--format")
            .arg(output_format)
            .arg("--print-stems");
        let output = self
            .executor
            .run(&mut command)
            .await
            .map_err(|err| err.to_string())?;
        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).to_string());
        }
        serde_json::from_slice(&output.stdout).map_err(|err| err.to_string())
    }
}

/// Speech-to-text over the vocal audio, yielding time-stamped lyric lines.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<Vec<LyricEvent>, String>;
}

/// Invokes a transcriber CLI that writes LRC to stdout.
pub struct CliTranscriber {
    binary: String,
    executor: std::sync::Arc<dyn CommandExecutor>,
}

impl CliTranscriber {
    pub fn new(binary: impl Into<String>, executor: std::sync::Arc<dyn CommandExecutor>) -> Self {
        Self {
            binary: binary.into(),
            executor,
        }
    }
}

#[async_trait]
impl Transcriber for CliTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<Vec<LyricEvent>, String> {
        let mut command = Command::new(&self.binary);
        command.arg("--input").arg(audio).arg("--output-format").arg("lrc");
        let output = self
            .executor
            .run(&mut command)
            .await
            .map_err(|err| err.to_string())?;
        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).to_string());
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(crate::lyrics::parse_lrc(&text))
    }
}
