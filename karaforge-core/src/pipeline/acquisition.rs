use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::info;
use url::Url;

use crate::track::MediaSource;

use super::error::{PipelineError, PipelineResult};
use super::services::MediaDownloader;

const AUDIO_EXTENSIONS: [&str; 7] = ["flac", "wav", "mp3", "m4a", "ogg", "aiff", "opus"];

/// Brings the track's input media into its output directory under the
/// shared naming convention, whatever form the input arrived in.
pub struct MediaAcquirer {
    downloader: Arc<dyn MediaDownloader>,
}

impl MediaAcquirer {
    pub fn new(downloader: Arc<dyn MediaDownloader>) -> Self {
        Self { downloader }
    }

    /// The deterministic destination for a given source, so idempotency
    /// checks agree across runs: `"{base} (Source).{ext}"`.
    pub fn planned_destination(source: &MediaSource, output_dir: &Path, base: &str) -> PathBuf {
        output_dir.join(format!("{base} (Source).{}", Self::extension_of(source)))
    }

    pub async fn acquire(
        &self,
        source: &MediaSource,
        output_dir: &Path,
        base: &str,
    ) -> PipelineResult<PathBuf> {
        let dest = Self::planned_destination(source, output_dir, base);
        match source {
            MediaSource::Url(url) => {
                info!(url, dest = %dest.display(), "downloading input media");
                self.downloader.download(url, &dest).await?;
            }
            MediaSource::LocalFile(path) => {
                if !path.is_file() {
                    return Err(PipelineError::Acquisition(format!(
                        "input file {} does not exist",
                        path.display()
                    )));
                }
                info!(from = %path.display(), dest = %dest.display(), "copying input media");
                fs::copy(path, &dest)
                    .await
                    .map_err(|source| PipelineError::io(&dest, source))?;
            }
            MediaSource::LocalDirectory(dir) => {
                let found = Self::first_audio_file(dir)?;
                info!(from = %found.display(), dest = %dest.display(), "copying input media from directory");
                fs::copy(&found, &dest)
                    .await
                    .map_err(|source| PipelineError::io(&dest, source))?;
            }
        }
        Ok(dest)
    }

    fn extension_of(source: &MediaSource) -> String {
        match source {
            MediaSource::Url(url) => Url::parse(url)
                .ok()
                .and_then(|parsed| {
                    Path::new(parsed.path())
                        .extension()
                        .map(|ext| ext.to_string_lossy().to_string())
                })
                .filter(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
                .unwrap_or_else(|| "m4a".to_string()),
            MediaSource::LocalFile(path) => path
                .extension()
                .map(|ext| ext.to_string_lossy().to_string())
                .unwrap_or_else(|| "m4a".to_string()),
            MediaSource::LocalDirectory(dir) => Self::first_audio_file(dir)
                .ok()
                .and_then(|path| path.extension().map(|ext| ext.to_string_lossy().to_string()))
                .unwrap_or_else(|| "m4a".to_string()),
        }
    }

    /// First audio file in lexical order, so repeated runs agree.
    fn first_audio_file(dir: &Path) -> PipelineResult<PathBuf> {
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|source| PipelineError::io(dir, source))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .map(|ext| {
                            AUDIO_EXTENSIONS.contains(&ext.to_string_lossy().to_lowercase().as_str())
                        })
                        .unwrap_or(false)
            })
            .collect();
        candidates.sort();
        candidates.into_iter().next().ok_or_else(|| {
            PipelineError::Acquisition(format!("no audio file found in {}", dir.display()))
        })
    }
}
