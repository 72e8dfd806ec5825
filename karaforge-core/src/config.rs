use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct KaraforgeConfig {
    pub system: SystemSection,
    pub paths: PathsSection,
    pub separation: SeparationSection,
    pub lyrics: LyricsSection,
    pub render: RenderSection,
    pub distribution: DistributionSection,
    pub lock: LockSection,
}

impl KaraforgeConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.lock_file)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub brand_code: Option<String>,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub output_dir: String,
    pub cache_dir: String,
    pub logs_dir: String,
    pub lock_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeparationSection {
    #[serde(default = "default_separator_binary")]
    pub binary: String,
    pub clean_model: String,
    #[serde(default)]
    pub backing_models: Vec<String>,
    #[serde(default)]
    pub other_stem_models: Vec<String>,
    pub output_format: String,
}

fn default_separator_binary() -> String {
    "audio-separator".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LyricsSection {
    #[serde(default = "default_transcriber_binary")]
    pub transcriber_binary: String,
    #[serde(default = "default_line_budget")]
    pub line_budget: usize,
    #[serde(default = "default_tail_seconds")]
    pub tail_seconds: f64,
    #[serde(default = "default_comma_window")]
    pub comma_window: usize,
    #[serde(default = "default_max_splits")]
    pub max_splits: usize,
}

fn default_transcriber_binary() -> String {
    "whisper-lrc".to_string()
}

fn default_line_budget() -> usize {
    36
}

fn default_tail_seconds() -> f64 {
    5.0
}

fn default_comma_window() -> usize {
    20
}

fn default_max_splits() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderSection {
    pub ffmpeg_binary: String,
    pub resolution: [u32; 2],
    pub background_color: String,
    pub font: String,
    pub title_seconds: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistributionSection {
    pub archive_binary: String,
    pub remote: Option<String>,
    #[serde(default)]
    pub generate_lof: bool,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockSection {
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: u64,
}

fn default_poll_seconds() -> u64 {
    5
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<KaraforgeConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
