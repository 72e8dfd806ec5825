use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use url::Url;

/// How a track's input media was supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Url(String),
    LocalFile(PathBuf),
    LocalDirectory(PathBuf),
}

impl MediaSource {
    /// Classifies a raw input string into exactly one source kind.
    pub fn classify(input: &str) -> Self {
        if let Ok(parsed) = Url::parse(input) {
            if matches!(parsed.scheme(), "http" | "https") {
                return MediaSource::Url(input.to_string());
            }
            if parsed.scheme() == "file" {
                if let Ok(path) = parsed.to_file_path() {
                    return Self::classify_path(path);
                }
            }
        }
        Self::classify_path(PathBuf::from(input))
    }

    fn classify_path(path: PathBuf) -> Self {
        if path.is_dir() {
            MediaSource::LocalDirectory(path)
        } else {
            MediaSource::LocalFile(path)
        }
    }
}

/// One song's mutable pipeline state. The output directory is the durable
/// store; the track itself only lives for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub source: MediaSource,
    pub output_dir: Option<PathBuf>,
    artifacts: BTreeMap<String, BTreeMap<String, PathBuf>>,
}

impl Track {
    pub fn new(source: MediaSource, artist: Option<String>, title: Option<String>) -> Self {
        Self {
            artist,
            title,
            source,
            output_dir: None,
            artifacts: BTreeMap::new(),
        }
    }

    /// Reconstructs identity from an existing output directory name, as used
    /// by the edit-lyrics and finalise-only modes. Names are
    /// `"Artist - Title"`, optionally prefixed with a brand code
    /// (`"BRAND-0001 - Artist - Title"`).
    pub fn from_directory_name(dir: &Path) -> Option<Self> {
        let name = dir.file_name()?.to_str()?;
        let parts: Vec<&str> = name.split(" - ").collect();
        let (artist, title) = match parts.len() {
            0 | 1 => return None,
            2 => (parts[0].to_string(), parts[1].to_string()),
            _ => {
                // First segment is a brand code; the remainder re-splits
                // once into artist and title.
                let remainder = parts[1..].join(" - ");
                let (artist, title) = remainder.split_once(" - ")?;
                (artist.to_string(), title.to_string())
            }
        };
        let mut track = Track::new(
            MediaSource::LocalDirectory(dir.to_path_buf()),
            Some(artist),
            Some(title),
        );
        track.output_dir = Some(dir.to_path_buf());
        Some(track)
    }

    /// `"{artist} - {title}"` when both are known, otherwise the input
    /// file stem.
    pub fn base_name(&self) -> String {
        match (&self.artist, &self.title) {
            (Some(artist), Some(title)) => format!("{artist} - {title}"),
            _ => match &self.source {
                MediaSource::LocalFile(path) | MediaSource::LocalDirectory(path) => path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
                    .unwrap_or_else(|| "Unknown".to_string()),
                MediaSource::Url(url) => url
                    .rsplit('/')
                    .next()
                    .filter(|segment| !segment.is_empty())
                    .map(|segment| segment.split('?').next().unwrap_or(segment).to_string())
                    .unwrap_or_else(|| "Unknown".to_string()),
            },
        }
    }

    /// Applies the shared artifact naming convention:
    /// `"{artist} - {title} ({label}).{ext}"` inside the output directory.
    /// Renaming this convention breaks resumability against prior runs.
    pub fn output_file(&self, label: &str, ext: &str) -> PathBuf {
        let dir = self
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        dir.join(format!("{} ({label}).{ext}", self.base_name()))
    }

    pub fn record_artifact(&mut self, stage: &str, name: &str, path: PathBuf) {
        let entry = self.artifacts.entry(stage.to_string()).or_default();
        if let Some(existing) = entry.get(name) {
            debug_assert_eq!(
                existing, &path,
                "artifact {stage}.{name} re-recorded with a different path"
            );
        }
        entry.insert(name.to_string(), path);
    }

    pub fn artifact(&self, stage: &str, name: &str) -> Option<&Path> {
        self.artifacts
            .get(stage)
            .and_then(|names| names.get(name))
            .map(PathBuf::as_path)
    }

    pub fn stage_artifacts(&self, stage: &str) -> Option<&BTreeMap<String, PathBuf>> {
        self.artifacts.get(stage)
    }

    pub fn artifacts(&self) -> &BTreeMap<String, BTreeMap<String, PathBuf>> {
        &self.artifacts
    }
}
