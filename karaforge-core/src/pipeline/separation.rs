use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::info;

use crate::config::SeparationSection;
use crate::lock::ResourceLock;

use super::error::{PipelineError, PipelineResult};
use super::services::SeparationEngine;
use super::stage::Artifact;

/// Runs stem-separation models against the track's source audio. Every
/// model invocation holds the shared inference lock for its duration, since
/// the machine has a single inference slot shared across processes.
pub struct AudioSeparator {
    engine: Arc<dyn SeparationEngine>,
    lock: ResourceLock,
    config: SeparationSection,
}

impl AudioSeparator {
    pub fn new(
        engine: Arc<dyn SeparationEngine>,
        lock: ResourceLock,
        config: SeparationSection,
    ) -> Self {
        Self {
            engine,
            lock,
            config,
        }
    }

    pub fn output_format(&self) -> &str {
        &self.config.output_format
    }

    /// The required pass: instrumental and vocals from the clean model.
    /// A missing instrumental is fatal for the track.
    pub async fn separate_clean(
        &self,
        base: &str,
        audio: &Path,
        output_dir: &Path,
        instrumental_dest: &Path,
        vocals_dest: &Path,
    ) -> PipelineResult<Vec<Artifact>> {
        let stems = self
            .run_model(base, audio, output_dir, &self.config.clean_model)
            .await?;

        let instrumental = take_stem(&stems, &["instrumental", "other", "no_vocals"])
            .ok_or_else(|| {
                PipelineError::Separation(format!(
                    "model {} produced no instrumental stem",
                    self.config.clean_model
                ))
            })?;
        let vocals = take_stem(&stems, &["vocals", "voice"]).ok_or_else(|| {
            PipelineError::Separation(format!(
                "model {} produced no vocals stem",
                self.config.clean_model
            ))
        })?;

        move_into_place(&instrumental, instrumental_dest).await?;
        move_into_place(&vocals, vocals_dest).await?;
        Ok(vec![
            Artifact::new("instrumental", instrumental_dest),
            Artifact::new("vocals", vocals_dest),
        ])
    }

    /// One optional extra model (backing vocals, drums, ...). Callers wrap
    /// this in a best-effort stage; every produced stem lands under the
    /// naming convention `"{base} ({Stem} {model}).{format}"`.
    pub async fn separate_extra(
        &self,
        base: &str,
        audio: &Path,
        output_dir: &Path,
        model: &str,
    ) -> PipelineResult<Vec<Artifact>> {
        let stems = self.run_model(base, audio, output_dir, model).await?;
        if stems.is_empty() {
            return Err(PipelineError::Separation(format!(
                "model {model} produced no stems"
            )));
        }
        let mut artifacts = Vec::with_capacity(stems.len());
        for (stem, produced) in stems {
            // The artifact name doubles as the file label so a later run
            // can rebuild the same name from the file alone.
            let label = format!("{} {model}", stem_label(&stem));
            let dest =
                output_dir.join(format!("{base} ({label}).{}", self.config.output_format));
            move_into_place(&produced, &dest).await?;
            artifacts.push(Artifact::new(label, dest));
        }
        artifacts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(artifacts)
    }

    async fn run_model(
        &self,
        base: &str,
        audio: &Path,
        output_dir: &Path,
        model: &str,
    ) -> PipelineResult<HashMap<String, PathBuf>> {
        let guard = self
            .lock
            .acquire(&format!("separating {base} with {model}"))
            .await?;
        info!(model, input = %audio.display(), "running separation model");
        let result = self
            .engine
            .separate(audio, output_dir, model, &self.config.output_format)
            .await;
        guard.release();
        result.map_err(PipelineError::Separation)
    }
}

fn take_stem(stems: &HashMap<String, PathBuf>, names: &[&str]) -> Option<PathBuf> {
    for name in names {
        for (stem, path) in stems {
            if stem.eq_ignore_ascii_case(name) {
                return Some(path.clone());
            }
        }
    }
    None
}

/// `"backing_vocals"` → `"Backing Vocals"` for the artifact label.
fn stem_label(stem: &str) -> String {
    stem.split(['_', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

async fn move_into_place(from: &Path, to: &Path) -> PipelineResult<()> {
    if from == to {
        return Ok(());
    }
    fs::rename(from, to)
        .await
        .map_err(|source| PipelineError::io(to, source))
}
