use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::DistributionSection;
use crate::track::Track;

use super::error::{PipelineError, PipelineResult};
use super::services::CommandExecutor;
use super::stage::Artifact;

/// Packages a finished track for distribution: integrity manifest, the
/// distributable archive, and (when configured) a sync to the remote
/// target. Archiving and syncing go through external commands behind the
/// executor seam.
pub struct Distributor {
    config: DistributionSection,
    executor: Arc<dyn CommandExecutor>,
}

impl Distributor {
    pub fn new(config: DistributionSection, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { config, executor }
    }

    pub fn archive_path(track: &Track, output_dir: &Path) -> PathBuf {
        output_dir.join(format!(
            "{} (Final Karaoke Package).tar.gz",
            track.base_name()
        ))
    }

    pub async fn distribute(
        &self,
        track: &Track,
        output_dir: &Path,
        overwrite: bool,
    ) -> PipelineResult<Vec<Artifact>> {
        let checksums_path = output_dir.join("checksums.json");
        let manifest_path = output_dir.join("manifest.json");
        let archive_path = Self::archive_path(track, output_dir);
        let lof_path = output_dir.join(format!("{}.lof", track.base_name()));

        if archive_path.exists() && !overwrite {
            return Err(PipelineError::Distribution(format!(
                "archive {} already exists and overwrite is disabled",
                archive_path.display()
            )));
        }

        let checksums = self
            .write_checksums(
                output_dir,
                &checksums_path,
                &[
                    checksums_path.as_path(),
                    manifest_path.as_path(),
                    archive_path.as_path(),
                    lof_path.as_path(),
                ],
            )
            .await?;
        self.write_manifest(track, &manifest_path, &checksums).await?;
        self.write_lof(track, &lof_path).await;
        self.create_archive(output_dir, &archive_path).await?;

        if let Some(remote) = &self.config.remote {
            self.sync_remote(&archive_path, remote).await?;
        } else {
            debug!("no distribution remote configured, skipping sync");
        }

        Ok(vec![
            Artifact::new("checksums", checksums_path),
            Artifact::new("manifest", manifest_path),
            Artifact::new("archive", archive_path),
        ])
    }

    /// sha256 of every payload file in the output directory, keyed by
    /// relative path. The distribution bookkeeping files (checksums,
    /// manifest, lof, archive) are excluded so the set stays consistent
    /// across re-distributions.
    async fn write_checksums(
        &self,
        output_dir: &Path,
        checksums_path: &Path,
        excluded: &[&Path],
    ) -> PipelineResult<BTreeMap<String, String>> {
        let mut checksums = BTreeMap::new();
        for entry in WalkDir::new(output_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
        {
            let path = entry.path();
            if excluded.contains(&path) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(output_dir) else {
                continue;
            };
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|source| PipelineError::io(path, source))?;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            checksums.insert(
                relative.to_string_lossy().to_string(),
                hex::encode(hasher.finalize()),
            );
        }
        let payload = serde_json::to_vec_pretty(&checksums)
            .map_err(|err| PipelineError::Distribution(err.to_string()))?;
        tokio::fs::write(checksums_path, payload)
            .await
            .map_err(|source| PipelineError::io(checksums_path, source))?;
        Ok(checksums)
    }

    async fn write_manifest(
        &self,
        track: &Track,
        manifest_path: &Path,
        checksums: &BTreeMap<String, String>,
    ) -> PipelineResult<()> {
        let manifest = serde_json::json!({
            "base_name": track.base_name(),
            "artist": track.artist,
            "title": track.title,
            "files": checksums.keys().collect::<Vec<_>>(),
            "created_at": Utc::now(),
        });
        let payload = serde_json::to_vec_pretty(&manifest)
            .map_err(|err| PipelineError::Distribution(err.to_string()))?;
        tokio::fs::write(manifest_path, payload)
            .await
            .map_err(|source| PipelineError::io(manifest_path, source))?;
        Ok(())
    }

    /// Helper listing consumed by karaoke hosting software. Best-effort: a
    /// failed write is logged and the stage continues.
    async fn write_lof(&self, track: &Track, lof_path: &Path) {
        if !self.config.generate_lof {
            return;
        }
        let mut lines = Vec::new();
        for label_ext in [("Title", "mov"), ("Final Karaoke", "mp4")] {
            let candidate = track.output_file(label_ext.0, label_ext.1);
            if candidate.exists() {
                lines.push(candidate.to_string_lossy().to_string());
            }
        }
        if let Err(err) = tokio::fs::write(lof_path, lines.join("\n") + "\n").await {
            warn!(path = %lof_path.display(), error = %err, "failed to write lof helper, continuing");
        }
    }

    async fn create_archive(
        &self,
        output_dir: &Path,
        archive_path: &Path,
    ) -> PipelineResult<()> {
        let mut members: Vec<String> = WalkDir::new(output_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path() != archive_path)
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(output_dir)
                    .ok()
                    .map(|relative| relative.to_string_lossy().to_string())
            })
            .collect();
        members.sort();

        let mut command = Command::new(&self.config.archive_binary);
        command
            .arg("-czf")
            .arg(archive_path)
            .arg("-C")
            .arg(output_dir);
        for member in &members {
            command.arg(member);
        }
        info!(archive = %archive_path.display(), "creating distribution archive");
        let output = self
            .executor
            .run(&mut command)
            .await
            .map_err(|source| PipelineError::io(&self.config.archive_binary, source))?;
        if !output.status.success() {
            return Err(PipelineError::Distribution(format!(
                "archiver exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    async fn sync_remote(&self, archive_path: &Path, remote: &str) -> PipelineResult<()> {
        let mut command = Command::new("rsync");
        command.arg("-a").arg(archive_path).arg(remote);
        info!(remote, "syncing archive to remote");
        let output = self
            .executor
            .run(&mut command)
            .await
            .map_err(|source| PipelineError::io(archive_path, source))?;
        if !output.status.success() {
            return Err(PipelineError::Distribution(format!(
                "remote sync exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }
}
