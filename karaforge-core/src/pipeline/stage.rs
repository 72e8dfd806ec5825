use std::future::Future;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::track::Track;

use super::error::PipelineResult;

/// One named output of a stage, recorded on the track once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
}

impl Artifact {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Skipped,
    DryRun,
    BestEffortFailed,
}

/// Wraps every stage with the same idempotency rule: if all expected outputs
/// already exist on disk the stage is skipped and the track is updated from
/// them; in dry-run the expected paths are recorded speculatively so later
/// stages can plan around them; otherwise the work runs and its artifacts
/// are recorded. Re-running against an unchanged filesystem produces the
/// identical track mutation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageExecutor {
    pub dry_run: bool,
    pub force: bool,
}

impl StageExecutor {
    pub async fn run<F, Fut>(
        &self,
        track: &mut Track,
        stage: &str,
        expected: Vec<Artifact>,
        work: F,
    ) -> PipelineResult<StageOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PipelineResult<Vec<Artifact>>>,
    {
        if !self.force
            && !expected.is_empty()
            && expected.iter().all(|artifact| artifact.path.exists())
        {
            for artifact in expected {
                info!(stage, name = %artifact.name, path = %artifact.path.display(), "output already present, skipping");
                track.record_artifact(stage, &artifact.name, artifact.path);
            }
            return Ok(StageOutcome::Skipped);
        }

        if self.dry_run {
            for artifact in expected {
                info!(stage, name = %artifact.name, path = %artifact.path.display(), "dry-run: would produce");
                track.record_artifact(stage, &artifact.name, artifact.path);
            }
            return Ok(StageOutcome::DryRun);
        }

        let produced = work().await?;
        for artifact in produced {
            info!(stage, name = %artifact.name, path = %artifact.path.display(), "produced");
            track.record_artifact(stage, &artifact.name, artifact.path);
        }
        Ok(StageOutcome::Completed)
    }

    /// Like `run`, but a failure is logged and the track proceeds with the
    /// artifact absent (optional extra stem models and similar helpers).
    pub async fn run_best_effort<F, Fut>(
        &self,
        track: &mut Track,
        stage: &str,
        expected: Vec<Artifact>,
        work: F,
    ) -> PipelineResult<StageOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PipelineResult<Vec<Artifact>>>,
    {
        match self.run(track, stage, expected, work).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(stage, error = %err, "best-effort stage failed, continuing without it");
                Ok(StageOutcome::BestEffortFailed)
            }
        }
    }
}
