mod acquisition;
mod distribution;
pub mod error;
mod render;
mod separation;
mod services;
mod stage;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::config::KaraforgeConfig;
use crate::lock::ResourceLock;
use crate::lyrics::{self, TimingOptions};
use crate::track::{MediaSource, Track};

pub use acquisition::MediaAcquirer;
pub use distribution::Distributor;
pub use error::{PipelineError, PipelineResult};
pub use render::VideoRenderer;
pub use separation::AudioSeparator;
pub use services::{
    CliSeparationEngine, CliTranscriber, CommandExecutor, HttpMediaDownloader, MediaDownloader,
    SeparationEngine, SystemCommandExecutor, Transcriber,
};
pub use stage::{Artifact, StageExecutor, StageOutcome};

pub const STAGE_ACQUIRE: &str = "acquire_media";
pub const STAGE_SEPARATE: &str = "separate_audio";
pub const STAGE_LYRICS: &str = "process_lyrics";
pub const STAGE_RENDER: &str = "render_videos";
pub const STAGE_DISTRIBUTE: &str = "distribute";
pub const STAGE_BACKUP: &str = "backup_artifacts";

/// One mode per invocation, chosen before any track is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Normal,
    /// Everything except distribution.
    PrepOnly,
    /// Acquire media and process lyrics, then stop.
    LyricsOnly,
    /// Operate on the working directory's existing artifacts and distribute.
    FinaliseOnly,
    /// Recompile hand-edited lyrics, re-render, redistribute with overwrite.
    EditLyrics,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub mode: RunMode,
    pub dry_run: bool,
    pub force: bool,
    /// Overrides the process working directory for the directory-derived
    /// modes. Mostly for tests.
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TrackInput {
    pub input: String,
    pub artist: Option<String>,
    pub title: Option<String>,
}

/// Per-track outcome summary returned to the caller once the track has run
/// to completion or hit its first fatal error.
#[derive(Debug, Clone)]
pub struct TrackReport {
    pub base_name: String,
    pub outcomes: Vec<(String, StageOutcome)>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl TrackReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// The external collaborators, constructed up front and injected.
pub struct PipelineServices {
    pub downloader: Arc<dyn MediaDownloader>,
    pub separation: Arc<dyn SeparationEngine>,
    pub transcriber: Arc<dyn Transcriber>,
    pub executor: Arc<dyn CommandExecutor>,
}

pub struct PipelineOrchestrator {
    config: Arc<KaraforgeConfig>,
    acquirer: MediaAcquirer,
    separator: AudioSeparator,
    transcriber: Arc<dyn Transcriber>,
    renderer: VideoRenderer,
    distributor: Distributor,
    lock: ResourceLock,
    options: RunOptions,
}

impl PipelineOrchestrator {
    pub fn new(config: KaraforgeConfig, services: PipelineServices, options: RunOptions) -> Self {
        let lock = ResourceLock::new(config.lock_path())
            .with_poll_interval(Duration::from_secs(config.lock.poll_seconds));
        let acquirer = MediaAcquirer::new(services.downloader);
        let separator = AudioSeparator::new(
            services.separation,
            lock.clone(),
            config.separation.clone(),
        );
        let renderer = VideoRenderer::new(config.render.clone(), Arc::clone(&services.executor));
        let distributor = Distributor::new(config.distribution.clone(), services.executor);
        Self {
            config: Arc::new(config),
            acquirer,
            separator,
            transcriber: services.transcriber,
            renderer,
            distributor,
            lock,
            options,
        }
    }

    /// Processes each input to completion (or its first fatal error) before
    /// the next one starts. The directory-derived modes ignore `inputs` and
    /// reconstruct a single track from the working directory's name.
    pub async fn run(&self, inputs: &[TrackInput]) -> Vec<TrackReport> {
        let mut reports = Vec::new();
        match self.options.mode {
            RunMode::FinaliseOnly | RunMode::EditLyrics => match self.track_from_working_dir() {
                Ok(mut track) => reports.push(self.run_track(&mut track).await),
                Err(err) => {
                    error!(error = %err, "could not reconstruct track from working directory");
                    reports.push(TrackReport {
                        base_name: "<working directory>".to_string(),
                        outcomes: Vec::new(),
                        error: Some(err.to_string()),
                        completed_at: Utc::now(),
                    });
                }
            },
            _ => {
                for input in inputs {
                    let mut track = Track::new(
                        MediaSource::classify(&input.input),
                        input.artist.clone(),
                        input.title.clone(),
                    );
                    reports.push(self.run_track(&mut track).await);
                }
            }
        }
        reports
    }

    async fn run_track(&self, track: &mut Track) -> TrackReport {
        info!(track = %track.base_name(), mode = ?self.options.mode, "processing track");
        let mut outcomes = Vec::new();
        let result = self.process(track, &mut outcomes).await;
        if let Err(err) = &result {
            error!(track = %track.base_name(), error = %err, "track aborted");
        }
        TrackReport {
            base_name: track.base_name(),
            outcomes,
            error: result.err().map(|err| err.to_string()),
            completed_at: Utc::now(),
        }
    }

    async fn process(
        &self,
        track: &mut Track,
        outcomes: &mut Vec<(String, StageOutcome)>,
    ) -> PipelineResult<()> {
        match self.options.mode {
            RunMode::Normal => {
                self.prepare_output_dir(track)?;
                self.stage_acquire(track, outcomes).await?;
                self.stage_separate(track, outcomes).await?;
                self.stage_lyrics(track, outcomes, self.executor()).await?;
                self.stage_render(track, outcomes, self.executor()).await?;
                self.stage_distribute(track, outcomes, self.executor()).await?;
            }
            RunMode::PrepOnly => {
                self.prepare_output_dir(track)?;
                self.stage_acquire(track, outcomes).await?;
                self.stage_separate(track, outcomes).await?;
                self.stage_lyrics(track, outcomes, self.executor()).await?;
                self.stage_render(track, outcomes, self.executor()).await?;
            }
            RunMode::LyricsOnly => {
                self.prepare_output_dir(track)?;
                self.stage_acquire(track, outcomes).await?;
                self.stage_lyrics(track, outcomes, self.executor()).await?;
            }
            RunMode::FinaliseOnly => {
                self.stage_distribute(track, outcomes, self.executor()).await?;
            }
            RunMode::EditLyrics => {
                self.stage_backup(track, outcomes).await?;
                let forced = self.forced_executor();
                self.stage_lyrics(track, outcomes, forced).await?;
                self.stage_render(track, outcomes, forced).await?;
                self.stage_distribute(track, outcomes, forced).await?;
            }
        }
        Ok(())
    }

    fn executor(&self) -> StageExecutor {
        StageExecutor {
            dry_run: self.options.dry_run,
            force: self.options.force,
        }
    }

    fn forced_executor(&self) -> StageExecutor {
        StageExecutor {
            dry_run: self.options.dry_run,
            force: true,
        }
    }

    /// Assigned once and never changed after the first stage runs. A
    /// configured brand code prefixes the directory name; files inside keep
    /// the plain `"Artist - Title"` base so the name round-trips through
    /// `Track::from_directory_name`.
    fn prepare_output_dir(&self, track: &mut Track) -> PipelineResult<()> {
        if track.output_dir.is_some() {
            return Ok(());
        }
        let dir_name = match &self.config.system.brand_code {
            Some(code) => format!("{code} - {}", track.base_name()),
            None => track.base_name(),
        };
        let dir = self
            .config
            .resolve_path(&self.config.paths.output_dir)
            .join(dir_name);
        if !self.options.dry_run {
            std::fs::create_dir_all(&dir).map_err(|source| PipelineError::io(&dir, source))?;
        }
        track.output_dir = Some(dir);
        Ok(())
    }

    fn output_dir(&self, track: &Track) -> PipelineResult<PathBuf> {
        track
            .output_dir
            .clone()
            .ok_or_else(|| PipelineError::Acquisition("output directory not assigned".into()))
    }

    fn track_from_working_dir(&self) -> PipelineResult<Track> {
        let dir = match &self.options.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()
                .map_err(|source| PipelineError::io(PathBuf::from("."), source))?,
        };
        Track::from_directory_name(&dir).ok_or_else(|| {
            PipelineError::Acquisition(format!(
                "cannot derive \"Artist - Title\" from directory {}",
                dir.display()
            ))
        })
    }

    async fn stage_acquire(
        &self,
        track: &mut Track,
        outcomes: &mut Vec<(String, StageOutcome)>,
    ) -> PipelineResult<()> {
        let output_dir = self.output_dir(track)?;
        let base = track.base_name();
        let expected = match existing_with_prefix(&output_dir, &format!("{base} (Source).")) {
            Some(path) => vec![Artifact::new("source_audio", path)],
            None => vec![Artifact::new(
                "source_audio",
                MediaAcquirer::planned_destination(&track.source, &output_dir, &base),
            )],
        };
        let source = track.source.clone();
        let work_dir = output_dir.clone();
        let work_base = base.clone();
        let outcome = self
            .executor()
            .run(track, STAGE_ACQUIRE, expected, || async move {
                let path = self.acquirer.acquire(&source, &work_dir, &work_base).await?;
                Ok(vec![Artifact::new("source_audio", path)])
            })
            .await?;
        outcomes.push((STAGE_ACQUIRE.to_string(), outcome));
        Ok(())
    }

    async fn stage_separate(
        &self,
        track: &mut Track,
        outcomes: &mut Vec<(String, StageOutcome)>,
    ) -> PipelineResult<()> {
        let output_dir = self.output_dir(track)?;
        let base = track.base_name();
        let format = self.separator.output_format().to_string();
        let source_audio = self.source_audio_path(track)?;

        let instrumental = track.output_file("Clean Instrumental", &format);
        let vocals = track.output_file("Vocals", &format);
        let expected = vec![
            Artifact::new("instrumental", &instrumental),
            Artifact::new("vocals", &vocals),
        ];
        let work_base = base.clone();
        let work_dir = output_dir.clone();
        let work_audio = source_audio.clone();
        let outcome = self
            .executor()
            .run(track, STAGE_SEPARATE, expected, || async move {
                self.separator
                    .separate_clean(&work_base, &work_audio, &work_dir, &instrumental, &vocals)
                    .await
            })
            .await?;
        outcomes.push((STAGE_SEPARATE.to_string(), outcome));

        let extra_models: Vec<String> = self
            .config
            .separation
            .backing_models
            .iter()
            .chain(self.config.separation.other_stem_models.iter())
            .cloned()
            .collect();
        for model in extra_models {
            let stage_name = format!("{STAGE_SEPARATE}:{model}");
            let expected = labelled_outputs(&output_dir, &base, &model, &format);
            let work_base = base.clone();
            let work_dir = output_dir.clone();
            let work_audio = source_audio.clone();
            let work_model = model.clone();
            let outcome = self
                .executor()
                .run_best_effort(track, &stage_name, expected, || async move {
                    self.separator
                        .separate_extra(&work_base, &work_audio, &work_dir, &work_model)
                        .await
                })
                .await?;
            outcomes.push((stage_name, outcome));
        }
        Ok(())
    }

    async fn stage_lyrics(
        &self,
        track: &mut Track,
        outcomes: &mut Vec<(String, StageOutcome)>,
        executor: StageExecutor,
    ) -> PipelineResult<()> {
        let base = track.base_name();
        let lrc_path = track.output_file("Karaoke", "lrc");
        let ass_path = track.output_file("Karaoke", "ass");
        let expected = vec![
            Artifact::new("lyrics_lrc", &lrc_path),
            Artifact::new("subtitles_ass", &ass_path),
        ];
        let audio = self.transcription_audio(track)?;
        let artist = track.artist.clone();
        let title = track.title.clone();
        let timing = self.timing_options();
        let resolution = self.config.render.resolution;

        let outcome = executor
            .run(track, STAGE_LYRICS, expected, || async move {
                let events = if lrc_path.exists() {
                    // An existing (possibly hand-edited) LRC wins over
                    // re-running transcription.
                    let contents = tokio::fs::read_to_string(&lrc_path)
                        .await
                        .map_err(|source| PipelineError::io(&lrc_path, source))?;
                    lyrics::parse_lrc(&contents)
                } else {
                    let guard = self.lock.acquire(&format!("transcribing {base}")).await?;
                    let result = self.transcriber.transcribe(&audio).await;
                    guard.release();
                    let events = result.map_err(PipelineError::Lyrics)?;
                    let contents =
                        lyrics::write_lrc(&events, artist.as_deref(), title.as_deref());
                    tokio::fs::write(&lrc_path, contents)
                        .await
                        .map_err(|source| PipelineError::io(&lrc_path, source))?;
                    events
                };
                let cues = lyrics::compile_cues(&events, timing);
                let document = lyrics::render_ass(&cues, &base, resolution);
                tokio::fs::write(&ass_path, document)
                    .await
                    .map_err(|source| PipelineError::io(&ass_path, source))?;
                Ok(vec![
                    Artifact::new("lyrics_lrc", lrc_path),
                    Artifact::new("subtitles_ass", ass_path),
                ])
            })
            .await?;
        outcomes.push((STAGE_LYRICS.to_string(), outcome));
        Ok(())
    }

    async fn stage_render(
        &self,
        track: &mut Track,
        outcomes: &mut Vec<(String, StageOutcome)>,
        executor: StageExecutor,
    ) -> PipelineResult<()> {
        let title_path = track.output_file("Title", "mov");
        let final_path = track.output_file("Final Karaoke", "mp4");
        let expected = vec![
            Artifact::new("title_video", &title_path),
            Artifact::new("final_video", &final_path),
        ];
        let artist = track.artist.clone().unwrap_or_default();
        let title = track
            .title
            .clone()
            .unwrap_or_else(|| track.base_name());
        let format = self.separator.output_format().to_string();
        let instrumental = match track.artifact(STAGE_SEPARATE, "instrumental") {
            Some(path) => path.to_path_buf(),
            None => track.output_file("Clean Instrumental", &format),
        };
        let subtitles = match track.artifact(STAGE_LYRICS, "subtitles_ass") {
            Some(path) => path.to_path_buf(),
            None => track.output_file("Karaoke", "ass"),
        };
        let dry_run = executor.dry_run;

        let outcome = executor
            .run(track, STAGE_RENDER, expected, || async move {
                if !dry_run && !instrumental.exists() {
                    // No instrumental means no karaoke video; fatal for the
                    // track rather than papered over.
                    return Err(PipelineError::Separation(format!(
                        "no instrumental available for final render: {}",
                        instrumental.display()
                    )));
                }
                if !dry_run && !subtitles.exists() {
                    return Err(PipelineError::Lyrics(format!(
                        "no compiled subtitles available for final render: {}",
                        subtitles.display()
                    )));
                }
                self.renderer
                    .render_title(&artist, &title, &title_path)
                    .await?;
                self.renderer
                    .render_karaoke(&instrumental, &subtitles, &final_path)
                    .await?;
                Ok(vec![
                    Artifact::new("title_video", title_path),
                    Artifact::new("final_video", final_path),
                ])
            })
            .await?;
        outcomes.push((STAGE_RENDER.to_string(), outcome));
        Ok(())
    }

    async fn stage_distribute(
        &self,
        track: &mut Track,
        outcomes: &mut Vec<(String, StageOutcome)>,
        executor: StageExecutor,
    ) -> PipelineResult<()> {
        let output_dir = self.output_dir(track)?;
        let expected = vec![
            Artifact::new("checksums", output_dir.join("checksums.json")),
            Artifact::new("manifest", output_dir.join("manifest.json")),
            Artifact::new("archive", Distributor::archive_path(track, &output_dir)),
        ];
        let snapshot = track.clone();
        // Forced stages (edit-lyrics) always replace an existing archive;
        // otherwise the config decides.
        let overwrite = executor.force || self.config.distribution.overwrite;
        let outcome = executor
            .run(track, STAGE_DISTRIBUTE, expected, || async move {
                self.distributor
                    .distribute(&snapshot, &output_dir, overwrite)
                    .await
            })
            .await?;
        outcomes.push((STAGE_DISTRIBUTE.to_string(), outcome));
        Ok(())
    }

    /// Edit-lyrics safety net: the artifacts about to be regenerated are
    /// copied into a timestamped backup directory first.
    async fn stage_backup(
        &self,
        track: &mut Track,
        outcomes: &mut Vec<(String, StageOutcome)>,
    ) -> PipelineResult<()> {
        if self.options.dry_run {
            info!("dry-run: would back up lyric and video artifacts");
            outcomes.push((STAGE_BACKUP.to_string(), StageOutcome::DryRun));
            return Ok(());
        }
        let output_dir = self.output_dir(track)?;
        let backup_dir = output_dir
            .join("backup")
            .join(Utc::now().format("%Y%m%d-%H%M%S").to_string());
        let mut backed_up = 0usize;
        for (label, ext) in [
            ("Karaoke", "lrc"),
            ("Karaoke", "ass"),
            ("Title", "mov"),
            ("Final Karaoke", "mp4"),
        ] {
            let path = track.output_file(label, ext);
            if !path.exists() {
                continue;
            }
            if backed_up == 0 {
                tokio::fs::create_dir_all(&backup_dir)
                    .await
                    .map_err(|source| PipelineError::io(&backup_dir, source))?;
            }
            let dest = backup_dir.join(path.file_name().unwrap_or_default());
            tokio::fs::copy(&path, &dest)
                .await
                .map_err(|source| PipelineError::io(&dest, source))?;
            backed_up += 1;
        }
        info!(count = backed_up, dir = %backup_dir.display(), "backed up artifacts");
        outcomes.push((STAGE_BACKUP.to_string(), StageOutcome::Completed));
        Ok(())
    }

    fn timing_options(&self) -> TimingOptions {
        TimingOptions {
            line_budget: self.config.lyrics.line_budget,
            comma_window: self.config.lyrics.comma_window,
            max_splits: self.config.lyrics.max_splits,
            tail_seconds: self.config.lyrics.tail_seconds,
        }
    }

    fn source_audio_path(&self, track: &Track) -> PipelineResult<PathBuf> {
        if let Some(path) = track.artifact(STAGE_ACQUIRE, "source_audio") {
            return Ok(path.to_path_buf());
        }
        let output_dir = self.output_dir(track)?;
        existing_with_prefix(&output_dir, &format!("{} (Source).", track.base_name()))
            .ok_or_else(|| PipelineError::Acquisition("no source audio available".into()))
    }

    /// Transcribe from the isolated vocals when separation produced them,
    /// otherwise from the source mix (lyrics-only runs).
    fn transcription_audio(&self, track: &Track) -> PipelineResult<PathBuf> {
        if let Some(path) = track.artifact(STAGE_SEPARATE, "vocals") {
            return Ok(path.to_path_buf());
        }
        let vocals = track.output_file("Vocals", self.separator.output_format());
        if vocals.exists() {
            return Ok(vocals);
        }
        self.source_audio_path(track)
    }
}

/// First directory entry whose file name starts with `prefix`, in lexical
/// order so repeated runs agree.
fn existing_with_prefix(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().starts_with(prefix))
                .unwrap_or(false)
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

/// Existing outputs of one extra separation model, rebuilt from their file
/// names: `"{base} ({label}).{format}"` where the label ends with the model
/// identifier.
fn labelled_outputs(dir: &Path, base: &str, model: &str, format: &str) -> Vec<Artifact> {
    let suffix = format!(" {model}).{format}");
    let prefix = format!("{base} (");
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut artifacts: Vec<Artifact> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter_map(|path| {
            let name = path.file_name()?.to_string_lossy().to_string();
            let inner = name.strip_prefix(&prefix)?.strip_suffix(&suffix)?;
            Some(Artifact::new(format!("{inner} {model}"), path))
        })
        .collect();
    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    artifacts
}
