use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;

use karaforge_core::pipeline::{
    CliSeparationEngine, CliTranscriber, CommandExecutor, HttpMediaDownloader,
    PipelineOrchestrator, PipelineServices, RunMode, RunOptions, StageOutcome,
    SystemCommandExecutor, TrackInput, TrackReport,
};
use karaforge_core::{load_config, lyrics, KaraforgeConfig, ResourceLock, TimingOptions};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] karaforge_core::ConfigError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] karaforge_core::PipelineError),
    #[error("lock error: {0}")]
    Lock(#[from] karaforge_core::LockError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("lock is held by live process {pid} ({label}); pass --force to clear anyway")]
    LockHeld { pid: u32, label: String },
    #[error("{failed} of {total} tracks failed")]
    TrackFailures { failed: usize, total: usize },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Karaoke production pipeline control", long_about = None)]
pub struct Cli {
    /// Path to the main karaforge.toml
    #[arg(long, default_value = "configs/karaforge.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process one or more tracks through the pipeline
    Run(RunArgs),
    /// Inspect or clear the shared inference lock
    #[command(subcommand)]
    Lock(LockCommands),
    /// Subtitle utilities outside the pipeline
    #[command(subcommand)]
    Subtitles(SubtitleCommands),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Track inputs: URLs, audio files, or directories of audio files
    pub inputs: Vec<String>,
    /// Artist applied to every input (otherwise derived from metadata)
    #[arg(long)]
    pub artist: Option<String>,
    /// Title applied to every input
    #[arg(long)]
    pub title: Option<String>,
    /// Stop before distribution
    #[arg(long, group = "mode")]
    pub prep_only: bool,
    /// Acquire media and produce lyrics, then stop
    #[arg(long, group = "mode")]
    pub lyrics_only: bool,
    /// Distribute the current working directory's artifacts
    #[arg(long, group = "mode")]
    pub finalise_only: bool,
    /// Recompile hand-edited lyrics in the current working directory
    #[arg(long, group = "mode")]
    pub edit_lyrics: bool,
    /// Log planned actions without touching the filesystem
    #[arg(long)]
    pub dry_run: bool,
    /// Re-run stages whose outputs already exist
    #[arg(long)]
    pub force: bool,
    /// Working directory for the directory-derived modes
    #[arg(long)]
    pub working_dir: Option<PathBuf>,
}

impl RunArgs {
    fn mode(&self) -> RunMode {
        if self.prep_only {
            RunMode::PrepOnly
        } else if self.lyrics_only {
            RunMode::LyricsOnly
        } else if self.finalise_only {
            RunMode::FinaliseOnly
        } else if self.edit_lyrics {
            RunMode::EditLyrics
        } else {
            RunMode::Normal
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum LockCommands {
    /// Show the current lock holder, if any
    Status,
    /// Remove the lock record
    Clear(LockClearArgs),
}

#[derive(Args, Debug)]
pub struct LockClearArgs {
    /// Clear even when the holder process is still alive
    #[arg(long)]
    pub force: bool,
}

#[derive(Subcommand, Debug)]
pub enum SubtitleCommands {
    /// Compile an LRC file into a styled ASS subtitle document
    Compile(SubtitleCompileArgs),
}

#[derive(Args, Debug)]
pub struct SubtitleCompileArgs {
    /// Source LRC file
    pub lrc: PathBuf,
    /// Destination path (defaults to the LRC path with .ass)
    #[arg(long)]
    pub output: Option<PathBuf>,
    /// Title line for the script header
    #[arg(long)]
    pub title: Option<String>,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;

    match &cli.command {
        Commands::Run(args) => {
            let summary = run_pipeline(&config, args).await?;
            render(&summary, cli.format)?;
            if summary.failed > 0 {
                return Err(AppError::TrackFailures {
                    failed: summary.failed,
                    total: summary.tracks.len(),
                });
            }
        }
        Commands::Lock(LockCommands::Status) => {
            let status = lock_status(&config);
            render(&status, cli.format)?;
        }
        Commands::Lock(LockCommands::Clear(args)) => {
            let report = lock_clear(&config, args)?;
            render(&report, cli.format)?;
        }
        Commands::Subtitles(SubtitleCommands::Compile(args)) => {
            let report = compile_subtitles(&config, args).await?;
            render(&report, cli.format)?;
        }
    }

    Ok(())
}

async fn run_pipeline(config: &KaraforgeConfig, args: &RunArgs) -> Result<RunSummary> {
    let executor: Arc<dyn CommandExecutor> = Arc::new(SystemCommandExecutor);
    let services = PipelineServices {
        downloader: Arc::new(HttpMediaDownloader::new()?),
        separation: Arc::new(CliSeparationEngine::new(
            &config.separation.binary,
            Arc::clone(&executor),
        )),
        transcriber: Arc::new(CliTranscriber::new(
            &config.lyrics.transcriber_binary,
            Arc::clone(&executor),
        )),
        executor,
    };
    let options = RunOptions {
        mode: args.mode(),
        dry_run: args.dry_run,
        force: args.force,
        working_dir: args.working_dir.clone(),
    };
    let inputs: Vec<TrackInput> = args
        .inputs
        .iter()
        .map(|input| TrackInput {
            input: input.clone(),
            artist: args.artist.clone(),
            title: args.title.clone(),
        })
        .collect();

    let orchestrator = PipelineOrchestrator::new(config.clone(), services, options);
    let reports = orchestrator.run(&inputs).await;
    Ok(RunSummary::from_reports(reports))
}

fn lock_status(config: &KaraforgeConfig) -> LockStatusReport {
    let lock = ResourceLock::new(config.lock_path());
    let record = lock.read_record();
    LockStatusReport {
        path: lock.path().display().to_string(),
        held: record.is_some(),
        holder_alive: record.as_ref().map(|record| record.holder_alive()),
        process_id: record.as_ref().map(|record| record.process_id),
        label: record.as_ref().map(|record| record.label.clone()),
        since: record.map(|record| record.start_time.to_rfc3339()),
    }
}

fn lock_clear(config: &KaraforgeConfig, args: &LockClearArgs) -> Result<LockClearReport> {
    let lock = ResourceLock::new(config.lock_path());
    if !args.force {
        if let Some(record) = lock.read_record() {
            if record.holder_alive() {
                return Err(AppError::LockHeld {
                    pid: record.process_id,
                    label: record.label,
                });
            }
        }
    }
    let removed = lock.clear()?;
    Ok(LockClearReport {
        path: lock.path().display().to_string(),
        cleared: removed.is_some(),
        previous_holder: removed.map(|record| record.process_id),
    })
}

async fn compile_subtitles(
    config: &KaraforgeConfig,
    args: &SubtitleCompileArgs,
) -> Result<SubtitleCompileReport> {
    let contents = tokio::fs::read_to_string(&args.lrc).await?;
    let events = lyrics::parse_lrc(&contents);
    let timing = TimingOptions {
        line_budget: config.lyrics.line_budget,
        comma_window: config.lyrics.comma_window,
        max_splits: config.lyrics.max_splits,
        tail_seconds: config.lyrics.tail_seconds,
    };
    let cues = lyrics::compile_cues(&events, timing);
    let title = match &args.title {
        Some(title) => title.clone(),
        None => args
            .lrc
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "Karaoke".to_string()),
    };
    let document = lyrics::render_ass(&cues, &title, config.render.resolution);
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.lrc.with_extension("ass"));
    tokio::fs::write(&output, document).await?;
    Ok(SubtitleCompileReport {
        output: output.display().to_string(),
        cues: cues.len(),
    })
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub tracks: Vec<TrackSummary>,
    pub failed: usize,
}

impl RunSummary {
    fn from_reports(reports: Vec<TrackReport>) -> Self {
        let failed = reports.iter().filter(|report| !report.succeeded()).count();
        let tracks = reports
            .into_iter()
            .map(|report| TrackSummary {
                track: report.base_name,
                stages: report
                    .outcomes
                    .into_iter()
                    .map(|(stage, outcome)| StageSummary {
                        stage,
                        outcome: outcome_label(outcome).to_string(),
                    })
                    .collect(),
                error: report.error,
                completed_at: report.completed_at.to_rfc3339(),
            })
            .collect();
        Self { tracks, failed }
    }
}

#[derive(Debug, Serialize)]
pub struct TrackSummary {
    pub track: String,
    pub stages: Vec<StageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: String,
}

#[derive(Debug, Serialize)]
pub struct StageSummary {
    pub stage: String,
    pub outcome: String,
}

fn outcome_label(outcome: StageOutcome) -> &'static str {
    match outcome {
        StageOutcome::Completed => "completed",
        StageOutcome::Skipped => "skipped",
        StageOutcome::DryRun => "dry-run",
        StageOutcome::BestEffortFailed => "failed (best-effort)",
    }
}

impl DisplayFallback for RunSummary {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for track in &self.tracks {
            match &track.error {
                Some(error) => lines.push(format!("✗ {}: {error}", track.track)),
                None => lines.push(format!("✓ {}", track.track)),
            }
            for stage in &track.stages {
                lines.push(format!("    {} — {}", stage.stage, stage.outcome));
            }
        }
        lines.push(format!(
            "{} of {} tracks failed",
            self.failed,
            self.tracks.len()
        ));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct LockStatusReport {
    pub path: String,
    pub held: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder_alive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
}

impl DisplayFallback for LockStatusReport {
    fn display(&self) -> String {
        if !self.held {
            return format!("{}: unlocked", self.path);
        }
        format!(
            "{}: held by pid {} ({}) since {}{}",
            self.path,
            self.process_id.unwrap_or_default(),
            self.label.as_deref().unwrap_or("?"),
            self.since.as_deref().unwrap_or("?"),
            if self.holder_alive == Some(false) {
                " [holder dead, reclaimable]"
            } else {
                ""
            }
        )
    }
}

#[derive(Debug, Serialize)]
pub struct LockClearReport {
    pub path: String,
    pub cleared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_holder: Option<u32>,
}

impl DisplayFallback for LockClearReport {
    fn display(&self) -> String {
        if self.cleared {
            format!("{}: cleared", self.path)
        } else {
            format!("{}: nothing to clear", self.path)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubtitleCompileReport {
    pub output: String,
    pub cues: usize,
}

impl DisplayFallback for SubtitleCompileReport {
    fn display(&self) -> String {
        format!("{} ({} cues)", self.output, self.cues)
    }
}
