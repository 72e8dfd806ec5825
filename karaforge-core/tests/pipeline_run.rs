use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;

use karaforge_core::config::load_config;
use karaforge_core::pipeline::{
    CommandExecutor, MediaDownloader, PipelineOrchestrator, PipelineResult, PipelineServices,
    RunMode, RunOptions, SeparationEngine, StageOutcome, TrackInput, Transcriber,
};
use karaforge_core::{KaraforgeConfig, LyricEvent, PipelineError};

fn fixture_config(base: &TempDir) -> KaraforgeConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../configs/karaforge.toml");
    let mut config = load_config(path).unwrap();
    let base_dir = base.path().join("karaforge");
    std::fs::create_dir_all(&base_dir).unwrap();
    config.paths.base_dir = base_dir.to_string_lossy().to_string();
    config.paths.output_dir = "tracks".to_string();
    config.paths.lock_file = "inference.lock".to_string();
    config.lock.poll_seconds = 1;
    config
}

struct CountingDownloader {
    calls: AtomicUsize,
}

#[async_trait]
impl MediaDownloader for CountingDownloader {
    async fn download(&self, _url: &str, dest: &Path) -> PipelineResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(dest, b"downloaded")
            .await
            .map_err(|source| PipelineError::io(dest, source))
    }
}

struct CountingEngine {
    calls: AtomicUsize,
}

#[async_trait]
impl SeparationEngine for CountingEngine {
    async fn separate(
        &self,
        _audio: &Path,
        output_dir: &Path,
        model: &str,
        output_format: &str,
    ) -> Result<HashMap<String, PathBuf>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut stems = HashMap::new();
        for stem in ["instrumental", "vocals"] {
            let path = output_dir.join(format!("{model}_{stem}.{output_format}"));
            std::fs::write(&path, stem).map_err(|err| err.to_string())?;
            stems.insert(stem.to_string(), path);
        }
        Ok(stems)
    }
}

struct CountingTranscriber {
    calls: AtomicUsize,
}

#[async_trait]
impl Transcriber for CountingTranscriber {
    async fn transcribe(&self, _audio: &Path) -> Result<Vec<LyricEvent>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            LyricEvent {
                timestamp: 1.0,
                text: "Hello there my old friend".to_string(),
            },
            LyricEvent {
                timestamp: 5.5,
                text: "Goodbye again".to_string(),
            },
        ])
    }
}

/// Stands in for ffmpeg/tar: records every invocation and creates the
/// file the real tool would have produced.
struct FakeToolExecutor {
    commands: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl CommandExecutor for FakeToolExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        use std::os::unix::process::ExitStatusExt;

        let std_command = command.as_std();
        let mut args = vec![std_command.get_program().to_string_lossy().to_string()];
        args.extend(
            std_command
                .get_args()
                .map(|arg| arg.to_string_lossy().to_string()),
        );
        if let Some(index) = args.iter().position(|arg| arg == "-czf") {
            std::fs::write(&args[index + 1], b"archive")?;
        } else if let Some(output) = args.last() {
            std::fs::write(output, b"rendered")?;
        }
        self.commands.lock().unwrap().push(args);
        Ok(std::process::Output {
            status: std::process::ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

struct Mocks {
    downloader: Arc<CountingDownloader>,
    engine: Arc<CountingEngine>,
    transcriber: Arc<CountingTranscriber>,
    executor: Arc<FakeToolExecutor>,
}

impl Mocks {
    fn new() -> Self {
        Self {
            downloader: Arc::new(CountingDownloader {
                calls: AtomicUsize::new(0),
            }),
            engine: Arc::new(CountingEngine {
                calls: AtomicUsize::new(0),
            }),
            transcriber: Arc::new(CountingTranscriber {
                calls: AtomicUsize::new(0),
            }),
            executor: Arc::new(FakeToolExecutor {
                commands: Mutex::new(Vec::new()),
            }),
        }
    }

    fn services(&self) -> PipelineServices {
        PipelineServices {
            downloader: Arc::clone(&self.downloader) as Arc<dyn MediaDownloader>,
            separation: Arc::clone(&self.engine) as Arc<dyn SeparationEngine>,
            transcriber: Arc::clone(&self.transcriber) as Arc<dyn Transcriber>,
            executor: Arc::clone(&self.executor) as Arc<dyn CommandExecutor>,
        }
    }

    fn tool_invocations(&self) -> usize {
        self.executor.commands.lock().unwrap().len()
    }
}

fn local_input(base: &TempDir) -> TrackInput {
    let input = base.path().join("raw take.flac");
    std::fs::write(&input, b"pcm").unwrap();
    TrackInput {
        input: input.to_string_lossy().to_string(),
        artist: Some("ABBA".to_string()),
        title: Some("Waterloo".to_string()),
    }
}

/// New output directories carry the configured brand code prefix; the
/// fixture config sets one.
fn track_dir(config: &KaraforgeConfig) -> PathBuf {
    let dir_name = match &config.system.brand_code {
        Some(code) => format!("{code} - ABBA - Waterloo"),
        None => "ABBA - Waterloo".to_string(),
    };
    config
        .resolve_path(&config.paths.output_dir)
        .join(dir_name)
}

#[tokio::test]
async fn full_run_produces_every_artifact() {
    let base = TempDir::new().unwrap();
    let config = fixture_config(&base);
    let mocks = Mocks::new();
    let orchestrator =
        PipelineOrchestrator::new(config.clone(), mocks.services(), RunOptions::default());

    let reports = orchestrator.run(&[local_input(&base)]).await;
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report.succeeded(), "unexpected error: {:?}", report.error);
    assert_eq!(report.base_name, "ABBA - Waterloo");
    assert!(report
        .outcomes
        .iter()
        .all(|(_, outcome)| *outcome == StageOutcome::Completed));

    let dir = track_dir(&config);
    assert_eq!(
        dir.file_name().unwrap().to_string_lossy(),
        "KFX - ABBA - Waterloo"
    );
    for name in [
        "ABBA - Waterloo (Source).flac",
        "ABBA - Waterloo (Clean Instrumental).flac",
        "ABBA - Waterloo (Vocals).flac",
        "ABBA - Waterloo (Karaoke).lrc",
        "ABBA - Waterloo (Karaoke).ass",
        "ABBA - Waterloo (Title).mov",
        "ABBA - Waterloo (Final Karaoke).mp4",
        "checksums.json",
        "manifest.json",
        "ABBA - Waterloo (Final Karaoke Package).tar.gz",
        "ABBA - Waterloo.lof",
    ] {
        assert!(dir.join(name).exists(), "missing {name}");
    }

    // Clean model plus one configured backing model.
    assert_eq!(mocks.engine.calls.load(Ordering::SeqCst), 2);
    assert_eq!(mocks.transcriber.calls.load(Ordering::SeqCst), 1);
    // The inference lock is free again afterwards.
    assert!(!config.lock_path().exists());
}

#[tokio::test]
async fn second_run_skips_everything_without_touching_services() {
    let base = TempDir::new().unwrap();
    let config = fixture_config(&base);

    let first = Mocks::new();
    let orchestrator =
        PipelineOrchestrator::new(config.clone(), first.services(), RunOptions::default());
    let input = local_input(&base);
    assert!(orchestrator.run(&[input.clone()]).await[0].succeeded());

    let second = Mocks::new();
    let orchestrator =
        PipelineOrchestrator::new(config.clone(), second.services(), RunOptions::default());
    let reports = orchestrator.run(&[input]).await;
    let report = &reports[0];
    assert!(report.succeeded());
    assert!(
        report
            .outcomes
            .iter()
            .all(|(_, outcome)| *outcome == StageOutcome::Skipped),
        "expected all stages skipped, got {:?}",
        report.outcomes
    );
    assert_eq!(second.downloader.calls.load(Ordering::SeqCst), 0);
    assert_eq!(second.engine.calls.load(Ordering::SeqCst), 0);
    assert_eq!(second.transcriber.calls.load(Ordering::SeqCst), 0);
    assert_eq!(second.tool_invocations(), 0);
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let base = TempDir::new().unwrap();
    let config = fixture_config(&base);
    let mocks = Mocks::new();
    let options = RunOptions {
        dry_run: true,
        ..Default::default()
    };
    let orchestrator = PipelineOrchestrator::new(config.clone(), mocks.services(), options);

    let reports = orchestrator.run(&[local_input(&base)]).await;
    let report = &reports[0];
    assert!(report.succeeded(), "unexpected error: {:?}", report.error);
    assert!(report
        .outcomes
        .iter()
        .all(|(_, outcome)| *outcome == StageOutcome::DryRun));
    assert!(!track_dir(&config).exists());
    assert_eq!(mocks.engine.calls.load(Ordering::SeqCst), 0);
    assert_eq!(mocks.transcriber.calls.load(Ordering::SeqCst), 0);
    assert_eq!(mocks.tool_invocations(), 0);
}

#[tokio::test]
async fn lyrics_only_skips_separation_and_render() {
    let base = TempDir::new().unwrap();
    let config = fixture_config(&base);
    let mocks = Mocks::new();
    let options = RunOptions {
        mode: RunMode::LyricsOnly,
        ..Default::default()
    };
    let orchestrator = PipelineOrchestrator::new(config.clone(), mocks.services(), options);

    let reports = orchestrator.run(&[local_input(&base)]).await;
    let report = &reports[0];
    assert!(report.succeeded(), "unexpected error: {:?}", report.error);
    let stages: Vec<&str> = report
        .outcomes
        .iter()
        .map(|(stage, _)| stage.as_str())
        .collect();
    assert_eq!(stages, vec!["acquire_media", "process_lyrics"]);

    let dir = track_dir(&config);
    assert!(dir.join("ABBA - Waterloo (Karaoke).lrc").exists());
    assert!(dir.join("ABBA - Waterloo (Karaoke).ass").exists());
    assert_eq!(mocks.engine.calls.load(Ordering::SeqCst), 0);
    // Transcribed from the source mix since no vocals stem exists.
    assert_eq!(mocks.transcriber.calls.load(Ordering::SeqCst), 1);
    assert_eq!(mocks.tool_invocations(), 0);
}

#[tokio::test]
async fn prep_only_stops_before_distribution() {
    let base = TempDir::new().unwrap();
    let config = fixture_config(&base);
    let mocks = Mocks::new();
    let options = RunOptions {
        mode: RunMode::PrepOnly,
        ..Default::default()
    };
    let orchestrator = PipelineOrchestrator::new(config.clone(), mocks.services(), options);

    let reports = orchestrator.run(&[local_input(&base)]).await;
    let report = &reports[0];
    assert!(report.succeeded(), "unexpected error: {:?}", report.error);
    let stages: Vec<&str> = report
        .outcomes
        .iter()
        .map(|(stage, _)| stage.as_str())
        .collect();
    let backing_stage = format!("separate_audio:{}", config.separation.backing_models[0]);
    assert_eq!(
        stages,
        vec![
            "acquire_media",
            "separate_audio",
            backing_stage.as_str(),
            "process_lyrics",
            "render_videos",
        ]
    );
    assert!(report
        .outcomes
        .iter()
        .all(|(_, outcome)| *outcome == StageOutcome::Completed));

    let dir = track_dir(&config);
    assert!(dir.join("ABBA - Waterloo (Final Karaoke).mp4").exists());
    // Nothing from the distribution stage.
    assert!(!dir.join("checksums.json").exists());
    assert!(!dir.join("manifest.json").exists());
    assert!(!dir
        .join("ABBA - Waterloo (Final Karaoke Package).tar.gz")
        .exists());
}

#[tokio::test]
async fn finalise_only_distributes_without_touching_upstream_services() {
    let base = TempDir::new().unwrap();
    let config = fixture_config(&base);

    let working_dir = base.path().join("KFX - ABBA - Waterloo");
    std::fs::create_dir_all(&working_dir).unwrap();
    for name in [
        "ABBA - Waterloo (Clean Instrumental).flac",
        "ABBA - Waterloo (Karaoke).lrc",
        "ABBA - Waterloo (Karaoke).ass",
        "ABBA - Waterloo (Title).mov",
        "ABBA - Waterloo (Final Karaoke).mp4",
    ] {
        std::fs::write(working_dir.join(name), b"artifact").unwrap();
    }

    let mocks = Mocks::new();
    let options = RunOptions {
        mode: RunMode::FinaliseOnly,
        working_dir: Some(working_dir.clone()),
        ..Default::default()
    };
    let orchestrator = PipelineOrchestrator::new(config.clone(), mocks.services(), options);

    let reports = orchestrator.run(&[]).await;
    let report = &reports[0];
    assert!(report.succeeded(), "unexpected error: {:?}", report.error);
    assert_eq!(report.base_name, "ABBA - Waterloo");
    let stages: Vec<&str> = report
        .outcomes
        .iter()
        .map(|(stage, _)| stage.as_str())
        .collect();
    assert_eq!(stages, vec!["distribute"]);
    assert_eq!(report.outcomes[0].1, StageOutcome::Completed);

    assert!(working_dir.join("checksums.json").exists());
    assert!(working_dir.join("manifest.json").exists());
    assert!(working_dir
        .join("ABBA - Waterloo (Final Karaoke Package).tar.gz")
        .exists());

    // Only the archiver ran; acquisition, separation and transcription
    // were never consulted.
    assert_eq!(mocks.downloader.calls.load(Ordering::SeqCst), 0);
    assert_eq!(mocks.engine.calls.load(Ordering::SeqCst), 0);
    assert_eq!(mocks.transcriber.calls.load(Ordering::SeqCst), 0);
    assert_eq!(mocks.tool_invocations(), 1);
}

#[tokio::test]
async fn edit_lyrics_backs_up_and_recompiles_from_edited_lrc() {
    let base = TempDir::new().unwrap();
    let config = fixture_config(&base);

    let working_dir = base.path().join("ABBA - Waterloo");
    std::fs::create_dir_all(&working_dir).unwrap();
    for name in [
        "ABBA - Waterloo (Clean Instrumental).flac",
        "ABBA - Waterloo (Title).mov",
        "ABBA - Waterloo (Final Karaoke).mp4",
        "ABBA - Waterloo (Karaoke).ass",
    ] {
        std::fs::write(working_dir.join(name), b"old").unwrap();
    }
    std::fs::write(
        working_dir.join("ABBA - Waterloo (Karaoke).lrc"),
        "[00:02.00]Corrected opening line\n[00:06.00]Corrected second line\n",
    )
    .unwrap();

    let mocks = Mocks::new();
    let options = RunOptions {
        mode: RunMode::EditLyrics,
        working_dir: Some(working_dir.clone()),
        ..Default::default()
    };
    let orchestrator = PipelineOrchestrator::new(config.clone(), mocks.services(), options);

    let reports = orchestrator.run(&[]).await;
    let report = &reports[0];
    assert!(report.succeeded(), "unexpected error: {:?}", report.error);
    assert_eq!(report.outcomes[0].0, "backup_artifacts");

    // The hand-edited LRC is reused, never re-transcribed.
    assert_eq!(mocks.transcriber.calls.load(Ordering::SeqCst), 0);
    assert_eq!(mocks.engine.calls.load(Ordering::SeqCst), 0);

    let document =
        std::fs::read_to_string(working_dir.join("ABBA - Waterloo (Karaoke).ass")).unwrap();
    assert!(document.contains("Corrected opening line"));

    // Prior artifacts were copied aside before regeneration.
    let backup_root = working_dir.join("backup");
    let snapshots: Vec<_> = std::fs::read_dir(&backup_root)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .collect();
    assert_eq!(snapshots.len(), 1);
    let snapshot = snapshots[0].path();
    assert!(snapshot.join("ABBA - Waterloo (Karaoke).lrc").exists());
    assert!(snapshot.join("ABBA - Waterloo (Final Karaoke).mp4").exists());

    // Videos re-rendered and the package rebuilt despite existing outputs.
    assert!(mocks.tool_invocations() >= 3);
}

#[tokio::test]
async fn url_input_goes_through_the_downloader() {
    let base = TempDir::new().unwrap();
    let config = fixture_config(&base);
    let mocks = Mocks::new();
    let options = RunOptions {
        mode: RunMode::LyricsOnly,
        ..Default::default()
    };
    let orchestrator = PipelineOrchestrator::new(config.clone(), mocks.services(), options);

    let input = TrackInput {
        input: "https://media.example/waterloo.mp3".to_string(),
        artist: Some("ABBA".to_string()),
        title: Some("Waterloo".to_string()),
    };
    let reports = orchestrator.run(&[input]).await;
    assert!(reports[0].succeeded(), "error: {:?}", reports[0].error);
    assert_eq!(mocks.downloader.calls.load(Ordering::SeqCst), 1);
    assert!(track_dir(&config)
        .join("ABBA - Waterloo (Source).mp3")
        .exists());
}

#[tokio::test]
async fn fatal_error_in_one_track_does_not_stop_the_next() {
    let base = TempDir::new().unwrap();
    let config = fixture_config(&base);
    let mocks = Mocks::new();
    let orchestrator =
        PipelineOrchestrator::new(config.clone(), mocks.services(), RunOptions::default());

    let missing = TrackInput {
        input: base
            .path()
            .join("does-not-exist.flac")
            .to_string_lossy()
            .to_string(),
        artist: Some("Ghost".to_string()),
        title: Some("Nothing".to_string()),
    };
    let reports = orchestrator.run(&[missing, local_input(&base)]).await;
    assert_eq!(reports.len(), 2);
    assert!(!reports[0].succeeded());
    assert!(reports[1].succeeded(), "error: {:?}", reports[1].error);
    assert_eq!(reports[1].base_name, "ABBA - Waterloo");
}
