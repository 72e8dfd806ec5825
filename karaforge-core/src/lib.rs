pub mod config;
pub mod error;
pub mod lock;
pub mod lyrics;
pub mod pipeline;
pub mod track;

pub use config::{load_config, KaraforgeConfig};
pub use error::{ConfigError, Result};
pub use lock::{LockError, LockGuard, LockRecord, LockResult, ResourceLock};
pub use lyrics::{
    compile_cues, parse_lrc, render_ass, segment_line, write_lrc, LyricEvent, SubtitleCue,
    TimingOptions,
};
pub use pipeline::{
    Artifact, PipelineError, PipelineOrchestrator, PipelineResult, PipelineServices, RunMode,
    RunOptions, StageExecutor, StageOutcome, TrackInput, TrackReport,
};
pub use track::{MediaSource, Track};
