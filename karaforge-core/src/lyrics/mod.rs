pub mod lrc;
pub mod segmenter;
pub mod timing;

pub use lrc::{parse_lrc, write_lrc, LyricEvent};
pub use segmenter::{segment_line, DEFAULT_COMMA_WINDOW, DEFAULT_LINE_BUDGET, DEFAULT_MAX_SPLITS};
pub use timing::{compile_cues, format_timestamp, render_ass, SubtitleCue, TimingOptions};
