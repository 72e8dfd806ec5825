use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

fn timed_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Unwrap is safe: the pattern is a compile-time constant.
    PATTERN.get_or_init(|| Regex::new(r"^\[(\d+):(\d{1,2}(?:\.\d{1,3})?)\](.*)$").unwrap())
}

/// One time-stamped raw lyric line as it arrives from transcription or an
/// existing (possibly hand-edited) LRC file.
#[derive(Debug, Clone, PartialEq)]
pub struct LyricEvent {
    pub timestamp: f64,
    pub text: String,
}

/// Parses `[mm:ss.xx]text` lines. Metadata tags (`[ti:]`, `[ar:]`, `[al:]`
/// and friends) and anything that fails to parse are skipped.
pub fn parse_lrc(contents: &str) -> Vec<LyricEvent> {
    let timed = timed_line_pattern();
    let mut events = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(caps) = timed.captures(line) else {
            debug!(line, "skipping non-timed lrc line");
            continue;
        };
        let minutes: f64 = match caps[1].parse() {
            Ok(value) => value,
            Err(_) => continue,
        };
        let seconds: f64 = match caps[2].parse() {
            Ok(value) => value,
            Err(_) => continue,
        };
        events.push(LyricEvent {
            timestamp: minutes * 60.0 + seconds,
            text: caps[3].trim().to_string(),
        });
    }
    events
}

/// Serialises events back to LRC, with artist/title metadata up front. This
/// is the file the operator hand-edits before an edit-lyrics pass.
pub fn write_lrc(events: &[LyricEvent], artist: Option<&str>, title: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(artist) = artist {
        let _ = writeln!(out, "[ar:{artist}]");
    }
    if let Some(title) = title {
        let _ = writeln!(out, "[ti:{title}]");
    }
    for event in events {
        let minutes = (event.timestamp / 60.0).floor() as u64;
        let seconds = event.timestamp - (minutes as f64) * 60.0;
        let _ = writeln!(out, "[{minutes:02}:{seconds:05.2}]{}", event.text);
    }
    out
}
