use super::lrc::LyricEvent;
use super::segmenter::segment_line;

/// One timed subtitle display unit. Multi-line display text keeps the
/// segmenter's order, joined with `\n`; markup escaping happens at render
/// time, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Knobs for cue compilation, mirroring the `[lyrics]` config section.
#[derive(Debug, Clone, Copy)]
pub struct TimingOptions {
    pub line_budget: usize,
    pub comma_window: usize,
    pub max_splits: usize,
    pub tail_seconds: f64,
}

impl Default for TimingOptions {
    fn default() -> Self {
        Self {
            line_budget: super::segmenter::DEFAULT_LINE_BUDGET,
            comma_window: super::segmenter::DEFAULT_COMMA_WINDOW,
            max_splits: super::segmenter::DEFAULT_MAX_SPLITS,
            tail_seconds: 5.0,
        }
    }
}

/// Turns raw lyric events into display cues: stable-sorts by timestamp,
/// bounds each cue by the next event's start, pads the final cue with a
/// fixed tail, and segments each line under the display budget.
pub fn compile_cues(events: &[LyricEvent], options: TimingOptions) -> Vec<SubtitleCue> {
    let mut sorted: Vec<&LyricEvent> = events.iter().collect();
    sorted.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let mut cues = Vec::with_capacity(sorted.len());
    for (index, event) in sorted.iter().enumerate() {
        let start = event.timestamp;
        let end = match sorted.get(index + 1) {
            Some(next) => next.timestamp,
            None => start + options.tail_seconds,
        };
        let lines = segment_line(
            &event.text,
            options.line_budget,
            options.comma_window,
            options.max_splits,
        );
        cues.push(SubtitleCue {
            start,
            end,
            text: lines.join("\n"),
        });
    }
    cues
}

/// Renders cues as an ASS subtitle document: Script Info, one V4+ style,
/// and one `Dialogue` event per cue with `H:MM:SS.CC` timestamps.
pub fn render_ass(cues: &[SubtitleCue], title: &str, resolution: [u32; 2]) -> String {
    let mut out = String::new();
    out.push_str("[Script Info]\n");
    out.push_str(&format!("Title: {title}\n"));
    out.push_str("ScriptType: v4.00+\n");
    out.push_str(&format!("PlayResX: {}\n", resolution[0]));
    out.push_str(&format!("PlayResY: {}\n", resolution[1]));
    out.push('\n');
    out.push_str("[V4+ Styles]\n");
    out.push_str(
        "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, \
         BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, \
         BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n",
    );
    out.push_str(
        "Style: Default,Avenir Next Bold,96,&H00FFFFFF,&H000088EF,&H00000000,&H00000000,\
         0,0,0,0,100,100,0,0,1,3,0,5,10,10,10,1\n",
    );
    out.push('\n');
    out.push_str("[Events]\n");
    out.push_str("Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n");
    for cue in cues {
        out.push_str(&format!(
            "Dialogue: 0,{},{},Default,,0,0,0,,{}\n",
            format_timestamp(cue.start),
            format_timestamp(cue.end),
            escape_ass_text(&cue.text),
        ));
    }
    out
}

/// `H:MM:SS.CC` (centisecond precision), the ASS event timestamp shape.
pub fn format_timestamp(seconds: f64) -> String {
    let total_centis = (seconds.max(0.0) * 100.0).round() as u64;
    let hours = total_centis / 360_000;
    let minutes = (total_centis % 360_000) / 6_000;
    let secs = (total_centis % 6_000) / 100;
    let centis = total_centis % 100;
    format!("{hours}:{minutes:02}:{secs:02}.{centis:02}")
}

/// Escapes the characters ASS treats as markup, then maps the cue's logical
/// line breaks to ASS hard breaks. Escaping runs after segmentation so the
/// segmenter stays markup-agnostic.
fn escape_ass_text(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            line.replace('\\', "\\\\")
                .replace('{', "\\{")
                .replace('}', "\\}")
        })
        .collect::<Vec<_>>()
        .join("\\N")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(timestamp: f64, text: &str) -> LyricEvent {
        LyricEvent {
            timestamp,
            text: text.to_string(),
        }
    }

    #[test]
    fn empty_events_compile_to_no_cues() {
        assert!(compile_cues(&[], TimingOptions::default()).is_empty());
    }

    #[test]
    fn single_event_gets_tail_padding() {
        let cues = compile_cues(&[event(10.0, "one line")], TimingOptions::default());
        assert_eq!(cues.len(), 1);
        assert!((cues[0].start - 10.0).abs() < 1e-9);
        assert!((cues[0].end - 15.0).abs() < 1e-9);
    }

    #[test]
    fn cues_chain_end_to_start() {
        let events = vec![
            event(5.0, "first"),
            event(9.5, "second"),
            event(14.0, "third"),
        ];
        let cues = compile_cues(&events, TimingOptions::default());
        assert_eq!(cues.len(), 3);
        for pair in cues.windows(2) {
            assert!((pair[0].end - pair[1].start).abs() < 1e-9);
            assert!(pair[0].start <= pair[1].start);
        }
        assert!((cues[2].end - 19.0).abs() < 1e-9);
    }

    #[test]
    fn unsorted_events_are_sorted_stably() {
        let events = vec![
            event(9.0, "later"),
            event(3.0, "earlier"),
            event(9.0, "later twin"),
        ];
        let cues = compile_cues(&events, TimingOptions::default());
        assert_eq!(cues[0].text, "earlier");
        assert_eq!(cues[1].text, "later");
        assert_eq!(cues[2].text, "later twin");
    }

    #[test]
    fn long_lines_become_multi_line_cues() {
        let events = vec![event(
            0.0,
            "I walked down the long road, and I never looked back again",
        )];
        let cues = compile_cues(&events, TimingOptions::default());
        let lines: Vec<&str> = cues[0].text.split('\n').collect();
        assert!(lines.len() >= 2);
        assert_eq!(lines[0], "I walked down the long road,");
    }

    #[test]
    fn timestamps_format_as_ass() {
        assert_eq!(format_timestamp(0.0), "0:00:00.00");
        assert_eq!(format_timestamp(75.25), "0:01:15.25");
        assert_eq!(format_timestamp(3723.5), "1:02:03.50");
    }

    #[test]
    fn dialogue_lines_are_rendered_and_escaped() {
        let cues = vec![SubtitleCue {
            start: 1.0,
            end: 2.0,
            text: "first line\n{second} line".to_string(),
        }];
        let doc = render_ass(&cues, "Test", [3840, 2160]);
        assert!(doc.contains("[Script Info]"));
        assert!(doc.contains("[V4+ Styles]"));
        assert!(doc.contains("PlayResX: 3840"));
        assert!(doc.contains(
            "Dialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,first line\\N\\{second\\} line"
        ));
    }
}
