use tracing::warn;

pub const DEFAULT_LINE_BUDGET: usize = 36;
pub const DEFAULT_COMMA_WINDOW: usize = 20;
pub const DEFAULT_MAX_SPLITS: usize = 100;

/// Splits an oversized lyric line into display sub-lines, each at most
/// `budget` characters, preferring semantic break points over mechanical
/// ones. Rules are tried in priority order for each oversized remainder:
/// parenthetical carve-out, comma near the midpoint, `" and "` near the
/// midpoint, a word-boundary cut, and finally a forced cut at the budget.
pub fn segment_line(
    line: &str,
    budget: usize,
    comma_window: usize,
    max_splits: usize,
) -> Vec<String> {
    let mut out = Vec::new();
    let mut remainder: Vec<char> = line.trim().chars().collect();
    if remainder.is_empty() {
        return out;
    }

    let mut iterations = 0usize;
    while remainder.len() > budget {
        if iterations >= max_splits {
            // Degenerate input (e.g. one enormous unbreakable run). Keep
            // whatever accumulated and surface the rest as a final line.
            warn!(
                remaining = remainder.len(),
                cap = max_splits,
                "line segmentation hit the split cap, emitting unsplit remainder"
            );
            break;
        }
        iterations += 1;
        let (emitted, rest) = split_once(&remainder, budget, comma_window, max_splits);
        out.extend(emitted);
        remainder = trim_chars(&rest);
        if remainder.is_empty() {
            break;
        }
    }

    if !remainder.is_empty() {
        out.push(remainder.iter().collect());
    }
    out
}

/// Applies the first applicable rule and returns the emitted sub-lines plus
/// the unprocessed remainder.
fn split_once(
    chars: &[char],
    budget: usize,
    comma_window: usize,
    max_splits: usize,
) -> (Vec<String>, Vec<char>) {
    if let Some(result) = parenthetical_cut(chars, budget, comma_window, max_splits) {
        return result;
    }
    if let Some(cut) = comma_cut(chars, budget, comma_window) {
        return cut;
    }
    if let Some(cut) = and_cut(chars, budget) {
        return cut;
    }
    if let Some(cut) = word_cut(chars, budget) {
        return cut;
    }
    // Forced cut at exactly the budget, regardless of word boundaries.
    let prefix: String = chars[..budget].iter().collect();
    (vec![prefix], chars[budget..].to_vec())
}

/// Rule 1: a parenthetical span not starting the line becomes its own
/// sub-line (absorbing a trailing comma), with the prefix emitted first.
fn parenthetical_cut(
    chars: &[char],
    budget: usize,
    comma_window: usize,
    max_splits: usize,
) -> Option<(Vec<String>, Vec<char>)> {
    let open = chars.iter().position(|&c| c == '(')?;
    if open == 0 {
        return None;
    }
    let close = open + chars[open..].iter().position(|&c| c == ')')?;
    let span_end = if chars.get(close + 1) == Some(&',') {
        close + 1
    } else {
        close
    };

    let prefix: String = chars[..open].iter().collect();
    let span: String = chars[open..=span_end].iter().collect();
    // Either piece may itself exceed the budget; the span starts with '('
    // so it cannot re-trigger this rule.
    let mut emitted = segment_line(prefix.trim(), budget, comma_window, max_splits);
    emitted.extend(segment_line(span.trim(), budget, comma_window, max_splits));
    Some((emitted, chars[span_end + 1..].to_vec()))
}

/// Rule 2: a comma within `comma_window` characters of the midpoint (the
/// start of the middle word) whose inclusive prefix fits the budget. The
/// comma closest to the midpoint wins; an exact tie goes to the earlier one.
fn comma_cut(
    chars: &[char],
    budget: usize,
    comma_window: usize,
) -> Option<(Vec<String>, Vec<char>)> {
    let words = word_spans(chars);
    if words.is_empty() {
        return None;
    }
    let midpoint = words[words.len() / 2].start;

    let mut best: Option<(usize, usize)> = None; // (distance, position)
    for (pos, &c) in chars.iter().enumerate() {
        if c != ',' {
            continue;
        }
        let distance = midpoint.abs_diff(pos);
        if distance > comma_window || pos + 1 > budget {
            continue;
        }
        match best {
            Some((best_distance, _)) if best_distance <= distance => {}
            _ => best = Some((distance, pos)),
        }
    }
    let (_, pos) = best?;
    let prefix: String = chars[..=pos].iter().collect();
    Some((vec![prefix.trim().to_string()], chars[pos + 1..].to_vec()))
}

/// Rule 3: the `" and "` occurrence closest to the raw midpoint whose
/// inclusive prefix fits the budget; ties go to the earlier occurrence.
fn and_cut(chars: &[char], budget: usize) -> Option<(Vec<String>, Vec<char>)> {
    const NEEDLE: [char; 5] = [' ', 'a', 'n', 'd', ' '];
    let midpoint = chars.len() / 2;

    let mut best: Option<(usize, usize)> = None;
    for start in 0..chars.len().saturating_sub(NEEDLE.len() - 1) {
        if chars[start..start + NEEDLE.len()] != NEEDLE {
            continue;
        }
        let cut = start + NEEDLE.len();
        if cut > budget {
            continue;
        }
        let distance = midpoint.abs_diff(start);
        match best {
            Some((best_distance, _)) if best_distance <= distance => {}
            _ => best = Some((distance, start)),
        }
    }
    let (_, start) = best?;
    let cut = start + NEEDLE.len();
    let prefix: String = chars[..cut].iter().collect();
    Some((vec![prefix.trim().to_string()], chars[cut..].to_vec()))
}

/// Rule 4: cut after the word closest to (but not past) the midpoint word
/// whose prefix fits the budget. Needs more than two words so both halves
/// keep at least one.
fn word_cut(chars: &[char], budget: usize) -> Option<(Vec<String>, Vec<char>)> {
    let words = word_spans(chars);
    if words.len() <= 2 {
        return None;
    }
    let mid = words.len() / 2;
    for last in (0..=mid.min(words.len() - 2)).rev() {
        let end = words[last].end;
        if end <= budget {
            let prefix: String = chars[..end].iter().collect();
            return Some((vec![prefix.trim().to_string()], chars[end..].to_vec()));
        }
    }
    None
}

#[derive(Debug, Clone, Copy)]
struct WordSpan {
    start: usize,
    end: usize,
}

fn word_spans(chars: &[char]) -> Vec<WordSpan> {
    let mut spans = Vec::new();
    let mut start = None;
    for (index, c) in chars.iter().enumerate() {
        if c.is_whitespace() {
            if let Some(begin) = start.take() {
                spans.push(WordSpan {
                    start: begin,
                    end: index,
                });
            }
        } else if start.is_none() {
            start = Some(index);
        }
    }
    if let Some(begin) = start {
        spans.push(WordSpan {
            start: begin,
            end: chars.len(),
        });
    }
    spans
}

fn trim_chars(chars: &[char]) -> Vec<char> {
    let text: String = chars.iter().collect();
    text.trim().chars().collect()
}
