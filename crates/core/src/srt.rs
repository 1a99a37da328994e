//! SubRip (`.srt`) parsing and serialization.
//!
//! Translations ride along as trailing `<i>…</i>` lines under the source
//! text, which players render as an italic second line.

use crate::{error::SrtError, types::SubtitleSegment};

const ARROW: &str = "-->";
const ITALIC_OPEN: &str = "<i>";
const ITALIC_CLOSE: &str = "</i>";

/// Format seconds as an SRT `HH:MM:SS,mmm` timestamp
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = seconds_to_ms(seconds);
    let hours = total_ms / 3_600_000;
    let mins = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let ms = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, mins, secs, ms)
}

/// Parse an SRT timestamp. Accepts `,` or `.` before the milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let (clock, millis) = raw.split_once([',', '.'])?;

    let mut parts = clock.split(':');
    let hours: u64 = parse_digits(parts.next()?, 1, 3)?;
    let mins: u64 = parse_digits(parts.next()?, 2, 2)?;
    let secs: u64 = parse_digits(parts.next()?, 2, 2)?;
    if parts.next().is_some() || mins >= 60 || secs >= 60 {
        return None;
    }

    // "5" means 500ms, "05" means 50ms
    if millis.is_empty() || millis.len() > 3 || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let ms: u64 = format!("{:0<3}", millis).parse().ok()?;

    let total_ms = hours * 3_600_000 + mins * 60_000 + secs * 1000 + ms;
    Some(total_ms as f64 / 1000.0)
}

fn parse_digits(raw: &str, min_len: usize, max_len: usize) -> Option<u64> {
    if raw.len() < min_len || raw.len() > max_len || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

fn seconds_to_ms(seconds: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * 1000.0).round() as u64
}

fn parse_timing(line: &str) -> Option<(f64, f64)> {
    let (start, rest) = line.split_once(ARROW)?;
    // Anything after the end timestamp is positioning metadata
    let end = rest.split_whitespace().next()?;
    Some((parse_timestamp(start)?, parse_timestamp(end)?))
}

fn parse_index(line: &str) -> Option<usize> {
    let line = line.trim();
    if line.is_empty() || !line.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    line.parse().ok()
}

fn is_italic_line(line: &str) -> bool {
    line.len() >= ITALIC_OPEN.len() + ITALIC_CLOSE.len()
        && line.starts_with(ITALIC_OPEN)
        && line.ends_with(ITALIC_CLOSE)
}

fn unwrap_italic(line: &str) -> &str {
    &line[ITALIC_OPEN.len()..line.len() - ITALIC_CLOSE.len()]
}

/// Split cue lines into source text and the trailing translation, if any.
fn split_translation(mut lines: Vec<&str>) -> (String, Option<String>) {
    let mut translation = Vec::new();
    while lines.len() > 1 && lines.last().is_some_and(|l| is_italic_line(l)) {
        if let Some(line) = lines.pop() {
            translation.push(unwrap_italic(line));
        }
    }
    translation.reverse();

    let text = lines.join("\n");
    if translation.is_empty() {
        (text, None)
    } else {
        (text, Some(translation.join("\n")))
    }
}

/// Parse SRT text into segments.
///
/// Blank-line runs between blocks, CRLF endings, a leading BOM and a missing
/// trailing newline are tolerated. Line numbers in errors are 1-based.
pub fn parse(raw: &str) -> Result<Vec<SubtitleSegment>, SrtError> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let lines: Vec<&str> = raw.lines().map(|l| l.trim_end_matches('\r')).collect();

    let mut segments = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if lines[i].trim().is_empty() {
            i += 1;
            continue;
        }

        let index = parse_index(lines[i]).ok_or_else(|| SrtError::Malformed {
            line: i + 1,
            reason: format!("expected subtitle index, found {:?}", lines[i]),
        })?;
        if index == 0 {
            return Err(SrtError::Malformed {
                line: i + 1,
                reason: "subtitle index must be >= 1".to_string(),
            });
        }
        i += 1;

        let timing_line = lines.get(i).copied().unwrap_or_default();
        let (start, end) = parse_timing(timing_line).ok_or_else(|| SrtError::Malformed {
            line: i + 1,
            reason: format!("expected timing line, found {:?}", timing_line),
        })?;
        if end <= start {
            return Err(SrtError::Malformed {
                line: i + 1,
                reason: format!("end {} is not after start {}", end, start),
            });
        }
        i += 1;

        let mut text_lines = Vec::new();
        while i < lines.len() && !lines[i].trim().is_empty() {
            // A missing blank line before the next block
            if parse_index(lines[i]).is_some()
                && lines.get(i + 1).is_some_and(|next| parse_timing(next).is_some())
            {
                break;
            }
            text_lines.push(lines[i]);
            i += 1;
        }

        let (text, translation) = split_translation(text_lines);
        segments.push(SubtitleSegment {
            index,
            start_seconds: start,
            end_seconds: end,
            text,
            translation,
        });
    }

    Ok(segments)
}

/// Serialize segments as SRT, renumbering indices 1..N in order.
pub fn serialize(segments: &[SubtitleSegment]) -> String {
    segments
        .iter()
        .enumerate()
        .map(|(i, seg)| {
            let mut block = format!(
                "{}\n{} {} {}\n{}\n",
                i + 1,
                format_timestamp(seg.start_seconds),
                ARROW,
                format_timestamp(seg.end_seconds),
                seg.text
            );
            if let Some(translation) = &seg.translation {
                for line in translation.lines() {
                    block.push_str(&format!("{}{}{}\n", ITALIC_OPEN, line, ITALIC_CLOSE));
                }
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove `<…>` markup tags, keeping the text between them.
pub fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
