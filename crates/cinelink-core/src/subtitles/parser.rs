//! WebVTT cue parsing and the time-indexed cue structure
//!
//! The parser turns normalized WebVTT text into a [`CueIndex`]: cues ordered
//! by start time, queried by a single millisecond timestamp. Lookup is a
//! pure function of the index and the timestamp.

use crate::error::PlayerError;

/// One subtitle cue; times are milliseconds from the start of the content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub start: u64,
    pub end: u64,
    pub text: String,
}

/// Time-ordered structure over the cues of one parsed track
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CueIndex {
    cues: Vec<Cue>,
}

impl CueIndex {
    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// All cues active at the given effective time; negative times match
    /// nothing
    pub fn cues_at(&self, time: i64) -> Vec<&Cue> {
        if time < 0 {
            return Vec::new();
        }

        let time = time as u64;
        self.cues
            .iter()
            .filter(|cue| cue.start <= time && time < cue.end)
            .collect()
    }
}

/// Parse normalized WebVTT text into a cue index
pub fn parse(input: &str) -> Result<CueIndex, PlayerError> {
    let mut lines = input.lines().peekable();

    let header = lines.next().unwrap_or("");
    if !header.trim_start().starts_with("WEBVTT") {
        return Err(PlayerError::unknown("invalid WebVTT: missing header"));
    }

    // Skip header metadata until the first blank line
    for line in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }
    }

    let mut cues = Vec::new();
    while lines.peek().is_some() {
        while lines.peek().map(|line| line.trim().is_empty()).unwrap_or(false) {
            lines.next();
        }

        let Some(first) = lines.next() else { break };

        // NOTE/STYLE/REGION blocks carry no cues
        if first.starts_with("NOTE") || first.starts_with("STYLE") || first.starts_with("REGION") {
            for line in lines.by_ref() {
                if line.trim().is_empty() {
                    break;
                }
            }
            continue;
        }

        // A cue may start with an identifier line before the timing line
        let timing_line = if first.contains("-->") {
            first
        } else {
            match lines.next() {
                Some(line) => line,
                None => break,
            }
        };

        let Some((start, end)) = parse_timing_line(timing_line) else {
            continue;
        };

        let mut text = String::new();
        while let Some(line) = lines.peek() {
            if line.trim().is_empty() {
                break;
            }
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(lines.next().unwrap());
        }

        if end > start {
            cues.push(Cue { start, end, text });
        }
    }

    cues.sort_by_key(|cue| cue.start);
    Ok(CueIndex { cues })
}

/// Parse `"00:00:00.000 --> 00:00:04.000 align:center"`; trailing cue
/// settings are ignored
fn parse_timing_line(line: &str) -> Option<(u64, u64)> {
    let (start, rest) = line.split_once("-->")?;
    let end = rest.trim().split_whitespace().next()?;

    Some((parse_timestamp(start.trim())?, parse_timestamp(end)?))
}

/// Parse `"hh:mm:ss.mmm"` or `"mm:ss.mmm"` into milliseconds
fn parse_timestamp(timestamp: &str) -> Option<u64> {
    let parts: Vec<&str> = timestamp.split(':').collect();

    let (hours, minutes, seconds) = match parts.as_slice() {
        [minutes, seconds] => (0, minutes.parse::<u64>().ok()?, *seconds),
        [hours, minutes, seconds] => (
            hours.parse::<u64>().ok()?,
            minutes.parse::<u64>().ok()?,
            *seconds,
        ),
        _ => return None,
    };

    let (whole, millis) = match seconds.split_once('.') {
        Some((whole, frac)) => {
            let frac = format!("{:0<3}", frac);
            (whole.parse::<u64>().ok()?, frac[..3].parse::<u64>().ok()?)
        }
        None => (seconds.parse::<u64>().ok()?, 0),
    };

    Some(((hours * 3600 + minutes * 60 + whole) * 1000) + millis)
}

/// Strip VTT markup tags from cue text
pub fn strip_tags(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;

    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    result
}
