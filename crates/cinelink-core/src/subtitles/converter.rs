//! Subtitle format normalization
//!
//! Fetched subtitle text is normalized to WebVTT before parsing. SRT input
//! is converted; WebVTT input passes through untouched, so running the
//! converter twice is a no-op.

use crate::error::PlayerError;

/// Normalize raw subtitle text to WebVTT
pub fn convert(raw: &str) -> Result<String, PlayerError> {
    let text = raw.trim_start_matches('\u{feff}');

    if text.trim_start().starts_with("WEBVTT") {
        return Ok(text.to_string());
    }

    if looks_like_srt(text) {
        return Ok(srt_to_vtt(text));
    }

    Err(PlayerError::unknown("unsupported subtitles format"))
}

/// SRT carries numbered cue blocks with comma-millisecond timestamps
fn looks_like_srt(text: &str) -> bool {
    text.lines().any(|line| {
        line.contains("-->") && line.contains(',')
    })
}

/// Convert SRT content to WebVTT: prepend the header and swap the decimal
/// separator on timing lines only, leaving dialogue untouched
fn srt_to_vtt(srt: &str) -> String {
    let mut vtt = String::from("WEBVTT\n\n");

    for line in srt.lines() {
        if line.contains("-->") {
            vtt.push_str(&line.replace(',', "."));
        } else {
            vtt.push_str(line);
        }
        vtt.push('\n');
    }

    vtt
}
