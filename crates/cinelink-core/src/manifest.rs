//! Capability manifests
//!
//! A manifest is the static description of a unit's supported state
//! properties, commands and events. Decorators compose manifests by union:
//! the wrapped manifest's entries come first, additions are appended, and
//! duplicates keep their first occurrence.

use serde::{Deserialize, Serialize};

/// Static capability set of a backend or decorated unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Unit name; decorators append a suffix reflecting the added capability
    pub name: String,
    /// Playback happens outside the hosting page (e.g. on a cast receiver)
    pub external: bool,
    pub props: Vec<String>,
    pub commands: Vec<String>,
    pub events: Vec<String>,
}

impl Manifest {
    pub fn new(
        name: impl Into<String>,
        external: bool,
        props: &[&str],
        commands: &[&str],
        events: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            external,
            props: union(&[], props),
            commands: union(&[], commands),
            events: union(&[], events),
        }
    }

    /// Manifest of a decorator applied to the unit with this manifest
    pub fn extended(
        &self,
        name_suffix: &str,
        props: &[&str],
        commands: &[&str],
        events: &[&str],
    ) -> Self {
        Self {
            name: format!("{}{}", self.name, name_suffix),
            external: self.external,
            props: union(&self.props, props),
            commands: union(&self.commands, commands),
            events: union(&self.events, events),
        }
    }

    pub fn has_prop(&self, name: &str) -> bool {
        self.props.iter().any(|p| p == name)
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.commands.iter().any(|c| c == name)
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.events.iter().any(|e| e == name)
    }
}

/// Deduplicated union preserving order of first appearance
fn union(base: &[String], additions: &[&str]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(base.len() + additions.len());
    for entry in base.iter().map(String::as_str).chain(additions.iter().copied()) {
        if !merged.iter().any(|existing| existing == entry) {
            merged.push(entry.to_string());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Manifest {
        Manifest::new(
            "NativeVideo",
            false,
            &["stream", "paused", "time"],
            &["load", "unload", "destroy"],
            &["propValue", "propChanged", "ended", "error"],
        )
    }

    #[test]
    fn test_extended_appends_suffix_and_additions() {
        let extended = base().extended(
            "WithSubtitles",
            &["extraSubtitlesTracks"],
            &["addExtraSubtitlesTracks"],
            &["extraSubtitlesTrackLoaded"],
        );

        assert_eq!(extended.name, "NativeVideoWithSubtitles");
        assert!(extended.has_prop("stream"));
        assert!(extended.has_prop("extraSubtitlesTracks"));
        assert!(extended.has_command("addExtraSubtitlesTracks"));
        assert!(extended.has_event("extraSubtitlesTrackLoaded"));
    }

    #[test]
    fn test_union_suppresses_duplicates() {
        let extended = base().extended(
            "WithSubtitles",
            &["stream", "paused"],
            &["load", "unload", "destroy"],
            &["propValue", "error"],
        );

        assert_eq!(extended.props, base().props);
        assert_eq!(extended.commands, base().commands);
        assert_eq!(extended.events, base().events);
    }

    #[test]
    fn test_union_is_order_stable_under_recomposition() {
        let once = base().extended("WithSubtitles", &["a", "b"], &[], &[]);
        let twice = once.extended("WithSubtitles", &["a", "b"], &[], &[]);

        assert_eq!(once.props, twice.props);
        assert_eq!(twice.name, "NativeVideoWithSubtitlesWithSubtitles");
    }

    #[test]
    fn test_external_flag_is_preserved() {
        let cast = Manifest::new("CastVideo", true, &[], &[], &[]);
        assert!(cast.extended("WithSubtitles", &[], &[], &[]).external);
    }
}
