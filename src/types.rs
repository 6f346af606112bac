use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Playback state as reported by the player backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Play,
    Pause,
    Stop,
    #[default]
    Unknown,
}

impl PlaybackState {
    /// Parse MPD (`play`) and rmpc (`Play`) spellings alike
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "play" | "playing" => PlaybackState::Play,
            "pause" | "paused" => PlaybackState::Pause,
            "stop" | "stopped" => PlaybackState::Stop,
            _ => PlaybackState::Unknown,
        }
    }
}

/// A metadata tag. Players may report several equally valid values for one
/// tag (e.g. multiple `Artist` lines); only the first is ever displayed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum TagValue {
    One(String),
    Many(Vec<String>),
}

impl TagValue {
    pub fn first(&self) -> Option<&str> {
        match self {
            TagValue::One(value) => Some(value.as_str()),
            TagValue::Many(values) => values.first().map(String::as_str),
        }
    }

    /// Append another value for the same key, turning a single value into a list
    pub fn push(&mut self, value: String) {
        match self {
            TagValue::One(existing) => {
                let first = std::mem::take(existing);
                *self = TagValue::Many(vec![first, value]);
            }
            TagValue::Many(values) => values.push(value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    /// Seconds into the current song
    pub elapsed: Option<f64>,
    /// Total length of the current song in seconds
    pub duration: Option<f64>,
}

/// Current song metadata, keyed by lower-cased tag name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerSong {
    pub tags: BTreeMap<String, TagValue>,
}

impl PlayerSong {
    pub fn insert(&mut self, key: &str, value: String) {
        let key = key.to_ascii_lowercase();
        match self.tags.get_mut(&key) {
            Some(existing) => existing.push(value),
            None => {
                self.tags.insert(key, TagValue::One(value));
            }
        }
    }

    /// First value of a tag; empty strings count as absent
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .and_then(TagValue::first)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// One poll of the player: fetched fresh every tick, never cached
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerSnapshot {
    pub status: PlayerStatus,
    pub song: PlayerSong,
}

impl PlayerSnapshot {
    pub fn is_playing(&self) -> bool {
        self.status.state == PlaybackState::Play
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_state_parse() {
        assert_eq!(PlaybackState::parse("play"), PlaybackState::Play);
        assert_eq!(PlaybackState::parse("Play"), PlaybackState::Play);
        assert_eq!(PlaybackState::parse("pause"), PlaybackState::Pause);
        assert_eq!(PlaybackState::parse("stop"), PlaybackState::Stop);
        assert_eq!(PlaybackState::parse("buffering"), PlaybackState::Unknown);
    }

    #[test]
    fn test_list_tag_reduces_to_first() {
        let many = TagValue::Many(vec!["Boards of Canada".into(), "BoC".into()]);
        assert_eq!(many.first(), Some("Boards of Canada"));

        let one = TagValue::One("Autechre".into());
        assert_eq!(one.first(), Some("Autechre"));

        assert_eq!(TagValue::Many(vec![]).first(), None);
    }

    #[test]
    fn test_repeated_insert_becomes_list() {
        let mut song = PlayerSong::default();
        song.insert("Artist", "First".into());
        song.insert("artist", "Second".into());

        assert_eq!(
            song.tags.get("artist"),
            Some(&TagValue::Many(vec!["First".into(), "Second".into()]))
        );
        assert_eq!(song.tag("artist"), Some("First"));
    }

    #[test]
    fn test_empty_tag_is_absent() {
        let mut song = PlayerSong::default();
        song.insert("title", "  ".into());
        assert_eq!(song.tag("title"), None);
        assert_eq!(song.tag("album"), None);
    }

    #[test]
    fn test_tag_value_deserializes_scalar_or_list() {
        let one: TagValue = serde_json::from_str(r#""x""#).unwrap();
        let many: TagValue = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(one, TagValue::One("x".into()));
        assert_eq!(many, TagValue::Many(vec!["a".into(), "b".into()]));
    }
}
