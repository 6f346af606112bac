//! Turning a player snapshot into a Rich Presence activity.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

use crate::types::PlayerSnapshot;

/// Activity type "Listening to ..."
const ACTIVITY_TYPE_LISTENING: u8 = 2;
/// Show the `state` field (artist) in the member list instead of the app name
const STATUS_DISPLAY_STATE: u8 = 1;
const FLAG_INSTANCE: u8 = 1;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: u8,
    pub status_display_type: u8,
    pub flags: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Timestamps>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<Assets>,
}

/// Unix epoch milliseconds
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Timestamps {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Assets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_url: Option<String>,
}

impl Assets {
    fn is_empty(&self) -> bool {
        self.large_image.is_none() && self.large_text.is_none() && self.large_url.is_none()
    }
}

pub fn artist_url(id: &str) -> String {
    format!("https://musicbrainz.org/artist/{}", id)
}

pub fn track_url(id: &str) -> String {
    format!("https://musicbrainz.org/track/{}", id)
}

pub fn release_url(id: &str) -> String {
    format!("https://musicbrainz.org/release/{}", id)
}

pub fn cover_url(id: &str) -> String {
    format!("https://coverartarchive.org/release/{}/front", id)
}

fn millis(secs: f64) -> Option<i64> {
    if !secs.is_finite() {
        return None;
    }
    // `as` saturates, the multiplication may not
    (secs as i64).checked_mul(1000)
}

/// Start/end of the song in epoch milliseconds; `None` for a zero or
/// nonsensical duration
fn timestamps(now: SystemTime, elapsed: f64, duration: f64) -> Option<Timestamps> {
    if !elapsed.is_finite() || !duration.is_finite() || duration <= 0.0 {
        return None;
    }
    let now = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    let start = now - elapsed;
    let end = start + duration;
    Some(Timestamps {
        start: millis(start)?,
        end: millis(end)?,
    })
}

/// Build the activity for this snapshot, or `None` when the presence should be cleared
pub fn derive(snapshot: &PlayerSnapshot, now: SystemTime) -> Option<Activity> {
    if !snapshot.is_playing() || snapshot.song.is_empty() {
        return None;
    }
    let elapsed = snapshot.status.elapsed?;
    let song = &snapshot.song;

    let artist = song.tag("artistsort").or_else(|| song.tag("artist"));
    let artist_id = song
        .tag("musicbrainz_albumartistid")
        .or_else(|| song.tag("musicbrainz_artistid"));
    let track = song.tag("title");
    let track_id = song.tag("musicbrainz_trackid");
    let album = song.tag("album");
    let album_id = song.tag("musicbrainz_albumid");

    if artist.is_none() && track.is_none() && album.is_none() {
        return None;
    }

    let timestamps = snapshot
        .status
        .duration
        .and_then(|duration| timestamps(now, elapsed, duration));

    let assets = Assets {
        large_image: album_id.map(cover_url),
        large_text: album.map(str::to_string),
        large_url: album_id.map(release_url),
    };

    Some(Activity {
        kind: ACTIVITY_TYPE_LISTENING,
        status_display_type: STATUS_DISPLAY_STATE,
        flags: FLAG_INSTANCE,
        state: artist.map(str::to_string),
        state_url: artist_id.map(artist_url),
        details: track.map(str::to_string),
        details_url: track_id.map(track_url),
        timestamps,
        assets: (!assets.is_empty()).then_some(assets),
    })
}

/// Drop null-valued keys from every object, at any depth
pub fn prune(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, prune(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(prune).collect()),
        other => other,
    }
}

/// The `activity` argument of SET_ACTIVITY; `null` clears the presence
pub fn to_payload(activity: Option<&Activity>) -> Value {
    match activity {
        Some(activity) => prune(serde_json::to_value(activity).unwrap_or(Value::Null)),
        None => Value::Null,
    }
}
