//! Backend that shells out to a client such as `rmpc` which prints the
//! player status and the current song as JSON.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

use crate::player::PlayerBackend;
use crate::types::{PlaybackState, PlayerSnapshot, PlayerSong, PlayerStatus, TagValue};

const CHECK_INTERVAL: Duration = Duration::from_millis(20);

/// Run `program args...` and return its stdout, killing it if it overruns `timeout`
pub fn run_with_timeout(argv: &[String], timeout: Duration) -> Result<String> {
    let (program, args) = argv.split_first().context("Empty command")?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;

    let mut stdout = child
        .stdout
        .take()
        .context("Failed to capture command stdout")?;

    // Drain stdout on a thread so a chatty child can't block on a full pipe
    let reader = thread::spawn(move || {
        let mut output = String::new();
        stdout.read_to_string(&mut output).map(|_| output)
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() < deadline => thread::sleep(CHECK_INTERVAL),
            Ok(None) => {
                log::warn!("{} did not finish within {:?}, killing it", program, timeout);
                child.kill().context("Failed to kill command")?;
                child.wait().context("Failed to wait for command")?;
                bail!("{} timed out", program);
            }
            Err(e) => return Err(e).context("Error checking command status"),
        }
    };

    let output = match reader.join() {
        Ok(output) => output.context("Failed to read command output")?,
        Err(_) => bail!("Output reader for {} panicked", program),
    };

    if !status.success() {
        bail!("{} exited with {}", program, status);
    }
    Ok(output)
}

/// Seconds from a number, a numeric string, or a `{secs, nanos}` object
fn seconds(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(map) => {
            let secs = map.get("secs")?.as_f64()?;
            let nanos = map.get("nanos").and_then(Value::as_f64).unwrap_or(0.0);
            Some(secs + nanos / 1e9)
        }
        _ => None,
    }
}

fn tag_value(value: &Value) -> Option<TagValue> {
    match value {
        Value::String(s) => Some(TagValue::One(s.clone())),
        Value::Number(n) => Some(TagValue::One(n.to_string())),
        Value::Array(items) => {
            let items: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect();
            (!items.is_empty()).then_some(TagValue::Many(items))
        }
        _ => None,
    }
}

fn lowercase_keys(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect()
}

pub fn parse_status(value: &Value) -> Option<PlayerStatus> {
    let map = lowercase_keys(value.as_object()?);
    Some(PlayerStatus {
        state: map
            .get("state")
            .and_then(Value::as_str)
            .map(PlaybackState::parse)
            .unwrap_or_default(),
        elapsed: map.get("elapsed").and_then(seconds),
        duration: map.get("duration").and_then(seconds),
    })
}

/// Song tags may be at the top level or nested under `metadata`; the nested
/// ones win when both are present
pub fn parse_song(value: &Value) -> Option<(PlayerSong, Option<f64>)> {
    let map = lowercase_keys(value.as_object()?);
    let mut song = PlayerSong::default();

    for (key, value) in &map {
        if let Some(tag) = tag_value(value) {
            song.tags.insert(key.clone(), tag);
        }
    }
    if let Some(metadata) = map.get("metadata").and_then(Value::as_object) {
        for (key, value) in lowercase_keys(metadata) {
            if let Some(tag) = tag_value(&value) {
                song.tags.insert(key, tag);
            }
        }
    }

    let duration = map.get("duration").and_then(seconds);
    Some((song, duration))
}

fn parse_json(output: &str) -> Option<Value> {
    let output = output.trim();
    if output.is_empty() {
        return None;
    }
    match serde_json::from_str(output) {
        Ok(value) => Some(value),
        Err(e) => {
            log::debug!("Command printed invalid JSON: {}", e);
            None
        }
    }
}

pub struct CommandBackend {
    status_command: Vec<String>,
    song_command: Vec<String>,
    timeout: Duration,
}

impl CommandBackend {
    pub fn new(status_command: Vec<String>, song_command: Vec<String>, timeout: Duration) -> Self {
        Self {
            status_command,
            song_command,
            timeout,
        }
    }
}

impl PlayerBackend for CommandBackend {
    fn name(&self) -> &'static str {
        "command"
    }

    fn query(&mut self) -> Result<Option<PlayerSnapshot>> {
        let status = run_with_timeout(&self.status_command, self.timeout)?;
        let Some(mut status) = parse_json(&status).as_ref().and_then(parse_status) else {
            return Ok(None);
        };

        // Nothing is loaded; some clients exit non-zero here
        let song = match run_with_timeout(&self.song_command, self.timeout) {
            Ok(output) => output,
            Err(e) => {
                log::debug!("Song command failed: {:#}", e);
                return Ok(None);
            }
        };
        let Some((song, song_duration)) = parse_json(&song).as_ref().and_then(parse_song) else {
            return Ok(None);
        };

        status.duration = status.duration.or(song_duration);
        Ok(Some(PlayerSnapshot { status, song }))
    }
}
