//! The poll → build → send loop between the player and Discord.
//!
//! ```text
//! Discovering --connect+handshake--> Connected --tick--> Connected
//!      ^   |                             |
//!      |   +--error: back off, retry     +--channel error: drop channel
//!      +---------------------------------+
//! any state --interrupt--> Interrupted: close, exit 0
//! ```

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::activity;
use crate::discovery;
use crate::ipc::{self, PresenceChannel, PresenceError};
use crate::player::PlayerBackend;
use crate::state::Shutdown;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Produces fresh, not yet handshaken channels
pub trait Connector {
    type Stream: Read + Write;

    fn connect(&mut self) -> Result<PresenceChannel<Self::Stream>, PresenceError>;
}

/// Finds the Discord socket under the runtime directory and opens it
pub struct SocketConnector {
    base_dir: PathBuf,
    client_id: String,
    timeout: Duration,
}

impl SocketConnector {
    pub fn new(base_dir: PathBuf, client_id: String, timeout: Duration) -> Self {
        Self {
            base_dir,
            client_id,
            timeout,
        }
    }
}

impl Connector for SocketConnector {
    type Stream = UnixStream;

    fn connect(&mut self) -> Result<PresenceChannel<UnixStream>, PresenceError> {
        let path = discovery::discover(&self.base_dir)?;
        PresenceChannel::open(&path, &self.client_id, self.timeout)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    pub poll_interval: Duration,
    pub retry_interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

enum State<S> {
    Discovering,
    Connected(PresenceChannel<S>),
    Interrupted(Option<PresenceChannel<S>>),
}

pub struct PresenceLoop<C, B> {
    connector: C,
    backend: B,
    shutdown: Shutdown,
    config: LoopConfig,
}

impl<C: Connector, B: PlayerBackend> PresenceLoop<C, B> {
    pub fn new(connector: C, backend: B, shutdown: Shutdown, config: LoopConfig) -> Self {
        Self {
            connector,
            backend,
            shutdown,
            config,
        }
    }

    /// Run until interrupted (`Ok`) or until Discord refuses our client id (`Err`)
    pub fn run(&mut self) -> Result<(), PresenceError> {
        let mut state = State::Discovering;
        loop {
            state = match state {
                State::Discovering => self.discover()?,
                State::Connected(channel) => self.tick(channel),
                State::Interrupted(channel) => {
                    if let Some(channel) = channel {
                        log::info!("Closing Discord connection");
                        if let Err(e) = channel.close() {
                            log::debug!("Error while closing Discord connection: {}", e);
                        }
                    }
                    return Ok(());
                }
            };
        }
    }

    fn discover(&mut self) -> Result<State<C::Stream>, PresenceError> {
        if self.shutdown.is_triggered() {
            return Ok(State::Interrupted(None));
        }

        let result = self.connector.connect().and_then(|mut channel| {
            channel.handshake()?;
            Ok(channel)
        });

        match result {
            Ok(channel) => {
                log::info!("Connected to Discord");
                Ok(State::Connected(channel))
            }
            Err(e) if e.is_fatal() => {
                log::error!("{}; check the client id", e);
                Err(e)
            }
            Err(e) => {
                match &e {
                    PresenceError::NotFound => log::warn!(
                        "Could not find the Discord socket, trying again in {:?}",
                        self.config.retry_interval
                    ),
                    PresenceError::Protocol(_) | PresenceError::SessionInvalid(_) => log::warn!(
                        "Discord handshake failed ({}), trying again in {:?}",
                        e,
                        self.config.retry_interval
                    ),
                    _ => log::warn!(
                        "Could not connect to Discord ({}), trying again in {:?}",
                        e,
                        self.config.retry_interval
                    ),
                }
                if self.shutdown.sleep(self.config.retry_interval) {
                    Ok(State::Discovering)
                } else {
                    Ok(State::Interrupted(None))
                }
            }
        }
    }

    /// One poll: query the player, push the presence, wait
    fn tick(&mut self, mut channel: PresenceChannel<C::Stream>) -> State<C::Stream> {
        if self.shutdown.is_triggered() {
            return State::Interrupted(Some(channel));
        }

        let snapshot = match self.backend.query() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::debug!("{} query failed, treating as stopped: {:#}", self.backend.name(), e);
                None
            }
        };
        let activity = snapshot
            .as_ref()
            .and_then(|snapshot| activity::derive(snapshot, SystemTime::now()));

        match &activity {
            Some(activity) => log::debug!(
                "Now playing: {} - {}",
                activity.state.as_deref().unwrap_or("?"),
                activity.details.as_deref().unwrap_or("?")
            ),
            None => log::debug!("Nothing playing, clearing presence"),
        }

        match channel.send_activity(activity.as_ref()) {
            Ok(reply) => {
                if let Some((code, message)) = ipc::rejection(&reply) {
                    log::warn!("Discord rejected the activity update ({}): {}", code, message);
                }
            }
            Err(e) => {
                match &e {
                    PresenceError::Protocol(_) | PresenceError::SessionInvalid(_) => {
                        log::warn!("Discord sent an unexpected reply ({}), reconnecting", e)
                    }
                    _ => log::warn!("Lost connection to Discord ({}), reconnecting", e),
                }
                return State::Discovering;
            }
        }

        if self.shutdown.sleep(self.config.poll_interval) {
            State::Connected(channel)
        } else {
            State::Interrupted(Some(channel))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::tests::{ready, ScriptedStream};
    use crate::ipc::Opcode;
    use crate::types::{PlaybackState, PlayerSnapshot, PlayerSong, PlayerStatus};
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    type Written = Rc<RefCell<Vec<u8>>>;

    /// Hands out scripted streams in order; once they run out it trips the
    /// shutdown flag and reports no socket
    struct FakeConnector {
        streams: VecDeque<ScriptedStream>,
        attempts: usize,
        shutdown: Shutdown,
    }

    impl Connector for FakeConnector {
        type Stream = ScriptedStream;

        fn connect(&mut self) -> Result<PresenceChannel<ScriptedStream>, PresenceError> {
            self.attempts += 1;
            match self.streams.pop_front() {
                Some(stream) => Ok(PresenceChannel::new(stream, "1234")),
                None => {
                    self.shutdown.trigger();
                    Err(PresenceError::NotFound)
                }
            }
        }
    }

    /// Replays snapshots; trips the shutdown flag after the last one
    struct FakeBackend {
        snapshots: VecDeque<anyhow::Result<Option<PlayerSnapshot>>>,
        queries: Rc<RefCell<usize>>,
        shutdown: Shutdown,
    }

    impl PlayerBackend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn query(&mut self) -> anyhow::Result<Option<PlayerSnapshot>> {
            *self.queries.borrow_mut() += 1;
            let next = self.snapshots.pop_front().unwrap_or(Ok(None));
            if self.snapshots.is_empty() {
                self.shutdown.trigger();
            }
            next
        }
    }

    fn playing() -> PlayerSnapshot {
        let mut song = PlayerSong::default();
        song.insert("artist", "Portishead".into());
        song.insert("title", "Roads".into());
        PlayerSnapshot {
            status: PlayerStatus {
                state: PlaybackState::Play,
                elapsed: Some(1.0),
                duration: Some(300.0),
            },
            song,
        }
    }

    fn ack() -> (Opcode, serde_json::Value) {
        (Opcode::Frame, json!({ "cmd": "SET_ACTIVITY", "evt": null }))
    }

    fn closed() -> (Opcode, serde_json::Value) {
        (Opcode::Close, json!({ "v": 1 }))
    }

    fn instant() -> LoopConfig {
        LoopConfig {
            poll_interval: Duration::ZERO,
            retry_interval: Duration::ZERO,
        }
    }

    fn build(
        streams: Vec<ScriptedStream>,
        snapshots: Vec<anyhow::Result<Option<PlayerSnapshot>>>,
    ) -> (PresenceLoop<FakeConnector, FakeBackend>, Rc<RefCell<usize>>) {
        let shutdown = Shutdown::new();
        let queries = Rc::new(RefCell::new(0));
        let connector = FakeConnector {
            streams: streams.into(),
            attempts: 0,
            shutdown: shutdown.clone(),
        };
        let backend = FakeBackend {
            snapshots: snapshots.into(),
            queries: queries.clone(),
            shutdown: shutdown.clone(),
        };
        (
            PresenceLoop::new(connector, backend, shutdown, instant()),
            queries,
        )
    }

    fn opcodes(written: &Written) -> Vec<u32> {
        ScriptedStream::sent(written).iter().map(|f| f.opcode).collect()
    }

    #[test]
    fn test_sends_activity_then_closes_on_interrupt() {
        let stream = ScriptedStream::new(&[ready(), ack(), closed()]);
        let written = stream.written.clone();
        let (mut presence, _) = build(vec![stream], vec![Ok(Some(playing()))]);

        presence.run().unwrap();

        let sent = ScriptedStream::sent(&written);
        assert_eq!(opcodes(&written), vec![0, 1, 2]);
        let activity = &sent[1].payload["args"]["activity"];
        assert_eq!(activity["state"], "Portishead");
        assert_eq!(activity["details"], "Roads");
        assert_eq!(presence.connector.attempts, 1);
    }

    #[test]
    fn test_not_playing_clears_presence() {
        let mut paused = playing();
        paused.status.state = PlaybackState::Pause;

        let stream = ScriptedStream::new(&[ready(), ack(), ack(), ack(), closed()]);
        let written = stream.written.clone();
        let (mut presence, _) = build(
            vec![stream],
            vec![Ok(Some(paused)), Ok(None), Err(anyhow::anyhow!("connection refused"))],
        );

        presence.run().unwrap();

        let sent = ScriptedStream::sent(&written);
        assert_eq!(opcodes(&written), vec![0, 1, 1, 1, 2]);
        for frame in &sent[1..4] {
            assert!(frame.payload["args"]["activity"].is_null());
        }
    }

    #[test]
    fn test_transport_error_rediscovers() {
        // Handshake goes through, the activity write hits a dead socket
        let mut broken = ScriptedStream::new(&[ready()]);
        broken.writes_allowed = Some(1);
        let broken_written = broken.written.clone();
        let (mut presence, queries) =
            build(vec![broken], vec![Ok(Some(playing())), Ok(Some(playing()))]);

        presence.run().unwrap();

        // The dead handle saw only the handshake and was never reused
        assert_eq!(opcodes(&broken_written), vec![0]);
        assert_eq!(*queries.borrow(), 1);
        assert_eq!(presence.connector.attempts, 2);
    }

    #[test]
    fn test_bad_handshake_abandons_connection() {
        let bad = ScriptedStream::new(&[(Opcode::Frame, json!({ "evt": "READY" }))]);
        let bad_written = bad.written.clone();
        let (mut presence, queries) = build(vec![bad], vec![Ok(Some(playing()))]);

        presence.run().unwrap();

        assert_eq!(opcodes(&bad_written), vec![0]);
        assert_eq!(*queries.borrow(), 0);
        assert_eq!(presence.connector.attempts, 2);
    }

    #[test]
    fn test_session_invalid_reconnects() {
        let first = ScriptedStream::new(&[
            ready(),
            (Opcode::Close, json!({ "code": 1000, "message": "Unknown Error" })),
        ]);
        let first_written = first.written.clone();
        let second = ScriptedStream::new(&[ready(), ack(), closed()]);
        let second_written = second.written.clone();
        let (mut presence, queries) = build(
            vec![first, second],
            vec![Ok(Some(playing())), Ok(Some(playing()))],
        );

        presence.run().unwrap();

        assert_eq!(opcodes(&first_written), vec![0, 1]);
        assert_eq!(opcodes(&second_written), vec![0, 1, 2]);
        assert_eq!(*queries.borrow(), 2);
        assert_eq!(presence.connector.attempts, 2);
    }

    #[test]
    fn test_rejected_update_is_logged_and_loop_continues() {
        let stream = ScriptedStream::new(&[
            ready(),
            (
                Opcode::Frame,
                json!({ "evt": "ERROR", "data": { "code": 4000, "message": "bad activity" } }),
            ),
            ack(),
            closed(),
        ]);
        let written = stream.written.clone();
        let (mut presence, _) = build(vec![stream], vec![Ok(Some(playing())), Ok(Some(playing()))]);

        presence.run().unwrap();

        assert_eq!(opcodes(&written), vec![0, 1, 1, 2]);
        assert_eq!(presence.connector.attempts, 1);
    }

    #[test]
    fn test_handshake_rejection_is_fatal() {
        let rejected = ScriptedStream::new(&[(
            Opcode::Close,
            json!({ "code": 4000, "message": "Invalid Client ID" }),
        )]);
        let (mut presence, queries) = build(vec![rejected], vec![Ok(Some(playing()))]);

        let err = presence.run().unwrap_err();

        assert!(matches!(err, PresenceError::HandshakeRejected(_)));
        assert_eq!(*queries.borrow(), 0);
        assert_eq!(presence.connector.attempts, 1);
    }

    #[test]
    fn test_interrupt_while_discovering_exits_cleanly() {
        let (mut presence, queries) = build(vec![], vec![]);

        presence.run().unwrap();

        assert_eq!(*queries.borrow(), 0);
        assert_eq!(presence.connector.attempts, 1);
    }
}
