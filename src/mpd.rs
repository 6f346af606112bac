//! Minimal MPD protocol client: just enough for `status` and `currentsong`.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::player::PlayerBackend;
use crate::types::{PlaybackState, PlayerSnapshot, PlayerSong, PlayerStatus};

pub const DEFAULT_PORT: u16 = 6600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MpdAddress {
    Unix(PathBuf),
    Tcp(String, u16),
}

impl MpdAddress {
    /// Interpret `MPD_HOST`-style values: an absolute path is a Unix socket,
    /// anything else is `host[:port]`
    pub fn parse(host: &str, default_port: u16) -> Self {
        if host.starts_with('/') {
            return MpdAddress::Unix(PathBuf::from(host));
        }
        match host.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') => match port.parse() {
                Ok(port) => MpdAddress::Tcp(name.to_string(), port),
                Err(_) => MpdAddress::Tcp(host.to_string(), default_port),
            },
            _ => MpdAddress::Tcp(host.to_string(), default_port),
        }
    }
}

impl fmt::Display for MpdAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MpdAddress::Unix(path) => write!(f, "{}", path.display()),
            MpdAddress::Tcp(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

trait Stream: Read + Write + Send {}
impl<T: Read + Write + Send> Stream for T {}

struct Connection {
    reader: BufReader<Box<dyn Stream>>,
    version: String,
}

impl Connection {
    fn open(address: &MpdAddress, timeout: Duration) -> Result<Self> {
        let stream: Box<dyn Stream> = match address {
            MpdAddress::Unix(path) => {
                let stream = UnixStream::connect(path)
                    .with_context(|| format!("Failed to connect to MPD at {}", path.display()))?;
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                Box::new(stream)
            }
            MpdAddress::Tcp(host, port) => {
                let addr = (host.as_str(), *port)
                    .to_socket_addrs()
                    .with_context(|| format!("Failed to resolve MPD host {}", host))?
                    .next()
                    .with_context(|| format!("MPD host {} has no addresses", host))?;
                let stream = TcpStream::connect_timeout(&addr, timeout)
                    .with_context(|| format!("Failed to connect to MPD at {}", address))?;
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                Box::new(stream)
            }
        };

        let mut reader = BufReader::new(stream);
        let mut greeting = String::new();
        reader
            .read_line(&mut greeting)
            .context("Failed to read MPD greeting")?;
        let version = match greeting.trim_end().strip_prefix("OK MPD ") {
            Some(version) => version.to_string(),
            None => bail!("Unexpected MPD greeting: {:?}", greeting.trim_end()),
        };

        Ok(Self { reader, version })
    }

    /// Run one command and collect its `key: value` lines, keys lower-cased
    fn command(&mut self, name: &str) -> Result<Vec<(String, String)>> {
        let stream = self.reader.get_mut();
        stream.write_all(format!("{}\n", name).as_bytes())?;
        stream.flush()?;

        let mut pairs = Vec::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof))
                    .context("MPD closed the connection");
            }
            let line = line.trim_end_matches(['\r', '\n']);

            if line == "OK" {
                return Ok(pairs);
            }
            if line.starts_with("ACK ") {
                bail!("MPD refused {:?}: {}", name, line);
            }
            if let Some((key, value)) = line.split_once(':') {
                pairs.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }
    }
}

fn parse_status(pairs: &[(String, String)]) -> PlayerStatus {
    let mut status = PlayerStatus::default();
    let mut legacy_time: Option<(Option<f64>, Option<f64>)> = None;

    for (key, value) in pairs {
        match key.as_str() {
            "state" => status.state = PlaybackState::parse(value),
            "elapsed" => status.elapsed = value.parse().ok(),
            "duration" => status.duration = value.parse().ok(),
            // Pre-0.20 servers only report `time: <elapsed>:<total>` in whole seconds
            "time" => {
                legacy_time = value
                    .split_once(':')
                    .map(|(elapsed, total)| (elapsed.parse().ok(), total.parse().ok()));
            }
            _ => {}
        }
    }

    if let Some((elapsed, total)) = legacy_time {
        status.elapsed = status.elapsed.or(elapsed);
        status.duration = status.duration.or(total);
    }
    status
}

fn parse_song(pairs: Vec<(String, String)>) -> PlayerSong {
    let mut song = PlayerSong::default();
    for (key, value) in pairs {
        song.insert(&key, value);
    }
    song
}

/// MPD backend, keeping its connection open between polls
pub struct MpdBackend {
    address: MpdAddress,
    timeout: Duration,
    connection: Option<Connection>,
}

impl MpdBackend {
    pub fn new(address: MpdAddress, timeout: Duration) -> Self {
        Self {
            address,
            timeout,
            connection: None,
        }
    }

    fn connection(&mut self) -> Result<&mut Connection> {
        if self.connection.is_none() {
            let connection = Connection::open(&self.address, self.timeout)?;
            log::info!("Connected to MPD {} at {}", connection.version, self.address);
            self.connection = Some(connection);
        }
        self.connection
            .as_mut()
            .context("MPD connection missing after connect")
    }

    fn fetch(&mut self) -> Result<PlayerSnapshot> {
        let connection = self.connection()?;
        let status = parse_status(&connection.command("status")?);
        let song = parse_song(connection.command("currentsong")?);
        Ok(PlayerSnapshot { status, song })
    }
}

impl PlayerBackend for MpdBackend {
    fn name(&self) -> &'static str {
        "MPD"
    }

    fn query(&mut self) -> Result<Option<PlayerSnapshot>> {
        match self.fetch() {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                // Reconnect on the next poll
                self.connection = None;
                Err(e)
            }
        }
    }
}
