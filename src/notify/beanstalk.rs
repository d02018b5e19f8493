//! beanstalkd producer.
//!
//! Speaks the text protocol over one lazily opened TCP connection:
//! `use <tube>` once per connection, then `put <pri> <delay> <ttr> <bytes>`
//! followed by the JSON body. An I/O failure drops the connection and the put
//! is retried once on a fresh one. A connection is only reused after a put
//! has read its complete reply.

use super::jobs::{Job, JOB_DELAY, JOB_PRIORITY, JOB_TTR};
use super::queue::{JobQueue, QueueError};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_PORT: u16 = 11300;

struct Connection {
    stream: BufReader<TcpStream>,
}

impl Connection {
    async fn open(addr: &str, tube: &str) -> Result<Self, QueueError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let mut conn = Self {
            stream: BufReader::new(stream),
        };
        conn.send(format!("use {tube}\r\n").as_bytes()).await?;
        let line = conn.read_line().await?;
        if line != format!("USING {tube}") {
            return Err(QueueError::Protocol(line));
        }
        Ok(conn)
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), QueueError> {
        let stream = self.stream.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, QueueError> {
        let mut line = String::new();
        let read = self.stream.read_line(&mut line).await?;
        if read == 0 {
            return Err(QueueError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "queue closed the connection",
            )));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn put(&mut self, payload: &[u8]) -> Result<u64, QueueError> {
        let mut frame = format!(
            "put {JOB_PRIORITY} {} {} {}\r\n",
            JOB_DELAY.as_secs(),
            JOB_TTR.as_secs(),
            payload.len()
        )
        .into_bytes();
        frame.extend_from_slice(payload);
        frame.extend_from_slice(b"\r\n");
        self.send(&frame).await?;
        parse_put_response(&self.read_line().await?)
    }
}

fn parse_put_response(line: &str) -> Result<u64, QueueError> {
    let mut parts = line.split_whitespace();
    let parse_id = |id: Option<&str>| {
        id.and_then(|id| id.parse::<u64>().ok())
            .ok_or_else(|| QueueError::Protocol(line.to_string()))
    };
    match parts.next() {
        Some("INSERTED") => parse_id(parts.next()),
        Some("BURIED") => Err(QueueError::Buried(parse_id(parts.next())?)),
        Some("JOB_TOO_BIG") => Err(QueueError::JobTooBig),
        Some("DRAINING") => Err(QueueError::Draining),
        Some("EXPECTED_CRLF") => Err(QueueError::ExpectedCrlf),
        _ => Err(QueueError::Protocol(line.to_string())),
    }
}

pub struct BeanstalkQueue {
    addr: String,
    tube: String,
    conn: Mutex<Option<Connection>>,
}

impl BeanstalkQueue {
    #[must_use]
    pub fn new(addr: String, tube: String) -> Self {
        Self {
            addr,
            tube,
            conn: Mutex::new(None),
        }
    }

    /// Build from `beanstalk://host[:port]`.
    ///
    /// # Errors
    /// Returns [`QueueError::InvalidUrl`] for other schemes or a missing host.
    pub fn from_url(url: &Url, tube: String) -> Result<Self, QueueError> {
        if !matches!(url.scheme(), "beanstalk" | "beanstalkd") {
            return Err(QueueError::InvalidUrl(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| QueueError::InvalidUrl("missing host".to_string()))?;
        let port = url.port().unwrap_or(DEFAULT_PORT);
        Ok(Self::new(format!("{host}:{port}"), tube))
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    #[must_use]
    pub fn tube(&self) -> &str {
        &self.tube
    }
}

#[async_trait]
impl JobQueue for BeanstalkQueue {
    async fn put(&self, job: &Job) -> Result<u64, QueueError> {
        let payload = job.to_payload()?;
        let mut guard = self.conn.lock().await;

        for attempt in 1..=2 {
            // Held outside the mutex for the whole exchange: a put that is
            // cancelled or fails drops the stream instead of leaving a reply
            // (or half a frame) for the next put to read.
            let mut conn = match guard.take() {
                Some(conn) => conn,
                None => {
                    debug!(addr = %self.addr, tube = %self.tube, "connecting to beanstalkd");
                    Connection::open(&self.addr, &self.tube).await?
                }
            };
            match conn.put(&payload).await {
                Err(QueueError::Io(err)) if attempt == 1 => {
                    warn!(addr = %self.addr, "beanstalkd connection lost, reconnecting: {err}");
                }
                Err(err @ (QueueError::Io(_) | QueueError::Protocol(_))) => return Err(err),
                other => {
                    *guard = Some(conn);
                    return other;
                }
            }
        }

        Err(QueueError::Protocol("put retries exhausted".to_string()))
    }
}
