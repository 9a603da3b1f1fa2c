//! Network sink.
//!
//! Holds a single outbound TCP or Unix stream connection. When a write fails
//! the connection is dropped and re-dialed with exponential backoff, without
//! limit, and writing resumes from the first byte not yet accepted by the
//! peer. Nothing is re-sent and nothing is dropped. The caller stalls until
//! the record is delivered or shutdown is signalled.
//!
//! ## Metrics
//!
//! `connection_failure`: Failed attempts to connect to the target
//! `write_failure`: Writes that broke the connection
//!

use std::{fmt, io, time::Duration};

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::{TcpStream, UnixStream},
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

fn default_dial_timeout_seconds() -> u64 {
    5
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Network`].
pub enum Error {
    /// Shutdown arrived before the record was fully delivered.
    #[error("Shutdown while sending to {addr}: {bytes_sent} of {bytes} bytes written")]
    Cancelled {
        /// Address of the peer
        addr: String,
        /// Bytes the peer accepted
        bytes_sent: usize,
        /// Size of the record
        bytes: usize,
    },
}

/// Socket family used to reach the peer.
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// TCP, `address` is `host:port`
    #[default]
    Tcp,
    /// Unix stream socket, `address` is a path
    Unix,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Configuration of [`Network`]
pub struct Config {
    /// Socket family
    #[serde(default)]
    pub network: Transport,
    /// Address of the peer
    pub address: String,
    /// Limit on each individual connection attempt
    #[serde(default = "default_dial_timeout_seconds")]
    pub dial_timeout_seconds: u64,
}

/// Opens connections to the peer.
#[async_trait]
pub trait Dial: fmt::Debug + Send + Sync {
    /// Connection type produced by [`Dial::dial`]
    type Conn: AsyncWrite + Unpin + Send;

    /// The peer's address, for diagnostics.
    fn address(&self) -> &str;

    /// Make one connection attempt.
    async fn dial(&self) -> io::Result<Self::Conn>;
}

/// Dials TCP or Unix stream sockets.
#[derive(Debug, Clone)]
pub struct SocketDialer {
    transport: Transport,
    address: String,
    timeout: Duration,
}

impl SocketDialer {
    /// Create a new [`SocketDialer`].
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            transport: config.network,
            address: config.address.clone(),
            timeout: Duration::from_secs(config.dial_timeout_seconds),
        }
    }
}

#[async_trait]
impl Dial for SocketDialer {
    type Conn = Box<dyn AsyncWrite + Unpin + Send + Sync>;

    fn address(&self) -> &str {
        &self.address
    }

    async fn dial(&self) -> io::Result<Self::Conn> {
        let connect = async {
            let conn: Self::Conn = match self.transport {
                Transport::Tcp => Box::new(TcpStream::connect(&self.address).await?),
                Transport::Unix => Box::new(UnixStream::connect(&self.address).await?),
            };
            Ok::<_, io::Error>(conn)
        };
        time::timeout(self.timeout, connect)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "dial timed out"))?
    }
}

/// Reconnect delays: doubling from half a second, capped at a minute.
#[derive(Debug, Clone, Copy)]
struct Backoff {
    next: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            next: INITIAL_BACKOFF,
        }
    }

    fn delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(MAX_BACKOFF);
        delay
    }
}

/// Writes records to a network peer, reconnecting as needed.
pub struct Network<D: Dial = SocketDialer> {
    dialer: D,
    conn: Option<D::Conn>,
    shutdown: CancellationToken,
}

impl<D: Dial> fmt::Debug for Network<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("dialer", &self.dialer)
            .field("connected", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl Network {
    /// Create a [`Network`] dialing the configured socket. No connection is
    /// made until the first write.
    #[must_use]
    pub fn from_config(config: &Config, shutdown: CancellationToken) -> Self {
        Self::new(SocketDialer::new(config), shutdown)
    }
}

impl<D: Dial> Network<D> {
    /// Create a [`Network`] over any dialer.
    #[must_use]
    pub fn new(dialer: D, shutdown: CancellationToken) -> Self {
        Self {
            dialer,
            conn: None,
            shutdown,
        }
    }

    /// Deliver all of `buf`, reconnecting as often as it takes.
    ///
    /// # Errors
    ///
    /// Only if shutdown is signalled before delivery completes.
    pub async fn write(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut written = 0;
        while written < buf.len() {
            if self.conn.is_none() {
                let conn = self.connect(written, buf.len()).await?;
                self.conn = Some(conn);
            }
            let Some(conn) = self.conn.as_mut() else {
                continue;
            };
            let result = tokio::select! {
                biased;

                () = self.shutdown.cancelled() => None,
                res = conn.write(&buf[written..]) => Some(res),
            };
            let Some(result) = result else {
                return Err(self.cancelled(written, buf.len()));
            };
            match result {
                Ok(0) => {
                    warn!(addr = self.dialer.address(), "peer stopped accepting bytes, reconnecting");
                    counter!("write_failure", "addr" => self.dialer.address().to_string())
                        .increment(1);
                    self.conn = None;
                }
                Ok(n) => written += n,
                Err(err) => {
                    warn!(addr = self.dialer.address(), "write failed, reconnecting: {err}");
                    counter!("write_failure", "addr" => self.dialer.address().to_string())
                        .increment(1);
                    self.conn = None;
                }
            }
        }
        if let Some(conn) = self.conn.as_mut() {
            if let Err(err) = conn.flush().await {
                warn!(addr = self.dialer.address(), "flush failed: {err}");
                self.conn = None;
            }
        }
        Ok(())
    }

    /// Shut down the connection, if there is one.
    pub async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(err) = conn.shutdown().await {
                warn!(addr = self.dialer.address(), "shutdown failed: {err}");
            }
        }
    }

    async fn connect(&self, bytes_sent: usize, bytes: usize) -> Result<D::Conn, Error> {
        let mut backoff = Backoff::new();
        loop {
            let attempt = tokio::select! {
                biased;

                () = self.shutdown.cancelled() => return Err(self.cancelled(bytes_sent, bytes)),
                res = self.dialer.dial() => res,
            };
            match attempt {
                Ok(conn) => {
                    info!(addr = self.dialer.address(), "connected");
                    return Ok(conn);
                }
                Err(err) => {
                    counter!("connection_failure", "addr" => self.dialer.address().to_string())
                        .increment(1);
                    let delay = backoff.delay();
                    warn!(
                        addr = self.dialer.address(),
                        ?delay,
                        "connection failed: {err}"
                    );
                    tokio::select! {
                        biased;

                        () = self.shutdown.cancelled() => return Err(self.cancelled(bytes_sent, bytes)),
                        () = time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn cancelled(&self, bytes_sent: usize, bytes: usize) -> Error {
        Error::Cancelled {
            addr: self.dialer.address().to_string(),
            bytes_sent,
            bytes,
        }
    }
}
