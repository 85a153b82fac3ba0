use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::bail;

use crate::message::HEADER_LEN;

/// Which dispatch shell runs the server. Both shells speak the identical
/// protocol, they differ only in scheduling (see the dispatch module).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConcurrencyMode {
    /// One worker task per session, plus an acceptor and a supervisory sweep.
    Threaded,
    /// Everything multiplexed on a single loop.
    EventLoop,
}

impl FromStr for ConcurrencyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<ConcurrencyMode, anyhow::Error> {
        match s {
            "threaded" => Ok(ConcurrencyMode::Threaded),
            "event-loop" | "event_loop" => Ok(ConcurrencyMode::EventLoop),
            _ => bail!("unknown concurrency mode {:?}, expected 'threaded' or 'event-loop'", s),
        }
    }
}

#[derive(Debug)]
pub struct ServerConfig {
    /// Local address for the shared UDP socket.
    pub bind_addr: SocketAddr,

    pub concurrency_mode: ConcurrencyMode,

    /// A session with no valid traffic for this long is closed unilaterally.
    ///  The peer gets a GOODBYE notification but no handshake is attempted.
    pub session_timeout: Duration,

    /// Cadence of the supervisory expiry sweep. Expiry is detected with up to
    ///  this much delay on top of the timeout itself.
    pub sweep_interval: Duration,

    /// Size of the receive buffer, and thereby the largest datagram that can
    ///  be accepted. UDP bounds this at 64k anyway.
    pub receive_buf_size: usize,

    /// How many delivered-but-unprocessed messages a session worker may
    ///  accumulate before the acceptor awaits (threaded mode only).
    pub worker_mailbox_size: usize,
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> ServerConfig {
        ServerConfig {
            bind_addr,
            concurrency_mode: ConcurrencyMode::EventLoop,
            session_timeout: Duration::from_secs(20),
            sweep_interval: Duration::from_secs(1),
            receive_buf_size: 64 * 1024,
            worker_mailbox_size: 32,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.session_timeout.is_zero() {
            bail!("session timeout must be positive");
        }
        if self.sweep_interval.is_zero() {
            bail!("sweep interval must be positive");
        }
        if self.receive_buf_size < HEADER_LEN {
            bail!("receive buffer of {} bytes cannot hold the {} byte header", self.receive_buf_size, HEADER_LEN);
        }
        if self.worker_mailbox_size == 0 {
            bail!("worker mailbox size must be positive");
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct ClientConfig {
    /// The server endpoint to talk to.
    pub server_addr: SocketAddr,

    /// Longest wait for any server reply before the client gives up on the
    ///  session.
    pub response_timeout: Duration,

    pub receive_buf_size: usize,
}

impl ClientConfig {
    pub fn new(server_addr: SocketAddr) -> ClientConfig {
        ClientConfig {
            server_addr,
            response_timeout: Duration::from_secs(8),
            receive_buf_size: 64 * 1024,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.response_timeout.is_zero() {
            bail!("response timeout must be positive");
        }
        if self.receive_buf_size < HEADER_LEN {
            bail!("receive buffer of {} bytes cannot hold the {} byte header", self.receive_buf_size, HEADER_LEN);
        }

        Ok(())
    }
}
