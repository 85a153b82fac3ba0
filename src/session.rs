use std::fmt::{Debug, Display, Formatter};
use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;

use rand::RngCore;

/// Identifier of one session, unique among live sessions. Chosen by the
/// client when it opens the session.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Fresh random id for a new client session.
    pub fn generate() -> SessionId {
        SessionId(rand::thread_rng().next_u32())
    }
}

impl Debug for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// Lifecycle of a session, client and server side alike.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Handshake incomplete: HELLO sent (client) or not received yet (server).
    HelloWait,
    /// Handshake done, DATA may flow.
    Ready,
    /// GOODBYE sent, its acknowledgment outstanding.
    Closing,
    /// Terminal. The session table evicts sessions as soon as they get here.
    Closed,
}

/// Tracked state of one client conversation.
///
/// Mutated only by the protocol engine (inbound messages) and by the expiry
/// sweep. `session_id` and `peer_addr` are fixed at creation; a datagram for
/// this id from any other address is a protocol violation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    pub session_id: SessionId,
    pub state: SessionState,
    /// Next sequence number expected from the peer. Never decreases.
    pub expected_sequence: u32,
    /// Lamport clock, advanced on every message sent to or received from the
    /// peer.
    pub logical_clock: u32,
    /// When the last valid message was exchanged; drives idle-timeout expiry.
    pub last_activity: Instant,
    pub peer_addr: SocketAddr,
}

impl Session {
    pub fn new(session_id: SessionId, peer_addr: SocketAddr, now: Instant) -> Session {
        Session {
            session_id,
            state: SessionState::HelloWait,
            expected_sequence: 0,
            logical_clock: 0,
            last_activity: now,
            peer_addr,
        }
    }

    /// Lamport rule for an inbound message, applied whatever the sequence
    /// classification says about it.
    pub fn observe_clock(&mut self, remote_clock: u32) {
        self.logical_clock = self.logical_clock.max(remote_clock).wrapping_add(1);
    }

    /// Lamport rule for an outbound message; returns the value to stamp it
    /// with.
    pub fn tick_clock(&mut self) -> u32 {
        self.logical_clock = self.logical_clock.wrapping_add(1);
        self.logical_clock
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.last_activity) > timeout
    }
}
