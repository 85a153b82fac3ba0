use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::message::{Command, DecodeError};
use crate::session::SessionId;

/// Why a session reached `Closed`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloseReason {
    /// Orderly shutdown, GOODBYE exchanged.
    Goodbye,
    /// No valid traffic for longer than the configured session timeout.
    Timeout,
    /// Out-of-protocol traffic, e.g. DATA before the handshake or a changed
    /// peer address.
    ProtocolViolation,
}

/// Observable protocol events.
///
/// The engine returns these as plain values inside its effect list so tests
/// can assert on them; the dispatch shells [emit](SessionEvent::emit) them
/// into the log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionEvent {
    SessionCreated { session_id: SessionId, peer_addr: SocketAddr },
    SessionClosed { session_id: SessionId, reason: CloseReason },
    /// Payload of an accepted in-order (or gap-jumping) DATA message.
    DataReceived { session_id: SessionId, payload: Vec<u8> },
    /// DATA with an already-seen sequence number; counts as liveness, payload
    /// discarded.
    DuplicatePacket { session_id: SessionId, sequence: u32 },
    /// `count` sequence numbers starting at `first_missing` never arrived.
    PacketsLost { session_id: SessionId, first_missing: u32, count: u32 },
    /// Valid datagram for a session already past `Ready`; dropped.
    LateDatagram { session_id: SessionId, command: Command },
    /// Non-HELLO datagram for an id the table does not know; dropped.
    UnknownSession { session_id: SessionId, command: Command, from: SocketAddr },
    MalformedDatagram { from: SocketAddr, error: DecodeError },
}

impl SessionEvent {
    /// Writes the event to the log. The levels are part of the observable
    /// surface: lifecycle and payloads at info, losses at warn, duplicates
    /// and drops at debug.
    pub fn emit(&self) {
        match self {
            SessionEvent::SessionCreated { session_id, peer_addr } =>
                info!("session {} created for {}", session_id, peer_addr),
            SessionEvent::SessionClosed { session_id, reason } =>
                info!("session {} closed ({:?})", session_id, reason),
            SessionEvent::DataReceived { session_id, payload } =>
                info!("session {}: {}", session_id, String::from_utf8_lossy(payload)),
            SessionEvent::DuplicatePacket { session_id, sequence } =>
                debug!("session {}: duplicate packet {}", session_id, sequence),
            SessionEvent::PacketsLost { session_id, first_missing, count } =>
                warn!("session {}: {} packet(s) lost starting at {}", session_id, count, first_missing),
            SessionEvent::LateDatagram { session_id, command } =>
                debug!("session {}: {:?} after close, dropped", session_id, command),
            SessionEvent::UnknownSession { session_id, command, from } =>
                debug!("unknown session {}: {:?} from {} dropped", session_id, command, from),
            SessionEvent::MalformedDatagram { from, error } =>
                debug!("malformed datagram from {}: {}", from, error),
        }
    }
}
