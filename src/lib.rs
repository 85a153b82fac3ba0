//! A session-tracking application protocol on top of UDP. One server talks
//! to many independent clients; the transport stays connectionless and
//! lossy, and this layer turns it into sessions with tracked ordering and
//! idle timeouts.
//!
//! ## Design
//!
//! * Every datagram carries a fixed 18-byte header: magic (4B), version (1B),
//!   command (1B), sequence (4B), session id (4B), logical clock (4B), all in
//!   network byte order. DATA datagrams append an opaque payload.
//! * Commands: HELLO=0, DATA=1, ALIVE=2, GOODBYE=3.
//! * A session is created by a client's HELLO under a client-chosen random id,
//!   lives in the server's [session_table::SessionTable], and dies on GOODBYE,
//!   idle timeout or protocol violation.
//! * Lost and duplicated datagrams are *detected*, never repaired: per-session
//!   sequence numbers classify each DATA message as in-order, duplicate, or
//!   following a gap, and the classification is surfaced as log events
//!   --> observability instead of retransmission
//! * A Lamport-style logical clock is carried on every message and merged on
//!   receipt, giving an ordering of both sides' events that does not depend
//!   on wall clocks.
//! * All protocol decisions live in [session_logic], a state machine
//!   `(session, message) -> effects` that does no I/O of its own. Two
//!   interchangeable shells drive it, selected by [config::ServerConfig]:
//!   * an event loop owning socket and sessions on a single task
//!   * an acceptor plus one worker task per session
//!
//!   Both produce identical wire traffic and identical session tables for the
//!   same inbound datagram trace.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod message;
pub mod session;
pub mod session_events;
pub mod session_logic;
pub mod session_table;
pub mod socket;
pub mod test_util;


#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
