//! The concurrency shells that drive the protocol engine.
//!
//! There are two of them, selected by [ServerConfig::concurrency_mode]
//! behind the single entry point [run_server]:
//!
//! * [event_loop]: one task owns the socket and the session table and
//!   handles every datagram inline.
//! * [threaded]: an acceptor task routes each datagram to a per-session
//!   worker task through a bounded mailbox.
//!
//! Both shells feed the same [crate::session_logic] engine and the same
//! [SessionTable], so for a given inbound datagram trace they produce the
//! same wire traffic and the same surviving sessions. The equivalence tests
//! at the bottom of this file pin that down.

mod event_loop;
mod threaded;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::{ConcurrencyMode, ServerConfig};
use crate::message::Message;
use crate::session::SessionId;
use crate::session_events::SessionEvent;
use crate::session_logic::{self, Effect};
use crate::session_table::SessionTable;
use crate::socket::DatagramSocket;

/// Handle to the session table shared between a shell and its timer sweep
/// (and, in threaded mode, the worker tasks). The table is plain owned data;
/// whoever wants to consult it holds a clone of this handle.
pub type SharedSessionTable = Arc<RwLock<SessionTable>>;

/// Serves the protocol on `socket` until the task is cancelled or the socket
/// fails hard. This is the only entry point; the concurrency mode is purely
/// an internal scheduling choice.
pub async fn run_server(
    config: Arc<ServerConfig>,
    socket: Arc<dyn DatagramSocket>,
    sessions: SharedSessionTable,
) -> anyhow::Result<()> {
    match config.concurrency_mode {
        ConcurrencyMode::EventLoop => event_loop::run(config, socket, sessions).await,
        ConcurrencyMode::Threaded => threaded::run(config, socket, sessions).await,
    }
}

/// Decodes a raw datagram, logging and discarding anything malformed. A bad
/// datagram never affects any session.
pub(crate) fn decode_datagram(datagram: &[u8], from: SocketAddr) -> Option<Message> {
    match Message::decode(datagram) {
        Ok(message) => Some(message),
        Err(error) => {
            SessionEvent::MalformedDatagram { from, error }.emit();
            None
        }
    }
}

/// Renders the effects the engine decided on: events go to the log, messages
/// go out on the socket to the session's registered peer address.
pub(crate) async fn perform_effects(
    socket: &dyn DatagramSocket,
    peer_addr: SocketAddr,
    effects: Vec<Effect>,
) {
    for effect in effects {
        match effect {
            Effect::Event(event) => event.emit(),
            Effect::Send(message) => {
                socket.send_datagram(peer_addr, &message.encode()).await;
            }
        }
    }
}

/// Evicts every session that has been idle longer than the configured
/// timeout, telling each evicted peer goodbye. Returns the evicted ids so
/// the threaded shell can drop its mailboxes for them.
pub(crate) async fn sweep_sessions(
    config: &ServerConfig,
    socket: &dyn DatagramSocket,
    sessions: &SharedSessionTable,
) -> Vec<SessionId> {
    let expired = sessions
        .write()
        .await
        .sweep_expired(Instant::now(), config.session_timeout);

    let mut evicted = Vec::with_capacity(expired.len());
    for mut session in expired {
        evicted.push(session.session_id);
        let effects = session_logic::on_expired(&mut session);
        perform_effects(socket, session.peer_addr, effects).await;
    }
    evicted
}
