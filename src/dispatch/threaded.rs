//! Worker-per-session shell: an acceptor task owns the socket and routes
//! each decoded message to a per-session worker task through a bounded
//! mailbox. Workers apply messages strictly in arrival order for their
//! session, so the protocol behaves exactly as in the event loop shell.
//! A worker that stops hands anything still queued in its mailbox back to
//! the acceptor for re-routing, so no accepted datagram is ever lost in a
//! teardown race.

use std::net::SocketAddr;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time;
use tokio::time::Instant;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::message::{Command, Message};
use crate::session::{SessionId, SessionState};
use crate::session_events::SessionEvent;
use crate::session_logic;
use crate::socket::DatagramSocket;

use super::{decode_datagram, perform_effects, sweep_sessions, SharedSessionTable};

pub(crate) async fn run(
    config: Arc<ServerConfig>,
    socket: Arc<dyn DatagramSocket>,
    sessions: SharedSessionTable,
) -> anyhow::Result<()> {
    info!("serving on {} (threaded)", socket.local_addr());

    let mut workers: FxHashMap<SessionId, mpsc::Sender<(Message, SocketAddr)>> =
        FxHashMap::default();
    // stopping workers hand undeliverable messages back through this pair
    let (returns, mut returned) = mpsc::channel(config.worker_mailbox_size);
    let mut sweep_ticks = time::interval(config.sweep_interval);
    let mut receive_buffer = vec![0u8; config.receive_buf_size];

    loop {
        select! {
            recv_result = socket.recv_datagram(&mut receive_buffer) => {
                match recv_result {
                    Ok((len, from)) => {
                        if let Some(message) = decode_datagram(&receive_buffer[..len], from) {
                            route(&config, &socket, &sessions, &mut workers, &returns, message, from).await;
                        }
                    }
                    Err(e) => {
                        error!("error receiving datagram: {}", e);
                    }
                }
            }
            undelivered = returned.recv() => {
                if let Some((message, from)) = undelivered {
                    route(&config, &socket, &sessions, &mut workers, &returns, message, from).await;
                }
            }
            _ = sweep_ticks.tick() => {
                for session_id in sweep_sessions(&config, socket.as_ref(), &sessions).await {
                    workers.remove(&session_id);
                }
                workers.retain(|_, mailbox| !mailbox.is_closed());
            }
        }
    }
}

/// Hands the message to its session's worker, spawning worker and session on
/// a HELLO for an unknown session. A worker that shut down on its own leaves
/// a dead mailbox behind; the failed send surfaces that, and routing starts
/// over with the returned message.
async fn route(
    config: &Arc<ServerConfig>,
    socket: &Arc<dyn DatagramSocket>,
    sessions: &SharedSessionTable,
    workers: &mut FxHashMap<SessionId, mpsc::Sender<(Message, SocketAddr)>>,
    returns: &mpsc::Sender<(Message, SocketAddr)>,
    message: Message,
    from: SocketAddr,
) {
    let session_id = message.session_id;

    let (message, from) = match workers.get(&session_id) {
        Some(mailbox) => match mailbox.send((message, from)).await {
            Ok(()) => return,
            Err(failed) => {
                workers.remove(&session_id);
                failed.0
            }
        },
        None => (message, from),
    };

    if message.command != Command::Hello {
        SessionEvent::UnknownSession {
            session_id,
            command: message.command,
            from,
        }
        .emit();
        return;
    }

    sessions
        .write()
        .await
        .get_or_create(session_id, from, Instant::now());

    let (mailbox, inbox) = mpsc::channel(config.worker_mailbox_size);
    mailbox
        .send((message, from))
        .await
        .expect("receiver was created just now - this should never happen");
    workers.insert(session_id, mailbox);

    tokio::spawn(worker_loop(
        config.clone(),
        socket.clone(),
        sessions.clone(),
        session_id,
        inbox,
        returns.clone(),
    ));
}

/// One session's worker: applies this session's messages one at a time and
/// watches its idle timeout. Ends when the session closes, expires, or the
/// acceptor drops the mailbox after a sweep eviction, handing back whatever
/// the acceptor had queued behind the message that ended the session.
async fn worker_loop(
    config: Arc<ServerConfig>,
    socket: Arc<dyn DatagramSocket>,
    sessions: SharedSessionTable,
    session_id: SessionId,
    mut inbox: mpsc::Receiver<(Message, SocketAddr)>,
    returns: mpsc::Sender<(Message, SocketAddr)>,
) {
    loop {
        match time::timeout(config.session_timeout, inbox.recv()).await {
            Ok(Some((message, from))) => {
                if !process(socket.as_ref(), &sessions, session_id, &message, from).await {
                    break;
                }
            }
            // mailbox dropped by the acceptor, the sweep already evicted us
            Ok(None) => break,
            Err(_elapsed) => {
                expire(socket.as_ref(), &sessions, session_id).await;
                break;
            }
        }
    }

    // a datagram racing this session's end must not die in the mailbox
    inbox.close();
    while let Ok(undelivered) = inbox.try_recv() {
        if returns.send(undelivered).await.is_err() {
            // the acceptor itself is gone, shutdown is underway
            return;
        }
    }
}

/// Applies one message to the worker's session. Returns false once the
/// session is gone and the worker should stop.
async fn process(
    socket: &dyn DatagramSocket,
    sessions: &SharedSessionTable,
    session_id: SessionId,
    message: &Message,
    from: SocketAddr,
) -> bool {
    let mut table = sessions.write().await;
    let session = match table.get_mut(session_id) {
        Some(session) => session,
        None => {
            // lost the race against the sweep
            SessionEvent::UnknownSession {
                session_id,
                command: message.command,
                from,
            }
            .emit();
            return false;
        }
    };

    let effects = session_logic::on_message(session, message, from, Instant::now());
    let peer_addr = session.peer_addr;
    let closed = session.state == SessionState::Closed;
    if closed {
        table.remove(session_id);
    }
    drop(table);

    perform_effects(socket, peer_addr, effects).await;
    !closed
}

/// Idle timeout hit. Whoever removes the session from the table gets to
/// close it; losing that race to the sweep means staying silent.
async fn expire(socket: &dyn DatagramSocket, sessions: &SharedSessionTable, session_id: SessionId) {
    let removed = sessions.write().await.remove(session_id);
    if let Some(mut session) = removed {
        let effects = session_logic::on_expired(&mut session);
        perform_effects(socket, session.peer_addr, effects).await;
    }
}
