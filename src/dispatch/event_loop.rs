//! Single-task shell: one loop owns the socket and the session table,
//! handling every datagram to completion before looking at the next one.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::select;
use tokio::time;
use tokio::time::Instant;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::message::Command;
use crate::session::SessionState;
use crate::session_events::SessionEvent;
use crate::session_logic;
use crate::socket::DatagramSocket;

use super::{decode_datagram, perform_effects, sweep_sessions, SharedSessionTable};

pub(crate) async fn run(
    config: Arc<ServerConfig>,
    socket: Arc<dyn DatagramSocket>,
    sessions: SharedSessionTable,
) -> anyhow::Result<()> {
    info!("serving on {} (event loop)", socket.local_addr());

    let mut sweep_ticks = time::interval(config.sweep_interval);
    let mut receive_buffer = vec![0u8; config.receive_buf_size];

    loop {
        select! {
            recv_result = socket.recv_datagram(&mut receive_buffer) => {
                match recv_result {
                    Ok((len, from)) => {
                        handle_datagram(&receive_buffer[..len], from, socket.as_ref(), &sessions).await;
                    }
                    Err(e) => {
                        error!("error receiving datagram: {}", e);
                    }
                }
            }
            _ = sweep_ticks.tick() => {
                sweep_sessions(&config, socket.as_ref(), &sessions).await;
            }
        }
    }
}

async fn handle_datagram(
    datagram: &[u8],
    from: SocketAddr,
    socket: &dyn DatagramSocket,
    sessions: &SharedSessionTable,
) {
    let message = match decode_datagram(datagram, from) {
        Some(message) => message,
        None => return,
    };

    let now = Instant::now();
    let mut table = sessions.write().await;

    // Only a HELLO may bring a session into existence.
    if message.command != Command::Hello && table.get(message.session_id).is_none() {
        drop(table);
        SessionEvent::UnknownSession {
            session_id: message.session_id,
            command: message.command,
            from,
        }
        .emit();
        return;
    }

    let (session, _) = table.get_or_create(message.session_id, from, now);
    let effects = session_logic::on_message(session, &message, from, now);
    let peer_addr = session.peer_addr;
    if session.state == SessionState::Closed {
        table.remove(message.session_id);
    }
    drop(table);

    perform_effects(socket, peer_addr, effects).await;
}
