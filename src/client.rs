//! The client side of the protocol: a single session against one server,
//! fed from stdin. Each input line becomes one DATA message; `q` on a line
//! of its own (when stdin is a terminal) or end of input says goodbye.

use std::io::IsTerminal;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::net::UdpSocket;
use tokio::select;
use tokio::time;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::ClientConfig;
use crate::message::{Command, Message};
use crate::session::{SessionId, SessionState};
use crate::socket::DatagramSocket;

/// Client-side session state, the mirror image of the server's bookkeeping:
/// own outbound sequence counter, same logical clock rule, same lifecycle
/// states.
pub struct ClientSession {
    pub session_id: SessionId,
    pub state: SessionState,
    pub next_sequence: u32,
    pub logical_clock: u32,
}

/// What the I/O loop should do after a server message has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientProgress {
    Continue,
    HandshakeComplete,
    /// Not a message of this session; it changes nothing and answers nothing.
    Ignored,
    Closed,
}

impl ClientSession {
    pub fn new(session_id: SessionId) -> ClientSession {
        ClientSession {
            session_id,
            state: SessionState::HelloWait,
            next_sequence: 0,
            logical_clock: 0,
        }
    }

    pub fn hello(&mut self) -> Message {
        self.next_message(Message::hello(self.session_id, 0, 0))
    }

    pub fn data(&mut self, payload: Vec<u8>) -> Message {
        self.next_message(Message::data(self.session_id, 0, 0, payload))
    }

    pub fn goodbye(&mut self) -> Message {
        self.state = SessionState::Closing;
        self.next_message(Message::goodbye(self.session_id, 0, 0))
    }

    fn next_message(&mut self, mut message: Message) -> Message {
        message.sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.saturating_add(1);
        self.logical_clock = self.logical_clock.wrapping_add(1);
        message.logical_clock = self.logical_clock;
        message
    }

    /// Applies one message from the server, returning what it means for the
    /// conversation. Messages for some other session are ignored outright,
    /// without even touching the logical clock.
    pub fn on_server_message(&mut self, message: &Message) -> ClientProgress {
        if message.session_id != self.session_id {
            debug!(
                "ignoring message for foreign session {}",
                message.session_id
            );
            return ClientProgress::Ignored;
        }

        self.logical_clock = self
            .logical_clock
            .max(message.logical_clock)
            .wrapping_add(1);

        match (self.state, message.command) {
            (_, Command::Goodbye) => {
                self.state = SessionState::Closed;
                ClientProgress::Closed
            }
            (SessionState::HelloWait, Command::Alive) => {
                self.state = SessionState::Ready;
                ClientProgress::HandshakeComplete
            }
            (SessionState::Ready, Command::Alive) => ClientProgress::Continue,
            (state, command) => {
                debug!("ignoring {:?} in state {:?}", command, state);
                ClientProgress::Continue
            }
        }
    }
}

/// Runs one client session to completion: handshake, then stdin lines as
/// DATA until `q` or EOF, then goodbye. Exits when the server says goodbye,
/// or when it stays silent past the response timeout.
pub async fn run_client(config: ClientConfig) -> anyhow::Result<()> {
    config.validate()?;

    let socket = UdpSocket::bind(local_bind(config.server_addr)).await?;
    let interactive = std::io::stdin().is_terminal();
    let input = BufReader::new(tokio::io::stdin()).lines();

    run_session(&config, &socket, SessionId::generate(), input, interactive).await
}

/// The client's I/O loop, multiplexing server datagrams, input lines and the
/// response deadline. Blank input lines are not sent. Socket errors are
/// logged and ridden out; when the server stays silent the deadline decides.
async fn run_session<R: AsyncBufRead + Unpin>(
    config: &ClientConfig,
    socket: &dyn DatagramSocket,
    session_id: SessionId,
    mut input: Lines<R>,
    interactive: bool,
) -> anyhow::Result<()> {
    let mut session = ClientSession::new(session_id);
    info!(
        "session {}: saying hello to {}",
        session.session_id, config.server_addr
    );
    send(socket, config.server_addr, session.hello()).await;

    let mut response_deadline = Instant::now() + config.response_timeout;
    let mut waiting_for_reply = true;
    let mut stdin_open = true;

    let mut receive_buffer = vec![0u8; config.receive_buf_size];

    loop {
        select! {
            recv_result = socket.recv_datagram(&mut receive_buffer) => {
                let (len, from) = match recv_result {
                    Ok(received) => received,
                    Err(error) => {
                        error!("error receiving datagram: {}", error);
                        continue;
                    }
                };
                if from != config.server_addr {
                    debug!("discarding datagram from unexpected source {}", from);
                    continue;
                }
                let message = match Message::decode(&receive_buffer[..len]) {
                    Ok(message) => message,
                    Err(error) => {
                        debug!("discarding malformed datagram: {}", error);
                        continue;
                    }
                };

                match session.on_server_message(&message) {
                    ClientProgress::Closed => {
                        info!("session {}: closed by server", session.session_id);
                        return Ok(());
                    }
                    ClientProgress::HandshakeComplete => {
                        info!("session {}: server is listening", session.session_id);
                        waiting_for_reply = false;
                    }
                    ClientProgress::Continue => {
                        // a goodbye ack timer keeps running regardless
                        if session.state != SessionState::Closing {
                            waiting_for_reply = false;
                        }
                    }
                    ClientProgress::Ignored => {}
                }
            }
            line = input.next_line(), if stdin_open && session.state == SessionState::Ready => {
                match line? {
                    Some(line) if interactive && line == "q" => {
                        send(socket, config.server_addr, session.goodbye()).await;
                    }
                    Some(line) if line.is_empty() => continue,
                    Some(line) => {
                        send(socket, config.server_addr, session.data(line.into_bytes())).await;
                    }
                    None => {
                        stdin_open = false;
                        send(socket, config.server_addr, session.goodbye()).await;
                    }
                }
                response_deadline = Instant::now() + config.response_timeout;
                waiting_for_reply = true;
            }
            _ = time::sleep_until(response_deadline), if waiting_for_reply => {
                if session.state == SessionState::Closing {
                    info!("session {}: no goodbye ack, closing anyway", session.session_id);
                    return Ok(());
                }
                warn!("session {}: no response from server", session.session_id);
                send(socket, config.server_addr, session.goodbye()).await;
                return Ok(());
            }
        }
    }
}

fn local_bind(server_addr: SocketAddr) -> SocketAddr {
    match server_addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    }
}

async fn send(socket: &dyn DatagramSocket, to: SocketAddr, message: Message) {
    trace!("sending {}", message);
    socket.send_datagram(to, &message.encode()).await;
}
