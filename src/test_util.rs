//! Test doubles for the socket seam, used by the dispatch shell and client
//! loop tests.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::socket::DatagramSocket;

/// [DatagramSocket] double: hands out a scripted list of inbound datagrams,
/// one per receive call, then pends forever like a quiet socket. Every send
/// is recorded.
///
/// A paced instance sleeps before handing out each datagram. Under tokio's
/// paused test clock that sleep completes only once every other task has gone
/// idle, which makes it a quiescence barrier between datagrams: datagram N is
/// fully processed, worker tasks included, before N+1 arrives.
pub struct ScriptedSocket {
    local_addr: SocketAddr,
    gap: Option<Duration>,
    recv_errors: Mutex<u32>,
    inbound: Mutex<VecDeque<(Vec<u8>, SocketAddr)>>,
    sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
}

impl ScriptedSocket {
    pub fn new(local_addr: SocketAddr, inbound: Vec<(Vec<u8>, SocketAddr)>) -> ScriptedSocket {
        ScriptedSocket {
            local_addr,
            gap: None,
            recv_errors: Mutex::new(0),
            inbound: Mutex::new(inbound.into()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn paced(local_addr: SocketAddr, inbound: Vec<(Vec<u8>, SocketAddr)>, gap: Duration) -> ScriptedSocket {
        ScriptedSocket {
            gap: Some(gap),
            ..ScriptedSocket::new(local_addr, inbound)
        }
    }

    /// Like [ScriptedSocket::new], but the first `recv_errors` receive calls
    /// fail, the way a socket surfaces ICMP errors.
    pub fn flaky(
        local_addr: SocketAddr,
        recv_errors: u32,
        inbound: Vec<(Vec<u8>, SocketAddr)>,
    ) -> ScriptedSocket {
        ScriptedSocket {
            recv_errors: Mutex::new(recv_errors),
            ..ScriptedSocket::new(local_addr, inbound)
        }
    }

    /// Everything sent so far, in send order.
    pub fn sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatagramSocket for ScriptedSocket {
    async fn send_datagram(&self, to: SocketAddr, datagram: &[u8]) {
        self.sent.lock().unwrap().push((to, datagram.to_vec()));
    }

    async fn recv_datagram(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        {
            let mut recv_errors = self.recv_errors.lock().unwrap();
            if *recv_errors > 0 {
                *recv_errors -= 1;
                anyhow::bail!("connection refused");
            }
        }

        // Sleep before taking the datagram out of the script: a caller's
        // select! may drop this future mid-sleep, and a popped-but-undelivered
        // datagram would be lost with it.
        if let Some(gap) = self.gap {
            tokio::time::sleep(gap).await;
        }

        let next = self.inbound.lock().unwrap().pop_front();
        match next {
            Some((datagram, from)) => {
                buf[..datagram.len()].copy_from_slice(&datagram);
                Ok((datagram.len(), from))
            }
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
