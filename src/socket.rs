use std::net::SocketAddr;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tracing::{error, trace};

/// The datagram transport as the dispatch shells see it. This is an
/// abstraction over the UDP socket, introduced to facilitate driving a shell
/// from a scripted trace in tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    /// Fire-and-forget send. Transport errors are logged and swallowed, UDP
    /// gives no delivery guarantee either way.
    async fn send_datagram(&self, to: SocketAddr, datagram: &[u8]);

    /// Waits for the next inbound datagram and copies it into `buf`,
    /// returning its length and source address.
    async fn recv_datagram(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)>;

    fn local_addr(&self) -> SocketAddr;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_datagram(&self, to: SocketAddr, datagram: &[u8]) {
        trace!("UDP socket: sending {} bytes to {}", datagram.len(), to);

        if let Err(e) = self.send_to(datagram, to).await {
            error!("error sending UDP datagram to {}: {}", to, e);
        }
    }

    async fn recv_datagram(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        let (len, from) = self.recv_from(buf).await?;
        trace!("UDP socket: received {} bytes from {}", len, from);
        Ok((len, from))
    }

    fn local_addr(&self) -> SocketAddr {
        UdpSocket::local_addr(self)
            .expect("UdpSocket should have an initialized local addr")
    }
}
