use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::time::Instant;

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Thin wrapper over a bound UDP socket.
///
/// Cloning shares the socket, so a chat task can send while the turn
/// protocol receives.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        tracing::debug!(local_addr = %local_addr, "Bound UDP socket");

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send one datagram. Failures are returned, never retried here.
    pub async fn send_to(&self, bytes: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Datagram exceeds maximum UDP payload",
            ));
        }
        self.socket.send_to(bytes, addr).await
    }

    /// Receive one datagram, or `None` once `timeout` elapses
    pub async fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        self.recv_until(Instant::now() + timeout).await
    }

    /// Receive one datagram, or `None` once `deadline` passes
    pub async fn recv_until(&self, deadline: Instant) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Err(_elapsed) => return Ok(None),
                Ok(Ok((size, addr))) => {
                    buf.truncate(size);
                    return Ok(Some((buf, addr)));
                }
                // ICMP port-unreachable from an earlier send, reported by some platforms
                Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionReset => {
                    tracing::debug!(error = %e, "Ignoring connection reset on UDP socket");
                }
                Ok(Err(e)) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_receive() {
        let a = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        a.send_to(b"message_type: HANDSHAKE_REQUEST", b.local_addr())
            .await
            .unwrap();
        let (bytes, from) = b
            .recv_timeout(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(bytes, b"message_type: HANDSHAKE_REQUEST");
        assert_eq!(from, a.local_addr());
    }

    #[tokio::test]
    async fn test_receive_timeout_is_not_an_error() {
        let a = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        let received = a.recv_timeout(Duration::from_millis(50)).await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_oversized_datagram_rejected() {
        let a = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let huge = vec![b'x'; MAX_DATAGRAM_SIZE + 1];

        let err = a.send_to(&huge, a.local_addr()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
