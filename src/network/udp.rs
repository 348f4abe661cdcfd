//! UDP socket construction
//!
//! Sockets are built through socket2 so buffer sizes can be set before the
//! bind, then handed out as plain `std::net::UdpSocket`s with a read timeout
//! installed. The timeout is what lets the receive loops poll their stop
//! flag instead of blocking forever.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::NetworkError;

/// OS-level socket buffer size for audio traffic
const SOCKET_BUFFER_SIZE: usize = 256 * 1024;

/// Bind a UDP socket with enlarged buffers and a receive timeout
///
/// A bind failure (port in use, bad address) is the one fatal setup error in
/// the transport; everything downstream of a successful bind is survivable.
pub fn create_socket(bind: SocketAddr, recv_timeout: Duration) -> Result<UdpSocket, NetworkError> {
    let domain = Domain::for_address(bind);
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    // Best effort, some platforms clamp these
    let _ = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE);
    let _ = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE);

    socket
        .bind(&bind.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind, e)))?;

    let socket: UdpSocket = socket.into();
    socket
        .set_read_timeout(Some(recv_timeout))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral_port() {
        let socket = create_socket(
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_millis(50),
        )
        .unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
        assert_eq!(
            socket.read_timeout().unwrap(),
            Some(Duration::from_millis(50))
        );
    }

    #[test]
    fn test_bind_conflict_is_fatal() {
        let first = create_socket(
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_millis(50),
        )
        .unwrap();
        let taken = first.local_addr().unwrap();

        let second = create_socket(taken, Duration::from_millis(50));
        assert!(matches!(second, Err(NetworkError::BindFailed(_))));
    }
}
