//! UDP socket setup shared by discovery and the voice transport

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use tracing::{debug, warn};

use crate::config::NetworkConfig;
use crate::error::NetworkError;

/// Create a UDP socket bound to an ephemeral local port and connected to `remote`
pub fn create_socket(remote: SocketAddr, config: &NetworkConfig) -> Result<UdpSocket, NetworkError> {
    let domain = if remote.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    if let Err(e) = socket.set_send_buffer_size(config.send_buffer_size) {
        warn!("Failed to set send buffer size to {}: {}", config.send_buffer_size, e);
    }

    let local: SocketAddr = if remote.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    socket
        .bind(&local.into())
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .connect(&remote.into())
        .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", remote, e)))?;

    let socket: UdpSocket = socket.into();
    debug!(
        "UDP socket {} -> {}",
        socket
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into()),
        remote
    );
    Ok(socket)
}
