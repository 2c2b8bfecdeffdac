//! External address discovery
//!
//! Before audio flows, the voice server has to tell us which address and
//! port it sees our socket as. One 70-byte request, one 70-byte response:
//!
//! ```text
//! request:  [ssrc BE (4)][zeros (66)]
//! response: [..(4)][ip text, NUL padded (64)][port LE (2)]
//! ```

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::NetworkError;

pub const DISCOVERY_PACKET_LEN: usize = 70;
const ADDRESS_START: usize = 4;
const ADDRESS_END: usize = 68;

/// Build the discovery request for `ssrc`
pub fn build_request(ssrc: u32) -> [u8; DISCOVERY_PACKET_LEN] {
    let mut packet = [0u8; DISCOVERY_PACKET_LEN];
    packet[..4].copy_from_slice(&ssrc.to_be_bytes());
    packet
}

/// Extract the external endpoint from a discovery response
pub fn parse_response(response: &[u8]) -> Result<SocketAddr, NetworkError> {
    if response.len() < DISCOVERY_PACKET_LEN {
        return Err(NetworkError::DiscoveryFailed(format!(
            "response is {} bytes, expected {}",
            response.len(),
            DISCOVERY_PACKET_LEN
        )));
    }

    let text = &response[ADDRESS_START..ADDRESS_END];
    let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
    let text = std::str::from_utf8(&text[..end])
        .map_err(|_| NetworkError::DiscoveryFailed("address is not valid text".into()))?;
    let ip: IpAddr = text
        .trim()
        .parse()
        .map_err(|_| NetworkError::DiscoveryFailed(format!("invalid address {:?}", text)))?;

    let port = u16::from_le_bytes([response[ADDRESS_END], response[ADDRESS_END + 1]]);
    Ok(SocketAddr::new(ip, port))
}

/// Run the exchange on a connected socket
///
/// The read timeout is restored to blocking afterwards so the socket can be
/// handed to the transport.
pub fn discover_local_address(
    socket: &UdpSocket,
    ssrc: u32,
    timeout: Duration,
) -> Result<SocketAddr, NetworkError> {
    socket
        .send(&build_request(ssrc))
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
    debug!("Sent discovery request for SSRC {}", ssrc);

    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| NetworkError::DiscoveryFailed(e.to_string()))?;

    let mut response = [0u8; DISCOVERY_PACKET_LEN + 4];
    let received = socket.recv(&mut response);
    if let Err(e) = socket.set_read_timeout(None) {
        warn!("Could not clear discovery read timeout: {}", e);
    }

    let len = match received {
        Ok(len) => len,
        Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            return Err(NetworkError::Timeout)
        }
        Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string())),
    };

    let endpoint = parse_response(&response[..len])?;
    info!("Discovered external endpoint {}", endpoint);
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn response_for(ip: &str, port: u16) -> [u8; DISCOVERY_PACKET_LEN] {
        let mut packet = [0u8; DISCOVERY_PACKET_LEN];
        packet[..2].copy_from_slice(&[0x00, 0x02]);
        packet[ADDRESS_START..ADDRESS_START + ip.len()].copy_from_slice(ip.as_bytes());
        packet[ADDRESS_END..].copy_from_slice(&port.to_le_bytes());
        packet
    }

    #[test]
    fn test_request_layout() {
        let request = build_request(0x1234_5678);
        assert_eq!(request.len(), 70);
        assert_eq!(&request[..4], &[0x12, 0x34, 0x56, 0x78]);
        assert!(request[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_parse_response() {
        let endpoint = parse_response(&response_for("203.0.113.7", 50123)).unwrap();
        assert_eq!(endpoint, "203.0.113.7:50123".parse().unwrap());
    }

    #[test]
    fn test_invalid_address_fails() {
        let result = parse_response(&response_for("not-an-ip", 1));
        assert!(matches!(result, Err(NetworkError::DiscoveryFailed(_))));
    }

    #[test]
    fn test_short_response_fails() {
        let result = parse_response(&[0u8; 20]);
        assert!(matches!(result, Err(NetworkError::DiscoveryFailed(_))));
    }

    #[test]
    fn test_round_trip_with_mock_responder() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();

        let responder = thread::spawn(move || {
            let mut buf = [0u8; 128];
            let (len, from) = server.recv_from(&mut buf).unwrap();
            assert_eq!(len, DISCOVERY_PACKET_LEN);
            assert_eq!(&buf[..4], &77u32.to_be_bytes());
            server.send_to(&response_for("198.51.100.20", 40404), from).unwrap();
        });

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.connect(server_addr).unwrap();
        let endpoint = discover_local_address(&client, 77, Duration::from_secs(2)).unwrap();

        responder.join().unwrap();
        assert_eq!(endpoint, "198.51.100.20:40404".parse().unwrap());
        // Back to blocking for the send thread
        assert_eq!(client.read_timeout().unwrap(), None);
    }

    #[test]
    fn test_no_response_times_out() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.connect(server.local_addr().unwrap()).unwrap();

        let result = discover_local_address(&client, 1, Duration::from_millis(50));
        assert!(matches!(result, Err(NetworkError::Timeout)));
        assert_eq!(client.read_timeout().unwrap(), None);
    }
}
