//! Voice session data handed over by the signaling layer

use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::OnceLock;

use crate::error::{Error, NetworkError};
use crate::network::crypto::KEY_LEN;

/// Session description as delivered by the signaling collaborator
#[derive(Debug, Clone, Deserialize)]
pub struct SessionDescription {
    pub ssrc: u32,
    pub host: String,
    pub port: u16,
    /// Usually arrives later, in a separate message
    #[serde(default)]
    pub secret_key: Option<Vec<u8>>,
}

/// One voice connection's identity and key material
///
/// SSRC and endpoint are fixed at construction. The secret key can be
/// installed once, from any thread, and is read-only afterwards.
#[derive(Debug)]
pub struct VoiceSession {
    ssrc: u32,
    host: String,
    port: u16,
    secret_key: OnceLock<[u8; KEY_LEN]>,
}

impl VoiceSession {
    pub fn new(ssrc: u32, host: impl Into<String>, port: u16) -> Self {
        Self {
            ssrc,
            host: host.into(),
            port,
            secret_key: OnceLock::new(),
        }
    }

    /// Build a session from a JSON description, installing the key if present
    pub fn from_json(text: &str) -> Result<Self, Error> {
        let description: SessionDescription =
            serde_json::from_str(text).map_err(|e| Error::Config(format!("session: {}", e)))?;
        Self::from_description(description)
    }

    pub fn from_description(description: SessionDescription) -> Result<Self, Error> {
        let session = Self::new(description.ssrc, description.host, description.port);
        if let Some(key) = description.secret_key {
            session.install_secret_key(&key)?;
        }
        Ok(session)
    }

    /// Install the symmetric key; only the first call succeeds
    pub fn install_secret_key(&self, key: &[u8]) -> Result<(), NetworkError> {
        let key: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| NetworkError::InvalidSecretKey(key.len()))?;
        self.secret_key
            .set(key)
            .map_err(|_| NetworkError::SecretKeyAlreadySet)
    }

    pub fn secret_key(&self) -> Option<&[u8; KEY_LEN]> {
        self.secret_key.get()
    }

    pub fn has_secret_key(&self) -> bool {
        self.secret_key.get().is_some()
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve the voice server's address
    pub fn remote_addr(&self) -> Result<SocketAddr, NetworkError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}:{}: {}", self.host, self.port, e)))?
            .next()
            .ok_or_else(|| {
                NetworkError::ConnectionFailed(format!("{}:{} did not resolve", self.host, self.port))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_installs_once() {
        let session = VoiceSession::new(7, "127.0.0.1", 5000);
        assert!(!session.has_secret_key());

        session.install_secret_key(&[1u8; 32]).unwrap();
        assert_eq!(session.secret_key(), Some(&[1u8; 32]));

        let again = session.install_secret_key(&[2u8; 32]);
        assert!(matches!(again, Err(NetworkError::SecretKeyAlreadySet)));
        assert_eq!(session.secret_key(), Some(&[1u8; 32]));
    }

    #[test]
    fn test_rejects_short_key() {
        let session = VoiceSession::new(7, "127.0.0.1", 5000);
        let result = session.install_secret_key(&[0u8; 16]);
        assert!(matches!(result, Err(NetworkError::InvalidSecretKey(16))));
    }

    #[test]
    fn test_from_json() {
        let session = VoiceSession::from_json(
            r#"{"ssrc": 4242, "host": "127.0.0.1", "port": 50001}"#,
        )
        .unwrap();

        assert_eq!(session.ssrc(), 4242);
        assert!(!session.has_secret_key());
        assert_eq!(session.remote_addr().unwrap(), "127.0.0.1:50001".parse().unwrap());
    }

    #[test]
    fn test_from_json_with_key() {
        let key: Vec<String> = (0..32).map(|i| i.to_string()).collect();
        let text = format!(
            r#"{{"ssrc": 1, "host": "localhost", "port": 9, "secret_key": [{}]}}"#,
            key.join(",")
        );

        let session = VoiceSession::from_json(&text).unwrap();
        assert_eq!(session.secret_key().unwrap()[31], 31);
    }
}
