//! Remote voice path: session data, packet framing, encryption, discovery
//! and the paced UDP transport

pub mod crypto;
pub mod discovery;
pub mod packet;
pub mod session;
pub mod transport;
pub mod udp;

pub use crypto::SecretBox;
pub use discovery::discover_local_address;
pub use packet::{OutboundPacketState, RtpHeader};
pub use session::{SessionDescription, VoiceSession};
pub use transport::{RemoteVoiceTransport, TransportStats, TransportStatsSnapshot};
pub use udp::create_socket;
