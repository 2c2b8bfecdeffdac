//! Remote voice transport
//!
//! A dedicated send thread pulls mixed frames from the handoff buffer,
//! compresses them, seals them into voice packets and paces them onto the
//! wire at one packet per 10ms, anchored to the instant sending started.
//!
//! A frame that fails to encode, encrypt or send is dropped, never retried.
//! The schedule still advances past it, so one bad frame costs exactly one
//! frame of audio and the stream stays on time.

use bytes::BytesMut;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::audio::handoff::{HandoffBuffer, SharedHandoffBuffer};
use crate::audio::sink::PlaybackSink;
use crate::codec::{FrameEncoder, OpusEncoder};
use crate::config::AppConfig;
use crate::constants::{FRAME_SAMPLES, MAX_PACKET_SIZE, SILENCE_FRAME, SILENCE_FRAME_COUNT};
use crate::error::{AudioError, CodecError, NetworkError, Result};
use crate::network::crypto::{SecretBox, TAG_LEN};
use crate::network::discovery;
use crate::network::packet::{seal_packet, OutboundPacketState, HEADER_LEN};
use crate::network::session::VoiceSession;
use crate::network::udp::create_socket;

/// Extra time allowed for queued frames to leave on stop
const DRAIN_SLACK: Duration = Duration::from_millis(100);

/// Transport counters, shared with the send thread
#[derive(Debug, Default)]
pub struct TransportStats {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl TransportStats {
    pub fn snapshot(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStatsSnapshot {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub frames_dropped: u64,
}

/// Everything the send thread owns while it runs
///
/// Handed back when the thread finishes so the silence flush continues the
/// same sequence and schedule.
struct SendWorker {
    socket: Arc<UdpSocket>,
    encoder: Box<dyn FrameEncoder>,
    cipher: SecretBox,
    ssrc: u32,
    state: OutboundPacketState,
    origin: Instant,
    frame: Vec<f32>,
    payload: Vec<u8>,
    packet: BytesMut,
    stats: Arc<TransportStats>,
}

impl SendWorker {
    fn run(mut self, handoff: &HandoffBuffer, running: &AtomicBool) -> Self {
        while running.load(Ordering::Relaxed) {
            if !handoff.pull(&mut self.frame) {
                break;
            }

            match self.encoder.encode_frame(&self.frame, &mut self.payload) {
                Ok(len) => self.transmit(len),
                Err(e) => {
                    warn!("Dropping frame {}: {}", self.state.sequence(), e);
                    self.drop_frame();
                }
            }
        }
        self
    }

    /// Seal `payload[..len]`, wait for its slot, send it
    fn transmit(&mut self, len: usize) {
        let header = self.state.header(self.ssrc);
        if let Err(e) = seal_packet(&mut self.packet, &header, &self.payload[..len], &self.cipher) {
            warn!("Dropping frame {}: {}", header.sequence, e);
            self.drop_frame();
            return;
        }

        if let Some(delay) = self.state.delay_until_next(self.origin.elapsed()) {
            thread::sleep(delay);
        }

        match self.socket.send(&self.packet) {
            Ok(sent) => {
                trace!("Sent packet {} ({} bytes)", header.sequence, sent);
                self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
                self.state.advance();
            }
            Err(e) => {
                warn!("Dropping frame {}: send failed: {}", header.sequence, e);
                self.drop_frame();
            }
        }
    }

    fn drop_frame(&mut self) {
        self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        self.state.advance();
    }

    /// Let the remote decoder drain its buffer
    fn flush_silence(&mut self) {
        for _ in 0..SILENCE_FRAME_COUNT {
            self.payload[..SILENCE_FRAME.len()].copy_from_slice(&SILENCE_FRAME);
            self.transmit(SILENCE_FRAME.len());
        }
        debug!("Sent {} silence frames", SILENCE_FRAME_COUNT);
    }
}

/// Streams the mixed output to a remote voice server
pub struct RemoteVoiceTransport {
    session: Arc<VoiceSession>,
    socket: Arc<UdpSocket>,
    handoff: SharedHandoffBuffer,
    running: Arc<AtomicBool>,
    /// Held here while idle, moved into the send thread while sending
    encoder: Option<Box<dyn FrameEncoder>>,
    worker: Option<JoinHandle<SendWorker>>,
    stats: Arc<TransportStats>,
}

impl RemoteVoiceTransport {
    pub fn new(
        session: Arc<VoiceSession>,
        socket: UdpSocket,
        encoder: Box<dyn FrameEncoder>,
        handoff_frames: usize,
    ) -> Self {
        Self {
            session,
            socket: Arc::new(socket),
            handoff: Arc::new(HandoffBuffer::with_frames(handoff_frames)),
            running: Arc::new(AtomicBool::new(false)),
            encoder: Some(encoder),
            worker: None,
            stats: Arc::new(TransportStats::default()),
        }
    }

    /// Open a socket to the session's server with an Opus encoder from `config`
    pub fn connect(session: Arc<VoiceSession>, config: &AppConfig) -> Result<Self> {
        let remote = session.remote_addr()?;
        let socket = create_socket(remote, &config.network)?;
        let encoder = OpusEncoder::new(config.opus.clone())?;

        info!("Voice transport for SSRC {} -> {}", session.ssrc(), remote);
        Ok(Self::new(session, socket, Box::new(encoder), config.mixer.handoff_frames))
    }

    /// Ask the server for our external endpoint
    ///
    /// Must happen before `start`; the send thread shares the socket.
    pub fn discover_local_address(&self, timeout: Duration) -> std::result::Result<SocketAddr, NetworkError> {
        if self.is_running() {
            return Err(NetworkError::DiscoveryFailed("transport is already sending".into()));
        }
        discovery::discover_local_address(&self.socket, self.session.ssrc(), timeout)
    }

    pub fn session(&self) -> &Arc<VoiceSession> {
        &self.session
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> TransportStatsSnapshot {
        self.stats.snapshot()
    }
}

impl PlaybackSink for RemoteVoiceTransport {
    fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let key = self.session.secret_key().ok_or(NetworkError::MissingSecretKey)?;
        let cipher = SecretBox::new(key)?;
        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| CodecError::EncoderInit("encoder was lost by a failed send thread".into()))?;

        let worker = SendWorker {
            socket: self.socket.clone(),
            encoder,
            cipher,
            ssrc: self.session.ssrc(),
            state: OutboundPacketState::new(),
            origin: Instant::now(),
            frame: vec![0.0; FRAME_SAMPLES],
            // Encoder output is capped so the sealed packet fits one datagram
            payload: vec![0u8; MAX_PACKET_SIZE - HEADER_LEN - TAG_LEN],
            packet: BytesMut::with_capacity(MAX_PACKET_SIZE),
            stats: self.stats.clone(),
        };

        self.handoff.reset();
        self.running.store(true, Ordering::SeqCst);

        let handoff = self.handoff.clone();
        let running = self.running.clone();
        let spawned = thread::Builder::new()
            .name("voice-send".to_string())
            .spawn(move || worker.run(&handoff, &running));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!("Voice transport started (SSRC {})", self.session.ssrc());
                Ok(())
            }
            Err(e) => {
                // The worker (and its encoder) went down with the closure
                self.running.store(false, Ordering::SeqCst);
                Err(NetworkError::ConnectionFailed(format!("spawn send thread: {}", e)).into())
            }
        }
    }

    fn stop(&mut self) {
        if !self.is_running() {
            return;
        }

        // Play out what the mixer already queued before ending the stream
        if !self.handoff.drain(self.handoff.playout_time() + DRAIN_SLACK) {
            debug!("Discarding {} queued samples", self.handoff.len());
        }

        self.running.store(false, Ordering::SeqCst);
        self.handoff.release_waiter();
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(mut worker)) => {
                worker.flush_silence();
                self.encoder = Some(worker.encoder);
            }
            Some(Err(_)) => error!("Voice send thread panicked"),
            None => {}
        }
        self.handoff.reset();

        let stats = self.stats.snapshot();
        info!(
            "Voice transport stopped: {} packets, {:.1} KB sent, {} dropped",
            stats.packets_sent,
            stats.bytes_sent as f64 / 1024.0,
            stats.frames_dropped
        );
        if let Some(encoded) = self.encoder.as_ref().and_then(|encoder| encoder.stats()) {
            info!(
                "Encoder: {} frames, {:.1} bytes per frame",
                encoded.frames_encoded, encoded.average_frame_size
            );
        }
    }

    fn accept(&mut self, frame: &[f32]) -> std::result::Result<(), AudioError> {
        if self.handoff.push(frame) {
            Ok(())
        } else {
            Err(AudioError::SinkStopped)
        }
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

impl Drop for RemoteVoiceTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CHANNELS, FRAME_SIZE};
    use crate::network::crypto::KEY_LEN;
    use crate::network::packet::open_packet;

    const KEY: [u8; KEY_LEN] = [42; KEY_LEN];

    /// Writes the first sample's sign and a fixed tail
    struct FakeEncoder;

    impl FrameEncoder for FakeEncoder {
        fn encode_frame(&mut self, pcm: &[f32], out: &mut [u8]) -> std::result::Result<usize, CodecError> {
            if pcm.len() != FRAME_SIZE * CHANNELS as usize {
                return Err(CodecError::InvalidFrameSize(pcm.len()));
            }
            out[..4].copy_from_slice(&[0xAB, 0xCD, 0xEF, if pcm[0] > 0.0 { 1 } else { 0 }]);
            Ok(4)
        }
    }

    /// Fails every `n`th frame, counting from one
    struct FailingEncoder {
        every: usize,
        calls: usize,
    }

    impl FrameEncoder for FailingEncoder {
        fn encode_frame(&mut self, pcm: &[f32], out: &mut [u8]) -> std::result::Result<usize, CodecError> {
            self.calls += 1;
            if self.calls % self.every == 0 {
                return Err(CodecError::EncodingFailed("scripted failure".into()));
            }
            FakeEncoder.encode_frame(pcm, out)
        }
    }

    fn transport_to_receiver(with_key: bool) -> (RemoteVoiceTransport, UdpSocket) {
        transport_with_encoder(with_key, Box::new(FakeEncoder))
    }

    fn transport_with_encoder(
        with_key: bool,
        encoder: Box<dyn FrameEncoder>,
    ) -> (RemoteVoiceTransport, UdpSocket) {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let addr = receiver.local_addr().unwrap();

        let session = Arc::new(VoiceSession::new(0xDEAD_BEEF, "127.0.0.1", addr.port()));
        if with_key {
            session.install_secret_key(&KEY).unwrap();
        }
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.connect(addr).unwrap();

        (RemoteVoiceTransport::new(session, socket, encoder, 4), receiver)
    }

    fn receive(receiver: &UdpSocket) -> (u16, u32, Vec<u8>) {
        let cipher = SecretBox::new(&KEY).unwrap();
        let mut buf = [0u8; 2048];
        let len = receiver.recv(&mut buf).unwrap();
        let (header, payload) = open_packet(&buf[..len], &cipher).unwrap();
        assert_eq!(header.ssrc, 0xDEAD_BEEF);
        (header.sequence, header.timestamp, payload)
    }

    #[test]
    fn test_start_requires_secret_key() {
        let (mut transport, _receiver) = transport_to_receiver(false);
        let result = transport.start();
        assert!(matches!(
            result,
            Err(crate::Error::Network(NetworkError::MissingSecretKey))
        ));
        assert!(!transport.is_running());
    }

    #[test]
    fn test_stream_then_silence_on_stop() {
        let (mut transport, receiver) = transport_to_receiver(true);
        transport.start().unwrap();

        for _ in 0..3 {
            transport.accept(&[0.5; FRAME_SAMPLES]).unwrap();
        }
        for expected in 0..3u16 {
            let (sequence, timestamp, payload) = receive(&receiver);
            assert_eq!(sequence, expected);
            assert_eq!(timestamp, expected as u32 * 480);
            assert_eq!(payload, vec![0xAB, 0xCD, 0xEF, 1]);
        }

        transport.stop();

        for expected in 3..8u16 {
            let (sequence, _, payload) = receive(&receiver);
            assert_eq!(sequence, expected);
            assert_eq!(payload, SILENCE_FRAME.to_vec());
        }

        receiver.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let mut buf = [0u8; 2048];
        assert!(receiver.recv(&mut buf).is_err());

        let stats = transport.stats();
        assert_eq!(stats.packets_sent, 8);
        assert_eq!(stats.frames_dropped, 0);
    }

    #[test]
    fn test_failed_encode_drops_frame_and_keeps_clock() {
        let encoder = FailingEncoder { every: 2, calls: 0 };
        let (mut transport, receiver) = transport_with_encoder(true, Box::new(encoder));
        transport.start().unwrap();

        for _ in 0..3 {
            transport.accept(&[0.5; FRAME_SAMPLES]).unwrap();
        }

        let (sequence, timestamp, _) = receive(&receiver);
        assert_eq!((sequence, timestamp), (0, 0));
        // Frame 1 failed to encode: its slot is skipped, not reused
        let (sequence, timestamp, payload) = receive(&receiver);
        assert_eq!((sequence, timestamp), (2, 960));
        assert_eq!(payload, vec![0xAB, 0xCD, 0xEF, 1]);

        transport.stop();
        for expected in 3..8u16 {
            let (sequence, timestamp, payload) = receive(&receiver);
            assert_eq!(sequence, expected);
            assert_eq!(timestamp, expected as u32 * 480);
            assert_eq!(payload, SILENCE_FRAME.to_vec());
        }

        let stats = transport.stats();
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.packets_sent, 7);
    }

    #[test]
    fn test_restart_begins_from_zero() {
        let (mut transport, receiver) = transport_to_receiver(true);

        transport.start().unwrap();
        transport.accept(&[0.5; FRAME_SAMPLES]).unwrap();
        receive(&receiver);
        transport.stop();
        for _ in 0..SILENCE_FRAME_COUNT {
            receive(&receiver);
        }

        transport.start().unwrap();
        transport.accept(&[-0.5; FRAME_SAMPLES]).unwrap();
        let (sequence, timestamp, payload) = receive(&receiver);
        assert_eq!(sequence, 0);
        assert_eq!(timestamp, 0);
        assert_eq!(payload[3], 0);
        transport.stop();
    }

    #[test]
    fn test_packets_are_paced() {
        let (mut transport, receiver) = transport_to_receiver(true);
        transport.start().unwrap();
        let started = Instant::now();

        let frames = [[0.1f32; FRAME_SAMPLES]; 4];
        for frame in &frames {
            transport.accept(frame).unwrap();
        }
        for _ in 0..4 {
            receive(&receiver);
        }

        // Four packets occupy slots 0, 10, 20 and 30ms
        assert!(started.elapsed() >= Duration::from_millis(30));
        transport.stop();
    }

    #[test]
    fn test_accept_after_stop_is_rejected_until_start() {
        let (mut transport, _receiver) = transport_to_receiver(true);
        transport.handoff.release_waiter();
        assert!(matches!(
            transport.accept(&[0.0; FRAME_SAMPLES]),
            Err(AudioError::SinkStopped)
        ));
    }
}
