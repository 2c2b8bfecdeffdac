//! End-to-end: a WAV file through the mixing engine and the voice transport
//! to a loopback "voice server" that answers discovery and collects packets.

use std::net::UdpSocket;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use voice_file_mixer::config::AppConfig;
use voice_file_mixer::constants::{SILENCE_FRAME, SILENCE_FRAME_COUNT};
use voice_file_mixer::mixer::MixingEngine;
use voice_file_mixer::network::discovery::{build_request, DISCOVERY_PACKET_LEN};
use voice_file_mixer::network::packet::open_packet;
use voice_file_mixer::network::{RemoteVoiceTransport, SecretBox, VoiceSession};

const SSRC: u32 = 0x00C0_FFEE;
const KEY: [u8; 32] = [0x11; 32];

fn write_tone(path: &Path, frames: usize) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let t = i as f32 / 48_000.0;
        let sample = ((t * 440.0 * std::f32::consts::TAU).sin() * 8_000.0) as i16;
        writer.write_sample(sample).unwrap();
        writer.write_sample(-sample).unwrap();
    }
    writer.finalize().unwrap();
}

/// Answer one discovery request, then collect voice packets until quiet
fn run_server(server: UdpSocket) -> Vec<Vec<u8>> {
    let mut buf = [0u8; 2048];
    let (len, from) = server.recv_from(&mut buf).unwrap();
    assert_eq!(len, DISCOVERY_PACKET_LEN);
    assert_eq!(&buf[..len], &build_request(SSRC)[..]);

    let mut response = [0u8; DISCOVERY_PACKET_LEN];
    response[4..13].copy_from_slice(b"127.0.0.1");
    response[68..].copy_from_slice(&from.port().to_le_bytes());
    server.send_to(&response, from).unwrap();

    server.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
    let mut packets = Vec::new();
    while let Ok((len, _)) = server.recv_from(&mut buf) {
        packets.push(buf[..len].to_vec());
    }
    packets
}

#[test]
fn test_file_streams_to_voice_server() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("tone.wav");
    write_tone(&wav, 4_800); // ten frames

    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = server.local_addr().unwrap().port();
    let collector = thread::spawn(move || run_server(server));

    let key: Vec<String> = KEY.iter().map(|b| b.to_string()).collect();
    let session = Arc::new(
        VoiceSession::from_json(&format!(
            r#"{{"ssrc": {}, "host": "127.0.0.1", "port": {}, "secret_key": [{}]}}"#,
            SSRC,
            port,
            key.join(",")
        ))
        .unwrap(),
    );

    let transport = RemoteVoiceTransport::connect(session, &AppConfig::default()).unwrap();
    let local = transport.discover_local_address(Duration::from_secs(2)).unwrap();
    assert_eq!(local.ip().to_string(), "127.0.0.1");

    let (engine, handle) = MixingEngine::new(Box::new(transport));
    let engine_thread = engine.spawn().unwrap();
    handle.play(&wav, 1.0, false).unwrap();

    let packets = collector.join().unwrap();
    handle.shutdown();
    engine_thread.join().unwrap();

    let cipher = SecretBox::new(&KEY).unwrap();
    let opened: Vec<_> = packets
        .iter()
        .map(|packet| open_packet(packet, &cipher).unwrap())
        .collect();

    // Ten full frames, possibly one trailing zero-filled frame, then the flush
    assert!(
        (10 + SILENCE_FRAME_COUNT..=11 + SILENCE_FRAME_COUNT).contains(&opened.len()),
        "got {} packets",
        opened.len()
    );
    for (index, (header, _)) in opened.iter().enumerate() {
        assert_eq!(header.ssrc, SSRC);
        assert_eq!(header.sequence as usize, index);
        assert_eq!(header.timestamp as usize, index * 480);
    }

    let (audio, silence) = opened.split_at(opened.len() - SILENCE_FRAME_COUNT);
    // The tone frames; a trailing zero-filled frame may legitimately encode tiny
    assert!(audio[..10].iter().all(|(_, payload)| payload.len() > SILENCE_FRAME.len()));
    assert!(silence.iter().all(|(_, payload)| payload[..] == SILENCE_FRAME));
}

#[test]
fn test_missing_file_is_reported_to_caller() {
    let (engine, handle) = MixingEngine::new(Box::new(NullSink));
    let engine_thread = engine.spawn().unwrap();

    assert!(handle.play("/nonexistent/file.mp3", 1.0, false).is_err());
    assert!(handle.tracks().unwrap().is_empty());

    handle.shutdown();
    engine_thread.join().unwrap();
}

struct NullSink;

impl voice_file_mixer::audio::PlaybackSink for NullSink {
    fn start(&mut self) -> voice_file_mixer::Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn accept(&mut self, _frame: &[f32]) -> Result<(), voice_file_mixer::error::AudioError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}
