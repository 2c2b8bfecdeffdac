//! Mix Path Benchmark
//!
//! Per-frame cost of the work done every 10ms: mixing tracks into a frame
//! and sealing a voice packet. Both must stay far below the frame period.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use voice_file_mixer::audio::DecodedAudioBuffer;
use voice_file_mixer::constants::{FRAME_SAMPLES, FRAME_SIZE};
use voice_file_mixer::network::packet::{seal_packet, RtpHeader};
use voice_file_mixer::network::SecretBox;

const DECODE_CHUNK: usize = 1024;

fn bench_mix_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("mix_frame");
    let left = vec![0.3f32; DECODE_CHUNK];
    let right = vec![-0.3f32; DECODE_CHUNK];

    for tracks in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(tracks), &tracks, |b, &tracks| {
            let mut buffers: Vec<DecodedAudioBuffer> = (0..tracks)
                .map(|_| DecodedAudioBuffer::new(DecodedAudioBuffer::capacity_for(DECODE_CHUNK)))
                .collect();
            let mut output = [0.0f32; FRAME_SAMPLES];

            b.iter(|| {
                for (index, buffer) in buffers.iter_mut().enumerate() {
                    if buffer.available() < FRAME_SIZE {
                        buffer.write(&left, &right);
                    }
                    buffer.read(&mut output, FRAME_SIZE, 0.7, index > 0);
                }
                black_box(&output);
            });
        });
    }

    group.finish();
}

fn bench_seal_packet(c: &mut Criterion) {
    let cipher = SecretBox::new(&[7u8; 32]).unwrap();
    let payload = vec![0x5Au8; 320]; // typical 128kbps stereo frame
    let mut packet = BytesMut::with_capacity(1472);
    let mut header = RtpHeader {
        sequence: 0,
        timestamp: 0,
        ssrc: 0x1234_5678,
    };

    c.bench_function("seal_packet", |b| {
        b.iter(|| {
            seal_packet(&mut packet, &header, black_box(&payload), &cipher).unwrap();
            header.sequence = header.sequence.wrapping_add(1);
            header.timestamp = header.timestamp.wrapping_add(FRAME_SIZE as u32);
            black_box(&packet);
        });
    });
}

criterion_group!(benches, bench_mix_frame, bench_seal_packet);
criterion_main!(benches);
