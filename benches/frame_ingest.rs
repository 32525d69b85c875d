use bytes::Bytes;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use ws_gateway::codec::EnvelopeDecoder;
use ws_gateway::core::{FrameKind, FrameReassembler, Reassembly, WsFragment};

fn message_create(content_len: usize) -> Bytes {
    let content = "x".repeat(content_len);
    Bytes::from(format!(
        r#"{{"op":0,"s":42,"t":"MESSAGE_CREATE","d":{{"id":"1","channel_id":"c1","content":"{content}","author":{{"id":"U2","username":"someone"}}}}}}"#
    ))
}

fn bench_reassembly(c: &mut Criterion) {
    let payload = message_create(4096);
    let whole = WsFragment::text(payload.clone());
    let split = WsFragment::split(FrameKind::Text, payload, 512);
    let mut reassembler = FrameReassembler::new(64 * 1024);

    c.bench_function("reassemble_1000_whole_messages", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                black_box(reassembler.accept_fragment(black_box(&whole)));
            }
        })
    });

    c.bench_function("reassemble_1000_split_messages", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                for fragment in &split {
                    if let Reassembly::Complete(message) = reassembler.accept_fragment(fragment) {
                        black_box(message);
                    }
                }
            }
        })
    });
}

fn bench_decode(c: &mut Criterion) {
    let decoder = EnvelopeDecoder::new();
    let small = message_create(64);
    let large = message_create(8192);
    let ack = Bytes::from_static(br#"{"op":11,"d":null}"#);

    c.bench_function("decode_1000_heartbeat_acks", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                let _ = black_box(decoder.decode(black_box(&ack)));
            }
        })
    });

    c.bench_function("decode_1000_small_dispatches", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                let _ = black_box(decoder.decode(black_box(&small)));
            }
        })
    });

    c.bench_function("decode_1000_large_dispatches", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                let _ = black_box(decoder.decode(black_box(&large)));
            }
        })
    });
}

criterion_group!(benches, bench_reassembly, bench_decode);
criterion_main!(benches);
