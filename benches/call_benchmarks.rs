//! Performance benchmarks for the voice call client
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::Duration;
use voice_call::core::control::{ClientEvent, ControlCodec, ConversationItem, SessionConfig};
use voice_call::core::transport::audio::{linear_to_ulaw, resample_linear};
use voice_call::core::turn::{TurnBook, TurnContext, TurnEvent, plan};

/// Benchmark inbound control frame decoding
fn bench_control_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("control_decode");
    group.measurement_time(Duration::from_secs(5));

    let codec = ControlCodec::new();

    let speech_stopped =
        r#"{"type":"input_audio_buffer.speech_stopped","event_id":"event_1","audio_end_ms":1840,"item_id":"item_1"}"#;

    let transcript_delta = format!(
        r#"{{"type":"response.audio_transcript.delta","item_id":"item_2","delta":"{}"}}"#,
        "Sure, here is the forecast. ".repeat(4)
    );

    // Type this client ignores
    let rate_limits = r#"{"type":"rate_limits.updated","rate_limits":[{"name":"requests","limit":1000,"remaining":999,"reset_seconds":0.06}]}"#;

    let malformed = r#"{"type": "response.done", "response": "#;

    for (name, frame) in [
        ("speech_stopped", speech_stopped.to_string()),
        ("transcript_delta", transcript_delta),
        ("ignored_type", rate_limits.to_string()),
        ("malformed", malformed.to_string()),
    ] {
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::new(name, frame.len()), &frame, |b, frame| {
            b.iter(|| codec.decode(black_box(frame)));
        });
    }

    group.finish();
}

/// Benchmark outbound control frame encoding
fn bench_control_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("control_encode");
    let codec = ControlCodec::new();

    let session_update = ClientEvent::SessionUpdate {
        session: SessionConfig::default(),
    };
    let item = ClientEvent::ConversationItemCreate {
        item: ConversationItem::user_text("What's on my calendar tomorrow?"),
    };

    group.bench_function("session_update", |b| {
        b.iter(|| codec.encode(black_box(&session_update)));
    });
    group.bench_function("conversation_item", |b| {
        b.iter(|| codec.encode(black_box(&item)));
    });
    group.bench_function("response_create", |b| {
        b.iter(|| codec.encode(black_box(&ClientEvent::ResponseCreate)));
    });

    group.finish();
}

/// Benchmark the turn planning table
fn bench_turn_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("turn_plan");

    let book = TurnBook::default();
    let live = TurnContext {
        usable: true,
        paused: false,
    };
    let paused = TurnContext {
        usable: true,
        paused: true,
    };

    group.bench_function("speech_stopped_live", |b| {
        b.iter(|| plan(black_box(&book), live, black_box(&TurnEvent::SpeechStopped)));
    });
    group.bench_function("speech_stopped_paused", |b| {
        b.iter(|| plan(black_box(&book), paused, black_box(&TurnEvent::SpeechStopped)));
    });

    group.finish();
}

/// Benchmark per-frame audio conversion
fn bench_audio_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_frames");

    // 20ms at 24kHz
    let frame: Vec<i16> = (0..480).map(|i| ((i * 97) % 20000 - 10000) as i16).collect();

    group.throughput(Throughput::Elements(frame.len() as u64));
    group.bench_function("resample_24k_to_8k", |b| {
        b.iter(|| resample_linear(black_box(&frame), 24000, 8000));
    });
    group.bench_function("ulaw_encode", |b| {
        b.iter(|| {
            black_box(&frame)
                .iter()
                .map(|s| linear_to_ulaw(*s))
                .collect::<Vec<u8>>()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_control_decode,
    bench_control_encode,
    bench_turn_plan,
    bench_audio_frames,
);
criterion_main!(benches);
