use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use retrograde_engine::graph::Voice;
use retrograde_engine::{
    EngineConfig, OfflineGraph, ParameterUpdate, ReverseScheduler, SegmentEnvelope,
    SegmentHandle, SegmentRequest, SourceBuffer,
};

const RATE: u32 = 48_000;

fn stereo_source(seconds: usize) -> SourceBuffer {
    let frames = seconds * RATE as usize;
    let left: Vec<f32> = (0..frames)
        .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / RATE as f32).sin() * 0.25)
        .collect();
    let right = left.iter().map(|s| -s).collect();
    SourceBuffer::with_sample_rate(RATE as f32, vec![left, right])
}

fn envelope_evaluation(c: &mut Criterion) {
    let envelope = SegmentEnvelope::compute(1.25, 1.25, 1.0, 0.25);
    let curve = envelope.gain_curve();
    c.bench_function("gain_curve_one_segment_48k", |b| {
        b.iter(|| {
            let mut acc = 0.0f32;
            for frame in 0..60_000 {
                acc += curve.value_at(black_box(frame as f64 / RATE as f64));
            }
            acc
        });
    });
}

fn voice_mixing(c: &mut Criterion) {
    let source = stereo_source(4);
    let envelope = SegmentEnvelope::compute(1.25, 1.25, 1.0, 0.25);
    let voice = Voice::new(
        SegmentHandle::new(1),
        SegmentRequest::new(source.window(2.0, 1.25), 2.0, 0.0, envelope),
    );
    let mut block = vec![0.0f32; 256 * 2];
    c.bench_function("voice_mix_block256_stereo", |b| {
        let mut block_start = 0.0;
        b.iter(|| {
            block.iter_mut().for_each(|s| *s = 0.0);
            voice.mix_interleaved(&mut block, 2, block_start, RATE as f64);
            block_start = (block_start + 256.0 / RATE as f64) % 1.25;
        });
    });
}

fn offline_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("offline");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    let source = stereo_source(8);
    group.bench_function("reverse_8s_stereo", |b| {
        b.iter(|| {
            let graph = Arc::new(OfflineGraph::new(RATE, 2));
            let scheduler =
                ReverseScheduler::new(graph.clone(), graph.clone(), EngineConfig::default());
            scheduler
                .start(
                    source.clone(),
                    &ParameterUpdate::new()
                        .with_start_position(8.0)
                        .with_speed(1.5),
                )
                .expect("start");
            scheduler.join();
            graph.render()
        });
    });

    group.finish();
}

criterion_group!(benches, envelope_evaluation, voice_mixing, offline_render);
criterion_main!(benches);
