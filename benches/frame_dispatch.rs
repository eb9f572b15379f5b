use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use pitchscope::PitchAlgorithm;
use pitchscope::audio::format::AudioFormat;
use pitchscope::dispatch::{FrameGeometry, OverlapFrameBuffer};
use pitchscope::processors::pitch::PitchEstimator;
use std::f32::consts::TAU;
use std::hint::black_box;

const SAMPLE_RATE: u32 = 44_100;

/// A 440 Hz tone of `len` samples
fn tone(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.8 * (TAU * 440.0 * i as f32 / SAMPLE_RATE as f32).sin())
        .collect()
}

/// Feed a second of audio through the overlap buffer in capture-sized chunks
fn bench_overlap_buffer(c: &mut Criterion) {
    let samples = tone(SAMPLE_RATE as usize);
    let format = AudioFormat::pcm16(SAMPLE_RATE);
    let mut group = c.benchmark_group("overlap_buffer");
    group.throughput(Throughput::Elements(samples.len() as u64));

    for (size, overlap) in [(1024, 512), (4096, 3072), (8192, 7168)] {
        let Ok(geometry) = FrameGeometry::new(size, overlap) else {
            continue;
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}/{}", size, overlap)),
            &geometry,
            |b, &geometry| {
                b.iter(|| {
                    let mut buffer = OverlapFrameBuffer::new(geometry, format);
                    let mut frames = 0usize;
                    for chunk in samples.chunks(1024) {
                        let mut rest = chunk;
                        while !rest.is_empty() {
                            let (consumed, frame) = buffer.push(rest);
                            if let Some(frame) = frame {
                                frames += black_box(frame.len());
                            }
                            rest = &rest[consumed..];
                        }
                    }
                    if let Some(frame) = buffer.finish() {
                        frames += frame.len();
                    }
                    frames
                })
            },
        );
    }
    group.finish();
}

/// One estimate per algorithm on a default-sized frame
fn bench_estimators(c: &mut Criterion) {
    let frame = tone(4096);
    let mut group = c.benchmark_group("pitch_estimate");

    for algorithm in PitchAlgorithm::ALL {
        let mut estimator = PitchEstimator::new(algorithm, SAMPLE_RATE, frame.len());
        group.bench_function(BenchmarkId::from_parameter(algorithm), |b| {
            b.iter(|| estimator.estimate(black_box(&frame)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_overlap_buffer, bench_estimators);
criterion_main!(benches);
