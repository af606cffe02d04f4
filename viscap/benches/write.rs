//! Microbenchmarks for the per-sample write path.
//!
//! Compares the structured and raw-offset strategies on identical files.
//!
//! Run with: `cargo bench -p viscap -- write`

#![allow(missing_docs, clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use std::collections::BTreeMap;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tempfile::tempdir;
use viscap::axes::{Complex32, FreqChannel, InputDesc, Product, TimeSample};
use viscap::{SamplePayload, SampleWriter, WriterKind};

const NUM_INPUTS: u16 = 16;
const NUM_FREQ: usize = 8;
const TIME_CAPACITY: u32 = 1 << 16;

fn setup_writer(kind: WriterKind, dir: &std::path::Path) -> SampleWriter {
    let mut metadata = BTreeMap::new();
    metadata.insert("weight_type".to_string(), "inverse_var".to_string());

    let freqs: Vec<FreqChannel> = (0..NUM_FREQ)
        .map(|i| FreqChannel {
            centre: 800.0 - i as f64 * 0.4,
            width: 0.4,
        })
        .collect();
    let inputs: Vec<InputDesc> = (0..NUM_INPUTS)
        .map(|i| InputDesc::new(i, &format!("inp{i:04}")))
        .collect();
    let mut prods = Vec::new();
    for a in 0..NUM_INPUTS {
        for b in a..NUM_INPUTS {
            prods.push(Product {
                input_a: a,
                input_b: b,
            });
        }
    }

    SampleWriter::create(
        kind,
        dir.join(format!("bench_{}.vis", kind.as_str())),
        &metadata,
        &freqs,
        &inputs,
        &prods,
        0,
        TIME_CAPACITY,
    )
    .unwrap()
}

fn bench_write_sample(c: &mut Criterion) {
    let nprod = (NUM_INPUTS as usize * (NUM_INPUTS as usize + 1)) / 2;
    let vis = vec![Complex32::new(1.5, -0.5); nprod];
    let weight = vec![1.0f32; nprod];
    let gain_coeff = vec![Complex32::new(1.0, 0.0); NUM_INPUTS as usize];
    let gain_exp = vec![0i32; NUM_INPUTS as usize];

    let mut group = c.benchmark_group("write_sample");
    for kind in [WriterKind::Structured, WriterKind::Raw] {
        let dir = tempdir().unwrap();
        let mut writer = setup_writer(kind, dir.path());
        writer
            .extend_time(TimeSample { seq: 0, ctime: 0.0 })
            .unwrap();
        let mut freq = 0u32;

        group.bench_with_input(BenchmarkId::from_parameter(kind.as_str()), &kind, |b, _| {
            b.iter(|| {
                writer
                    .write_sample(
                        black_box(0),
                        black_box(freq),
                        &SamplePayload {
                            vis: &vis,
                            weight: &weight,
                            gain_coeff: &gain_coeff,
                            gain_exp: &gain_exp,
                            eigen: None,
                        },
                    )
                    .unwrap();
                freq = (freq + 1) % NUM_FREQ as u32;
            });
        });
    }
    group.finish();
}

fn bench_extend_time(c: &mut Criterion) {
    let mut group = c.benchmark_group("extend_time");
    for kind in [WriterKind::Structured, WriterKind::Raw] {
        let dir = tempdir().unwrap();
        let mut writer = setup_writer(kind, dir.path());
        let mut seq = 0u64;

        group.bench_with_input(BenchmarkId::from_parameter(kind.as_str()), &kind, |b, _| {
            b.iter(|| {
                // Recreate once the preallocated time axis fills up.
                if writer.num_time() == TIME_CAPACITY {
                    writer = setup_writer(kind, dir.path());
                    seq = 0;
                }
                seq += 1;
                writer
                    .extend_time(black_box(TimeSample {
                        seq,
                        ctime: seq as f64,
                    }))
                    .unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_write_sample, bench_extend_time);
criterion_main!(benches);
