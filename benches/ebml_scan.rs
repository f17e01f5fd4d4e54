//! Benchmarks for Matroska scanning
//!
//! Measures the EBML walk over synthetic recordings: plain frame iteration,
//! clock offset estimation over vendor-tagged frames, and index building.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use framegrab::mkv::ebml::EbmlReader;
use framegrab::mkv::fixtures::{simple_block, vendor_payload, MkvBuilder};
use framegrab::mkv::MkvSource;
use framegrab::MkvIndex;

const FRAMES_PER_CLUSTER: usize = 25;
const PAYLOAD: [u8; 2048] = [0x42; 2048];

/// `clusters` one-second clusters at 25 fps; every frame carries a vendor
/// clock sample when `vendor` is set.
fn recording(clusters: usize, vendor: bool) -> Vec<u8> {
    let mut builder = MkvBuilder::new();
    for c in 0..clusters {
        let blocks = (0..FRAMES_PER_CLUSTER)
            .map(|f| {
                let relative = (f * 40) as i16;
                let payload = if vendor {
                    let hundredths = (f * 4) as u8;
                    vendor_payload(None, 1_700_000_000 + c as u32, hundredths, &PAYLOAD)
                } else {
                    PAYLOAD.to_vec()
                };
                simple_block(relative, f == 0, &payload)
            })
            .collect();
        builder = builder.cluster(c as u64 * 1000, blocks);
    }
    builder.build()
}

fn bench_element_walk(c: &mut Criterion) {
    let data = recording(60, false);
    let mut group = c.benchmark_group("ebml_walk");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("read_id_size", |b| {
        b.iter(|| {
            let mut r = EbmlReader::new(black_box(&data), 0);
            let mut elements = 0usize;
            while !r.is_at_end() {
                let id = r.read_id();
                let size = r.read_size();
                // Descend into masters, hop over everything else
                if !framegrab::mkv::elements::is_descended(id) {
                    r.skip(size);
                }
                elements += 1;
            }
            elements
        })
    });
    group.finish();
}

fn bench_frame_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_frame");
    for clusters in [10usize, 60, 300] {
        let data = recording(clusters, false);
        group.throughput(Throughput::Elements((clusters * FRAMES_PER_CLUSTER) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(clusters), &data, |b, data| {
            b.iter(|| {
                let mut source = MkvSource::from_bytes(data.as_slice());
                let mut frames = 0usize;
                while let Some(frame) = source.next_frame().unwrap() {
                    black_box(frame.pts);
                    frames += 1;
                }
                frames
            })
        });
    }
    group.finish();
}

fn bench_estimate_offset(c: &mut Criterion) {
    let data = recording(60, true);
    c.bench_function("estimate_offset", |b| {
        b.iter(|| {
            let mut source = MkvSource::from_bytes(black_box(data.as_slice()));
            source.estimate_offset().unwrap()
        })
    });
}

fn bench_index_build(c: &mut Criterion) {
    let data = recording(60, true);
    c.bench_function("mkv_index_build", |b| {
        b.iter(|| {
            let mut source = MkvSource::from_bytes(black_box(data.as_slice()));
            MkvIndex::build(&mut source).unwrap().frames.len()
        })
    });
}

criterion_group!(
    benches,
    bench_element_walk,
    bench_frame_iteration,
    bench_estimate_offset,
    bench_index_build
);
criterion_main!(benches);
