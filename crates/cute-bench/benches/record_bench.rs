//! Outcome channel framing benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use cute_core::{ChannelSummary, FailureRecord, Phase, Record, RecordDecoder, Verdict};

fn failure(i: usize) -> Record {
    Record::Failure(FailureRecord {
        expression: format!("buffer[{i}] == expected[{i}]"),
        file: "tests/buffer.rs".to_string(),
        line: 40 + i as u32,
        function: "buffer::compares_every_byte".to_string(),
        message: format!("`buffer[{i}]` expected equal 7, found {i}"),
        fatal: false,
    })
}

fn stream(failures: usize) -> Vec<u8> {
    let mut bytes = Record::Phase { phase: Phase::Exec }.encode().unwrap_or_default();
    for i in 0..failures {
        bytes.extend(failure(i).encode().unwrap_or_default());
    }
    bytes.extend(
        Record::Terminal {
            verdict: Verdict::Fail,
        }
        .encode()
        .unwrap_or_default(),
    );
    bytes
}

fn bench_encode(c: &mut Criterion) {
    let record = failure(3);
    c.bench_function("record_encode_failure", |b| {
        b.iter(|| black_box(black_box(&record).encode()));
    });
}

fn bench_decode_stream(c: &mut Criterion) {
    let counts: &[usize] = &[0, 8, 64, 512];
    let mut group = c.benchmark_group("record_decode_stream");

    for &count in counts {
        let bytes = stream(count);
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("whole", count), &bytes, |b, bytes| {
            b.iter(|| {
                let mut summary = ChannelSummary::default();
                if let Ok(records) = RecordDecoder::new().feed(bytes) {
                    summary.absorb_all(records);
                }
                black_box(summary);
            });
        });
        // Pipe reads arrive in arbitrary chunks.
        group.bench_with_input(BenchmarkId::new("chunked_61", count), &bytes, |b, bytes| {
            b.iter(|| {
                let mut decoder = RecordDecoder::new();
                let mut summary = ChannelSummary::default();
                for chunk in bytes.chunks(61) {
                    if let Ok(records) = decoder.feed(chunk) {
                        summary.absorb_all(records);
                    }
                }
                black_box(summary);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode_stream);
criterion_main!(benches);
