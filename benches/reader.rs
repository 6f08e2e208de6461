use commitlog::buffer::op;
use commitlog::{Buffer, Chunk};
use criterion::{criterion_group, criterion_main, Criterion};

fn dense_buffer(n: u32) -> Buffer {
    let mut buf = Buffer::new("bench_col");
    for i in 0..n {
        buf.put_i64(op::PUT, i, i as i64);
    }
    buf
}

fn bench_encode(c: &mut Criterion) {
    const N: u32 = 1_000_000;
    let mut group = c.benchmark_group("buffer_encode");
    group.throughput(criterion::Throughput::Elements(N as u64));
    group.bench_function("put_i64_dense_1M", |b| {
        b.iter(|| {
            let mut buf = Buffer::new("bench_col");
            for i in 0..N {
                buf.put_i64(op::PUT, i, std::hint::black_box(i as i64));
            }
            std::hint::black_box(&buf);
        })
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    const N: u32 = 1_000_000;
    let mut buf = dense_buffer(N);
    let mut group = c.benchmark_group("buffer_decode");
    group.throughput(criterion::Throughput::Elements(N as u64));
    group.bench_function("next_scan_1M", |b| {
        b.iter(|| {
            let mut reader = commitlog::Reader::seek(&mut buf);
            let mut sum = 0i64;
            while reader.next() {
                sum = sum.wrapping_add(reader.int64());
            }
            std::hint::black_box(sum);
        })
    });
    group.finish();
}

fn bench_codec_round_trip(c: &mut Criterion) {
    const N: u32 = 100_000;
    let buf = dense_buffer(N);
    let mut group = c.benchmark_group("buffer_codec");
    group.throughput(criterion::Throughput::Elements(N as u64));
    group.bench_function("write_then_read_100k", |b| {
        b.iter(|| {
            let mut wire = Vec::new();
            buf.write_to(&mut wire).unwrap();
            let decoded = Buffer::read_from(&mut wire.as_slice()).unwrap();
            std::hint::black_box(decoded);
        })
    });
    group.finish();
}

fn bench_range(c: &mut Criterion) {
    const N: u32 = 1_000_000;
    let mut buf = dense_buffer(N);
    let mut group = c.benchmark_group("buffer_range");
    group.throughput(criterion::Throughput::Elements(N as u64));
    group.bench_function("range_first_chunk_1M", |b| {
        b.iter(|| {
            let mut count = 0u32;
            commitlog::reader::range(&mut buf, Chunk(0), |r| {
                while r.next() {
                    count += 1;
                }
            });
            std::hint::black_box(count);
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_codec_round_trip,
    bench_range
);
criterion_main!(benches);
