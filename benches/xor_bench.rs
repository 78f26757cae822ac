use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ftbackup::block::Baseline;
use ftbackup::xor::{xor_assign, WriterXorState};

fn bench_xor_assign(c: &mut Criterion) {
    let body_len = 32768 - 40 - 20;
    let src = vec![0xA5u8; body_len];
    let mut dst = vec![0u8; body_len];
    c.bench_function("xor_assign_32k_body", |b| {
        b.iter(|| xor_assign(black_box(&mut dst), black_box(&src)))
    });
}

fn bench_span_accumulate(c: &mut Criterion) {
    let baseline = Baseline { l2bs: 15, xorgc: 2, xorsc: 31 };
    let body_len = 32768 - 40 - 20;
    let body = vec![0x3Cu8; body_len];
    c.bench_function("accumulate_full_span", |b| {
        b.iter(|| {
            let mut w = WriterXorState::new(baseline, body_len);
            for seqno in 1..=baseline.span_data_blocks() {
                w.accumulate(seqno, black_box(&body));
            }
            black_box(w.close_span())
        })
    });
}

criterion_group!(benches, bench_xor_assign, bench_span_accumulate);
criterion_main!(benches);
