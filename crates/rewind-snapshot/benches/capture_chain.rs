#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
#[cfg(not(target_arch = "wasm32"))]
use rewind_snapshot::{Snapshot, SnapshotChain};

#[cfg(not(target_arch = "wasm32"))]
fn criterion_config() -> Criterion {
    match std::env::var("REWIND_BENCH_PROFILE").as_deref() {
        Ok("ci") => Criterion::default()
            .warm_up_time(Duration::from_millis(150))
            .measurement_time(Duration::from_millis(400))
            .sample_size(10)
            .noise_threshold(0.05),
        _ => Criterion::default()
            .warm_up_time(Duration::from_secs(1))
            .measurement_time(Duration::from_secs(2))
            .sample_size(50)
            .noise_threshold(0.03),
    }
}

#[cfg(not(target_arch = "wasm32"))]
const STATE_LEN: usize = 192 * 1024;

/// Emulate one frame: touch a handful of RAM bytes and the frame counter.
#[cfg(not(target_arch = "wasm32"))]
fn step(state: &mut [u8], frame: u64) {
    state[..8].copy_from_slice(&frame.to_le_bytes());
    for k in 0..64u64 {
        let at = 8 + ((frame * 131 + k * 2_971) as usize % (STATE_LEN - 8));
        state[at] = state[at].wrapping_add(1);
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_capture(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    group.throughput(Throughput::Bytes(STATE_LEN as u64));

    group.bench_function("capture_per_frame", |b| {
        let mut chain = SnapshotChain::new();
        let mut state = vec![0u8; STATE_LEN];
        let mut frame = 0u64;
        let mut head: Option<Snapshot> = None;
        b.iter(|| {
            frame += 1;
            step(&mut state, frame);
            let next = chain
                .capture_bytes(black_box(&state), head.as_mut())
                .unwrap();
            if let Some(prev) = head.replace(next) {
                chain.release(prev).unwrap();
            }
        });
        black_box(chain.footprint());
    });

    group.bench_function("restore_oldest_of_50", |b| {
        b.iter_batched(
            || {
                let mut chain = SnapshotChain::new();
                let mut state = vec![0u8; STATE_LEN];
                let mut snapshots: Vec<Snapshot> = Vec::new();
                for frame in 0..50 {
                    step(&mut state, frame);
                    let s = chain.capture_bytes(&state, snapshots.last_mut()).unwrap();
                    snapshots.push(s);
                }
                (chain, snapshots)
            },
            |(mut chain, snapshots)| {
                let bytes = chain.state_bytes(&snapshots[0]).unwrap();
                black_box(bytes.len());
            },
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_capture
}
#[cfg(not(target_arch = "wasm32"))]
criterion_main!(benches);
