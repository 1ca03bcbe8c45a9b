use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rewind_snapshot::{
    read_state, write_state, BlobState, Compression, ReadOptions, SaveOptions, Snapshot,
    SnapshotChain,
};

fn mutate(rng: &mut StdRng, state: &mut Vec<u8>) {
    match rng.gen_range(0..10) {
        // Occasionally the state grows or shrinks (a disk image inserted or ejected).
        0 => {
            let extra = rng.gen_range(1..512);
            state.extend((0..extra).map(|_| rng.gen::<u8>()));
        }
        1 if state.len() > 1024 => {
            let cut = rng.gen_range(1..512);
            state.truncate(state.len() - cut);
        }
        _ => {
            for _ in 0..rng.gen_range(0..32) {
                let at = rng.gen_range(0..state.len());
                state[at] = rng.gen();
            }
        }
    }
}

#[test]
fn random_linear_history_restores_every_snapshot() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut chain = SnapshotChain::new();
    let mut state = vec![0u8; 16 * 1024];
    let mut expected = Vec::new();
    let mut snapshots: Vec<Snapshot> = Vec::new();

    for _ in 0..200 {
        mutate(&mut rng, &mut state);
        let snapshot = chain.capture_bytes(&state, snapshots.last_mut()).unwrap();
        snapshots.push(snapshot);
        expected.push(state.clone());
    }

    let full: usize = expected.iter().map(Vec::len).sum();
    assert!(
        chain.footprint() * 4 < full,
        "footprint {} should be far below {} raw bytes",
        chain.footprint(),
        full
    );

    for _ in 0..100 {
        let i = rng.gen_range(0..snapshots.len());
        assert_eq!(chain.state_bytes(&snapshots[i]).unwrap(), expected[i].as_slice());
        assert_eq!(chain.logical_size(&snapshots[i]).unwrap(), expected[i].len());
    }
}

#[test]
fn trimming_old_snapshots_keeps_newer_ones_restorable() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut chain = SnapshotChain::new();
    let mut state = vec![0u8; 4096];
    let mut window: Vec<(Snapshot, Vec<u8>)> = Vec::new();

    for _ in 0..300 {
        mutate(&mut rng, &mut state);
        let previous = window.last_mut().map(|(s, _)| s);
        let snapshot = chain.capture_bytes(&state, previous).unwrap();
        window.push((snapshot, state.clone()));
        if window.len() > 20 {
            let (oldest, _) = window.remove(0);
            chain.release(oldest).unwrap();
        }
    }

    assert_eq!(chain.blob_count(), 20);
    for (snapshot, bytes) in window.iter().rev() {
        assert_eq!(chain.state_bytes(snapshot).unwrap(), bytes.as_slice());
    }
}

#[test]
fn releasing_a_middle_snapshot_defers_reclamation() {
    let mut chain = SnapshotChain::new();
    let states: Vec<Vec<u8>> = (0u8..4).map(|i| vec![i; 64]).collect();
    let mut snapshots: Vec<Snapshot> = Vec::new();
    for state in &states {
        let snapshot = chain.capture_bytes(state, snapshots.last_mut()).unwrap();
        snapshots.push(snapshot);
    }

    let s3 = snapshots.pop().unwrap();
    let s2 = snapshots.pop().unwrap();
    let s1 = snapshots.pop().unwrap();
    let s0 = snapshots.pop().unwrap();

    chain.release(s2).unwrap();
    assert_eq!(chain.blob_count(), 4);
    assert_eq!(chain.state_bytes(&s1).unwrap(), states[1].as_slice());

    // s1 was rehydrated, so nothing depends on s2 anymore.
    assert_eq!(chain.blob_count(), 3);
    assert_eq!(chain.state_bytes(&s0).unwrap(), states[0].as_slice());
    assert_eq!(chain.state_bytes(&s3).unwrap(), states[3].as_slice());

    chain.release(s0).unwrap();
    chain.release(s1).unwrap();
    chain.release(s3).unwrap();
    assert_eq!(chain.blob_count(), 0);
}

#[test]
fn head_bytes_survive_a_container_roundtrip() {
    let mut chain = SnapshotChain::new();
    let mut s1 = chain.capture_bytes(&[3u8; 1000], None).unwrap();
    let s2 = chain.capture_bytes(&[4u8; 1000], Some(&mut s1)).unwrap();
    assert_eq!(chain.blobs().state(s1.blob()).unwrap(), BlobState::Diffed);

    for compression in [Compression::None, Compression::Lz4, Compression::Rle] {
        let mut file = Vec::new();
        let bytes = chain.state_bytes(&s1).unwrap().to_vec();
        write_state(&mut file, &bytes, SaveOptions { compression }).unwrap();
        let loaded = read_state(&mut file.as_slice(), ReadOptions::default()).unwrap();
        assert_eq!(loaded, bytes);
    }
    assert_eq!(chain.state_bytes(&s2).unwrap(), [4u8; 1000]);
}
