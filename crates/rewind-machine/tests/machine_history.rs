use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rewind_machine::{
    FddState, MachineState, Rom, SnapshotHistory, SnapshotKey, BANK_COUNT, BANK_LEN, ROM_LEN,
};
use rewind_snapshot::{decode_from_slice, encode_to_vec, encoded_len_of};

fn powered_on() -> MachineState {
    let mut state = MachineState::default();
    state.frequency = 4_000_000;
    state.memory.lower_rom = Rom::new([0x3E; ROM_LEN]);
    state.memory.upper_roms.insert(0, Rom::new([0x01; ROM_LEN]));
    state.memory.upper_roms.insert(7, Rom::new([0x07; ROM_LEN]));
    state.screen_height = 32;
    state.screen_pitch = 64;
    state.screen = vec![0; 32 * 64];
    state.fdc.drives[0].disk_image = Some(vec![0xE5; 4096]);
    state
}

/// Run the machine for one "frame": registers move, a few RAM bytes and screen bytes change.
fn run_frame(rng: &mut StdRng, state: &mut MachineState) {
    state.ticks += 79_872;
    state.z80.pc = rng.gen();
    state.z80.af = rng.gen();
    state.crtc.v_count = rng.gen();
    state.psg.registers[rng.gen_range(0..16)] = rng.gen();
    for _ in 0..rng.gen_range(1..64) {
        let bank = rng.gen_range(0..BANK_COUNT);
        let at = rng.gen_range(0..BANK_LEN);
        state.memory.banks[bank].bytes_mut()[at] = rng.gen();
    }
    for _ in 0..rng.gen_range(0..32) {
        let at = rng.gen_range(0..state.screen.len());
        state.screen[at] = rng.gen();
    }
    if rng.gen_ratio(1, 50) {
        state.fdc.drives[1].disk_image = match state.fdc.drives[1].disk_image {
            Some(_) => None,
            None => Some(vec![rng.gen(); 2048]),
        };
    }
}

#[test]
fn rewinding_one_second_of_frames() {
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let mut history = SnapshotHistory::default();
    let mut state = powered_on();
    let mut expected = Vec::new();

    for _ in 0..50 {
        run_frame(&mut rng, &mut state);
        let key = history.capture(&state).unwrap();
        expected.push((key, state.clone()));
    }

    let full = encoded_len_of(&state) * expected.len();
    assert!(history.footprint() * 10 < full);

    for (key, state) in expected.iter().rev().step_by(7) {
        assert_eq!(&history.state_of(*key).unwrap(), state);
    }
    for (key, state) in &expected {
        assert_eq!(&history.state_of(*key).unwrap(), state);
    }
}

#[test]
fn revert_then_diverge_keeps_both_timelines() {
    let mut rng = StdRng::seed_from_u64(99);
    let mut history = SnapshotHistory::default();
    let mut state = powered_on();
    let mut timeline = Vec::new();

    for _ in 0..10 {
        run_frame(&mut rng, &mut state);
        timeline.push((history.capture(&state).unwrap(), state.clone()));
    }

    let (branch_point, _) = timeline[3];
    let mut branch_state = history.revert_to_snapshot(branch_point).unwrap();
    let mut branch = Vec::new();
    for _ in 0..10 {
        run_frame(&mut rng, &mut branch_state);
        branch.push((history.capture(&branch_state).unwrap(), branch_state.clone()));
    }

    for (key, state) in timeline.iter().chain(branch.iter()) {
        assert_eq!(&history.state_of(*key).unwrap(), state);
    }
}

#[test]
fn deleting_old_snapshots_bounds_the_footprint() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut history = SnapshotHistory::default();
    let mut state = powered_on();

    let mut peak = 0;
    for frame in 0..60u64 {
        run_frame(&mut rng, &mut state);
        history.create_snapshot(SnapshotKey(frame), &state).unwrap();
        if frame >= 10 {
            history.delete_snapshot(SnapshotKey(frame - 10)).unwrap();
        }
        if frame == 20 {
            peak = history.footprint();
        }
    }
    assert_eq!(history.len(), 10);
    assert_eq!(history.chain().blob_count(), 10);
    // The window is the same size; only the deltas' contents differ.
    assert!(history.footprint() < peak * 2);
    assert_eq!(history.state_of(SnapshotKey(59)).unwrap(), state);
}

#[test]
fn machine_state_layout_is_stable() {
    let state = powered_on();
    let bytes = encode_to_vec(&state).unwrap();
    assert_eq!(bytes.len(), encoded_len_of(&state));
    // Z80 registers lead the buffer; the screen is the final length-prefixed field.
    assert_eq!(&bytes[..2], &[0, 0]);
    let screen_at = bytes.len() - state.screen.len() - 8;
    assert_eq!(&bytes[screen_at..screen_at + 8], &(32u64 * 64).to_le_bytes());
    assert_eq!(decode_from_slice::<MachineState>(&bytes).unwrap(), state);
}

fn fdd_strategy() -> impl Strategy<Value = FddState> {
    (
        any::<u8>(),
        any::<u64>(),
        proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
    )
        .prop_map(|(current_sector, current_track, disk_image)| FddState {
            current_sector,
            current_track,
            disk_image,
        })
}

proptest! {
    #[test]
    fn fdd_state_roundtrips(fdd in fdd_strategy()) {
        let bytes = encode_to_vec(&fdd).unwrap();
        prop_assert_eq!(bytes.len(), encoded_len_of(&fdd));
        prop_assert_eq!(decode_from_slice::<FddState>(&bytes).unwrap(), fdd);
    }

    #[test]
    fn truncated_machine_state_never_panics(cut in 0usize..200_000) {
        let bytes = encode_to_vec(&powered_on()).unwrap();
        let cut = cut.min(bytes.len() - 1);
        prop_assert!(decode_from_slice::<MachineState>(&bytes[..cut]).is_err());
    }
}
