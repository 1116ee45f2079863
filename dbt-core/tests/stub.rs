use dbt_asm::TargetIsa;
use dbt_core::stub::{exit_cti_reaches, patch_stub, StubState, STUB_BYTES};

#[test]
fn aarch64_near_link_within_b_range() {
    let mut buf = vec![0u8; STUB_BYTES];
    let stub_pc = 0x30000000u64;
    let target = 0x30001000u64;
    assert!(exit_cti_reaches(TargetIsa::Aarch64, stub_pc, target));

    let state = patch_stub(TargetIsa::Aarch64, &mut buf, stub_pc, target, false).unwrap();
    assert_eq!(state, StubState::NearLinked);
    let word = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    assert_eq!(word, 0x14000000 | 0x400);
}

#[test]
fn aarch64_far_link_outside_b_range() {
    let mut buf = vec![0u8; STUB_BYTES];
    let stub_pc = 0x30000000u64;
    let target = 0x38000000u64; // exactly B_RANGE away: not reachable
    assert!(!exit_cti_reaches(TargetIsa::Aarch64, stub_pc, target));

    let state = patch_stub(TargetIsa::Aarch64, &mut buf, stub_pc, target, false).unwrap();
    assert_eq!(state, StubState::FarLinked);
    let stored = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    assert_eq!(stored, target);
    let word0 = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    // LDR Xt, [pc, #8]: opcode bits 31:24 == 0b01011000
    assert_eq!(word0 >> 24, 0b01011000);
}

#[test]
fn patching_atomicity_reader_never_sees_a_third_state() {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::thread;

    let stub_pc = 0x30000000u64;
    let linked = 0x30001000u64;
    let unlinked = 0x30002000u64;

    let mut linked_buf = vec![0u8; STUB_BYTES];
    patch_stub(TargetIsa::Aarch64, &mut linked_buf, stub_pc, linked, false).unwrap();
    let linked_word = u32::from_le_bytes(linked_buf[0..4].try_into().unwrap());

    let mut unlinked_buf = vec![0u8; STUB_BYTES];
    patch_stub(TargetIsa::Aarch64, &mut unlinked_buf, stub_pc, unlinked, false).unwrap();
    let unlinked_word = u32::from_le_bytes(unlinked_buf[0..4].try_into().unwrap());

    let cell = AtomicU32::new(linked_word);
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::Relaxed) {
                let word = cell.load(Ordering::Acquire);
                assert!(
                    word == linked_word || word == unlinked_word,
                    "observed a third stub state: {word:#x}"
                );
            }
        });
        s.spawn(|| {
            for i in 0..2000 {
                let word = if i % 2 == 0 { unlinked_word } else { linked_word };
                cell.store(word, Ordering::Release);
            }
            done.store(true, Ordering::Relaxed);
        });
    });
}
