//! Exit stub emission and atomic patching.
//!
//! A stub is a fixed 16-byte region in the code cache immediately following
//! a fragment's exit point: bytes `0..8` hold the "stub word" (one or two
//! real instructions plus no-op padding), bytes `8..16` hold a data slot
//! used only by the far-linked form. The stub word is always patched as a
//! single atomic store so a thread already executing the stub never reads
//! a torn mix of old and new bytes.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

use dbt_asm::TargetIsa;
use tracing::trace;

use crate::error::CoreError;
use crate::isa::port;

/// Total bytes reserved for one stub: the 8-byte stub word plus the 8-byte
/// far-linked data slot.
pub const STUB_BYTES: usize = 16;

const DATA_SLOT_OFFSET: usize = 8;

/// Which form a stub's direct-branch slot currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubState {
    /// Patched to jump straight into a linked fragment.
    NearLinked,
    /// Patched to jump to the unlinked-exit trampoline (same shape as
    /// `NearLinked`; only the target differs).
    Unlinked,
    /// Target is out of direct-branch range: jumps indirectly through the
    /// stub's data slot.
    FarLinked,
}

/// Patches `buf` (a stub's 16 reserved bytes, located at `stub_pc` in the
/// code cache) to jump to `target`, picking near- or far-linked form based
/// on reachability. `hot_patch` requests the stub-word write go through an
/// atomic store (the stub may currently be reachable from running code);
/// pass `false` only for a stub that hasn't been linked into the code
/// cache yet.
pub fn patch_stub(isa: TargetIsa, buf: &mut [u8], stub_pc: u64, target: u64, hot_patch: bool) -> Result<StubState, CoreError> {
    if buf.len() < STUB_BYTES {
        return Err(CoreError::StubTooSmall { at: stub_pc, have: buf.len(), need: STUB_BYTES });
    }
    let state = match isa {
        TargetIsa::X86_64 => patch_x86_64(buf, stub_pc, target, hot_patch)?,
        TargetIsa::Aarch64 => patch_aarch64(buf, stub_pc, target, hot_patch)?,
    };
    trace!(?isa, stub_pc, target, ?state, hot_patch, "patched exit stub");
    Ok(state)
}

/// Patches `buf` to the unlinked-exit trampoline. Identical machinery to
/// [`patch_stub`]; kept as a distinct entry point so callers (and logs)
/// read as "this fragment is being unlinked" rather than "linked to X".
/// `unlinked_trampoline` is the address of this stub's own unlinked-exit
/// landing pad (see [`crate::unlink_trampoline::emit_unlinked_landing_pad`]),
/// not a single shared trampoline: the landing pad's body bakes in this
/// stub's `LinkStub` identity, which a trampoline shared across stubs would
/// have no way to recover.
pub fn unpatch_stub(isa: TargetIsa, buf: &mut [u8], stub_pc: u64, unlinked_trampoline: u64, hot_patch: bool) -> Result<(), CoreError> {
    patch_stub(isa, buf, stub_pc, unlinked_trampoline, hot_patch)?;
    trace!(?isa, stub_pc, "unlinked exit stub");
    Ok(())
}

/// Writes a fresh exit stub's initial bytes: every stub starts out
/// unlinked (jumping to its landing pad) except a coarse-grain fragment's
/// exits, which start already linked to `coarse_linked_target` since
/// coarse-grain units are immutable once emitted and have no later
/// opportunity to be relinked. Returns the number of bytes the stub
/// occupies (always [`STUB_BYTES`], mirroring `insert_exit_stub_other_flags`'s
/// "returns the size of the emitted code" contract even though this port's
/// fixed-size stub makes that size constant).
pub fn insert_exit_stub(
    isa: TargetIsa,
    buf: &mut [u8],
    stub_pc: u64,
    flags: crate::fragment::FragmentFlags,
    landing_pad_pc: u64,
    coarse_linked_target: Option<u64>,
) -> Result<(StubState, usize), CoreError> {
    let target = if flags.is_coarse_grain {
        coarse_linked_target.unwrap_or(landing_pad_pc)
    } else {
        landing_pad_pc
    };
    let state = patch_stub(isa, buf, stub_pc, target, false)?;
    trace!(?isa, stub_pc, ?state, coarse_grain = flags.is_coarse_grain, "inserted exit stub");
    Ok((state, STUB_BYTES))
}

/// Decodes whichever of [`StubState::NearLinked`]/[`StubState::FarLinked`]
/// form `buf` currently holds and returns the address it resolves to.
fn read_stub_target(isa: TargetIsa, buf: &[u8], stub_pc: u64) -> u64 {
    match isa {
        TargetIsa::X86_64 => {
            if buf[0] == 0xe9 {
                let disp = i32::from_le_bytes(buf[1..5].try_into().expect("stub word holds 4 disp bytes"));
                (stub_pc as i64 + 5 + disp as i64) as u64
            } else {
                u64::from_le_bytes(buf[DATA_SLOT_OFFSET..DATA_SLOT_OFFSET + 8].try_into().expect("stub has an 8-byte data slot"))
            }
        }
        TargetIsa::Aarch64 => {
            let word = u32::from_le_bytes(buf[0..4].try_into().expect("stub word holds 4 bytes"));
            if word & 0xfc00_0000 == 0x1400_0000 {
                let imm26 = word & 0x03ff_ffff;
                let simm = ((imm26 << 6) as i32) >> 6;
                (stub_pc as i64 + simm as i64 * 4) as u64
            } else {
                u64::from_le_bytes(buf[DATA_SLOT_OFFSET..DATA_SLOT_OFFSET + 8].try_into().expect("stub has an 8-byte data slot"))
            }
        }
    }
}

/// `true` if `buf`'s stub no longer resolves to `unlinked_target` (its
/// landing pad or last-known unlinked address) — i.e. it has been linked to
/// a real fragment since. Mirrors `stub_is_patched`'s "is this intermediate-
/// or far-linked to something other than the unlinked path" contract.
pub fn stub_is_patched(isa: TargetIsa, buf: &[u8], stub_pc: u64, unlinked_target: u64) -> Result<bool, CoreError> {
    if buf.len() < STUB_BYTES {
        return Err(CoreError::StubTooSmall { at: stub_pc, have: buf.len(), need: STUB_BYTES });
    }
    Ok(read_stub_target(isa, buf, stub_pc) != unlinked_target)
}

/// `true` if the direct-branch encoding for `isa` can reach `target` from
/// `stub_pc` without falling back to the far-linked form.
pub fn exit_cti_reaches(isa: TargetIsa, stub_pc: u64, target: u64) -> bool {
    match isa {
        TargetIsa::X86_64 => i32::try_from(target as i64 - (stub_pc as i64 + 5)).is_ok(),
        TargetIsa::Aarch64 => {
            let disp = target as i64 - stub_pc as i64;
            disp % 4 == 0 && disp.abs() < (1 << 27)
        }
    }
}

fn patch_x86_64(buf: &mut [u8], stub_pc: u64, target: u64, hot_patch: bool) -> Result<StubState, CoreError> {
    let mut word = [0u8; 8];
    if exit_cti_reaches(TargetIsa::X86_64, stub_pc, target) {
        port(TargetIsa::X86_64).patch_branch(&mut word[0..5], stub_pc, target)?;
        word[5..8].copy_from_slice(&[0x90, 0x90, 0x90]);
        write_word64(buf, word, hot_patch);
        Ok(StubState::NearLinked)
    } else {
        buf[DATA_SLOT_OFFSET..DATA_SLOT_OFFSET + 8].copy_from_slice(&target.to_le_bytes());
        fence(Ordering::Release);
        // `jmp qword ptr [rip]`: FF 25 + disp32 from end of this 6-byte
        // instruction to the data slot 2 bytes later, then 2 bytes of nop
        // padding to round the word out to 8 bytes.
        word[0] = 0xff;
        word[1] = 0x25;
        word[2..6].copy_from_slice(&2i32.to_le_bytes());
        word[6..8].copy_from_slice(&[0x90, 0x90]);
        write_word64(buf, word, hot_patch);
        Ok(StubState::FarLinked)
    }
}

fn patch_aarch64(buf: &mut [u8], stub_pc: u64, target: u64, hot_patch: bool) -> Result<StubState, CoreError> {
    if exit_cti_reaches(TargetIsa::Aarch64, stub_pc, target) {
        let mut near = [0u8; 4];
        port(TargetIsa::Aarch64).patch_branch(&mut near, stub_pc, target)?;
        write_word32(&mut buf[0..4], near, hot_patch);
        Ok(StubState::NearLinked)
    } else {
        buf[DATA_SLOT_OFFSET..DATA_SLOT_OFFSET + 8].copy_from_slice(&target.to_le_bytes());
        fence(Ordering::Release);
        // LDR X16, [pc, #8] followed by BR X16: both instructions are the
        // same bytes for every far-linked target, only the data slot varies.
        let ldr = 0x58000000u32 | ((2u32) << 5) | 16;
        let br = 0xd61f0000u32 | (16 << 5);
        let mut far = [0u8; 8];
        far[0..4].copy_from_slice(&ldr.to_le_bytes());
        far[4..8].copy_from_slice(&br.to_le_bytes());
        write_word64(buf, far, hot_patch);
        Ok(StubState::FarLinked)
    }
}

fn write_word64(buf: &mut [u8], word: [u8; 8], hot_patch: bool) {
    if hot_patch {
        debug_assert_eq!(buf.as_ptr() as usize % 8, 0, "stub must be 8-byte aligned for atomic patching");
        // SAFETY: `buf` is at least 8 bytes and 8-byte aligned per the
        // caller contract; reinterpreting as `AtomicU64` for one store is
        // sound the same way any lock-free word-patch is.
        let atomic = unsafe { &*(buf.as_mut_ptr() as *const AtomicU64) };
        atomic.store(u64::from_ne_bytes(word), Ordering::Release);
    } else {
        buf[0..8].copy_from_slice(&word);
    }
}

fn write_word32(buf: &mut [u8], word: [u8; 4], hot_patch: bool) {
    if hot_patch {
        debug_assert_eq!(buf.as_ptr() as usize % 4, 0, "stub must be 4-byte aligned for atomic patching");
        let atomic = unsafe { &*(buf.as_mut_ptr() as *const AtomicU32) };
        atomic.store(u32::from_ne_bytes(word), Ordering::Release);
    } else {
        buf[0..4].copy_from_slice(&word);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aligned_buf() -> Vec<u8> {
        vec![0u8; STUB_BYTES]
    }

    #[test]
    fn near_linked_x86_64_round_trips_through_patch_branch() {
        let mut buf = aligned_buf();
        let stub_pc = 0x2000u64;
        let state = patch_stub(TargetIsa::X86_64, &mut buf, stub_pc, stub_pc + 0x100, false).unwrap();
        assert_eq!(state, StubState::NearLinked);
        assert_eq!(buf[0], 0xe9);
    }

    #[test]
    fn far_linked_x86_64_writes_data_slot_and_indirect_jmp() {
        let mut buf = aligned_buf();
        let stub_pc = 0u64;
        let far_target = 0x1_0000_0000u64;
        let state = patch_stub(TargetIsa::X86_64, &mut buf, stub_pc, far_target, false).unwrap();
        assert_eq!(state, StubState::FarLinked);
        assert_eq!(buf[0], 0xff);
        assert_eq!(buf[1], 0x25);
        let stored = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        assert_eq!(stored, far_target);
    }

    #[test]
    fn near_linked_aarch64_within_range() {
        let mut buf = aligned_buf();
        let stub_pc = 0x3000_0000u64;
        let state = patch_stub(TargetIsa::Aarch64, &mut buf, stub_pc, stub_pc + 0x1000, false).unwrap();
        assert_eq!(state, StubState::NearLinked);
        let word = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        assert_eq!(word, 0x14000000 | 0x400);
    }

    #[test]
    fn far_linked_aarch64_out_of_b_range() {
        let mut buf = aligned_buf();
        let stub_pc = 0x3000_0000u64;
        let far_target = 0x3000_0000u64 + (1 << 27);
        let state = patch_stub(TargetIsa::Aarch64, &mut buf, stub_pc, far_target, false).unwrap();
        assert_eq!(state, StubState::FarLinked);
        let stored = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        assert_eq!(stored, far_target);
    }

    fn plain_flags() -> crate::fragment::FragmentFlags {
        crate::fragment::FragmentFlags { has_indirect_exit: false, shared: false, is_trace: false, is_thumb: false, is_coarse_grain: false }
    }

    #[test]
    fn insert_exit_stub_starts_unlinked_by_default() {
        let mut buf = aligned_buf();
        let stub_pc = 0x4000u64;
        let landing_pad = stub_pc + 0x40;
        let (state, size) = insert_exit_stub(TargetIsa::X86_64, &mut buf, stub_pc, plain_flags(), landing_pad, None).unwrap();
        assert_eq!(state, StubState::NearLinked);
        assert_eq!(size, STUB_BYTES);
        assert!(!stub_is_patched(TargetIsa::X86_64, &buf, stub_pc, landing_pad).unwrap());
    }

    #[test]
    fn insert_exit_stub_coarse_grain_starts_linked_to_its_target() {
        let mut buf = aligned_buf();
        let stub_pc = 0x4000u64;
        let landing_pad = stub_pc + 0x40;
        let coarse_target = stub_pc + 0x80;
        let mut flags = plain_flags();
        flags.is_coarse_grain = true;
        insert_exit_stub(TargetIsa::X86_64, &mut buf, stub_pc, flags, landing_pad, Some(coarse_target)).unwrap();
        assert!(stub_is_patched(TargetIsa::X86_64, &buf, stub_pc, landing_pad).unwrap());
    }

    #[test]
    fn stub_is_patched_flips_after_linking_to_a_real_fragment() {
        let mut buf = aligned_buf();
        let stub_pc = 0x5000u64;
        let landing_pad = stub_pc + 0x40;
        patch_stub(TargetIsa::X86_64, &mut buf, stub_pc, landing_pad, false).unwrap();
        assert!(!stub_is_patched(TargetIsa::X86_64, &buf, stub_pc, landing_pad).unwrap());
        patch_stub(TargetIsa::X86_64, &mut buf, stub_pc, stub_pc + 0x1000, false).unwrap();
        assert!(stub_is_patched(TargetIsa::X86_64, &buf, stub_pc, landing_pad).unwrap());
    }

    #[test]
    fn stub_too_small_is_rejected() {
        let mut buf = vec![0u8; 4];
        let err = patch_stub(TargetIsa::X86_64, &mut buf, 0, 0x100, false).unwrap_err();
        assert!(matches!(err, CoreError::StubTooSmall { .. }));
    }

    #[test]
    fn hot_patch_reader_never_observes_a_torn_word() {
        use std::sync::atomic::AtomicU64;
        use std::thread;

        // Model the code cache memory as a single `AtomicU64` so both the
        // patching thread and the reading thread access it through the
        // same atomic, the way two real threads would share code-cache
        // pages. `patch_stub` writes through a raw pointer into this cell.
        let stub_pc = 0x5000u64;
        let cell = AtomicU64::new(0);
        let near_word = |target: u64| -> u64 {
            let mut buf = aligned_buf();
            patch_stub(TargetIsa::X86_64, &mut buf, stub_pc, target, false).unwrap();
            u64::from_le_bytes(buf[0..8].try_into().unwrap())
        };
        let word_a = near_word(stub_pc + 0x10);
        let word_b = near_word(stub_pc + 0x20);

        thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..2000 {
                    let word = cell.load(Ordering::Acquire);
                    assert!(word == 0 || word == word_a || word == word_b, "torn word: {word:#x}");
                }
            });
            s.spawn(|| {
                for _ in 0..1000 {
                    cell.store(word_a, Ordering::Release);
                    cell.store(word_b, Ordering::Release);
                }
            });
        });
    }
}
