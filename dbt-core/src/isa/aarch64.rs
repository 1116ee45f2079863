use dbt_asm::register::aarch64 as r;
use dbt_asm::{RegisterId, TargetIsa};

use crate::consts::AARCH64_STUB_BYTES;
use crate::error::CoreError;
use crate::ibl::routine::{emit_ibl_routine, IblRoutine};

use super::IsaPort;

const SCRATCH: [RegisterId; 2] = [r::X16, r::X17];

/// B/BL immediate range: +-128MiB, matching `dbt_asm::aarch64::B_RANGE`.
const B_RANGE: i64 = 1 << 27;

/// The partial AArch64 port: direct-branch patching and nop padding only.
/// Method names below are carried over from the stub-emission routines of
/// the system this port's shape is modeled on, which this workspace gives
/// real bodies instead of leaving unimplemented.
pub struct Aarch64Port;

impl Aarch64Port {
    /// Writes an unconditional `B` at `buf[0..4]`, executing at `from_pc`,
    /// reaching `target`. Fails if `target` is outside `B`'s +-128MiB range
    /// or not 4-byte aligned relative to `from_pc`.
    pub fn insert_relative_jump(&self, buf: &mut [u8], from_pc: u64, target: u64) -> Result<(), CoreError> {
        if buf.len() < 4 {
            return Err(CoreError::StubTooSmall { at: from_pc, have: buf.len(), need: 4 });
        }
        let disp = target as i64 - from_pc as i64;
        if disp % 4 != 0 || disp.abs() >= B_RANGE {
            return Err(CoreError::UnreachableTarget { target, from: from_pc });
        }
        let imm26 = ((disp / 4) as i32) & 0x3ff_ffff;
        let word = 0x14000000u32 | imm26 as u32;
        buf[0..4].copy_from_slice(&word.to_le_bytes());
        Ok(())
    }

    /// Fills `buf` with `NOP` words, truncating any trailing partial word.
    pub fn nop_pad_ilist(&self, buf: &mut [u8]) {
        const NOP: u32 = 0xd503201f;
        for word in buf.chunks_exact_mut(4) {
            word.copy_from_slice(&NOP.to_le_bytes());
        }
    }

    /// Byte offset within a stub at which the patchable exit branch must
    /// start: zero, since AArch64 instructions are already 4-byte aligned
    /// and this port places the branch as a stub's first word.
    pub fn patchable_exit_cti_align_offs(&self) -> usize {
        0
    }
}

impl IsaPort for Aarch64Port {
    fn isa(&self) -> TargetIsa {
        TargetIsa::Aarch64
    }

    fn scratch_registers(&self) -> &'static [RegisterId] {
        &SCRATCH
    }

    fn stolen_register(&self) -> RegisterId {
        r::X2
    }

    fn stub_byte_budget(&self) -> usize {
        AARCH64_STUB_BYTES
    }

    fn fill_with_nops(&self, buf: &mut [u8]) {
        self.nop_pad_ilist(buf);
    }

    fn emit_ibl_routine(&self, table_cell_addr: u64, miss_trampoline_pc: u64) -> IblRoutine {
        emit_ibl_routine(TargetIsa::Aarch64, table_cell_addr, miss_trampoline_pc)
    }

    fn patch_branch(&self, buf: &mut [u8], from_pc: u64, target: u64) -> Result<(), CoreError> {
        self.insert_relative_jump(buf, from_pc, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_relative_jump_within_range() {
        let mut buf = [0u8; 4];
        Aarch64Port.insert_relative_jump(&mut buf, 0x30000000, 0x30001000).unwrap();
        let word = u32::from_le_bytes(buf);
        assert_eq!(word, 0x14000000 | 0x400);
    }

    #[test]
    fn insert_relative_jump_out_of_range_is_an_error() {
        let mut buf = [0u8; 4];
        let err = Aarch64Port.insert_relative_jump(&mut buf, 0x30000000, 0x38000000).unwrap_err();
        assert!(matches!(err, CoreError::UnreachableTarget { .. }));
    }

    #[test]
    fn nop_pad_fills_whole_words() {
        let mut buf = [0xffu8; 8];
        Aarch64Port.nop_pad_ilist(&mut buf);
        assert_eq!(u32::from_le_bytes(buf[0..4].try_into().unwrap()), 0xd503201f);
        assert_eq!(u32::from_le_bytes(buf[4..8].try_into().unwrap()), 0xd503201f);
    }
}
