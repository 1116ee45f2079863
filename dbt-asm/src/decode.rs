//! The decoder: dispatches to the per-ISA table in `x86_64`/`aarch64`.

use crate::instr::Instruction;
use crate::isa::TargetIsa;
use crate::opcode::Opcode;
use crate::{aarch64, x86_64};

/// `decode(pc, isa, out_instr) -> next_pc`. Decodes the instruction at `pc`,
/// treating `pc` itself as the guest address the bytes came from.
pub fn decode(bytes: &[u8], pc: u64, isa: TargetIsa) -> (u64, Instruction) {
    decode_from_copy(bytes, pc, isa)
}

/// `decode_from_copy(src_pc, orig_pc, out_instr) -> next_pc`. `bytes` may
/// physically live at a different address (a staged copy) than the guest
/// address `orig_pc` the decoded instruction should claim to come from;
/// pc-relative operands are re-relativized against `orig_pc`.
pub fn decode_from_copy(bytes: &[u8], orig_pc: u64, isa: TargetIsa) -> (u64, Instruction) {
    let (len, instr) = match isa {
        TargetIsa::X86_64 => x86_64::decode_one(bytes, orig_pc),
        TargetIsa::Aarch64 => aarch64::decode_one(bytes, orig_pc),
    };
    (orig_pc + len as u64, instr)
}

/// `decode_cti(pc, out_instr) -> next_pc`: preserves the length-only
/// contract callers rely on when walking a block to find its next exit
/// (`next_pc` and `instr.opcode().is_cti()` are always correct), but does
/// not itself skip operand construction for non-ctis the way a true
/// length-only fast path would. This workspace's per-ISA tables always
/// build full operands in one decode pass, for every opcode class; there is
/// no cheaper length-only path underneath to shortcut into. Callers that
/// only need `next_pc`/`is_cti()` pay the same decode cost as a full
/// `decode()`, just under a name that documents the narrower contract they
/// can rely on.
pub fn decode_cti(bytes: &[u8], pc: u64, isa: TargetIsa) -> (u64, Instruction) {
    decode(bytes, pc, isa)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_cti_recognizes_indirect_jump() {
        let bytes = [0xff, 0xe0]; // jmp rax (ff /4, modrm c0 reg=4 rm=0)
        let (_next, instr) = decode_cti(&bytes, 0x1000, TargetIsa::X86_64);
        assert!(instr.opcode().is_cti());
        assert!(instr.opcode().is_indirect_cti());
    }

    #[test]
    fn decode_cti_passes_through_non_cti() {
        let bytes = [0x90];
        let (next, instr) = decode_cti(&bytes, 0x1000, TargetIsa::X86_64);
        assert_eq!(next, 0x1001);
        assert!(!instr.opcode().is_cti());
    }
}
