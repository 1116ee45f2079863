//! AArch64 decode/encode: the partial ISA port.
//!
//! Only the direct-branch / stub-patching surface is implemented: `B`,
//! `BL`, `BR`, `BLR`, `RET`, `NOP`, and `LDR <reg>, [PC, #off]` (the
//! far-link load-pc form). General AArch64 instruction decode is out of
//! scope for this workspace.

use crate::instr::{Instruction, RawBytes};
use crate::opcode::Opcode;
use crate::operand::Operand;
use crate::register::aarch64 as r;
use crate::register::RegisterId;

/// `B`/`BL` immediate is a 26-bit word (4-byte unit) signed displacement:
/// +-128MiB.
pub const B_RANGE: i64 = 1 << 27;

fn reg_index(reg: RegisterId) -> u32 {
    match reg {
        x if x == r::X0 => 0,
        x if x == r::X1 => 1,
        x if x == r::X2 => 2,
        x if x == r::X16 => 16,
        x if x == r::X17 => 17,
        x if x == r::Lr => 30,
        _ => 0,
    }
}

/// Decodes one AArch64 instruction word, restricted to this port's subset.
pub fn decode_one(bytes: &[u8], orig_pc: u64) -> (usize, Instruction) {
    assert!(bytes.len() >= 4, "AArch64 instructions are fixed 4-byte words");
    let word = u32::from_le_bytes(bytes[0..4].try_into().unwrap());

    let (opcode, mut instr) = if word >> 26 == 0b000101 {
        // B <imm26>
        let imm26 = (word & 0x3ff_ffff) as i32;
        let disp = sign_extend(imm26, 26) * 4;
        let target = (orig_pc as i64 + disp) as u64;
        let mut i = Instruction::create(Opcode::ArmB, 1, 0);
        i.set_dst(0, Operand::code_target(target, false));
        (Opcode::ArmB, i)
    } else if word >> 26 == 0b100101 {
        let imm26 = (word & 0x3ff_ffff) as i32;
        let disp = sign_extend(imm26, 26) * 4;
        let target = (orig_pc as i64 + disp) as u64;
        let mut i = Instruction::create(Opcode::ArmBl, 1, 0);
        i.set_dst(0, Operand::code_target(target, false));
        (Opcode::ArmBl, i)
    } else if word & 0xfffffc1f == 0xd61f0000 {
        let rn = (word >> 5) & 0x1f;
        let mut i = Instruction::create(Opcode::ArmBr, 0, 1);
        i.set_src(0, Operand::reg(reg_from_index(rn)));
        (Opcode::ArmBr, i)
    } else if word & 0xfffffc1f == 0xd63f0000 {
        let rn = (word >> 5) & 0x1f;
        let mut i = Instruction::create(Opcode::ArmBlr, 0, 1);
        i.set_src(0, Operand::reg(reg_from_index(rn)));
        (Opcode::ArmBlr, i)
    } else if word == 0xd65f03c0 {
        (Opcode::ArmRet, Instruction::create(Opcode::ArmRet, 0, 0))
    } else if word == 0xd503201f {
        (Opcode::ArmNop, Instruction::create(Opcode::ArmNop, 0, 0))
    } else if word >> 24 == 0b01011000 {
        // LDR <Xt>, <label> (64-bit literal load)
        let imm19 = ((word >> 5) & 0x7ffff) as i32;
        let rt = word & 0x1f;
        let disp = sign_extend(imm19, 19) * 4;
        let target = (orig_pc as i64 + disp) as u64;
        let mut i = Instruction::create(Opcode::ArmLdrLit, 1, 1);
        i.set_dst(0, Operand::reg(reg_from_index(rt)));
        i.set_src(0, Operand::rel_addr(target, 8));
        (Opcode::ArmLdrLit, i)
    } else {
        (Opcode::Invalid, Instruction::create(Opcode::Invalid, 0, 0))
    };

    instr.translation_pc = Some(orig_pc);
    instr.raw = Some(RawBytes { bytes: bytes[0..4].to_vec(), valid: true });
    (4, instr)
}

fn reg_from_index(idx: u32) -> RegisterId {
    match idx {
        0 => r::X0,
        1 => r::X1,
        2 => r::X2,
        16 => r::X16,
        17 => r::X17,
        30 => r::Lr,
        31 => r::Sp,
        _ => r::X0,
    }
}

fn sign_extend(value: i32, bits: u32) -> i64 {
    let shift = 32 - bits;
    ((value << shift) as i64) >> shift
}

/// Encodes one AArch64 instruction to execute at `final_pc`.
pub fn encode_one(instr: &Instruction, final_pc: u64, check_reachable: bool) -> Option<(Vec<u8>, bool)> {
    match instr.opcode() {
        Opcode::ArmB | Opcode::ArmBl => {
            let target = match instr.dst(0) {
                Operand::CodeTarget { target, .. } => *target,
                _ => return None,
            };
            let disp = target as i64 - final_pc as i64;
            let reachable = disp % 4 == 0 && disp.abs() < B_RANGE;
            if !reachable {
                if check_reachable {
                    return None;
                }
                return Some((encode_b(instr.opcode(), 0), false));
            }
            Some((encode_b(instr.opcode(), (disp / 4) as i32), true))
        }
        Opcode::ArmRet => Some((0xd65f03c0u32.to_le_bytes().to_vec(), true)),
        Opcode::ArmNop => Some((0xd503201fu32.to_le_bytes().to_vec(), true)),
        Opcode::ArmBr => {
            let rn = reg_index(instr.src(0).get_reg());
            Some(((0xd61f0000 | (rn << 5)).to_le_bytes().to_vec(), true))
        }
        Opcode::ArmBlr => {
            let rn = reg_index(instr.src(0).get_reg());
            Some(((0xd63f0000 | (rn << 5)).to_le_bytes().to_vec(), true))
        }
        Opcode::ArmLdrLit => {
            let rt = reg_index(instr.dst(0).get_reg());
            let target = match instr.src(0) {
                Operand::RelAddr { target, .. } => *target,
                _ => return None,
            };
            let disp = target as i64 - final_pc as i64;
            debug_assert_eq!(disp % 4, 0);
            let imm19 = ((disp / 4) as i32) & 0x7ffff;
            let word = 0x58000000u32 | ((imm19 as u32) << 5) | rt;
            Some((word.to_le_bytes().to_vec(), true))
        }
        _ => None,
    }
}

fn encode_b(opcode: Opcode, imm26: i32) -> Vec<u8> {
    let base: u32 = if opcode == Opcode::ArmB { 0x14000000 } else { 0x94000000 };
    let word = base | (imm26 as u32 & 0x3ff_ffff);
    word.to_le_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_b_within_range() {
        let word = 0x14000000u32 | 0x400; // B #+0x1000
        let bytes = word.to_le_bytes();
        let (len, instr) = decode_one(&bytes, 0x30000000);
        assert_eq!(len, 4);
        match instr.dst(0) {
            Operand::CodeTarget { target, .. } => assert_eq!(*target, 0x30001000),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn encode_b_reaches_target_within_range() {
        let mut instr = Instruction::create(Opcode::ArmB, 1, 0);
        instr.set_dst(0, Operand::code_target(0x30001000, false));
        let (bytes, reachable) = encode_one(&instr, 0x30000000, true).unwrap();
        assert!(reachable);
        let word = u32::from_le_bytes(bytes.try_into().unwrap());
        assert_eq!(word, 0x14000000 | 0x400);
    }

    #[test]
    fn encode_b_out_of_range_without_check_flags_unreachable() {
        let mut instr = Instruction::create(Opcode::ArmB, 1, 0);
        instr.set_dst(0, Operand::code_target(0x38000000, false));
        let (_bytes, reachable) = encode_one(&instr, 0x30000000, false).unwrap();
        assert!(!reachable);
    }
}
