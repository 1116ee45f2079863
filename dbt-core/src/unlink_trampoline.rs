//! Emission of the unlinked-exit landing pad: the real code an exit stub
//! patched to [`crate::stub::StubState::Unlinked`] jumps into.
//!
//! The stub word itself only has room for a jump (see `crate::stub`'s
//! 16-byte budget), so it cannot also carry the materialized `LinkStub`
//! identity `fcache_return` needs to know which exit brought it here. One
//! landing pad is emitted per stub instead, with that stub's identity baked
//! in as an immediate — the same trick `ibl::routine::emit_ibl_routine`
//! uses to bake in a table's address.

use dbt_asm::opcode::Opcode;
use dbt_asm::operand::MemFlags;
use dbt_asm::register::x86_64 as x64;
use dbt_asm::{encode_list, Instruction, InstrList, Operand, RegisterId, TargetIsa};

use crate::consts::{TLS_SPILL_SLOT_0, TLS_SPILL_SLOT_1};

/// The emitted bytes for one unlinked-exit landing pad.
#[derive(Debug, Clone)]
pub struct UnlinkedLandingPad {
    pub bytes: Vec<u8>,
}

fn mov_imm64(dst: RegisterId, imm: u64) -> Instruction {
    let mut i = Instruction::create(Opcode::Mov, 1, 1);
    i.set_dst(0, Operand::reg(dst));
    i.set_src(0, Operand::imm_uint(imm, 8));
    i
}

fn mov_store(base: RegisterId, disp: i32, src: RegisterId) -> Instruction {
    let mut i = Instruction::create(Opcode::Mov, 1, 1);
    i.set_dst(0, Operand::base_disp(Some(base), None, 1, disp, 8, None, MemFlags::default()));
    i.set_src(0, Operand::reg(src));
    i
}

fn jmp_ind_reg(reg: RegisterId) -> Instruction {
    let mut i = Instruction::create(Opcode::JmpInd, 0, 1);
    i.set_src(0, Operand::reg(reg));
    i
}

/// Builds the real x86-64 landing pad body: spill both scratch registers to
/// their TLS slots (so a collaborator inspecting `fcache_return`'s call can
/// still see whatever this fragment last left in them), materialize
/// `link_stub_id` — this exit's `LinkStub` identity, opaque to this crate —
/// into the first scratch register as the argument `fcache_return` reads,
/// then jump indirectly to `fcache_return_pc`. No app-register restore
/// happens here: `fcache_return` is DBT-internal code with its own
/// register contract, the same reasoning `ibl::routine`'s miss path follows.
fn build_x86_64_landing_pad(link_stub_id: u64, fcache_return_pc: u64) -> InstrList {
    let mut list = InstrList::new();
    let stolen = x64::R12;
    let (s0, s1) = (x64::R14, x64::R15);

    list.append(mov_store(stolen, TLS_SPILL_SLOT_0 as i32 * 8, s0));
    list.append(mov_store(stolen, TLS_SPILL_SLOT_1 as i32 * 8, s1));
    list.append(mov_imm64(s0, link_stub_id));
    list.append(mov_imm64(s1, fcache_return_pc));
    list.append(jmp_ind_reg(s1));
    list
}

/// Fixed nop-placeholder slot count for the AArch64 landing pad, matching
/// `ibl::routine`'s own documented AArch64 gap: this port's encode tables
/// carry no store-to-memory form yet to build a real one out of.
pub const AARCH64_LANDING_PAD_SLOTS: usize = 6;

fn build_aarch64_placeholder() -> InstrList {
    let mut list = InstrList::new();
    for _ in 0..AARCH64_LANDING_PAD_SLOTS {
        list.append(Instruction::create(Opcode::ArmNop, 0, 0));
    }
    list
}

/// Builds the unlinked-exit landing pad for `isa`. x86-64 gets the real
/// spill/materialize/jump body; AArch64 gets a fixed-length placeholder
/// (see `build_aarch64_placeholder`), consistent with `Aarch64Port`'s own
/// partial-port framing.
pub fn emit_unlinked_landing_pad(isa: TargetIsa, link_stub_id: u64, fcache_return_pc: u64) -> UnlinkedLandingPad {
    let mut list = match isa {
        TargetIsa::X86_64 => build_x86_64_landing_pad(link_stub_id, fcache_return_pc),
        TargetIsa::Aarch64 => build_aarch64_placeholder(),
    };
    let mut bytes = Vec::new();
    encode_list(&mut bytes, &mut list, 0, isa, false).expect("landing pad has no direct branch outside list range");
    UnlinkedLandingPad { bytes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x86_64_landing_pad_ends_in_an_indirect_jump() {
        let pad = emit_unlinked_landing_pad(TargetIsa::X86_64, 0x7000, 0x8000);
        assert!(!pad.bytes.is_empty());
        // jmp r15: REX.B + 0xff + modrm(11 100 111)
        let tail = &pad.bytes[pad.bytes.len() - 3..];
        assert_eq!(tail[1], 0xff);
        assert_eq!(tail[2] & 0b11_111_000, 0b11_100_000);
    }

    #[test]
    fn x86_64_landing_pad_changes_with_link_stub_id() {
        let a = emit_unlinked_landing_pad(TargetIsa::X86_64, 0x7000, 0x8000);
        let b = emit_unlinked_landing_pad(TargetIsa::X86_64, 0x7777, 0x8000);
        assert_ne!(a.bytes, b.bytes);
    }

    #[test]
    fn aarch64_landing_pad_is_four_bytes_per_slot() {
        let pad = emit_unlinked_landing_pad(TargetIsa::Aarch64, 0x7000, 0x8000);
        assert_eq!(pad.bytes.len(), AARCH64_LANDING_PAD_SLOTS * 4);
    }
}
