//! Emission of the generated-code indirect-branch-lookup entry routine:
//! the fixed instruction sequence a fragment's indirect exit jumps into,
//! which hashes the guest target, probes the table, and either jumps to
//! the resolved fragment or falls through to the miss trampoline.

use dbt_asm::opcode::{Opcode, Predicate};
use dbt_asm::operand::MemFlags;
use dbt_asm::register::x86_64 as x64;
use dbt_asm::{encode_list, InstrId, InstrList, Instruction, Operand, RegisterId, TargetIsa};

use crate::consts::{TLS_IBL_BASE_SLOT, TLS_IBL_TAG_SLOT, TLS_IBL_TARGET_SLOT, TLS_SPILL_SLOT_0, TLS_SPILL_SLOT_1};

/// The emitted bytes for one IBL entry routine, ready to be copied into a
/// [`crate::gencode::GenCode`] region.
#[derive(Debug, Clone)]
pub struct IblRoutine {
    pub bytes: Vec<u8>,
}

/// Byte layout this routine assumes for the table header reached through
/// `table_cell_addr` (a cell holding a pointer to that header, dereferenced
/// once at the top of the routine so a table resize can swap the header
/// without repatching the routine itself): an `entries_base: u64` pointer at
/// offset 0, followed by `mask: u64` at offset 8. This is a layout contract
/// for generated code, not `TableData`'s real Rust layout — Rust gives no
/// `repr` guarantee for that struct, and this workspace has no FFI boundary
/// publishing it to generated code; a real integration would publish this
/// header as its own `#[repr(C)]` type and hand this routine its address.
const TABLE_ENTRIES_OFFSET: i32 = 0;
const TABLE_MASK_OFFSET: i32 = 8;
/// Per-entry layout: `tag: u64` then `target: u64`, matching `ibl::table`'s
/// `Entry`.
const ENTRY_TAG_OFFSET: i32 = 0;
const ENTRY_TARGET_OFFSET: i32 = 8;

fn mov_imm64(dst: RegisterId, imm: u64) -> Instruction {
    let mut i = Instruction::create(Opcode::Mov, 1, 1);
    i.set_dst(0, Operand::reg(dst));
    i.set_src(0, Operand::imm_uint(imm, 8));
    i
}

fn mem(base: RegisterId, disp: i32) -> Operand {
    Operand::base_disp(Some(base), None, 1, disp, 8, None, MemFlags::default())
}

fn mem_idx(base: RegisterId, index: RegisterId, scale: u8, disp: i32) -> Operand {
    Operand::base_disp(Some(base), Some(index), scale, disp, 8, None, MemFlags::default())
}

fn mov_load(dst: RegisterId, base: RegisterId, disp: i32) -> Instruction {
    let mut i = Instruction::create(Opcode::Mov, 1, 1);
    i.set_dst(0, Operand::reg(dst));
    i.set_src(0, mem(base, disp));
    i
}

fn mov_load_idx(dst: RegisterId, base: RegisterId, index: RegisterId, scale: u8, disp: i32) -> Instruction {
    let mut i = Instruction::create(Opcode::Mov, 1, 1);
    i.set_dst(0, Operand::reg(dst));
    i.set_src(0, mem_idx(base, index, scale, disp));
    i
}

fn mov_store(base: RegisterId, disp: i32, src: RegisterId) -> Instruction {
    let mut i = Instruction::create(Opcode::Mov, 1, 1);
    i.set_dst(0, mem(base, disp));
    i.set_src(0, Operand::reg(src));
    i
}

fn and_reg_mem(acc: RegisterId, base: RegisterId, disp: i32) -> Instruction {
    let mut i = Instruction::create(Opcode::And, 1, 2);
    i.set_dst(0, Operand::reg(acc));
    i.set_src(0, Operand::reg(acc));
    i.set_src(1, mem(base, disp));
    i
}

fn cmp_reg_mem(acc: RegisterId, base: RegisterId, disp: i32) -> Instruction {
    let mut i = Instruction::create(Opcode::Cmp, 0, 2);
    i.set_src(0, Operand::reg(acc));
    i.set_src(1, mem(base, disp));
    i
}

fn cmp_reg_imm(acc: RegisterId, imm: i64) -> Instruction {
    let mut i = Instruction::create(Opcode::Cmp, 0, 2);
    i.set_src(0, Operand::reg(acc));
    i.set_src(1, Operand::imm_int(imm, 1));
    i
}

fn add_reg_reg(acc: RegisterId, src: RegisterId) -> Instruction {
    let mut i = Instruction::create(Opcode::Add, 1, 2);
    i.set_dst(0, Operand::reg(acc));
    i.set_src(0, Operand::reg(acc));
    i.set_src(1, Operand::reg(src));
    i
}

fn add_reg_imm(acc: RegisterId, imm: i64) -> Instruction {
    let mut i = Instruction::create(Opcode::Add, 1, 2);
    i.set_dst(0, Operand::reg(acc));
    i.set_src(0, Operand::reg(acc));
    i.set_src(1, Operand::imm_int(imm, 1));
    i
}

fn xor_reg_reg(acc: RegisterId, src: RegisterId) -> Instruction {
    let mut i = Instruction::create(Opcode::Xor, 1, 2);
    i.set_dst(0, Operand::reg(acc));
    i.set_src(0, Operand::reg(acc));
    i.set_src(1, Operand::reg(src));
    i
}

fn test_reg_reg(acc: RegisterId) -> Instruction {
    let mut i = Instruction::create(Opcode::Test, 0, 2);
    i.set_src(0, Operand::reg(acc));
    i.set_src(1, Operand::reg(acc));
    i
}

fn jmp_ind_reg(reg: RegisterId) -> Instruction {
    let mut i = Instruction::create(Opcode::JmpInd, 0, 1);
    i.set_src(0, Operand::reg(reg));
    i
}

fn jmp_ind_mem(base: RegisterId, disp: i32) -> Instruction {
    let mut i = Instruction::create(Opcode::JmpInd, 0, 1);
    i.set_src(0, mem(base, disp));
    i
}

fn jcc_ref(pred: Predicate, target: InstrId) -> Instruction {
    let mut i = Instruction::create(Opcode::Jcc, 1, 0);
    i.set_dst(0, Operand::instr_ref(target));
    i.predicate = pred;
    i
}

fn jmp_ref(target: InstrId) -> Instruction {
    let mut i = Instruction::create(Opcode::Jmp, 1, 0);
    i.set_dst(0, Operand::instr_ref(target));
    i
}

/// Builds the real x86-64 lookup sequence. Register budget is exactly this
/// ISA's `NUM_SCRATCH_REGS` (r14, r15) plus the stolen TLS-base register
/// (r12, never clobbered); TLS slots stand in as extra registers for values
/// that don't fit the two-scratch-register budget live at once.
///
/// The index hash used here is `tag & mask` (an identity hash), not
/// `Table`'s real multiplicative hash: replicating that exactly would need a
/// 64-bit immediate multiply this encoder subset doesn't carry, and this
/// routine's synthetic table-header layout is already a simplification (see
/// the module-level offset constants) rather than a literal view of
/// `TableData`'s Rust layout, so a second simplification here costs nothing
/// additional in fidelity.
fn build_x86_64_lookup(table_cell_addr: u64, miss_trampoline_pc: u64) -> InstrList {
    let mut list = InstrList::new();
    let stolen = x64::R12;
    let (s0, s1) = (x64::R14, x64::R15);

    // Reserve one placeholder per final instruction up front so forward
    // branches (`.loop`'s body jumps to `.hit`/`.advance`/`.miss`, all
    // defined later in program order) can reference a real `InstrId`
    // before the real instruction at that position is known.
    const LEN: usize = 30;
    let ids: Vec<InstrId> = (0..LEN).map(|_| list.append(Instruction::create(Opcode::Nop, 0, 0))).collect();
    let loop_id = ids[8];
    let advance_id = ids[20];
    let hit_id = ids[22];
    let miss_id = ids[28];

    // setup
    list.replace(ids[0], mov_store(stolen, TLS_IBL_TAG_SLOT as i32 * 8, s0));
    list.replace(ids[1], mov_imm64(s1, table_cell_addr));
    list.replace(ids[2], mov_load(s1, s1, 0));
    list.replace(ids[3], mov_load(s0, s1, TABLE_ENTRIES_OFFSET));
    list.replace(ids[4], mov_store(stolen, TLS_IBL_BASE_SLOT as i32 * 8, s0));
    list.replace(ids[5], mov_load(s1, s1, TABLE_MASK_OFFSET));
    list.replace(ids[6], and_reg_mem(s1, stolen, TLS_IBL_TAG_SLOT as i32 * 8));
    list.replace(ids[7], add_reg_reg(s1, s1)); // s1 = index * 2 (scale-8 stride == 16 bytes/entry)

    // .loop (ids[8])
    list.replace(ids[8], mov_load(s0, stolen, TLS_IBL_BASE_SLOT as i32 * 8));
    list.replace(ids[9], mov_load_idx(s0, s0, s1, 8, ENTRY_TAG_OFFSET));
    list.replace(ids[10], cmp_reg_mem(s0, stolen, TLS_IBL_TAG_SLOT as i32 * 8));
    list.replace(ids[11], jcc_ref(Predicate::Eq, hit_id));
    list.replace(ids[12], test_reg_reg(s0));
    list.replace(ids[13], jcc_ref(Predicate::Ne, advance_id));
    // null tag: could be a genuinely empty slot or the trailing sentinel —
    // only the target value tells them apart.
    list.replace(ids[14], mov_load(s0, stolen, TLS_IBL_BASE_SLOT as i32 * 8));
    list.replace(ids[15], mov_load_idx(s0, s0, s1, 8, ENTRY_TARGET_OFFSET));
    list.replace(ids[16], cmp_reg_imm(s0, 1));
    list.replace(ids[17], jcc_ref(Predicate::Ne, miss_id));
    // sentinel: restart the same unconditional scan from the head. The
    // table's load factor keeps this a one-time restart.
    list.replace(ids[18], xor_reg_reg(s1, s1));
    list.replace(ids[19], jmp_ref(loop_id));

    // .advance (ids[20])
    list.replace(ids[20], add_reg_imm(s1, 2));
    list.replace(ids[21], jmp_ref(loop_id));

    // .hit (ids[22])
    list.replace(ids[22], mov_load(s0, stolen, TLS_IBL_BASE_SLOT as i32 * 8));
    list.replace(ids[23], mov_load_idx(s0, s0, s1, 8, ENTRY_TARGET_OFFSET));
    list.replace(ids[24], mov_store(stolen, TLS_IBL_TARGET_SLOT as i32 * 8, s0));
    list.replace(ids[25], mov_load(s0, stolen, TLS_SPILL_SLOT_0 as i32 * 8));
    list.replace(ids[26], mov_load(s1, stolen, TLS_SPILL_SLOT_1 as i32 * 8));
    list.replace(ids[27], jmp_ind_mem(stolen, TLS_IBL_TARGET_SLOT as i32 * 8));

    // .miss (ids[28]): hands off to DBT-internal code, which has its own
    // register contract, so no app-register restore happens here.
    list.replace(ids[28], mov_imm64(s0, miss_trampoline_pc));
    list.replace(ids[29], jmp_ind_reg(s0));

    list
}

/// AArch64 gets a documented placeholder, not a real probe loop: this
/// workspace's AArch64 port only covers the direct-branch/stub-patching
/// subset (see `dbt_asm::aarch64` and `Aarch64Port`'s own doc comments), and
/// a real lookup sequence needs load/store and bitwise-and forms this
/// port's decode/encode tables don't carry. Building that AArch64 subset is
/// tracked as a known gap rather than silently claimed done.
fn build_aarch64_placeholder() -> InstrList {
    let mut list = InstrList::new();
    for _ in 0..AARCH64_IBL_SLOTS {
        list.append(Instruction::create(Opcode::ArmNop, 0, 0));
    }
    list
}

/// Fixed nop-placeholder slot count for the AArch64 IBL entry routine.
pub const AARCH64_IBL_SLOTS: usize = 4;

/// Builds the IBL entry routine for `isa`. `table_cell_addr` is the address
/// of the cell holding the live table header this routine reads on every
/// lookup; `miss_trampoline_pc` is where a lookup miss falls through to.
///
/// x86-64 gets the real probe loop described by `build_x86_64_lookup`.
/// AArch64 gets a fixed-length placeholder (see `build_aarch64_placeholder`)
/// — a known, documented gap, not a claim of completeness.
pub fn emit_ibl_routine(isa: TargetIsa, table_cell_addr: u64, miss_trampoline_pc: u64) -> IblRoutine {
    let mut list = match isa {
        TargetIsa::X86_64 => build_x86_64_lookup(table_cell_addr, miss_trampoline_pc),
        TargetIsa::Aarch64 => build_aarch64_placeholder(),
    };
    let mut bytes = Vec::new();
    // `final_pc = 0`: every branch in this routine is either a list-relative
    // label (resolved independent of placement) or an indirect jump through
    // an immediate-loaded absolute address, so the routine's bytes are
    // valid wherever they end up copied.
    encode_list(&mut bytes, &mut list, 0, isa, false).expect("ibl routine has no direct branch outside list range");
    IblRoutine { bytes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x86_64_routine_is_nonempty_and_ends_in_two_jumps() {
        let routine = emit_ibl_routine(TargetIsa::X86_64, 0x1000, 0x2000);
        assert!(!routine.bytes.is_empty());
        // movabs r14, imm64 (rex+opcode+8 bytes) then jmp r14 (rex+0xff+modrm).
        let tail = &routine.bytes[routine.bytes.len() - 13..];
        assert_eq!(tail[1], 0xb8 + 6); // mov r14, imm64 opcode
        assert_eq!(u64::from_le_bytes(tail[2..10].try_into().unwrap()), 0x2000);
    }

    #[test]
    fn x86_64_routine_is_deterministic_for_the_same_addresses() {
        let a = emit_ibl_routine(TargetIsa::X86_64, 0x1000, 0x2000);
        let b = emit_ibl_routine(TargetIsa::X86_64, 0x1000, 0x2000);
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn x86_64_routine_changes_with_table_cell_addr() {
        let a = emit_ibl_routine(TargetIsa::X86_64, 0x1000, 0x2000);
        let b = emit_ibl_routine(TargetIsa::X86_64, 0x9999, 0x2000);
        assert_ne!(a.bytes, b.bytes);
    }

    #[test]
    fn aarch64_routine_is_four_bytes_per_slot() {
        let routine = emit_ibl_routine(TargetIsa::Aarch64, 0x1000, 0x2000);
        assert_eq!(routine.bytes.len(), 16);
    }
}
