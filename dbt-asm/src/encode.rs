//! The encoder: template dispatch to the per-ISA table, plus the
//! two-pass label-resolution scheme for `Operand::InstrRef` sources and the
//! reachability contract shared by every ISA.

use crate::ilist::InstrList;
use crate::instr::Instruction;
use crate::isa::TargetIsa;
use crate::operand::Operand;
use crate::{aarch64, x86_64};

/// `encode(instr, dst_pc, final_pc, check_reachable) -> next_pc_or_null`.
///
/// `dst_pc`/`copy_pc` is where bytes are written; `final_pc` is the address
/// at which those bytes will ultimately execute. They differ when the
/// caller stages code in a writable buffer to be copied into an executable
/// region later. All pc-relative displacements are computed against
/// `final_pc`. Returns `None` on unreachable-target failure when reachability
/// checking was requested; never emits partial bytes on failure.
pub fn encode(
    buf: &mut Vec<u8>,
    instr: &Instruction,
    dst_pc: u64,
    final_pc: u64,
    isa: TargetIsa,
    check_reachable: bool,
) -> Option<u64> {
    let _ = dst_pc;
    let (bytes, reachable) = match isa {
        TargetIsa::X86_64 => x86_64::encode_one(instr, final_pc, check_reachable)?,
        TargetIsa::Aarch64 => aarch64::encode_one(instr, final_pc, check_reachable)?,
    };
    if check_reachable && !reachable {
        return None;
    }
    let len = bytes.len() as u64;
    buf.extend_from_slice(&bytes);
    Some(final_pc + len)
}

/// `encode_ignore_reachability(instr, pc) -> next_pc`: always succeeds for
/// any instruction this ISA's template set can encode at all; an
/// out-of-range direct branch is written anyway so the caller can splice in
/// an island afterwards.
pub fn encode_ignore_reachability(buf: &mut Vec<u8>, instr: &Instruction, pc: u64, isa: TargetIsa) -> Option<u64> {
    encode(buf, instr, pc, pc, isa, false)
}

/// `encode_check_reachability(instr, pc, out_has_instr_opnds) -> next_pc_or_null`.
/// `out_has_instr_opnds` reports whether `instr` carried any unresolved
/// `Operand::InstrRef` sources (the caller must run label resolution first
/// in that case; see [`encode_list`]).
pub fn encode_check_reachability(
    buf: &mut Vec<u8>,
    instr: &Instruction,
    pc: u64,
    isa: TargetIsa,
    out_has_instr_opnds: &mut bool,
) -> Option<u64> {
    *out_has_instr_opnds = instr.srcs().iter().chain(instr.dsts().iter()).any(|o| matches!(o, Operand::InstrRef(_)));
    encode(buf, instr, pc, pc, isa, true)
}

/// Encodes every instruction in `list` starting at `final_pc`, resolving
/// `Operand::InstrRef` label targets via the two-pass `note` scheme (a
/// cyclic reference between two instructions is broken by indexing through
/// their list position rather than their final address):
///
/// Pass 1 walks the list computing each instruction's byte offset from the
/// list head and stashing it in `note`.
/// Pass 2 re-walks, replacing any `InstrRef` source with a `CodeTarget`
/// whose displacement is `(target.note - this.note) + final_pc` before
/// calling the real per-ISA encoder, then emits the bytes.
///
/// Returns the next pc after the whole list, or `None` if any instruction's
/// direct branch was unreachable under `check_reachable`.
pub fn encode_list(buf: &mut Vec<u8>, list: &mut InstrList, final_pc: u64, isa: TargetIsa, check_reachable: bool) -> Option<u64> {
    // pass 1: byte offsets
    let mut offset = 0i64;
    let mut id = list.head();
    while let Some(cur) = id {
        list.get_mut(cur).note = offset;
        offset += estimate_len(list.get(cur), isa) as i64;
        id = list.next(cur);
    }

    // pass 2: resolve InstrRef sources against `note`, then encode for real
    let mut pc = final_pc;
    let mut id = list.head();
    while let Some(cur) = id {
        let resolved = resolve_instr_refs(list, cur, final_pc);
        pc = encode(buf, &resolved, pc, pc, isa, check_reachable)?;
        id = list.next(cur);
    }
    Some(pc)
}

/// Runs the real per-ISA encoder to get `instr`'s exact emitted length, so
/// the offsets seeded into `note` during pass 1 agree with where pass 2
/// actually places each instruction. Any unresolved `Operand::InstrRef` is
/// swapped for a placeholder `CodeTarget` first: neither ISA's encoder
/// varies an instruction's byte length by displacement value (x86-64 always
/// emits the wide rel32 branch forms; AArch64 instructions are fixed at 4
/// bytes), only by whether the displacement is in range at all, so a
/// placeholder target with `check_reachable = false` yields the same length
/// pass 2 will produce once the label is actually resolved.
fn estimate_len(instr: &Instruction, isa: TargetIsa) -> usize {
    let mut probe = instr.clone();
    for slot in 0..probe.num_dsts() {
        if matches!(probe.dst(slot), Operand::InstrRef(_)) {
            probe.set_dst(slot, Operand::code_target(0, false));
        }
    }
    for slot in 0..probe.num_srcs() {
        if matches!(probe.src(slot), Operand::InstrRef(_)) {
            probe.set_src(slot, Operand::code_target(0, false));
        }
    }
    let (bytes, _) = match isa {
        TargetIsa::X86_64 => x86_64::encode_one(&probe, 0, false),
        TargetIsa::Aarch64 => aarch64::encode_one(&probe, 0, false),
    }
    .expect("every instruction placed in a list must be encodable on its own ISA");
    bytes.len()
}

fn resolve_instr_refs(list: &InstrList, id: crate::instr::InstrId, final_pc: u64) -> Instruction {
    let this_note = list.get(id).note;
    let mut instr = list.get(id).clone();
    let this_end = final_pc as i64 + this_note;
    for slot in 0..instr.num_dsts() {
        if let Operand::InstrRef(target_id) = instr.dst(slot) {
            let target_note = list.get(*target_id).note;
            let target_addr = (target_note - this_note) + this_end;
            instr.set_dst(slot, Operand::code_target(target_addr as u64, false));
        }
    }
    for slot in 0..instr.num_srcs() {
        if let Operand::InstrRef(target_id) = instr.src(slot) {
            let target_note = list.get(*target_id).note;
            let target_addr = (target_note - this_note) + this_end;
            instr.set_src(slot, Operand::code_target(target_addr as u64, false));
        }
    }
    instr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    #[test]
    fn label_target_resolves_to_correct_displacement() {
        let mut list = InstrList::new();
        let mut jmp = Instruction::create(Opcode::Jmp, 1, 0);
        let nop = Instruction::create(Opcode::Nop, 0, 0);
        let nop_id = list.append(nop);
        jmp.set_dst(0, Operand::instr_ref(nop_id));
        let jmp_id = list.insert_before(nop_id, jmp);
        let _ = jmp_id;

        let mut buf = Vec::new();
        let next = encode_list(&mut buf, &mut list, 0x1000, TargetIsa::X86_64, true).unwrap();
        assert_eq!(next, 0x1006); // 5-byte jmp rel32 + 1-byte nop
        // jmp rel32 at 0x1000..0x1005, target must be 0x1005 (the nop)
        assert_eq!(buf[0], 0xe9);
        let disp = i32::from_le_bytes(buf[1..5].try_into().unwrap());
        assert_eq!(disp, 0);
    }
}
