//! x86-64 decode/encode tables: the fully realized ISA port.
//!
//! This is a curated subset — the mov/lea/arithmetic/stack/branch forms that
//! dominate translated code, not the full x86-64 encoding space. A real
//! port's tables are dominated by rows like these; growing this table means
//! adding rows, not changing shape.

use crate::instr::{Instruction, RawBytes};
use crate::opcode::{Opcode, Predicate};
use crate::operand::{MemFlags, Operand};
use crate::register::{x86_64 as r, RegisterId};

const REX_BASE: u8 = 0x40;
const REX_W: u8 = 0x08;
const REX_R: u8 = 0x04;
const REX_X: u8 = 0x02;
const REX_B: u8 = 0x01;

fn gpr64(index: u8) -> RegisterId {
    const TABLE: [RegisterId; 16] = [
        r::Rax, r::Rcx, r::Rdx, r::Rbx, r::Rsp, r::Rbp, r::Rsi, r::Rdi, r::R8, r::R9, r::R10, r::R11, r::R12, r::R13,
        r::R14, r::R15,
    ];
    TABLE[index as usize & 0xf]
}

fn gpr32(index: u8) -> RegisterId {
    // only the low 8 have dedicated 32-bit sub-register constants in this
    // workspace's register table; r8d-r15d decode to their
    // 64-bit canonical view, matching how the IR treats a size mismatch as
    // "this operand's access is the low 32 bits of that register".
    const TABLE: [RegisterId; 8] = [r::Eax, r::Ecx, r::Edx, r::Ebx, r::Esp, r::Ebp, r::Esi, r::Edi];
    if index < 8 {
        TABLE[index as usize]
    } else {
        gpr64(index)
    }
}

struct Rex {
    present: bool,
    w: bool,
    r: bool,
    x: bool,
    b: bool,
}

impl Rex {
    fn none() -> Self {
        Rex { present: false, w: false, r: false, x: false, b: false }
    }

    fn from_byte(b: u8) -> Self {
        Rex {
            present: true,
            w: b & REX_W != 0,
            r: b & REX_R != 0,
            x: b & REX_X != 0,
            b: b & REX_B != 0,
        }
    }
}

struct ModRm {
    md: u8,
    reg: u8,
    rm: u8,
}

fn parse_modrm(byte: u8) -> ModRm {
    ModRm { md: byte >> 6, reg: (byte >> 3) & 0x7, rm: byte & 0x7 }
}

/// Decodes the modrm (+ SIB, + displacement) byte(s) at `bytes[pos..]` into
/// a register-or-memory [`Operand`], advancing `pos` past everything it
/// consumed. `orig_pc` is the address RIP-relative operands are computed
/// against; the decoder re-relativizes pc-relative operands on the fly.
fn decode_modrm_rm(bytes: &[u8], pos: &mut usize, rex: &Rex, orig_pc: u64, op_size: u8) -> Operand {
    let modrm = parse_modrm(bytes[*pos]);
    *pos += 1;
    if modrm.md == 0b11 {
        let idx = modrm.rm | if rex.b { 0x8 } else { 0 };
        let reg = if op_size == 8 { gpr64(idx) } else { gpr32(idx) };
        return Operand::reg(reg);
    }
    if modrm.md == 0b00 && modrm.rm == 0b101 {
        // RIP-relative: disp32 follows, target relative to the *end* of
        // this instruction, which the caller patches in afterwards since
        // the instruction's total length isn't known yet here. We record
        // the disp32 offset via the returned placeholder and let the
        // caller (`decode_one`) finish the relativization once the
        // instruction length is known.
        let disp = i32::from_le_bytes(bytes[*pos..*pos + 4].try_into().unwrap());
        *pos += 4;
        return Operand::RelAddr { target: orig_pc.wrapping_add(disp as i64 as u64), size: op_size };
    }
    let based: Option<(RegisterId, Option<RegisterId>, u8)> = if modrm.rm == 0b100 {
        let sib = bytes[*pos];
        *pos += 1;
        let scale = 1u8 << (sib >> 6);
        let index_field = (sib >> 3) & 0x7;
        let base_field = sib & 0x7;
        let index = if index_field == 0b100 && !rex.x {
            None
        } else {
            Some(gpr64(index_field | if rex.x { 0x8 } else { 0 }))
        };
        let base = if base_field == 0b101 && modrm.md == 0b00 {
            None
        } else {
            Some(gpr64(base_field | if rex.b { 0x8 } else { 0 }))
        };
        base.map(|b| (b, index, scale))
    } else {
        Some((gpr64(modrm.rm | if rex.b { 0x8 } else { 0 }), None, 1))
    };
    let disp = match modrm.md {
        0b00 => 0i32,
        0b01 => {
            let d = bytes[*pos] as i8 as i32;
            *pos += 1;
            d
        }
        0b10 => {
            let d = i32::from_le_bytes(bytes[*pos..*pos + 4].try_into().unwrap());
            *pos += 4;
            d
        }
        _ => unreachable!(),
    };
    let (base, index, scale) = based.unwrap_or((r::Rax, None, 1));
    Operand::base_disp(Some(base), index, scale, disp, op_size, None, MemFlags::default())
}

/// Decodes a single x86-64 instruction at `bytes[0..]`. Returns the number
/// of bytes consumed. `orig_pc` is the address the bytes claim to come
/// from (for RIP-relative re-relativization); may differ from where
/// `bytes` physically lives when decoding from a staged copy.
pub fn decode_one(bytes: &[u8], orig_pc: u64) -> (usize, Instruction) {
    let mut pos = 0usize;
    let mut rex = Rex::none();

    // legacy + REX prefixes
    loop {
        match bytes.get(pos) {
            Some(0x66) | Some(0x67) | Some(0x2e) | Some(0x36) | Some(0x3e) | Some(0x26) | Some(0x64) | Some(0x65)
            | Some(0xf0) | Some(0xf2) | Some(0xf3) => {
                pos += 1;
            }
            Some(&b) if (0x40..=0x4f).contains(&b) => {
                rex = Rex::from_byte(b);
                pos += 1;
            }
            _ => break,
        }
    }

    let op_size: u8 = if rex.w { 8 } else { 4 };
    let opcode_byte = bytes[pos];
    pos += 1;

    let (opcode, mut instr) = match opcode_byte {
        0x89 => {
            // MOV r/m, r  (dst = r/m, src = reg)
            let modrm = parse_modrm(bytes[pos]);
            let reg_idx = modrm.reg | if rex.r { 0x8 } else { 0 };
            let src_reg = if op_size == 8 { gpr64(reg_idx) } else { gpr32(reg_idx) };
            let rm = decode_modrm_rm(bytes, &mut pos, &rex, orig_pc, op_size);
            let mut instr = Instruction::create(Opcode::Mov, 1, 1);
            instr.set_dst(0, rm);
            instr.set_src(0, Operand::reg(src_reg));
            (Opcode::Mov, instr)
        }
        0x8b => {
            // MOV r, r/m  (dst = reg, src = r/m)
            let modrm = parse_modrm(bytes[pos]);
            let reg_idx = modrm.reg | if rex.r { 0x8 } else { 0 };
            let dst_reg = if op_size == 8 { gpr64(reg_idx) } else { gpr32(reg_idx) };
            let rm = decode_modrm_rm(bytes, &mut pos, &rex, orig_pc, op_size);
            let mut instr = Instruction::create(Opcode::Mov, 1, 1);
            instr.set_dst(0, Operand::reg(dst_reg));
            instr.set_src(0, rm);
            (Opcode::Mov, instr)
        }
        0x8d => {
            // LEA r, m
            let modrm = parse_modrm(bytes[pos]);
            let reg_idx = modrm.reg | if rex.r { 0x8 } else { 0 };
            let dst_reg = if op_size == 8 { gpr64(reg_idx) } else { gpr32(reg_idx) };
            let before = pos;
            let rm = decode_modrm_rm(bytes, &mut pos, &rex, orig_pc, op_size);
            let mut instr = Instruction::create(Opcode::Lea, 1, 1);
            instr.set_dst(0, Operand::reg(dst_reg));
            // RIP-relative targets decoded above used `orig_pc` as the base,
            // but the true base is `orig_pc + total_instr_len`; fix up now
            // that the length is known, and record `rip_rel_pos`.
            if let Operand::RelAddr { target, size } = rm {
                let disp = target.wrapping_sub(orig_pc) as i64 as i32;
                let total_len = pos;
                let fixed_target = orig_pc.wrapping_add(total_len as u64).wrapping_add(disp as i64 as u64);
                instr.set_src(0, Operand::RelAddr { target: fixed_target, size });
                debug_assert!(before < pos);
                instr.set_rip_rel_pos(pos - 4);
            } else {
                instr.set_src(0, rm);
            }
            (Opcode::Lea, instr)
        }
        0xc3 => (Opcode::Ret, Instruction::create(Opcode::Ret, 0, 0)),
        0xe8 => {
            let disp = i32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
            pos += 4;
            let target = orig_pc.wrapping_add(pos as u64).wrapping_add(disp as i64 as u64);
            let mut instr = Instruction::create(Opcode::Call, 1, 0);
            instr.set_dst(0, Operand::code_target(target, false));
            (Opcode::Call, instr)
        }
        0xe9 => {
            let disp = i32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
            pos += 4;
            let target = orig_pc.wrapping_add(pos as u64).wrapping_add(disp as i64 as u64);
            let mut instr = Instruction::create(Opcode::Jmp, 1, 0);
            instr.set_dst(0, Operand::code_target(target, false));
            (Opcode::Jmp, instr)
        }
        0xeb => {
            let disp = bytes[pos] as i8;
            pos += 1;
            let target = orig_pc.wrapping_add(pos as u64).wrapping_add(disp as i64 as u64);
            let mut instr = Instruction::create(Opcode::Jmp, 1, 0);
            instr.set_dst(0, Operand::code_target(target, false));
            (Opcode::Jmp, instr)
        }
        b if (0x70..=0x7f).contains(&b) => {
            let disp = bytes[pos] as i8;
            pos += 1;
            let target = orig_pc.wrapping_add(pos as u64).wrapping_add(disp as i64 as u64);
            let mut instr = Instruction::create(Opcode::Jcc, 1, 0);
            instr.set_dst(0, Operand::code_target(target, false));
            instr.predicate = cc_from_tttn(b & 0xf);
            (Opcode::Jcc, instr)
        }
        0x50..=0x57 => {
            let idx = (opcode_byte - 0x50) | if rex.b { 0x8 } else { 0 };
            let mut instr = Instruction::create(Opcode::Push, 0, 1);
            instr.set_src(0, Operand::reg(gpr64(idx)));
            (Opcode::Push, instr)
        }
        0x58..=0x5f => {
            let idx = (opcode_byte - 0x58) | if rex.b { 0x8 } else { 0 };
            let mut instr = Instruction::create(Opcode::Pop, 1, 0);
            instr.set_dst(0, Operand::reg(gpr64(idx)));
            (Opcode::Pop, instr)
        }
        0x90 => (Opcode::Nop, Instruction::create(Opcode::Nop, 0, 0)),
        0x01 | 0x29 | 0x39 | 0x85 | 0x21 | 0x09 | 0x31 => {
            let op = match opcode_byte {
                0x01 => Opcode::Add,
                0x29 => Opcode::Sub,
                0x39 => Opcode::Cmp,
                0x85 => Opcode::Test,
                0x21 => Opcode::And,
                0x09 => Opcode::Or,
                0x31 => Opcode::Xor,
                _ => unreachable!(),
            };
            let modrm = parse_modrm(bytes[pos]);
            let reg_idx = modrm.reg | if rex.r { 0x8 } else { 0 };
            let src_reg = if op_size == 8 { gpr64(reg_idx) } else { gpr32(reg_idx) };
            let rm = decode_modrm_rm(bytes, &mut pos, &rex, orig_pc, op_size);
            let num_dsts = if op == Opcode::Cmp || op == Opcode::Test { 0 } else { 1 };
            let mut instr = Instruction::create(op, num_dsts, 2);
            if num_dsts == 1 {
                instr.set_dst(0, rm);
                instr.set_src(0, rm);
                instr.set_src(1, Operand::reg(src_reg));
            } else {
                instr.set_src(0, rm);
                instr.set_src(1, Operand::reg(src_reg));
            }
            (op, instr)
        }
        0xff => {
            // group 5: indirect call/jmp through r/m, selected by modrm.reg
            let modrm_peek = parse_modrm(bytes[pos]);
            let rm = decode_modrm_rm(bytes, &mut pos, &rex, orig_pc, 8);
            match modrm_peek.reg {
                2 => {
                    let mut instr = Instruction::create(Opcode::CallInd, 0, 1);
                    instr.set_src(0, rm);
                    (Opcode::CallInd, instr)
                }
                4 => {
                    let mut instr = Instruction::create(Opcode::JmpInd, 0, 1);
                    instr.set_src(0, rm);
                    (Opcode::JmpInd, instr)
                }
                _ => {
                    let mut instr = Instruction::create(Opcode::Invalid, 0, 0);
                    instr.set_opcode(Opcode::Invalid);
                    (Opcode::Invalid, instr)
                }
            }
        }
        _ => (Opcode::Invalid, Instruction::create(Opcode::Invalid, 0, 0)),
    };

    instr.translation_pc = Some(orig_pc);
    instr.raw = Some(RawBytes { bytes: bytes[..pos].to_vec(), valid: true });
    let _ = opcode;
    (pos, instr)
}

fn cc_from_tttn(tttn: u8) -> Predicate {
    match tttn {
        0x4 => Predicate::Eq,
        0x5 => Predicate::Ne,
        0xc => Predicate::Lt,
        0xe => Predicate::Le,
        0xf => Predicate::Gt,
        0xd => Predicate::Ge,
        0x2 => Predicate::Carry,
        0x3 => Predicate::NotCarry,
        0x0 => Predicate::Overflow,
        0x1 => Predicate::NotOverflow,
        0x8 => Predicate::Sign,
        0x9 => Predicate::NotSign,
        _ => Predicate::None,
    }
}

fn tttn_from_cc(p: Predicate) -> u8 {
    match p {
        Predicate::Eq => 0x4,
        Predicate::Ne => 0x5,
        Predicate::Lt => 0xc,
        Predicate::Le => 0xe,
        Predicate::Gt => 0xf,
        Predicate::Ge => 0xd,
        Predicate::Carry => 0x2,
        Predicate::NotCarry => 0x3,
        Predicate::Overflow => 0x0,
        Predicate::NotOverflow => 0x1,
        Predicate::Sign => 0x8,
        Predicate::NotSign => 0x9,
        Predicate::None => 0x4,
    }
}

/// Encodes `instr` so that it will execute at `final_pc`, writing bytes
/// starting at... the caller's buffer (there is no physical buffer type at
/// this layer; see `crate::encode` for the buffer-taking wrapper). Returns
/// the encoded bytes and, for direct branches, whether the displacement fit
/// the ISA's direct-branch range.
pub fn encode_one(instr: &Instruction, final_pc: u64, check_reachable: bool) -> Option<(Vec<u8>, bool)> {
    let mut out = Vec::new();
    let mut reachable = true;

    match instr.opcode() {
        Opcode::Mov => {
            // Prefer the pre-encoded raw-byte fast path when available and
            // untouched by rip-relative rewriting.
            if let Some(raw) = &instr.raw {
                if raw.valid && !instr.rip_rel_valid {
                    return Some((raw.bytes.clone(), true));
                }
            }
            encode_mov(instr, &mut out)?;
        }
        Opcode::Lea => encode_lea(instr, final_pc, &mut out)?,
        Opcode::Ret => out.push(0xc3),
        Opcode::Nop => out.push(0x90),
        Opcode::Push => {
            let reg = instr.src(0).get_reg();
            push_rex_if_needed(&mut out, reg, false);
            out.push(0x50 + (reg_index(reg) & 0x7));
        }
        Opcode::Pop => {
            let reg = instr.dst(0).get_reg();
            push_rex_if_needed(&mut out, reg, false);
            out.push(0x58 + (reg_index(reg) & 0x7));
        }
        Opcode::Add | Opcode::Sub | Opcode::Cmp | Opcode::Test | Opcode::And | Opcode::Or | Opcode::Xor => {
            encode_alu(instr, &mut out)?;
        }
        Opcode::Jmp | Opcode::Call => {
            let target = match instr.dst(0) {
                Operand::CodeTarget { target, .. } => *target,
                _ => return None,
            };
            let opc = if instr.opcode() == Opcode::Jmp { 0xe9 } else { 0xe8 };
            let disp = (target as i64).wrapping_sub(final_pc as i64 + 5);
            if disp < i32::MIN as i64 || disp > i32::MAX as i64 {
                if check_reachable {
                    return None;
                }
                reachable = false;
            }
            out.push(opc);
            out.extend_from_slice(&(disp as i32).to_le_bytes());
        }
        Opcode::Jcc => {
            let target = match instr.dst(0) {
                Operand::CodeTarget { target, .. } => *target,
                _ => return None,
            };
            let disp = (target as i64).wrapping_sub(final_pc as i64 + 6);
            if disp < i32::MIN as i64 || disp > i32::MAX as i64 {
                if check_reachable {
                    return None;
                }
                reachable = false;
            }
            out.push(0x0f);
            out.push(0x80 + tttn_from_cc(instr.predicate));
            out.extend_from_slice(&(disp as i32).to_le_bytes());
        }
        Opcode::CallInd | Opcode::JmpInd => {
            let reg_field = if instr.opcode() == Opcode::CallInd { 2 } else { 4 };
            match *instr.src(0) {
                Operand::Reg(reg) => {
                    push_rex_if_needed(&mut out, reg, false);
                    out.push(0xff);
                    out.push(0xc0 | (reg_field << 3) | (reg_index(reg) & 0x7));
                }
                Operand::BaseDisp { base: Some(base), index, scale, disp, .. } => {
                    let rex = mem_rex_bits(base, index);
                    if rex != 0 {
                        out.push(REX_BASE | rex);
                    }
                    out.push(0xff);
                    encode_modrm_mem(&mut out, reg_field, base, index, scale, disp);
                }
                _ => return None,
            }
        }
        _ => return None,
    }

    Some((out, reachable))
}

fn reg_index(reg: RegisterId) -> u8 {
    const TABLE: [RegisterId; 16] = [
        r::Rax, r::Rcx, r::Rdx, r::Rbx, r::Rsp, r::Rbp, r::Rsi, r::Rdi, r::R8, r::R9, r::R10, r::R11, r::R12, r::R13,
        r::R14, r::R15,
    ];
    TABLE.iter().position(|&t| t == reg.canonical()).unwrap_or(0) as u8
}

fn push_rex_if_needed(out: &mut Vec<u8>, reg: RegisterId, force_w: bool) {
    let idx = reg_index(reg);
    let need_w = force_w || reg.size() == 8;
    if need_w || idx >= 8 {
        let mut rex = REX_BASE;
        if need_w {
            rex |= REX_W;
        }
        if idx >= 8 {
            rex |= REX_B;
        }
        out.push(rex);
    }
}

fn encode_modrm_reg_direct(out: &mut Vec<u8>, reg_field: u8, rm_reg: RegisterId) {
    out.push(0xc0 | ((reg_field & 0x7) << 3) | (reg_index(rm_reg) & 0x7));
}

/// Emits the modrm (+ SIB, + displacement) bytes for `[base + index*scale +
/// disp]` with `reg_field` in the reg slot, mirroring `decode_modrm_rm` in
/// the encode direction. A base of rsp/r12 always forces a SIB byte (modrm's
/// rm==0b100 means "SIB follows", the only way to name those registers as a
/// bare base); a base of rbp/r13 with `disp == 0` forces a 1-byte zero
/// displacement instead of `mod==00`, since `mod==00, rm==0b101` means
/// "no base, disp32" rather than "rbp/r13, no displacement" — the same
/// special case applies whether or not a SIB byte is present, since SIB's
/// base field reuses the same three low bits.
fn encode_modrm_mem(out: &mut Vec<u8>, reg_field: u8, base: RegisterId, index: Option<RegisterId>, scale: u8, disp: i32) {
    let base_idx = reg_index(base) & 0x7;
    let needs_sib = index.is_some() || base_idx == 0b100;
    let force_disp8 = base_idx == 0b101 && disp == 0;
    let md = if force_disp8 {
        0b01
    } else if disp == 0 {
        0b00
    } else if i8::try_from(disp).is_ok() {
        0b01
    } else {
        0b10
    };
    let rm = if needs_sib { 0b100 } else { base_idx };
    out.push((md << 6) | ((reg_field & 0x7) << 3) | rm);
    if needs_sib {
        let scale_bits = match scale {
            1 => 0,
            2 => 1,
            4 => 2,
            8 => 3,
            _ => 0,
        };
        let index_field = index.map(|i| reg_index(i) & 0x7).unwrap_or(0b100);
        out.push((scale_bits << 6) | (index_field << 3) | base_idx);
    }
    match md {
        0b00 => {}
        0b01 => out.push(disp as i8 as u8),
        0b10 => out.extend_from_slice(&disp.to_le_bytes()),
        _ => unreachable!(),
    }
}

/// REX.B/REX.X contribution of a memory operand's base/index registers
/// (REX_BASE and any REX.W/REX.R the caller needs are added separately).
fn mem_rex_bits(base: RegisterId, index: Option<RegisterId>) -> u8 {
    let mut rex = 0u8;
    if reg_index(base) >= 8 {
        rex |= REX_B;
    }
    if index.map(|i| reg_index(i) >= 8).unwrap_or(false) {
        rex |= REX_X;
    }
    rex
}

fn encode_mov(instr: &Instruction, out: &mut Vec<u8>) -> Option<()> {
    match (instr.dst(0), instr.src(0)) {
        (Operand::Reg(dst), Operand::Reg(src)) => {
            let w = dst.size() == 8 || src.size() == 8;
            let mut rex = 0u8;
            if w {
                rex |= REX_BASE | REX_W;
            }
            if reg_index(*src) >= 8 {
                rex |= REX_BASE | REX_R;
            }
            if reg_index(*dst) >= 8 {
                rex |= REX_BASE | REX_B;
            }
            if rex != 0 {
                out.push(rex);
            }
            out.push(0x89);
            encode_modrm_reg_direct(out, reg_index(*src), *dst);
            Some(())
        }
        (Operand::Reg(dst), Operand::ImmInt { value, size, .. }) => {
            // mov r32/r64, imm32/imm64 (0xb8+rd); wide only when either the
            // destination or the immediate's declared size asks for it.
            let w = dst.size() == 8 || *size == 8;
            let mut rex = 0u8;
            if w {
                rex |= REX_W;
            }
            if reg_index(*dst) >= 8 {
                rex |= REX_B;
            }
            if rex != 0 {
                out.push(REX_BASE | rex);
            }
            out.push(0xb8 + (reg_index(*dst) & 0x7));
            if w {
                out.extend_from_slice(&(*value as u64).to_le_bytes());
            } else {
                out.extend_from_slice(&(*value as i32).to_le_bytes());
            }
            Some(())
        }
        (Operand::Reg(dst), Operand::BaseDisp { base: Some(base), index, scale, disp, .. }) => {
            let w = dst.size() == 8;
            let mut rex = mem_rex_bits(*base, *index);
            if w {
                rex |= REX_W;
            }
            if reg_index(*dst) >= 8 {
                rex |= REX_R;
            }
            if rex != 0 {
                out.push(REX_BASE | rex);
            }
            out.push(0x8b);
            encode_modrm_mem(out, reg_index(*dst), *base, *index, *scale, *disp);
            Some(())
        }
        (Operand::BaseDisp { base: Some(base), index, scale, disp, .. }, Operand::Reg(src)) => {
            let w = src.size() == 8;
            let mut rex = mem_rex_bits(*base, *index);
            if w {
                rex |= REX_W;
            }
            if reg_index(*src) >= 8 {
                rex |= REX_R;
            }
            if rex != 0 {
                out.push(REX_BASE | rex);
            }
            out.push(0x89);
            encode_modrm_mem(out, reg_index(*src), *base, *index, *scale, *disp);
            Some(())
        }
        _ => None,
    }
}

fn encode_lea(instr: &Instruction, final_pc: u64, out: &mut Vec<u8>) -> Option<()> {
    let dst = instr.dst(0).get_reg();
    let target = match instr.src(0) {
        Operand::RelAddr { target, .. } => *target,
        _ => return None,
    };
    let w = dst.size() == 8;
    let mut rex = REX_BASE;
    if w {
        rex |= REX_W;
    }
    if reg_index(dst) >= 8 {
        rex |= REX_R;
    }
    out.push(rex);
    out.push(0x8d);
    out.push(0x05 | ((reg_index(dst) & 0x7) << 3));
    let disp = (target as i64).wrapping_sub(final_pc as i64 + out.len() as i64 + 4);
    out.extend_from_slice(&(disp as i32).to_le_bytes());
    Some(())
}

/// `src(0)` is always the accumulator operand (a register) across every
/// shape below; `src(1)` carries the other operand, whose shape selects
/// between the register, reversed-direction-memory and group-1-immediate
/// encodings.
fn encode_alu(instr: &Instruction, out: &mut Vec<u8>) -> Option<()> {
    let acc = instr.src(0).get_reg();
    match *instr.src(1) {
        Operand::Reg(reg) => {
            let opc = match instr.opcode() {
                Opcode::Add => 0x01,
                Opcode::Sub => 0x29,
                Opcode::Cmp => 0x39,
                Opcode::Test => 0x85,
                Opcode::And => 0x21,
                Opcode::Or => 0x09,
                Opcode::Xor => 0x31,
                _ => return None,
            };
            let w = acc.size() == 8 || reg.size() == 8;
            let mut rex = 0u8;
            if w {
                rex |= REX_W;
            }
            if reg_index(reg) >= 8 {
                rex |= REX_R;
            }
            if reg_index(acc) >= 8 {
                rex |= REX_B;
            }
            if rex != 0 {
                out.push(REX_BASE | rex);
            }
            out.push(opc);
            encode_modrm_reg_direct(out, reg_index(reg), acc);
            Some(())
        }
        Operand::BaseDisp { base: Some(base), index, scale, disp, .. } => {
            // reversed direction (`r, r/m` instead of `r/m, r`): the
            // accumulator is always the reg-field operand here, so a memory
            // second operand needs the opcode that reads into a register.
            // `test` has no such reversed form.
            let opc = match instr.opcode() {
                Opcode::Add => 0x03,
                Opcode::Sub => 0x2b,
                Opcode::Cmp => 0x3b,
                Opcode::And => 0x23,
                Opcode::Or => 0x0b,
                Opcode::Xor => 0x33,
                _ => return None,
            };
            let w = acc.size() == 8;
            let mut rex = mem_rex_bits(base, index);
            if w {
                rex |= REX_W;
            }
            if reg_index(acc) >= 8 {
                rex |= REX_R;
            }
            if rex != 0 {
                out.push(REX_BASE | rex);
            }
            out.push(opc);
            encode_modrm_mem(out, reg_index(acc), base, index, scale, disp);
            Some(())
        }
        Operand::ImmInt { value, .. } => {
            // group 1, sign-extended imm8 form (0x83 /x ib). `test` has no
            // group-1 encoding at all, and this path never widens beyond a
            // single immediate byte — callers outside this workspace's own
            // code generators would need the imm32 forms this table omits.
            let ext = match instr.opcode() {
                Opcode::Add => 0,
                Opcode::Or => 1,
                Opcode::And => 4,
                Opcode::Sub => 5,
                Opcode::Xor => 6,
                Opcode::Cmp => 7,
                _ => return None,
            };
            let imm8 = i8::try_from(value).ok()?;
            let w = acc.size() == 8;
            let mut rex = 0u8;
            if w {
                rex |= REX_W;
            }
            if reg_index(acc) >= 8 {
                rex |= REX_B;
            }
            if rex != 0 {
                out.push(REX_BASE | rex);
            }
            out.push(0x83);
            encode_modrm_reg_direct(out, ext, acc);
            out.push(imm8 as u8);
            Some(())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_mov_rax_rbx() {
        let bytes = [0x48, 0x89, 0xc3];
        let (len, instr) = decode_one(&bytes, 0x400000);
        assert_eq!(len, 3);
        assert_eq!(instr.opcode(), Opcode::Mov);
        assert_eq!(instr.dst(0).get_reg(), r::Rbx);
        assert_eq!(instr.src(0).get_reg(), r::Rax);
    }

    #[test]
    fn encode_mov_round_trips_identical_bytes() {
        let bytes = [0x48, 0x89, 0xc3];
        let (_len, instr) = decode_one(&bytes, 0x400000);
        let (encoded, reachable) = encode_one(&instr, 0x400000, true).unwrap();
        assert!(reachable);
        assert_eq!(encoded, bytes);
    }

    #[test]
    fn decode_rip_relative_lea() {
        let bytes = [0x48, 0x8d, 0x05, 0x11, 0x22, 0x33, 0x44];
        let (len, instr) = decode_one(&bytes, 0x1000);
        assert_eq!(len, 7);
        match instr.src(0) {
            Operand::RelAddr { target, .. } => assert_eq!(*target, 0x1000 + 7 + 0x44332211),
            other => panic!("unexpected operand {other:?}"),
        }
    }

    #[test]
    fn reencode_rip_relative_lea_at_new_site() {
        let bytes = [0x48, 0x8d, 0x05, 0x11, 0x22, 0x33, 0x44];
        let (_len, instr) = decode_one(&bytes, 0x1000);
        let (encoded, _) = encode_one(&instr, 0x2000, true).unwrap();
        assert_eq!(&encoded[..3], &[0x48, 0x8d, 0x05]);
        let newdisp = i32::from_le_bytes(encoded[3..7].try_into().unwrap());
        let target = 0x1000u64 + 7 + 0x44332211;
        assert_eq!(newdisp as i64, target as i64 - (0x2000i64 + 7));
    }

    #[test]
    fn unreachable_direct_jmp_without_check_sets_reachable_false() {
        let mut instr = Instruction::create(Opcode::Jmp, 1, 0);
        instr.set_dst(0, Operand::code_target(0x1_0000_0000, false));
        let (_bytes, reachable) = encode_one(&instr, 0, false).unwrap();
        assert!(!reachable);
    }

    #[test]
    fn unreachable_direct_jmp_with_check_required_fails() {
        let mut instr = Instruction::create(Opcode::Jmp, 1, 0);
        instr.set_dst(0, Operand::code_target(0x1_0000_0000, false));
        assert!(encode_one(&instr, 0, true).is_none());
    }

    #[test]
    fn encode_mov_reg_imm64_uses_movabs_form() {
        let mut instr = Instruction::create(Opcode::Mov, 1, 1);
        instr.set_dst(0, Operand::reg(r::R14));
        instr.set_src(0, Operand::imm_uint(0x1122_3344_5566_7788, 8));
        let (encoded, reachable) = encode_one(&instr, 0, true).unwrap();
        assert!(reachable);
        // REX.WB (r14 needs REX.B) + 0xb8+6 + 8-byte immediate.
        assert_eq!(encoded[0], REX_BASE | REX_W | REX_B);
        assert_eq!(encoded[1], 0xb8 + 6);
        assert_eq!(u64::from_le_bytes(encoded[2..10].try_into().unwrap()), 0x1122_3344_5566_7788);
    }

    #[test]
    fn encode_mov_load_from_base_disp_with_index_needs_sib() {
        let mut instr = Instruction::create(Opcode::Mov, 1, 1);
        instr.set_dst(0, Operand::reg(r::R14));
        instr.set_src(0, Operand::base_disp(Some(r::R14), Some(r::R15), 8, 8, 8, None, MemFlags::default()));
        let (encoded, _) = encode_one(&instr, 0, true).unwrap();
        assert_eq!(encoded[1], 0x8b);
        // modrm.rm == 0b100 (sib follows) regardless of r14 not being rsp/r12,
        // since an index operand always forces a SIB byte.
        assert_eq!(encoded[2] & 0x7, 0b100);
        let sib = encoded[3];
        assert_eq!(sib >> 6, 3); // scale 8
        assert_eq!(encoded[4], 8); // disp8
    }

    #[test]
    fn encode_mov_store_to_base_disp_rbp_family_forces_disp8() {
        // r13 (rbp's REX.B twin) as a bare base with disp == 0 would collide
        // with the "no base, rip-relative" encoding, so a 1-byte zero
        // displacement is forced instead of mod == 00.
        let mut instr = Instruction::create(Opcode::Mov, 1, 1);
        instr.set_dst(0, Operand::base_disp(Some(r::R13), None, 1, 0, 8, None, MemFlags::default()));
        instr.set_src(0, Operand::reg(r::Rax));
        let (encoded, _) = encode_one(&instr, 0, true).unwrap();
        assert_eq!(encoded[1], 0x89);
        assert_eq!(encoded[2] >> 6, 0b01); // mod == 01, forced disp8
        assert_eq!(*encoded.last().unwrap(), 0);
    }

    #[test]
    fn encode_alu_and_reg_with_memory_operand() {
        let mut instr = Instruction::create(Opcode::And, 1, 2);
        instr.set_dst(0, Operand::reg(r::R15));
        instr.set_src(0, Operand::reg(r::R15));
        instr.set_src(1, Operand::base_disp(Some(r::R12), None, 1, 16, 8, None, MemFlags::default()));
        let (encoded, _) = encode_one(&instr, 0, true).unwrap();
        assert_eq!(encoded[1], 0x23); // reversed-direction `and r, r/m`
    }

    #[test]
    fn encode_alu_cmp_reg_with_imm8() {
        let mut instr = Instruction::create(Opcode::Cmp, 0, 2);
        instr.set_src(0, Operand::reg(r::R14));
        instr.set_src(1, Operand::imm_int(1, 1));
        let (encoded, _) = encode_one(&instr, 0, true).unwrap();
        assert_eq!(encoded[1], 0x83);
        assert_eq!(*encoded.last().unwrap(), 1);
    }

    #[test]
    fn encode_jmp_ind_through_memory() {
        let mut instr = Instruction::create(Opcode::JmpInd, 0, 1);
        instr.set_src(0, Operand::base_disp(Some(r::R12), None, 1, 24, 8, None, MemFlags::default()));
        let (encoded, _) = encode_one(&instr, 0, true).unwrap();
        let op_idx = if encoded[0] & 0xf0 == REX_BASE { 1 } else { 0 };
        assert_eq!(encoded[op_idx], 0xff);
        assert_eq!((encoded[op_idx + 1] >> 3) & 0x7, 4); // group-5 /4 = jmp
    }

    #[test]
    fn decode_invalid_opcode_captures_raw_bytes() {
        let bytes = [0x0f, 0x0b]; // ud2, not in our table -> falls through on 0x0f path as invalid
        // 0x0f is not handled as a standalone leading opcode byte in this
        // subset (only 0f 8x jcc-near is), so decode_one treats it as an
        // unknown single-byte opcode and should report Invalid.
        let (len, instr) = decode_one(&bytes, 0x1000);
        assert_eq!(instr.opcode(), Opcode::Invalid);
        assert_eq!(instr.raw.as_ref().unwrap().bytes.len(), len);
    }
}
