//! The IR instruction node.

use crate::opcode::{Opcode, Predicate};
use crate::operand::Operand;

bitflags::bitflags! {
    /// Prefix/flag bitset carried on every IR instruction.
    #[derive(Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct InstrFlags: u32 {
        /// `lock` prefix.
        const LOCK          = 1 << 0;
        /// Static branch-hint prefix (taken/not-taken).
        const BRANCH_HINT   = 1 << 1;
        /// Mandatory operand-size override (0x66 on x86).
        const DATA16        = 1 << 2;
        /// Mandatory address-size override (0x67 on x86).
        const ADDR16        = 1 << 3;
        /// REX.W / 64-bit operand size.
        const REX_W         = 1 << 4;
        /// VEX.L / 256-bit vector width.
        const VEX_L         = 1 << 5;
        /// This instruction is a meta-instruction inserted by the translator
        /// (mangling, spills) rather than a decoded app instruction. Matters
        /// for fault translation: a fault inside a meta-instruction must be
        /// attributed to the app instruction it was derived from.
        const META          = 1 << 6;
    }
}

/// VEX.vvvv / mask-register selector, carried separately from [`InstrFlags`]
/// since they hold a register index rather than a single bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VectorSelectors {
    pub vex_vvvv: Option<u8>,
    pub mask_reg: Option<u8>,
}

/// Bi-modal ISA mode tag (e.g. ARM vs Thumb, x86-32 vs x86-64).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IsaMode {
    #[default]
    Default,
    Thumb,
    X86Legacy,
}

/// Identity of an [`Instruction`] node within an [`crate::ilist::InstrList`],
/// used by [`Operand::InstrRef`] to reference another instruction before its
/// final placement is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstrId(pub(crate) usize);

/// Raw encoded bytes captured by the decoder, or staged by the encoder for
/// later relocation without re-encoding.
#[derive(Debug, Clone, Default)]
pub struct RawBytes {
    pub bytes: Vec<u8>,
    pub valid: bool,
}

const MAX_DSTS: usize = 2;
const MAX_SRCS: usize = 4;

/// A single guest (or synthesized) instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    opcode: Opcode,
    dsts: Vec<Operand>,
    srcs: Vec<Operand>,
    max_dsts: usize,
    max_srcs: usize,
    pub flags: InstrFlags,
    pub vector: VectorSelectors,
    pub predicate: Predicate,
    pub isa_mode: Option<IsaMode>,
    pub raw: Option<RawBytes>,
    /// The guest pc this instruction was decoded from, if any.
    pub translation_pc: Option<u64>,
    /// Scratch field threaded by the encoder's two-pass label resolution:
    /// first pass stores this instruction's byte offset from the list
    /// head, second pass reads referenced instructions' `note` to compute
    /// pc-relative displacements.
    pub note: i64,
    /// For ISAs with pc-relative data references: whether `rip_rel_pos` is
    /// meaningful, and if so the byte offset within `raw` at which the
    /// 32-bit signed displacement lies.
    pub rip_rel_valid: bool,
    pub rip_rel_pos: usize,
}

impl Instruction {
    /// `instr_create_Ndst_Msrc`
    pub fn create(opcode: Opcode, num_dsts: usize, num_srcs: usize) -> Self {
        assert!(num_dsts <= MAX_DSTS, "too many destinations for this IR");
        assert!(num_srcs <= MAX_SRCS, "too many sources for this IR");
        Instruction {
            opcode,
            dsts: vec![Operand::Null; num_dsts],
            srcs: vec![Operand::Null; num_srcs],
            max_dsts: num_dsts,
            max_srcs: num_srcs,
            flags: InstrFlags::empty(),
            vector: VectorSelectors::default(),
            predicate: Predicate::None,
            isa_mode: None,
            raw: None,
            translation_pc: None,
            note: 0,
            rip_rel_valid: false,
            rip_rel_pos: 0,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.opcode = opcode;
    }

    pub fn num_dsts(&self) -> usize {
        self.max_dsts
    }

    pub fn num_srcs(&self) -> usize {
        self.max_srcs
    }

    pub fn dst(&self, i: usize) -> &Operand {
        &self.dsts[i]
    }

    pub fn src(&self, i: usize) -> &Operand {
        &self.srcs[i]
    }

    pub fn set_dst(&mut self, i: usize, opnd: Operand) {
        self.dsts[i] = opnd;
    }

    pub fn set_src(&mut self, i: usize, opnd: Operand) {
        self.srcs[i] = opnd;
    }

    pub fn dsts(&self) -> &[Operand] {
        &self.dsts
    }

    pub fn srcs(&self) -> &[Operand] {
        &self.srcs
    }

    /// `instr_get_rel_addr_target`: the absolute target of a pc-relative
    /// data reference carried by this instruction's raw bytes, if any.
    pub fn get_rel_addr_target(&self) -> Option<u64> {
        self.srcs
            .iter()
            .chain(self.dsts.iter())
            .find_map(|o| match o {
                Operand::RelAddr { target, .. } => Some(*target),
                _ => None,
            })
    }

    /// `instr_set_rip_rel_pos`
    pub fn set_rip_rel_pos(&mut self, pos: usize) {
        self.rip_rel_valid = true;
        self.rip_rel_pos = pos;
    }

    /// `true` if every destination and source is set to something other
    /// than `Operand::Null`. Used by construction-site assertions; not
    /// required by the decoder, which may legitimately leave trailing
    /// slots null for e.g. `ret`.
    pub fn is_fully_populated(&self) -> bool {
        self.dsts.iter().all(|o| !matches!(o, Operand::Null))
            && self.srcs.iter().all(|o| !matches!(o, Operand::Null))
    }

    pub fn is_meta(&self) -> bool {
        self.flags.contains(InstrFlags::META)
    }
}
