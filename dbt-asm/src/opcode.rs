//! The opcode space this workspace's decoder/encoder understand.
//!
//! Unlike a fixed-width bytecode ISA (where one macro table can generate the
//! whole `Opcode` enum, as in a RISC-style instruction set), x86-64's
//! variable-length encoding needs per-operand-form dispatch logic that a
//! single declarative table can't express cleanly. So `Opcode` here is a
//! plain enum and the decode/encode *tables* live in `decode.rs`/`encode.rs`
//! as explicit match arms over it, curated to the
//! subset of x86-64 this crate implements in full plus the AArch64 subset
//! needed for direct-branch stub patching.

use core::fmt;

/// The decoded or to-be-encoded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum Opcode {
    /// Byte sequence the decoder could not map to any known instruction.
    /// Raw bytes are still captured so the instruction's length is known.
    Invalid,
    /// Bytes in an ISA's open-ended/reserved encoding space: not wrong, just
    /// not yet architected. Distinguished from `Invalid`, which means the
    /// decoder ran out of known forms to try.
    Undefined,

    // -- x86-64 --
    Mov,
    Lea,
    Push,
    Pop,
    Add,
    Sub,
    Cmp,
    Test,
    And,
    Or,
    Xor,
    Nop,
    Jmp,
    /// Conditional jump; condition lives in [`crate::instr::Instruction::predicate`].
    Jcc,
    Call,
    /// Indirect jump through a register or memory operand.
    JmpInd,
    /// Indirect call through a register or memory operand.
    CallInd,
    Ret,

    // -- AArch64 (direct-branch / stub-patching subset only) --
    /// `B <label>`, PC-relative, ±128MiB range.
    ArmB,
    /// `BL <label>`.
    ArmBl,
    /// `BR <reg>`, indirect branch.
    ArmBr,
    /// `BLR <reg>`, indirect call.
    ArmBlr,
    /// `LDR <reg>, [PC, #off]`: load-pc-relative-data, used for far stub links.
    ArmLdrLit,
    /// `RET`.
    ArmRet,
    /// `NOP`.
    ArmNop,
}

impl Opcode {
    /// `true` for any control-transfer instruction (direct or indirect),
    /// used by the cti-only fast decoder to shortcut length-only scanning.
    pub fn is_cti(self) -> bool {
        matches!(
            self,
            Opcode::Jmp
                | Opcode::Jcc
                | Opcode::Call
                | Opcode::JmpInd
                | Opcode::CallInd
                | Opcode::Ret
                | Opcode::ArmB
                | Opcode::ArmBl
                | Opcode::ArmBr
                | Opcode::ArmBlr
                | Opcode::ArmRet
        )
    }

    /// `true` for indirect control transfers: these are the instructions
    /// mangled to enter the indirect-branch lookup rather than a direct exit stub.
    pub fn is_indirect_cti(self) -> bool {
        matches!(self, Opcode::JmpInd | Opcode::CallInd | Opcode::Ret | Opcode::ArmBr | Opcode::ArmBlr | Opcode::ArmRet)
    }

    /// `true` for direct branches whose target is pc-relative and thus
    /// subject to the encoder's reachability contract.
    pub fn is_direct_branch(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Jcc | Opcode::Call | Opcode::ArmB | Opcode::ArmBl)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// ISA branch condition, or the absence of one. Stamped from the opcode's
/// condition-code field when applicable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Predicate {
    #[default]
    None,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Carry,
    NotCarry,
    Overflow,
    NotOverflow,
    Sign,
    NotSign,
}
