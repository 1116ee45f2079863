//! Which ISA port a decode/encode call is dispatched to.

/// The family of ISA a decode/encode call targets. Distinct from
/// [`crate::instr::IsaMode`], which is the *sub-mode* within one family
/// (e.g. Thumb within AArch32).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetIsa {
    /// Fully realized port: decode/encode tables, stub templates, IBL
    /// emitter, `fill_with_nops`.
    X86_64,
    /// Partial port: direct-branch encode/decode, stub templates, IBL
    /// emitter and `fill_with_nops` only; full AArch64 instruction decode
    /// is out of scope for this workspace.
    Aarch64,
}
