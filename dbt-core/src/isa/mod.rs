//! Per-ISA port: the handful of operations the stub-patching and IBL
//! subsystems need that can't be expressed ISA-generically (register
//! choice, branch encoding, nop padding).

pub mod aarch64;
pub mod x86_64;

use dbt_asm::{RegisterId, TargetIsa};

use crate::error::CoreError;
use crate::ibl::routine::IblRoutine;

pub use aarch64::Aarch64Port;
pub use x86_64::X86_64Port;

/// ISA-specific operations the dispatcher needs outside of decode/encode.
/// x86-64's [`X86_64Port`] is the fully realized implementation; AArch64's
/// [`Aarch64Port`] only covers direct-branch patching, matching the partial
/// decode/encode coverage in `dbt_asm::aarch64`.
pub trait IsaPort {
    /// The ISA this port implements.
    fn isa(&self) -> TargetIsa;

    /// Registers the code cache may use as scratch without save/restore.
    fn scratch_registers(&self) -> &'static [RegisterId];

    /// The register this port reserves to hold the thread's `DContext`
    /// pointer while running generated code.
    fn stolen_register(&self) -> RegisterId;

    /// Bytes reserved for one exit stub in this ISA.
    fn stub_byte_budget(&self) -> usize;

    /// Overwrites `buf` with this ISA's no-op encoding.
    fn fill_with_nops(&self, buf: &mut [u8]);

    /// Builds the IBL entry routine for this ISA: the hand-emitted lookup
    /// sequence a fragment's indirect exit jumps into. `table_cell_addr` is
    /// the address of the cell holding a pointer to the live table header
    /// this routine dereferences on every lookup; `miss_trampoline_pc` is
    /// where a lookup miss falls through to.
    fn emit_ibl_routine(&self, table_cell_addr: u64, miss_trampoline_pc: u64) -> IblRoutine;

    /// Patches a direct branch at `buf`, to be executed at `from_pc`, to
    /// reach `target`. Fails if `target` is out of the ISA's direct-branch
    /// range.
    fn patch_branch(&self, buf: &mut [u8], from_pc: u64, target: u64) -> Result<(), CoreError>;
}

/// Returns the port for `isa`.
pub fn port(isa: TargetIsa) -> &'static dyn IsaPort {
    match isa {
        TargetIsa::X86_64 => &X86_64Port,
        TargetIsa::Aarch64 => &Aarch64Port,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_dispatches_by_isa() {
        assert_eq!(port(TargetIsa::X86_64).isa(), TargetIsa::X86_64);
        assert_eq!(port(TargetIsa::Aarch64).isa(), TargetIsa::Aarch64);
    }
}
