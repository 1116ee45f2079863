//! Per-thread context block.
//!
//! Grounded on the dcontext offset table in `opnd_get_reg_dcontext_offs`:
//! the original keeps a table mapping a stolen/scratch register id to its
//! spill slot's byte offset inside the thread's context struct, so emitted
//! code can reference "my TLS spill slot" without the compiler knowing the
//! struct layout. This module is the Rust analogue: a fixed-size spill
//! array indexed by slot id, plus the lookup table from [`RegisterId`] to
//! slot.

use dbt_asm::{RegisterId, TargetIsa};

use crate::consts::NUM_TLS_SLOTS;
use crate::error::CoreError;

/// Per-thread, process-private execution context. One instance per
/// translating thread; never shared across threads.
#[derive(Debug)]
pub struct DContext {
    isa: TargetIsa,
    spill: [u64; NUM_TLS_SLOTS],
    next_tag: u64,
}

impl DContext {
    /// Creates a fresh context for `isa` with all spill slots zeroed.
    pub fn new(isa: TargetIsa) -> Self {
        Self { isa, spill: [0; NUM_TLS_SLOTS], next_tag: 1 }
    }

    /// The ISA this context was created for.
    pub fn isa(&self) -> TargetIsa {
        self.isa
    }

    /// Reads the spill slot at `slot`.
    pub fn spill_slot(&self, slot: usize) -> u64 {
        self.spill[slot]
    }

    /// Writes the spill slot at `slot`.
    pub fn set_spill_slot(&mut self, slot: usize, value: u64) {
        self.spill[slot] = value;
    }

    /// Allocates the next fragment tag, starting at 1 (0 is reserved as a
    /// sentinel for "no fragment").
    pub fn alloc_tag(&mut self) -> u64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        tag
    }

    /// Maps a register this context steals for its own bookkeeping (e.g.
    /// to hold the linear-address table base during a lookup sequence) to
    /// its spill slot index, mirroring the dcontext-offset table the
    /// original keeps per ISA.
    pub fn slot_of(&self, reg: RegisterId) -> Result<usize, CoreError> {
        match self.isa {
            TargetIsa::X86_64 => {
                if reg == dbt_asm::register::x86_64::R14 {
                    Ok(crate::consts::TLS_SPILL_SLOT_0)
                } else if reg == dbt_asm::register::x86_64::R15 {
                    Ok(crate::consts::TLS_SPILL_SLOT_1)
                } else {
                    Err(CoreError::FeatureUnsupported { reg: "register has no dcontext slot" })
                }
            }
            TargetIsa::Aarch64 => {
                if reg == dbt_asm::register::aarch64::X16 {
                    Ok(crate::consts::TLS_SPILL_SLOT_0)
                } else if reg == dbt_asm::register::aarch64::X17 {
                    Ok(crate::consts::TLS_SPILL_SLOT_1)
                } else {
                    Err(CoreError::FeatureUnsupported { reg: "register has no dcontext slot" })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_monotonic_and_nonzero() {
        let mut dc = DContext::new(TargetIsa::X86_64);
        let a = dc.alloc_tag();
        let b = dc.alloc_tag();
        assert!(a > 0);
        assert!(b > a);
    }

    #[test]
    fn stolen_register_maps_to_spill_slot() {
        let dc = DContext::new(TargetIsa::X86_64);
        let slot = dc.slot_of(dbt_asm::register::x86_64::R14).unwrap();
        assert_eq!(slot, crate::consts::TLS_SPILL_SLOT_0);
    }

    #[test]
    fn unrelated_register_has_no_slot() {
        let dc = DContext::new(TargetIsa::X86_64);
        assert!(dc.slot_of(dbt_asm::register::x86_64::Rax).is_err());
    }
}
