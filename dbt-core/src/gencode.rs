//! Generated-code regions: one [`GenCode`] per (isa mode, sharing class)
//! rather than the global mutable gencode pointers the original design
//! keeps per-ISA. Each region owns the IBL routine bytes and exit-stub
//! templates for one combination, so a process running mixed shared and
//! thread-private fragments keeps their generated trampolines apart
//! without any shared mutable global.

use dbt_asm::TargetIsa;

use crate::ibl::routine::IblRoutine;

/// Whether a region's generated trampolines are reachable from every
/// thread or only from the thread that built them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharingClass {
    /// Visible to every thread; used for fragments built from shared,
    /// read-only guest code.
    Shared,
    /// Visible only to the owning thread.
    Private,
}

/// One generated-code region: the IBL entry routine for every
/// `(FragmentKind, BranchType)` pair this region serves, plus the ISA it was
/// built for.
#[derive(Debug)]
pub struct GenCode {
    pub isa: TargetIsa,
    pub sharing: SharingClass,
    routines: Vec<(crate::ibl::FragmentKind, crate::ibl::BranchType, IblRoutine)>,
}

impl GenCode {
    /// Creates an empty region; routines are added with [`GenCode::emit_routine`].
    pub fn new(isa: TargetIsa, sharing: SharingClass) -> Self {
        Self { isa, sharing, routines: Vec::new() }
    }

    /// Emits (or replaces) the IBL entry routine for `(kind, branch_type)`.
    pub fn emit_routine(&mut self, kind: crate::ibl::FragmentKind, branch_type: crate::ibl::BranchType, routine: IblRoutine) {
        if let Some(slot) = self.routines.iter_mut().find(|(k, b, _)| *k == kind && *b == branch_type) {
            slot.2 = routine;
        } else {
            self.routines.push((kind, branch_type, routine));
        }
    }

    /// Looks up the entry routine for `(kind, branch_type)`, if emitted.
    pub fn routine(&self, kind: crate::ibl::FragmentKind, branch_type: crate::ibl::BranchType) -> Option<&IblRoutine> {
        self.routines.iter().find(|(k, b, _)| *k == kind && *b == branch_type).map(|(_, _, r)| r)
    }

    /// Re-emits the `(kind, branch_type)` entry routine so its miss path
    /// falls through to `special_target` instead of whatever it was built
    /// with, without touching the live table `table_cell_addr` points at.
    /// Used to redirect every future lookup through this routine to a
    /// different fallback — e.g. a flush-in-progress trampoline — and later
    /// relinked back to the real miss trampoline with another call.
    pub fn relink_special_ibl_xfer(
        &mut self,
        kind: crate::ibl::FragmentKind,
        branch_type: crate::ibl::BranchType,
        table_cell_addr: u64,
        special_target: u64,
    ) {
        let routine = crate::ibl::routine::emit_ibl_routine(self.isa, table_cell_addr, special_target);
        self.emit_routine(kind, branch_type, routine);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ibl::{BranchType, FragmentKind};

    #[test]
    fn emit_then_lookup_round_trips() {
        let mut gc = GenCode::new(TargetIsa::X86_64, SharingClass::Private);
        let routine = IblRoutine { bytes: vec![0x90] };
        gc.emit_routine(FragmentKind::Basic, BranchType::Call, routine);
        assert!(gc.routine(FragmentKind::Basic, BranchType::Call).is_some());
        assert!(gc.routine(FragmentKind::Basic, BranchType::Return).is_none());
    }

    #[test]
    fn relink_special_ibl_xfer_replaces_the_routine_bytes() {
        let mut gc = GenCode::new(TargetIsa::X86_64, SharingClass::Private);
        let original = crate::ibl::routine::emit_ibl_routine(TargetIsa::X86_64, 0x1000, 0x2000);
        gc.emit_routine(FragmentKind::Basic, BranchType::Call, original.clone());
        gc.relink_special_ibl_xfer(FragmentKind::Basic, BranchType::Call, 0x1000, 0x9999);
        let relinked = gc.routine(FragmentKind::Basic, BranchType::Call).unwrap();
        assert_ne!(relinked.bytes, original.bytes);
    }
}
