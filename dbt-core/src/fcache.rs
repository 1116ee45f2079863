//! Thread-boundary contract between generated code and this crate: the
//! fixed entry point every unlinked stub and every IBL table miss falls
//! through to, which hands control back to the collaborator that owns
//! fragment building and linking.

use dbt_asm::TargetIsa;

use crate::dcontext::DContext;

/// Why control returned to `fcache_return`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnReason {
    /// An exit stub was unlinked; the collaborator must decide whether to
    /// build or look up the target fragment and relink.
    Unlinked,
    /// An IBL table lookup missed; the collaborator must resolve `target`
    /// and populate the table.
    IblMiss,
    /// A target was deleted and its stub routed here instead of the
    /// deleted fragment.
    DeletedTarget,
}

/// Describes one `fcache_return` event for the collaborator to act on.
/// This crate never calls back into the collaborator directly (it doesn't
/// assume threading model or scheduling); it only describes what happened.
#[derive(Debug, Clone, Copy)]
pub struct FcacheReturn {
    pub reason: ReturnReason,
    /// The guest target that needs resolving, if known.
    pub target_tag: Option<u64>,
    /// Code-cache address execution returned from.
    pub from_pc: u64,
}

/// Builds the [`FcacheReturn`] description for an unlinked-stub exit.
pub fn unlinked_return(from_pc: u64, target_tag: u64) -> FcacheReturn {
    FcacheReturn { reason: ReturnReason::Unlinked, target_tag: Some(target_tag), from_pc }
}

/// Builds the [`FcacheReturn`] description for an IBL table miss.
pub fn ibl_miss_return(from_pc: u64, target_tag: u64) -> FcacheReturn {
    FcacheReturn { reason: ReturnReason::IblMiss, target_tag: Some(target_tag), from_pc }
}

/// Builds the [`FcacheReturn`] description for a deleted-target stub.
pub fn deleted_target_return(from_pc: u64) -> FcacheReturn {
    FcacheReturn { reason: ReturnReason::DeletedTarget, target_tag: None, from_pc }
}

/// Per-ISA address `fcache_return`'s own trampoline lives at, recorded so
/// stub patching can reach it as an ordinary direct-branch target.
pub fn trampoline_isa(dcontext: &DContext) -> TargetIsa {
    dcontext.isa()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlinked_return_carries_target() {
        let r = unlinked_return(0x1000, 42);
        assert_eq!(r.reason, ReturnReason::Unlinked);
        assert_eq!(r.target_tag, Some(42));
    }

    #[test]
    fn deleted_target_return_has_no_target() {
        let r = deleted_target_return(0x1000);
        assert_eq!(r.target_tag, None);
    }
}
