//! Compile-time tuning knobs. No config file, no CLI: everything here is a
//! `pub const` the way `fuel-vm` carries its VM parameters, since none of
//! these need to vary at runtime for a single build/ISA combination.

/// Number of general-purpose registers the code cache may clobber as
/// scratch without saving/restoring them across a fragment exit.
pub const NUM_SCRATCH_REGS: usize = 2;

/// TLS slot index holding the per-thread `DContext` pointer.
pub const TLS_DCONTEXT_SLOT: usize = 0;

/// TLS slot index used as the first scratch spill slot by exit stubs.
pub const TLS_SPILL_SLOT_0: usize = 1;

/// TLS slot index used as the second scratch spill slot by exit stubs.
pub const TLS_SPILL_SLOT_1: usize = 2;

/// TLS slot index the emitted IBL lookup routine stashes the tag it is
/// searching for, so it can reload it after a scratch register gets
/// clobbered mid-loop.
pub const TLS_IBL_TAG_SLOT: usize = 3;

/// TLS slot index the emitted IBL lookup routine stashes the table's
/// `entries_base` pointer in, reloaded once per probe iteration since both
/// scratch registers are needed for other values within the loop body.
pub const TLS_IBL_BASE_SLOT: usize = 4;

/// TLS slot index the emitted IBL lookup routine stashes a hit's resolved
/// target in, so the indirect exit jump can read it after both scratch
/// registers have already been restored to the app's values.
pub const TLS_IBL_TARGET_SLOT: usize = 5;

/// Total TLS slots reserved for this crate's use.
pub const NUM_TLS_SLOTS: usize = 6;

/// Initial capacity (entry count) of a freshly created IBL table. Always a
/// power of two so `mask = capacity - 1` works for linear probing.
pub const IBL_INITIAL_CAPACITY: usize = 32;

/// Maximum load factor before a table resize is due, as a percentage.
pub const IBL_MAX_LOAD_PERCENT: usize = 50;

/// Total bytes reserved per x86-64 exit stub: the 16-byte patchable region
/// (`crate::stub::STUB_BYTES`) plus room for the call into the IBL entry
/// routine on an indirect exit.
pub const X86_64_STUB_BYTES: usize = 64;

/// Total bytes reserved per AArch64 exit stub.
pub const AARCH64_STUB_BYTES: usize = 64;

static_assertions::const_assert!(X86_64_STUB_BYTES >= crate::stub::STUB_BYTES);
static_assertions::const_assert!(AARCH64_STUB_BYTES >= crate::stub::STUB_BYTES);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_capacity_is_power_of_two() {
        assert!(IBL_INITIAL_CAPACITY.is_power_of_two());
    }
}
