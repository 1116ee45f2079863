//! Error variants surfaced at collaborator-facing setup APIs.
//!
//! Nothing on the stub-patching or IBL lookup hot path returns `Result`: both
//! are contracts between already-validated state (a fragment that has
//! already been encoded, a table that has already been sized). Errors only
//! arise when a caller hands this crate something it hasn't validated yet.

use thiserror::Error;

/// Errors raised by `dbt-core` setup and maintenance APIs.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A direct branch's target lies outside the encoding's displacement
    /// range and no island or far form was available.
    #[error("branch target {target:#x} is not reachable from {from:#x}")]
    UnreachableTarget {
        /// The address the branch needs to reach.
        target: u64,
        /// The address the branch would be emitted at.
        from: u64,
    },

    /// A stub's allotted byte budget is too small for the form being
    /// patched into it (e.g. widening a near-linked stub to far-linked).
    #[error("stub at {at:#x} has {have} bytes, needs {need}")]
    StubTooSmall {
        /// The stub's address.
        at: u64,
        /// Bytes actually reserved for the stub.
        have: usize,
        /// Bytes the requested patch form needs.
        need: usize,
    },

    /// An IBL table lookup or insert named a `(FragmentKind, BranchType)`
    /// pair this build has no table configured for.
    #[error("no ibl table configured for fragment kind {fragment_kind:?} / branch type {branch_type:?}")]
    UnknownIblTableKind {
        /// The fragment kind requested.
        fragment_kind: crate::ibl::FragmentKind,
        /// The branch type requested.
        branch_type: crate::ibl::BranchType,
    },

    /// A requested ISA feature (a register class, an addressing mode) has
    /// no support in this port.
    #[error("{reg} is not supported by this isa port")]
    FeatureUnsupported {
        /// Name of the unsupported feature, for diagnostics.
        reg: &'static str,
    },
}
