//! Indirect-branch lookup: per-`(FragmentKind, BranchType)` hashtables that
//! back the code cache's indirect-branch dispatcher.

pub mod routine;
pub mod table;

use strum::EnumIter;

use crate::consts::IBL_INITIAL_CAPACITY;
use crate::error::CoreError;
pub use table::Table;

/// Coarse classification of the fragment an indirect branch is exiting
/// from; a basic block and a trace want separate tables since their hit
/// rates and target sets differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum FragmentKind {
    /// A single basic block fragment.
    Basic,
    /// A fragment built by chaining multiple blocks together.
    Trace,
}

/// The indirect branch form being dispatched; each gets its own table since
/// call/return/jmp* targets cluster very differently in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum BranchType {
    /// Indirect call (`call r/m64`, `blr`).
    Call,
    /// Return (`ret`).
    Return,
    /// Indirect jump (`jmp r/m64`, `br`).
    JmpInd,
}

/// Owns one [`Table`] per `(FragmentKind, BranchType)` pair this process
/// dispatches through.
#[derive(Debug)]
pub struct IblTables {
    tables: Vec<(FragmentKind, BranchType, Table)>,
}

impl IblTables {
    /// Builds a fresh, empty table for every `(kind, branch_type)`
    /// combination of the given slices.
    pub fn new(kinds: &[FragmentKind], branch_types: &[BranchType]) -> Self {
        let mut tables = Vec::with_capacity(kinds.len() * branch_types.len());
        for &kind in kinds {
            for &branch_type in branch_types {
                tables.push((kind, branch_type, Table::new(IBL_INITIAL_CAPACITY)));
            }
        }
        Self { tables }
    }

    fn find(&self, kind: FragmentKind, branch_type: BranchType) -> Result<&Table, CoreError> {
        self.tables
            .iter()
            .find(|(k, b, _)| *k == kind && *b == branch_type)
            .map(|(_, _, t)| t)
            .ok_or(CoreError::UnknownIblTableKind { fragment_kind: kind, branch_type })
    }

    /// Looks up `tag` in the table for `(kind, branch_type)`.
    pub fn lookup(&self, kind: FragmentKind, branch_type: BranchType, tag: u64) -> Result<Option<u64>, CoreError> {
        Ok(self.find(kind, branch_type)?.lookup(tag))
    }

    /// Inserts or replaces `tag -> target` in the table for `(kind, branch_type)`.
    pub fn insert(&self, kind: FragmentKind, branch_type: BranchType, tag: u64, target: u64) -> Result<(), CoreError> {
        self.find(kind, branch_type)?.insert(tag, target);
        Ok(())
    }

    /// Rewrites `tag`'s target to `delete_trampoline` without disturbing the
    /// probe chain of later entries.
    pub fn delete(&self, kind: FragmentKind, branch_type: BranchType, tag: u64, delete_trampoline: u64) -> Result<bool, CoreError> {
        Ok(self.find(kind, branch_type)?.delete(tag, delete_trampoline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_is_an_error() {
        let tables = IblTables::new(&[FragmentKind::Basic], &[BranchType::Call]);
        let err = tables.lookup(FragmentKind::Trace, BranchType::Call, 1).unwrap_err();
        assert!(matches!(err, CoreError::UnknownIblTableKind { .. }));
    }

    #[test]
    fn known_kind_starts_empty() {
        let tables = IblTables::new(&[FragmentKind::Basic], &[BranchType::Call]);
        assert_eq!(tables.lookup(FragmentKind::Basic, BranchType::Call, 42).unwrap(), None);
    }
}
