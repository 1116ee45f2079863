//! Exit-stub patching and indirect-branch-lookup dispatcher: the code-cache
//! side of a dynamic binary translation runtime. Decode/encode and the
//! operand/instruction IR live in `dbt_asm`; this crate assumes fragments
//! have already been built and encoded, and deals only with linking them
//! together and routing indirect branches.

pub mod consts;
pub mod dcontext;
pub mod error;
pub mod fcache;
pub mod fragment;
pub mod gencode;
pub mod ibl;
pub mod isa;
pub mod stub;
pub mod unlink_trampoline;

pub mod prelude {
    pub use dbt_asm::TargetIsa;

    pub use crate::dcontext::DContext;
    pub use crate::error::CoreError;
    pub use crate::fcache::{FcacheReturn, ReturnReason};
    pub use crate::fragment::{fragment_prefix_size, insert_fragment_prefix, Fragment, FragmentFlags, LinkKind, LinkStub, LinkStubFlags};
    pub use crate::gencode::{GenCode, SharingClass};
    pub use crate::ibl::{BranchType, FragmentKind, IblTables};
    pub use crate::isa::{port, IsaPort};
    pub use crate::stub::{insert_exit_stub, patch_stub, stub_is_patched, unpatch_stub, StubState};
    pub use crate::unlink_trampoline::{emit_unlinked_landing_pad, UnlinkedLandingPad};
}
