//! Boundary types the code-cache dispatcher reads and writes. These are the
//! shapes a collaborator (the fragment builder, the linker) hands this
//! crate; the crate itself never allocates or frees the code-cache memory
//! a `Fragment` describes.

use dbt_asm::opcode::Opcode;
use dbt_asm::operand::MemFlags;
use dbt_asm::register::x86_64 as x64;
use dbt_asm::{encode_list, Instruction, InstrList, Operand, TargetIsa};

use crate::consts::{TLS_SPILL_SLOT_0, TLS_SPILL_SLOT_1};

/// Bitflags describing a fragment's shape, mirroring the small set of
/// fragment-kind flags the stub-patching and IBL subsystems need to know
/// about (everything else about a fragment is opaque to this crate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentFlags {
    /// The fragment ends in an indirect branch that must resolve through
    /// the IBL table rather than a direct patched jump.
    pub has_indirect_exit: bool,
    /// The fragment was built with a shared (cross-thread) target; its
    /// exit stubs use the shared gencode region's templates.
    pub shared: bool,
    /// This fragment is a trace (a chain of basic blocks stitched along a
    /// hot path) rather than a single basic block; trace exits use the
    /// trace-cmp stub shape instead of the plain block-exit shape.
    pub is_trace: bool,
    /// Fragment bytes are Thumb encoding rather than the ISA's default
    /// instruction set (AArch32 only; always `false` on x86-64/AArch64).
    pub is_thumb: bool,
    /// Fragment lives in a coarse-grain unit: persisted, read-only code
    /// shared across processes, never patched in place after emission.
    pub is_coarse_grain: bool,
}

/// A unit of translated code the collaborator has already emitted into the
/// code cache. This crate patches its exit stubs and may read its `tag` for
/// IBL entries; it never moves or frees the underlying bytes.
#[derive(Debug, Clone, Copy)]
pub struct Fragment {
    /// Opaque identity used as the IBL lookup key (the guest address the
    /// fragment starts translating from, typically).
    pub tag: u64,
    /// Code-cache address of the fragment's first byte.
    pub start_pc: u64,
    /// Number of bytes before the first real instruction (prefix area
    /// reserved for the direct-branch-linking dispatch used when re-linking
    /// another fragment's stub to jump straight into this one).
    pub prefix_size: u32,
    /// The instruction set this fragment's bytes are encoded in.
    pub isa: TargetIsa,
    pub flags: FragmentFlags,
}

impl Fragment {
    /// Address of the first instruction a linker should jump to when
    /// linking directly into this fragment, skipping its prefix.
    pub fn entry_pc(&self) -> u64 {
        self.start_pc + self.prefix_size as u64
    }
}

/// AArch64 placeholder prefix length, matching `ibl::routine`'s own
/// documented AArch64 gap: this port's decode/encode tables carry no
/// load/store forms yet, so there is nothing real to build a restore
/// sequence out of.
const AARCH64_PREFIX_NOP_WORDS: usize = 2;

fn restore_prefix_instrs_x86_64() -> InstrList {
    let mut list = InstrList::new();
    let stolen = x64::R12;
    for (reg, slot) in [(x64::R14, TLS_SPILL_SLOT_0), (x64::R15, TLS_SPILL_SLOT_1)] {
        let mut i = Instruction::create(Opcode::Mov, 1, 1);
        i.set_dst(0, Operand::reg(reg));
        i.set_src(0, Operand::base_disp(Some(stolen), None, 1, slot as i32 * 8, 8, None, MemFlags::default()));
        list.append(i);
    }
    list
}

fn restore_prefix_instrs_aarch64() -> InstrList {
    let mut list = InstrList::new();
    for _ in 0..AARCH64_PREFIX_NOP_WORDS {
        list.append(Instruction::create(Opcode::ArmNop, 0, 0));
    }
    list
}

/// Bytes a fragment must reserve before its real entry point for the
/// indirect-branch-target restore prologue: any stub or IBL routine that
/// jumps into a fragment may have left the scratch registers holding
/// lookup-internal values rather than what the fragment's translated code
/// expects, so every non-coarse-grain fragment carries a small prefix that
/// reloads both scratch registers from their TLS spill slots before falling
/// into real code. Coarse-grain fragments never carry one: their bytes are
/// emitted once into a read-only, cross-process unit and are never a target
/// of this dynamic relinking, mirroring `fragment_ibt_prefix_size`'s
/// coarse-unit exclusion.
pub fn fragment_prefix_size(isa: TargetIsa, flags: FragmentFlags) -> u32 {
    insert_fragment_prefix(isa, flags).len() as u32
}

/// Builds the actual prefix bytes described by [`fragment_prefix_size`].
pub fn insert_fragment_prefix(isa: TargetIsa, flags: FragmentFlags) -> Vec<u8> {
    if flags.is_coarse_grain {
        return Vec::new();
    }
    let mut list = match isa {
        TargetIsa::X86_64 => restore_prefix_instrs_x86_64(),
        TargetIsa::Aarch64 => restore_prefix_instrs_aarch64(),
    };
    let mut bytes = Vec::new();
    encode_list(&mut bytes, &mut list, 0, isa, false).expect("fragment prefix has no direct branch outside list range");
    bytes
}

/// Whether a [`LinkStub`] targets another fragment by its own address
/// (`Direct`) or must resolve the target at run time through the IBL table
/// (`Indirect`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Direct,
    Indirect,
}

/// State and shape flags for one exit stub, distinct from [`FragmentFlags`]:
/// a fragment's flags describe the fragment as a whole, while a stub's
/// flags describe that one exit point, which can differ per-exit even
/// within the same fragment (e.g. one direct exit, one indirect exit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStubFlags {
    pub kind: LinkKind,
    /// `true` once `patch_stub` has linked this stub to a real fragment;
    /// `false` while it still points at the unlinked-exit trampoline.
    pub linked: bool,
    /// This is a trace's trace-cmp exit: before taking the stub, the
    /// fragment already compared the live target against the trace's next
    /// expected block and only falls through to the stub on a mismatch.
    pub is_trace_cmp: bool,
    /// The stub is patched in [`crate::stub::StubState::FarLinked`] form
    /// (target out of direct-branch range), so relinking must rewrite the
    /// stub's data slot rather than its direct-branch bytes.
    pub far: bool,
}

/// A not-yet-linked exit point inside a fragment: the guest target it wants
/// to reach, and where its stub lives in the code cache.
#[derive(Debug, Clone, Copy)]
pub struct LinkStub {
    /// Guest address this exit wants to reach.
    pub target_tag: u64,
    pub flags: LinkStubFlags,
    /// Code-cache address of the stub itself.
    pub stub_pc: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_pc_skips_prefix() {
        let f = Fragment {
            tag: 1,
            start_pc: 0x1000,
            prefix_size: 16,
            isa: TargetIsa::X86_64,
            flags: FragmentFlags {
                has_indirect_exit: false,
                shared: false,
                is_trace: false,
                is_thumb: false,
                is_coarse_grain: false,
            },
        };
        assert_eq!(f.entry_pc(), 0x1010);
    }

    #[test]
    fn link_stub_flags_are_independent_of_fragment_flags() {
        let stub = LinkStub {
            target_tag: 0x2000,
            flags: LinkStubFlags { kind: LinkKind::Indirect, linked: false, is_trace_cmp: true, far: false },
            stub_pc: 0x1020,
        };
        assert_eq!(stub.flags.kind, LinkKind::Indirect);
        assert!(stub.flags.is_trace_cmp);
        assert!(!stub.flags.linked);
    }

    fn plain_flags() -> FragmentFlags {
        FragmentFlags { has_indirect_exit: false, shared: false, is_trace: false, is_thumb: false, is_coarse_grain: false }
    }

    #[test]
    fn coarse_grain_fragments_carry_no_prefix() {
        let mut flags = plain_flags();
        flags.is_coarse_grain = true;
        assert_eq!(fragment_prefix_size(TargetIsa::X86_64, flags), 0);
        assert!(insert_fragment_prefix(TargetIsa::X86_64, flags).is_empty());
    }

    #[test]
    fn non_coarse_grain_fragments_carry_a_real_restore_prefix() {
        let bytes = insert_fragment_prefix(TargetIsa::X86_64, plain_flags());
        assert!(!bytes.is_empty());
        assert_eq!(fragment_prefix_size(TargetIsa::X86_64, plain_flags()) as usize, bytes.len());
    }

    #[test]
    fn aarch64_prefix_is_a_documented_nop_placeholder() {
        let bytes = insert_fragment_prefix(TargetIsa::Aarch64, plain_flags());
        assert_eq!(bytes.len(), AARCH64_PREFIX_NOP_WORDS * 4);
    }
}
