//! Dense register identifiers, shared across every ISA port.
//!
//! A [`RegisterId`] is an opaque index into the static [`REGISTERS`] table.
//! Every architectural register known to any port carries an entry here,
//! including sub-register views (e.g. `eax` as the 32-bit view of `rax`).
//! This mirrors `reg_id_t` in the system this crate's design is modeled on:
//! a flat id space plus a fixer table from sub-register to canonical
//! containing register, rather than one enum per width per ISA.

use core::fmt;

/// Opaque dense register id. Indexes into [`REGISTERS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegisterId(pub u16);

/// Static metadata for one register id.
#[derive(Debug, Clone, Copy)]
pub struct RegisterInfo {
    /// Human-readable name, used only for `Debug`/disassembly output.
    pub name: &'static str,
    /// Size of this register view, in bytes.
    pub size: u8,
    /// The id of the register that fully contains this one (itself for a
    /// canonical / widest register).
    pub canonical: RegisterId,
}

impl RegisterId {
    /// Size of this register in bytes.
    pub fn size(self) -> u8 {
        REGISTERS[self.0 as usize].size
    }

    /// Canonical containing register (e.g. `eax` -> `rax`).
    pub fn canonical(self) -> RegisterId {
        REGISTERS[self.0 as usize].canonical
    }

    /// `true` if this id is its own canonical register.
    pub fn is_canonical(self) -> bool {
        self.canonical() == self
    }

    /// Debug name, for disassembly / error messages.
    pub fn name(self) -> &'static str {
        REGISTERS[self.0 as usize].name
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

macro_rules! regs {
    ($table:ident, $base:expr, { $($konst:ident = $name:literal, $size:expr, $canon:expr;)* }) => {
        regs!(@count 0usize, $base, $($konst, $name, $size, $canon;)*);
    };
    (@count $idx:expr, $base:expr, $konst:ident, $name:literal, $size:expr, $canon:expr; $($rest:tt)*) => {
        #[allow(non_upper_case_globals)]
        pub const $konst: RegisterId = RegisterId(($base as usize + $idx) as u16);
        regs!(@count $idx + 1usize, $base, $($rest)*);
    };
    (@count $idx:expr, $base:expr, ) => {};
}

/// x86-64 registers: 64/32/16/8-bit GPR views plus the low xmm bank.
pub mod x86_64 {
    use super::RegisterId;

    pub const BASE: usize = 0;

    regs!(x86_64, BASE, {
        Rax = "rax", 8, Rax;
        Rcx = "rcx", 8, Rcx;
        Rdx = "rdx", 8, Rdx;
        Rbx = "rbx", 8, Rbx;
        Rsp = "rsp", 8, Rsp;
        Rbp = "rbp", 8, Rbp;
        Rsi = "rsi", 8, Rsi;
        Rdi = "rdi", 8, Rdi;
        R8 = "r8", 8, R8;
        R9 = "r9", 8, R9;
        R10 = "r10", 8, R10;
        R11 = "r11", 8, R11;
        R12 = "r12", 8, R12;
        R13 = "r13", 8, R13;
        R14 = "r14", 8, R14;
        R15 = "r15", 8, R15;
        Eax = "eax", 4, Rax;
        Ecx = "ecx", 4, Rcx;
        Edx = "edx", 4, Rdx;
        Ebx = "ebx", 4, Rbx;
        Esp = "esp", 4, Rsp;
        Ebp = "ebp", 4, Rbp;
        Esi = "esi", 4, Rsi;
        Edi = "edi", 4, Rdi;
        Xmm0 = "xmm0", 16, Xmm0;
        Xmm1 = "xmm1", 16, Xmm1;
        Xmm2 = "xmm2", 16, Xmm2;
        Xmm3 = "xmm3", 16, Xmm3;
        Rip = "rip", 8, Rip;
    });
}

/// AArch64 registers: the general-purpose bank plus `sp`/`xzr`, enough for
/// direct-branch stub patching (the only AArch64 surface this workspace's
/// partial port covers).
pub mod aarch64 {
    use super::RegisterId;

    pub const BASE: usize = x86_64::BASE + 29;

    regs!(aarch64, BASE, {
        X0 = "x0", 8, X0;
        X1 = "x1", 8, X1;
        X2 = "x2", 8, X2;
        X16 = "x16", 8, X16;
        X17 = "x17", 8, X17;
        Lr = "x30", 8, Lr;
        Sp = "sp", 8, Sp;
        Xzr = "xzr", 8, Xzr;
        Pc = "pc", 8, Pc;
    });
}

const fn info(name: &'static str, size: u8, canonical: RegisterId) -> RegisterInfo {
    RegisterInfo { name, size, canonical }
}

/// Fixer table: every register id known to this crate, indexed by
/// `RegisterId.0`. Built by hand rather than `regs!` so that ordering is
/// explicit and matches the constants emitted above.
pub static REGISTERS: &[RegisterInfo] = &[
    info("rax", 8, x86_64::Rax),
    info("rcx", 8, x86_64::Rcx),
    info("rdx", 8, x86_64::Rdx),
    info("rbx", 8, x86_64::Rbx),
    info("rsp", 8, x86_64::Rsp),
    info("rbp", 8, x86_64::Rbp),
    info("rsi", 8, x86_64::Rsi),
    info("rdi", 8, x86_64::Rdi),
    info("r8", 8, x86_64::R8),
    info("r9", 8, x86_64::R9),
    info("r10", 8, x86_64::R10),
    info("r11", 8, x86_64::R11),
    info("r12", 8, x86_64::R12),
    info("r13", 8, x86_64::R13),
    info("r14", 8, x86_64::R14),
    info("r15", 8, x86_64::R15),
    info("eax", 4, x86_64::Rax),
    info("ecx", 4, x86_64::Rcx),
    info("edx", 4, x86_64::Rdx),
    info("ebx", 4, x86_64::Rbx),
    info("esp", 4, x86_64::Rsp),
    info("ebp", 4, x86_64::Rbp),
    info("esi", 4, x86_64::Rsi),
    info("edi", 4, x86_64::Rdi),
    info("xmm0", 16, x86_64::Xmm0),
    info("xmm1", 16, x86_64::Xmm1),
    info("xmm2", 16, x86_64::Xmm2),
    info("xmm3", 16, x86_64::Xmm3),
    info("rip", 8, x86_64::Rip),
    info("x0", 8, aarch64::X0),
    info("x1", 8, aarch64::X1),
    info("x2", 8, aarch64::X2),
    info("x16", 8, aarch64::X16),
    info("x17", 8, aarch64::X17),
    info("x30", 8, aarch64::Lr),
    info("sp", 8, aarch64::Sp),
    info("xzr", 8, aarch64::Xzr),
    info("pc", 8, aarch64::Pc),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_register_maps_to_canonical() {
        assert_eq!(x86_64::Eax.canonical(), x86_64::Rax);
        assert_eq!(x86_64::Eax.size(), 4);
        assert!(x86_64::Rax.is_canonical());
    }

    #[test]
    fn table_covers_every_constant() {
        // every id handed out by the `regs!` macro must resolve in REGISTERS
        assert_eq!(x86_64::Rip.0 as usize, REGISTERS.len() - 1 - 9);
        assert_eq!(aarch64::Pc.0 as usize, REGISTERS.len() - 1);
    }
}
