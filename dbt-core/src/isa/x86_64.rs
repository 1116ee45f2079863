use dbt_asm::register::x86_64 as r;
use dbt_asm::{RegisterId, TargetIsa};

use crate::consts::X86_64_STUB_BYTES;
use crate::error::CoreError;
use crate::ibl::routine::{emit_ibl_routine, IblRoutine};

use super::IsaPort;

const SCRATCH: [RegisterId; 2] = [r::R14, r::R15];

/// The fully realized x86-64 port.
pub struct X86_64Port;

impl IsaPort for X86_64Port {
    fn isa(&self) -> TargetIsa {
        TargetIsa::X86_64
    }

    fn scratch_registers(&self) -> &'static [RegisterId] {
        &SCRATCH
    }

    fn stolen_register(&self) -> RegisterId {
        r::R12
    }

    fn stub_byte_budget(&self) -> usize {
        X86_64_STUB_BYTES
    }

    fn fill_with_nops(&self, buf: &mut [u8]) {
        buf.fill(0x90);
    }

    fn emit_ibl_routine(&self, table_cell_addr: u64, miss_trampoline_pc: u64) -> IblRoutine {
        emit_ibl_routine(TargetIsa::X86_64, table_cell_addr, miss_trampoline_pc)
    }

    fn patch_branch(&self, buf: &mut [u8], from_pc: u64, target: u64) -> Result<(), CoreError> {
        if buf.len() < 5 {
            return Err(CoreError::StubTooSmall { at: from_pc, have: buf.len(), need: 5 });
        }
        let disp = target as i64 - (from_pc as i64 + 5);
        let disp32 = i32::try_from(disp).map_err(|_| CoreError::UnreachableTarget { target, from: from_pc })?;
        buf[0] = 0xe9;
        buf[1..5].copy_from_slice(&disp32.to_le_bytes());
        Ok(())
    }
}
