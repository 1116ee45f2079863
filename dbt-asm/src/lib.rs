//! Operand/instruction IR plus the decode/encode pipeline.
#![allow(clippy::too_many_arguments)]

pub mod aarch64;
pub mod decode;
pub mod encode;
pub mod ilist;
pub mod instr;
pub mod isa;
pub mod opcode;
pub mod operand;
pub mod register;
pub mod x86_64;

pub use decode::{decode, decode_cti, decode_from_copy};
pub use encode::{encode, encode_check_reachability, encode_ignore_reachability, encode_list};
pub use ilist::InstrList;
pub use instr::{InstrId, Instruction};
pub use isa::TargetIsa;
pub use opcode::{Opcode, Predicate};
pub use operand::Operand;
pub use register::RegisterId;
