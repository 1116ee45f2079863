use dbt_asm::operand::Operand;
use dbt_asm::{decode, decode_from_copy, encode_ignore_reachability, TargetIsa};

#[test]
fn mov_rax_rbx_round_trips_identical_bytes() {
    let bytes = [0x48, 0x89, 0xc3];
    let (next_pc, instr) = decode(&bytes, 0x400000, TargetIsa::X86_64);
    assert_eq!(next_pc, 0x400003);

    let mut out = Vec::new();
    let end = encode_ignore_reachability(&mut out, &instr, 0x400000, TargetIsa::X86_64).unwrap();
    assert_eq!(end, 0x400003);
    assert_eq!(out, bytes);
}

#[test]
fn rip_relative_lea_decodes_to_absolute_target_and_reencodes_at_new_site() {
    let bytes = [0x48, 0x8d, 0x05, 0x11, 0x22, 0x33, 0x44];
    let orig_pc = 0x1000u64;
    let (next_pc, instr) = decode_from_copy(&bytes, orig_pc, TargetIsa::X86_64);
    assert_eq!(next_pc, orig_pc + 7);

    let expected_target = orig_pc + 7 + 0x44332211;
    match instr.src(0) {
        Operand::RelAddr { target, .. } => assert_eq!(*target, expected_target),
        other => panic!("expected a RelAddr source, got {other:?}"),
    }

    let dst_pc = 0x2000u64;
    let mut out = Vec::new();
    let end = encode_ignore_reachability(&mut out, &instr, dst_pc, TargetIsa::X86_64).unwrap();
    assert_eq!(end, dst_pc + 7);
    assert_eq!(&out[0..3], &[0x48, 0x8d, 0x05]);
    let new_disp = i32::from_le_bytes(out[3..7].try_into().unwrap());
    assert_eq!(new_disp as i64, expected_target as i64 - (dst_pc as i64 + 7));
}

#[test]
fn undecodable_bytes_are_captured_as_invalid_with_raw_bytes() {
    let bytes = [0x0f, 0x0b, 0x00, 0x00]; // ud2 is not in this workspace's table
    let (_next, instr) = decode(&bytes, 0x1000, TargetIsa::X86_64);
    assert_eq!(instr.opcode(), dbt_asm::Opcode::Invalid);
    assert!(instr.raw.is_some());
}
