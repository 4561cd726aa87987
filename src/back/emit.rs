//! The assembly emitter (C6): renders allocated x86 frames as NASM-syntax
//! text. Every register here is expected to already be `Hardcoded` — the
//! allocator's job is done by the time a frame reaches this module.

use std::fmt::Write as _;

use crate::back::x86::{to_asm, BaseRegister, Frame, Instruction, Register, StackLocation};

fn sixteen_byte_align(size: i32) -> i32 {
    if size % 16 == 0 {
        size
    } else {
        size + (16 - size % 16)
    }
}

fn size_prefix(size: u8) -> &'static str {
    if size == 8 {
        "qword"
    } else {
        "dword"
    }
}

fn reg_asm(reg: Register) -> String {
    match reg {
        Register::Hardcoded(h) => to_asm(h.base, h.size),
        Register::Virtual(v) => unreachable!("virtual register r{} reached the emitter unallocated", v.id),
    }
}

fn reg_asm_qword(reg: Register) -> String {
    match reg {
        Register::Hardcoded(h) => to_asm(h.base, 8),
        Register::Virtual(v) => unreachable!("virtual register r{} reached the emitter unallocated", v.id),
    }
}

fn stack_operand(loc: StackLocation) -> String {
    if loc.offset >= 0 {
        format!("[rbp-{}]", loc.offset)
    } else {
        format!("[rbp+{}]", -loc.offset)
    }
}

fn line(out: &mut String, text: impl AsRef<str>) {
    out.push('\t');
    out.push_str(text.as_ref());
    out.push('\n');
}

fn emit_instruction(ins: &Instruction, out: &mut String) {
    use Instruction::*;
    match ins {
        Mov { dst, src } => {
            if dst == src {
                return;
            }
            line(out, format!("mov {}, {}", reg_asm(*dst), reg_asm(*src)));
        }
        Load { dst, src } => line(out, format!("mov {}, {} {}", reg_asm(*dst), size_prefix(dst.size()), stack_operand(*src))),
        Store { dst, src } => line(out, format!("mov {} {}, {}", size_prefix(src.size()), stack_operand(*dst), reg_asm(*src))),
        LoadI { dst, value } => line(out, format!("mov {}, {}", reg_asm(*dst), value)),
        // A stored literal is always a plain `int`; the language has no way
        // to write a raw integer into a pointer-sized slot directly.
        StoreI { dst, value } => line(out, format!("mov {} {}, {}", size_prefix(4), stack_operand(*dst), value)),
        Add { dst, src } => line(out, format!("add {}, {}", reg_asm(*dst), reg_asm(*src))),
        Sub { dst, src } => line(out, format!("sub {}, {}", reg_asm(*dst), reg_asm(*src))),
        AddI { dst, value } => line(out, format!("add {}, {}", reg_asm(*dst), value)),
        SubI { dst, value } => line(out, format!("sub {}, {}", reg_asm(*dst), value)),
        Cmp { left, right } => line(out, format!("cmp {}, {}", reg_asm(*left), reg_asm(*right))),
        CmpI { left, value } => line(out, format!("cmp {}, {}", reg_asm(*left), value)),
        SetEAl { dst } => {
            line(out, "sete al");
            line(out, format!("movzx {}, al", reg_asm(*dst)));
        }
        SetGAl { dst } => {
            line(out, "setg al");
            line(out, format!("movzx {}, al", reg_asm(*dst)));
        }
        SetNeAl { dst } => {
            line(out, "setne al");
            line(out, format!("movzx {}, al", reg_asm(*dst)));
        }
        Jump { label } => line(out, format!("jmp .{label}")),
        JumpEq { label } => line(out, format!("je .{label}")),
        JumpGreater { label } => line(out, format!("jg .{label}")),
        JumpLess { label } => line(out, format!("jl .{label}")),
        Label { name } => {
            out.push('.');
            out.push_str(name);
            out.push_str(":\n");
        }
        Call { name, .. } => line(out, format!("call {name}")),
        Lea { dst, src } => line(out, format!("lea {}, {}", reg_asm(*dst), stack_operand(*src))),
        IndirectLoad { dst, src } => {
            line(out, format!("mov {}, {} [{}]", reg_asm(*dst), size_prefix(dst.size()), reg_asm_qword(*src)))
        }
        IndirectStore { dst, src } => {
            line(out, format!("mov {} [{}], {}", size_prefix(src.size()), reg_asm_qword(*dst), reg_asm(*src)))
        }
        Push { src } => line(out, format!("push {}", reg_asm_qword(*src))),
        PushI { value } => line(out, format!("push {value}")),
        AddRsp { bytes } => line(out, format!("add rsp, {bytes}")),
    }
}

fn emit_frame(frame: &Frame, out: &mut String) {
    let _ = writeln!(out, "{}:", frame.name);
    line(out, "push rbp");
    line(out, "mov rbp, rsp");
    line(out, format!("sub rsp, {}", sixteen_byte_align(frame.size)));
    for ins in &frame.instructions {
        emit_instruction(ins, out);
    }
    out.push_str(".end:\n");
    if frame.size > 0 {
        line(out, "leave");
    } else {
        line(out, "pop rbp");
    }
    line(out, "ret");
}

/// Render a fully allocated program as a complete NASM source file,
/// including the `_start` entry trampoline that calls `main` and exits
/// with its return value as the process status.
#[tracing::instrument(skip_all, fields(frames = frames.len()))]
pub fn emit(frames: &[Frame]) -> String {
    let mut out = String::new();
    out.push_str("section .text\n");
    out.push_str("global _start\n");
    for frame in frames {
        emit_frame(frame, &mut out);
    }
    out.push_str("_start:\n");
    line(&mut out, "call main");
    line(&mut out, "mov edi, eax");
    line(&mut out, "mov eax, 60");
    line(&mut out, "syscall");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::x86::HardcodedRegister;
    use crate::common::Id;

    fn hc(base: BaseRegister, size: u8) -> Register {
        Register::Hardcoded(HardcodedRegister { base, size })
    }

    #[test]
    fn same_register_mov_is_elided() {
        let mut out = String::new();
        emit_instruction(&Instruction::Mov { dst: hc(BaseRegister::Ax, 4), src: hc(BaseRegister::Ax, 4) }, &mut out);
        assert_eq!(out, "");
    }

    #[test]
    fn different_size_same_base_mov_is_not_elided() {
        let mut out = String::new();
        emit_instruction(&Instruction::Mov { dst: hc(BaseRegister::Ax, 4), src: hc(BaseRegister::Ax, 8) }, &mut out);
        assert!(out.contains("mov eax, rax"));
    }

    #[test]
    fn labels_get_a_dot_prefix_and_no_indentation() {
        let mut out = String::new();
        emit_instruction(&Instruction::Label { name: "L3".to_string() }, &mut out);
        assert_eq!(out, ".L3:\n");
    }

    #[test]
    fn load_uses_the_destination_width_for_its_size_prefix() {
        let mut out = String::new();
        emit_instruction(&Instruction::Load { dst: hc(BaseRegister::Bx, 8), src: StackLocation { offset: 8 } }, &mut out);
        assert_eq!(out, "\tmov rbx, qword [rbp-8]\n");
    }

    #[test]
    fn stack_passed_parameter_renders_a_positive_rbp_offset() {
        assert_eq!(stack_operand(StackLocation { offset: -16 }), "[rbp+16]");
        assert_eq!(stack_operand(StackLocation { offset: 8 }), "[rbp-8]");
    }

    #[test]
    fn sete_expands_to_a_flag_set_plus_zero_extend() {
        let mut out = String::new();
        emit_instruction(&Instruction::SetEAl { dst: hc(BaseRegister::R10, 4) }, &mut out);
        assert_eq!(out, "\tsete al\n\tmovzx r10d, al\n");
    }

    #[test]
    fn sixteen_byte_align_rounds_up() {
        assert_eq!(sixteen_byte_align(0), 0);
        assert_eq!(sixteen_byte_align(16), 16);
        assert_eq!(sixteen_byte_align(4), 16);
        assert_eq!(sixteen_byte_align(20), 32);
    }

    #[test]
    fn frame_with_no_locals_pops_rbp_instead_of_leave() {
        let frame = Frame { name: Id::new("f".to_string()), size: 0, instructions: vec![] };
        let mut out = String::new();
        emit_frame(&frame, &mut out);
        assert!(out.contains("\tpop rbp\n"));
        assert!(!out.contains("leave"));
    }

    #[test]
    fn frame_with_locals_uses_leave() {
        let frame = Frame { name: Id::new("f".to_string()), size: 8, instructions: vec![] };
        let mut out = String::new();
        emit_frame(&frame, &mut out);
        assert!(out.contains("\tleave\n"));
    }

    #[test]
    fn program_skeleton_has_a_start_trampoline() {
        let out = emit(&[]);
        assert!(out.contains("global _start"));
        assert!(out.contains("_start:\n\tcall main\n\tmov edi, eax\n\tmov eax, 60\n\tsyscall\n"));
    }
}
