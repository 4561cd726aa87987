//! The lowering engine (C4): walks one Quad frame at a time and produces
//! an x86 IR frame built entirely out of virtual registers and stack
//! slots. Register allocation happens later, in [`crate::back::alloc`].

use crate::back::x86::{
    BaseRegister, Frame as X86Frame, Instruction, Location, Register, StackLocation, VirtualRegister, PARAM_REGS,
};
use crate::common::{CompileError, Id, Map, Result};
use crate::middle::quad::{Frame as QuadFrame, Operation, Value};

/// Stack-passed parameters start past the saved `rbp` and return address.
const FIRST_STACK_PARAM_OFFSET: i32 = 16;

struct LowerCtx {
    vreg_counter: u32,
    stack_offset: i32,
    stack_param_offset: i32,
    variables: Map<Id, StackLocation>,
    temps: Map<u32, VirtualRegister>,
    instructions: Vec<Instruction>,
}

impl LowerCtx {
    fn new() -> Self {
        LowerCtx {
            vreg_counter: 0,
            stack_offset: 0,
            stack_param_offset: FIRST_STACK_PARAM_OFFSET,
            variables: Map::new(),
            temps: Map::new(),
            instructions: Vec::new(),
        }
    }

    fn push(&mut self, ins: Instruction) {
        self.instructions.push(ins);
    }

    fn fresh_register(&mut self, size: u8) -> Register {
        let id = self.vreg_counter;
        self.vreg_counter += 1;
        Register::Virtual(VirtualRegister { id, size })
    }

    /// Resolve a Quad `Value` to a `Location`, allocating on first sight. A
    /// variable keeps the same slot across every version the Quad builder
    /// minted for it; a temp keeps the same virtual register across every
    /// occurrence of the same id.
    fn allocate_new(&mut self, value: &Value) -> Location {
        match value {
            Value::Variable { name, size, .. } => {
                if let Some(loc) = self.variables.get(name) {
                    return Location::Stack(*loc);
                }
                self.stack_offset += *size as i32;
                let loc = StackLocation { offset: self.stack_offset };
                self.variables.insert(*name, loc);
                Location::Stack(loc)
            }
            Value::Temp { id, size } => {
                if let Some(v) = self.temps.get(id) {
                    return Location::Register(Register::Virtual(*v));
                }
                let v = VirtualRegister { id: self.vreg_counter, size: *size };
                self.vreg_counter += 1;
                self.temps.insert(*id, v);
                Location::Register(Register::Virtual(v))
            }
            Value::HardcodedRegister { base, size } => Location::Register(Register::hardcoded(*base, *size)),
            Value::Const(_) => unreachable!("a literal never owns a location"),
        }
    }

    /// Emit whatever it takes to make `dst` hold `src`'s value.
    fn materialize_into(&mut self, dst: Location, src: &Value) -> Result<()> {
        match (dst, src) {
            (Location::Register(r), Value::Const(c)) => self.push(Instruction::LoadI { dst: r, value: *c }),
            (Location::Register(r), Value::Temp { .. }) => {
                let Location::Register(sr) = self.allocate_new(src) else { unreachable!() };
                self.push(Instruction::Mov { dst: r, src: sr });
            }
            (Location::Register(r), Value::Variable { .. }) => {
                let Location::Stack(sl) = self.allocate_new(src) else { unreachable!() };
                self.push(Instruction::Load { dst: r, src: sl });
            }
            (Location::Register(r), Value::HardcodedRegister { base, size }) => {
                self.push(Instruction::Mov { dst: r, src: Register::hardcoded(*base, *size) });
            }
            (Location::Stack(l), Value::Const(c)) => self.push(Instruction::StoreI { dst: l, value: *c }),
            (Location::Stack(l), Value::Temp { .. }) => {
                let Location::Register(sr) = self.allocate_new(src) else { unreachable!() };
                self.push(Instruction::Store { dst: l, src: sr });
            }
            (Location::Stack(l), Value::Variable { .. }) => {
                let Location::Stack(sl) = self.allocate_new(src) else { unreachable!() };
                let tmp = self.fresh_register(src.size());
                self.push(Instruction::Load { dst: tmp, src: sl });
                self.push(Instruction::Store { dst: l, src: tmp });
            }
            (Location::Stack(l), Value::HardcodedRegister { base, size }) => {
                self.push(Instruction::Store { dst: l, src: Register::hardcoded(*base, *size) });
            }
        }
        Ok(())
    }

    /// Resolve a `Value` to a register operand, loading through a scratch
    /// register if it currently lives on the stack or is a literal.
    fn register_operand(&mut self, value: &Value) -> Result<Register> {
        match value {
            Value::Const(c) => {
                let r = self.fresh_register(4);
                self.push(Instruction::LoadI { dst: r, value: *c });
                Ok(r)
            }
            Value::HardcodedRegister { base, size } => Ok(Register::hardcoded(*base, *size)),
            Value::Temp { .. } => {
                let Location::Register(r) = self.allocate_new(value) else { unreachable!() };
                Ok(r)
            }
            Value::Variable { .. } => {
                let Location::Stack(sl) = self.allocate_new(value) else { unreachable!() };
                let r = self.fresh_register(value.size());
                self.push(Instruction::Load { dst: r, src: sl });
                Ok(r)
            }
        }
    }

    /// Move `src` to wherever `allocate_new(dst)` resolves to.
    fn move_to_destination(&mut self, dst: &Value, src: Register) -> Result<()> {
        match self.allocate_new(dst) {
            Location::Register(r) => self.push(Instruction::Mov { dst: r, src }),
            Location::Stack(l) => self.push(Instruction::Store { dst: l, src }),
        }
        Ok(())
    }

    fn lower_arith(
        &mut self,
        dst: &Value,
        left: &Value,
        right: &Value,
        reg_op: impl Fn(Register, Register) -> Instruction,
        imm_op: impl Fn(Register, i32) -> Instruction,
    ) -> Result<()> {
        let acc = self.fresh_register(left.size());
        self.materialize_into(Location::Register(acc), left)?;
        match right {
            Value::Const(c) => self.push(imm_op(acc, *c)),
            other => {
                let r = self.register_operand(other)?;
                self.push(reg_op(acc, r));
            }
        }
        self.move_to_destination(dst, acc)
    }

    fn lower_bare_compare(&mut self, left: &Value, right: &Value) -> Result<()> {
        let l = self.register_operand(left)?;
        match right {
            Value::Const(c) => self.push(Instruction::CmpI { left: l, value: *c }),
            other => {
                let r = self.register_operand(other)?;
                self.push(Instruction::Cmp { left: l, right: r });
            }
        }
        Ok(())
    }

    fn lower_compare_value(
        &mut self,
        dst: &Value,
        left: &Value,
        right: &Value,
        make_set: impl Fn(Register) -> Instruction,
    ) -> Result<()> {
        self.lower_bare_compare(left, right)?;
        let scratch = self.fresh_register(4);
        self.push(make_set(scratch));
        self.move_to_destination(dst, scratch)
    }

    fn lower_addr(&mut self, dst: &Value, src: &Value) -> Result<()> {
        let Value::Variable { .. } = src else {
            return Err(CompileError::invalid_operand("address-of target must be a variable"));
        };
        let Location::Stack(loc) = self.allocate_new(src) else { unreachable!() };
        let Location::Register(dst_reg) = self.allocate_new(dst) else { unreachable!() };
        self.push(Instruction::Lea { dst: dst_reg, src: loc });
        Ok(())
    }

    fn lower_deref(&mut self, dst: &Value, src: &Value, depth: u32) -> Result<()> {
        let Value::Variable { .. } = src else {
            return Err(CompileError::invalid_operand("dereference source must be a variable"));
        };
        let Location::Stack(var_loc) = self.allocate_new(src) else { unreachable!() };
        let mut cur = self.fresh_register(8);
        self.push(Instruction::Load { dst: cur, src: var_loc });
        for _ in 0..depth.saturating_sub(1) {
            let next = self.fresh_register(8);
            self.push(Instruction::IndirectLoad { dst: next, src: cur });
            cur = next;
        }
        let Location::Register(dst_reg) = self.allocate_new(dst) else { unreachable!() };
        self.push(Instruction::IndirectLoad { dst: dst_reg, src: cur });
        Ok(())
    }

    fn lower_deref_store(&mut self, dst: &Value, src: &Value) -> Result<()> {
        let addr_reg = self.fresh_register(8);
        self.materialize_into(Location::Register(addr_reg), dst)?;
        let value_reg = self.fresh_register(src.size());
        self.materialize_into(Location::Register(value_reg), src)?;
        self.push(Instruction::IndirectStore { dst: addr_reg, src: value_reg });
        Ok(())
    }

    fn lower_call(&mut self, name: Id, args: &[Value], dst: &Value) -> Result<()> {
        let pushed = args.len().saturating_sub(PARAM_REGS.len());
        for (i, arg) in args.iter().enumerate().rev() {
            if i >= PARAM_REGS.len() {
                match arg {
                    Value::Const(c) => self.push(Instruction::PushI { value: *c }),
                    other => {
                        let r = self.register_operand(other)?;
                        self.push(Instruction::Push { src: r });
                    }
                }
            } else {
                let preg = Register::hardcoded(PARAM_REGS[i], arg.size());
                self.materialize_into(Location::Register(preg), arg)?;
            }
        }
        let ax = Register::hardcoded(BaseRegister::Ax, dst.size());
        self.push(Instruction::Call { name, dst: ax });
        // Every stack-passed argument above the sixth leaves rsp 8 bytes
        // lower than it was before the call; the callee never cleans this
        // up, so the caller must before anything downstream can assume rsp
        // is back where the frame's prologue left it.
        if pushed > 0 {
            self.push(Instruction::AddRsp { bytes: 8 * pushed as i32 });
        }
        self.move_to_destination(dst, ax)
    }

    fn lower_operation(&mut self, op: &Operation) -> Result<()> {
        match op {
            Operation::Mov { dst, src } | Operation::MovR { dst, src } => {
                let dst_loc = self.allocate_new(dst);
                self.materialize_into(dst_loc, src)?;
            }
            Operation::Ret { value } => {
                let ax = Register::hardcoded(BaseRegister::Ax, value.size());
                self.materialize_into(Location::Register(ax), value)?;
                // AX stays in the allocator's pool (it's also the hardcoded
                // return register); this is only safe because nothing is
                // live past a Ret. Guard the invariant the safety argument
                // depends on: the write into AX must be the instruction
                // immediately preceding the jump to `end`.
                debug_assert!(
                    matches!(self.instructions.last(), Some(ins) if ins.dst_register() == Some(ax)),
                    "Ret must materialize its value into AX as the last instruction before jumping to end"
                );
                self.push(Instruction::Jump { label: "end".to_string() });
            }
            Operation::Add { dst, left, right } => {
                self.lower_arith(dst, left, right, |d, s| Instruction::Add { dst: d, src: s }, |d, v| {
                    Instruction::AddI { dst: d, value: v }
                })?;
            }
            Operation::Sub { dst, left, right } => {
                self.lower_arith(dst, left, right, |d, s| Instruction::Sub { dst: d, src: s }, |d, v| {
                    Instruction::SubI { dst: d, value: v }
                })?;
            }
            Operation::Equal { dst, left, right } => {
                self.lower_compare_value(dst, left, right, |d| Instruction::SetEAl { dst: d })?;
            }
            Operation::NotEqual { dst, left, right } => {
                self.lower_compare_value(dst, left, right, |d| Instruction::SetNeAl { dst: d })?;
            }
            Operation::GreaterThan { dst, left, right } => {
                self.lower_compare_value(dst, left, right, |d| Instruction::SetGAl { dst: d })?;
            }
            Operation::Compare { left, right } => self.lower_bare_compare(left, right)?,
            Operation::ConditionalJumpEqual { true_label, false_label } => {
                self.push(Instruction::JumpEq { label: true_label.to_string() });
                self.push(Instruction::Jump { label: false_label.to_string() });
            }
            Operation::ConditionalJumpGreater { true_label, false_label } => {
                self.push(Instruction::JumpGreater { label: true_label.to_string() });
                self.push(Instruction::Jump { label: false_label.to_string() });
            }
            Operation::ConditionalJumpLess { true_label, false_label } => {
                self.push(Instruction::JumpLess { label: true_label.to_string() });
                self.push(Instruction::Jump { label: false_label.to_string() });
            }
            Operation::Jump { label } => self.push(Instruction::Jump { label: label.to_string() }),
            Operation::LabelDef { label } => self.push(Instruction::Label { name: label.to_string() }),
            Operation::Addr { dst, src } => self.lower_addr(dst, src)?,
            Operation::Deref { dst, src, depth } => self.lower_deref(dst, src, *depth)?,
            Operation::DerefStore { dst, src } => self.lower_deref_store(dst, src)?,
            Operation::Call { name, args, dst } => self.lower_call(*name, args, dst)?,
            Operation::DefineStackPushed { name, .. } => {
                let loc = StackLocation { offset: -self.stack_param_offset };
                self.variables.insert(*name, loc);
                self.stack_param_offset += 8;
            }
        }
        Ok(())
    }
}

#[tracing::instrument(skip_all, fields(frame = %frame.name))]
pub fn lower_frame(frame: &QuadFrame) -> Result<X86Frame> {
    let mut ctx = LowerCtx::new();
    for op in &frame.instructions {
        ctx.lower_operation(op)?;
    }
    Ok(X86Frame { name: frame.name, instructions: ctx.instructions, size: ctx.stack_offset })
}

pub fn lower_program(frames: &[QuadFrame]) -> Result<Vec<X86Frame>> {
    frames.iter().map(lower_frame).collect()
}
