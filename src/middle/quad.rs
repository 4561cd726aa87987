//! The Quad IR: a three-address model built directly from the typed AST,
//! and the builder (`build`) that produces it.
//!
//! Quad IR stays fully target-agnostic except for one leak: `MovR` carries
//! a physical register so parameters can be pulled out of their
//! calling-convention slots. A cleaner design would push that leak
//! entirely into the lowering engine and keep a `PhysicalReg` variant out
//! of `Value`; this pipeline keeps it here because every parameter-binding
//! call site needs it, and threading it through a second IR layer just to
//! hide it for one frame-construction step buys nothing.

use derive_more::Display;

use crate::back::x86::BaseRegister;
use crate::common::{CompileError, Id, Map, Result};
use crate::front::{BinOp, Expr, Function, Program, Stmt};

/// A frame-local jump target, minted `L0`, `L1`, ... per function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("L{_0}")]
pub struct Label(pub u32);

/// A Quad-level operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Const(i32),
    Temp { id: u32, size: u8 },
    Variable { name: Id, version: u32, size: u8 },
    HardcodedRegister { base: BaseRegister, size: u8 },
}

impl Value {
    /// Mirrors the source's `SizeOf`: literals are always 4-byte, every
    /// other operand carries its own size.
    pub fn size(&self) -> u8 {
        match self {
            Value::Const(_) => 4,
            Value::Temp { size, .. } => *size,
            Value::Variable { size, .. } => *size,
            Value::HardcodedRegister { size, .. } => *size,
        }
    }
}

/// The three conditional-jump shapes Quad IR supports, with the labels
/// callers attach to the branch targets. `true_label`/`false_label` are
/// always the logical targets, regardless of how `!=` is internally
/// realized by swapping the fields of the underlying `Equal` jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CondJ {
    true_label: Label,
    false_label: Label,
}

impl CondJ {
    pub fn true_label(&self) -> Label {
        self.true_label
    }

    pub fn false_label(&self) -> Label {
        self.false_label
    }
}

/// Every operation the Quad IR builder emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Mov { dst: Value, src: Value },
    MovR { dst: Value, src: Value },
    Ret { value: Value },
    Add { dst: Value, left: Value, right: Value },
    Sub { dst: Value, left: Value, right: Value },
    Equal { dst: Value, left: Value, right: Value },
    NotEqual { dst: Value, left: Value, right: Value },
    GreaterThan { dst: Value, left: Value, right: Value },
    Compare { left: Value, right: Value },
    ConditionalJumpEqual { true_label: Label, false_label: Label },
    ConditionalJumpGreater { true_label: Label, false_label: Label },
    ConditionalJumpLess { true_label: Label, false_label: Label },
    Jump { label: Label },
    LabelDef { label: Label },
    Call { name: Id, args: Vec<Value>, dst: Value },
    Addr { dst: Value, src: Value },
    Deref { dst: Value, src: Value, depth: u32 },
    DerefStore { dst: Value, src: Value },
    DefineStackPushed { name: Id, size: u8 },
}

/// One source function, in Quad form. `size` is a placeholder filled in by
/// the lowering engine.
#[derive(Debug, Clone)]
pub struct Frame {
    pub name: Id,
    pub instructions: Vec<Operation>,
    pub size: i32,
}

/// Per-frame builder state: temp/label counters and the variable-version
/// map that gives every write a fresh, monotonically increasing version.
struct Ctx {
    temp_counter: u32,
    label_counter: u32,
    variable_versions: Map<Id, u32>,
}

impl Ctx {
    fn new() -> Self {
        Ctx { temp_counter: 0, label_counter: 0, variable_versions: Map::new() }
    }

    fn new_temp(&mut self, size: u8) -> Value {
        let id = self.temp_counter;
        self.temp_counter += 1;
        Value::Temp { id, size }
    }

    fn new_label(&mut self) -> Label {
        let label = Label(self.label_counter);
        self.label_counter += 1;
        label
    }

    /// Bind a fresh version to `name` (a declaration, a parameter, or a
    /// write) and return the `Value` that names it.
    fn def_variable(&mut self, name: Id, size: u8) -> Value {
        let version = self.variable_versions.entry(name).and_modify(|v| *v += 1).or_insert(0);
        Value::Variable { name, version: *version, size }
    }

    /// Look up the current version of an already-declared variable.
    fn use_variable(&self, name: Id, size: u8) -> Result<Value> {
        let version = self
            .variable_versions
            .get(&name)
            .ok_or_else(|| CompileError::missing_symbol(name.to_string()))?;
        Ok(Value::Variable { name, version: *version, size })
    }
}

/// Walk a whole typed program, producing one Quad frame per function.
pub fn build(program: &Program) -> Result<Vec<Frame>> {
    program.functions.iter().map(build_function).collect()
}

fn build_function(func: &Function) -> Result<Frame> {
    let mut ctx = Ctx::new();
    let mut instructions = Vec::new();

    for (i, param) in func.params.iter().enumerate() {
        let size = param.ty.size as u8;
        let dst = ctx.def_variable(param.name, size);
        if i < crate::back::x86::PARAM_REGS.len() {
            let src = Value::HardcodedRegister { base: crate::back::x86::PARAM_REGS[i], size };
            instructions.push(Operation::MovR { dst, src });
        } else {
            instructions.push(Operation::DefineStackPushed { name: param.name, size });
        }
    }

    for stmt in &func.body {
        gen_stmt(&mut ctx, &mut instructions, stmt)?;
    }

    Ok(Frame { name: func.name, instructions, size: 0 })
}

/// Evaluate an expression into a `Value`, appending whatever operations
/// are needed to compute it.
fn gen_rhs(ctx: &mut Ctx, ins: &mut Vec<Operation>, expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Const(n) => Ok(Value::Const(*n)),

        Expr::Var { name, ty } => ctx.use_variable(*name, ty.size as u8),

        // `a < b` has no dedicated Quad value-producing variant (only
        // Equal/NotEqual/GreaterThan do); realized as `b > a`.
        Expr::Binary { op: BinOp::Lt, lhs, rhs } => {
            gen_rhs(ctx, ins, &Expr::Binary { op: BinOp::Gt, lhs: rhs.clone(), rhs: lhs.clone() })
        }

        Expr::Binary { op, lhs, rhs } => {
            let left = gen_rhs(ctx, ins, lhs)?;
            let right = gen_rhs(ctx, ins, rhs)?;
            let is_arith = matches!(op, BinOp::Add | BinOp::Sub);
            let size = if is_arith { left.size() } else { 4 };
            let dst = ctx.new_temp(size);
            let op = match op {
                BinOp::Add => Operation::Add { dst: dst.clone(), left, right },
                BinOp::Sub => Operation::Sub { dst: dst.clone(), left, right },
                BinOp::Eq => Operation::Equal { dst: dst.clone(), left, right },
                BinOp::Ne => Operation::NotEqual { dst: dst.clone(), left, right },
                BinOp::Gt => Operation::GreaterThan { dst: dst.clone(), left, right },
                BinOp::Lt => unreachable!("handled above"),
            };
            ins.push(op);
            Ok(dst)
        }

        Expr::Addr(inner) => {
            let src = gen_rhs(ctx, ins, inner)?;
            let dst = ctx.new_temp(8);
            ins.push(Operation::Addr { dst: dst.clone(), src });
            Ok(dst)
        }

        Expr::Deref { expr, depth } => {
            let Expr::Var { name, ty } = expr.as_ref() else {
                return Err(CompileError::unsupported("dereference target must be a variable"));
            };
            let pointee = ty.pointee_at_depth(*depth)?;
            let src = ctx.use_variable(*name, ty.size as u8)?;
            let dst = ctx.new_temp(pointee.size as u8);
            ins.push(Operation::Deref { dst: dst.clone(), src, depth: *depth });
            Ok(dst)
        }

        Expr::Call { name, args, return_type } => {
            let args = args.iter().map(|a| gen_rhs(ctx, ins, a)).collect::<Result<Vec<_>>>()?;
            let dst = ctx.new_temp(return_type.size as u8);
            ins.push(Operation::Call { name: *name, args, dst: dst.clone() });
            Ok(dst)
        }
    }
}

/// The address a store through `*expr` (at the given depth) writes to.
/// Depth 1 is the variable itself; deeper stores first load the address
/// through the intervening indirections via the same `Deref` handling
/// `gen_rhs` uses for loads.
fn gen_store_address(ctx: &mut Ctx, ins: &mut Vec<Operation>, expr: &Expr, depth: u32) -> Result<Value> {
    if depth == 1 {
        gen_rhs(ctx, ins, expr)
    } else {
        gen_rhs(ctx, ins, &Expr::Deref { expr: Box::new(expr.clone()), depth: depth - 1 })
    }
}

/// Evaluate a comparison condition, appending `Compare` and the matching
/// conditional jump wired to `true_label`/`false_label`.
fn emit_cond_jump(
    ctx: &mut Ctx,
    ins: &mut Vec<Operation>,
    cond: &Expr,
    true_label: Label,
    false_label: Label,
) -> Result<()> {
    let Expr::Binary { op, lhs, rhs } = cond else {
        return Err(CompileError::unsupported("if/for condition must be a comparison"));
    };
    let left = gen_rhs(ctx, ins, lhs)?;
    let right = gen_rhs(ctx, ins, rhs)?;
    ins.push(Operation::Compare { left, right });
    let op = match op {
        BinOp::Eq => Operation::ConditionalJumpEqual { true_label, false_label },
        BinOp::Gt => Operation::ConditionalJumpGreater { true_label, false_label },
        BinOp::Lt => Operation::ConditionalJumpLess { true_label, false_label },
        // No dedicated "not equal" jump; equal-with-swapped-targets jumps
        // to `false_label` when equal and falls through to `true_label`
        // otherwise, which is exactly "not equal".
        BinOp::Ne => Operation::ConditionalJumpEqual { true_label: false_label, false_label: true_label },
        BinOp::Add | BinOp::Sub => {
            return Err(CompileError::unsupported("if/for condition must be a comparison"))
        }
    };
    ins.push(op);
    Ok(())
}

fn gen_cond_jump(ctx: &mut Ctx, ins: &mut Vec<Operation>, cond: &Expr) -> Result<CondJ> {
    let true_label = ctx.new_label();
    let false_label = ctx.new_label();
    emit_cond_jump(ctx, ins, cond, true_label, false_label)?;
    Ok(CondJ { true_label, false_label })
}

fn gen_stmt(ctx: &mut Ctx, ins: &mut Vec<Operation>, stmt: &Stmt) -> Result<()> {
    match stmt {
        Stmt::Decl { name, ty, init } => {
            let size = ty.size as u8;
            match init {
                Some(e) => {
                    let src = gen_rhs(ctx, ins, e)?;
                    let dst = ctx.def_variable(*name, size);
                    ins.push(Operation::Mov { dst, src });
                }
                None => {
                    ctx.def_variable(*name, size);
                }
            }
            Ok(())
        }

        Stmt::Assign { lhs, rhs } => match lhs {
            Expr::Var { name, ty } => {
                let src = gen_rhs(ctx, ins, rhs)?;
                let dst = ctx.def_variable(*name, ty.size as u8);
                ins.push(Operation::Mov { dst, src });
                Ok(())
            }
            Expr::Deref { expr, depth } => {
                let src = gen_rhs(ctx, ins, rhs)?;
                let dst = gen_store_address(ctx, ins, expr, *depth)?;
                ins.push(Operation::DerefStore { dst, src });
                Ok(())
            }
            _ => Err(CompileError::unsupported("assignment target must be a variable or dereference")),
        },

        Stmt::Return(e) => {
            let value = gen_rhs(ctx, ins, e)?;
            ins.push(Operation::Ret { value });
            Ok(())
        }

        Stmt::ExprStmt(e) => {
            gen_rhs(ctx, ins, e)?;
            Ok(())
        }

        Stmt::If { cond, then_branch, else_branch } => {
            let cj = gen_cond_jump(ctx, ins, cond)?;
            ins.push(Operation::LabelDef { label: cj.true_label() });
            for s in then_branch {
                gen_stmt(ctx, ins, s)?;
            }
            ins.push(Operation::LabelDef { label: cj.false_label() });
            for s in else_branch {
                gen_stmt(ctx, ins, s)?;
            }
            Ok(())
        }

        Stmt::For { init, cond, update, body } => {
            if let Some(init) = init {
                gen_stmt(ctx, ins, init)?;
            }
            let bottom_label = ctx.new_label();
            ins.push(Operation::Jump { label: bottom_label });
            let body_label = ctx.new_label();
            ins.push(Operation::LabelDef { label: body_label });
            for s in body {
                gen_stmt(ctx, ins, s)?;
            }
            if let Some(update) = update {
                gen_stmt(ctx, ins, update)?;
            }
            ins.push(Operation::LabelDef { label: bottom_label });
            match cond {
                Some(cond) => {
                    let exit_label = ctx.new_label();
                    emit_cond_jump(ctx, ins, cond, body_label, exit_label)?;
                    ins.push(Operation::LabelDef { label: exit_label });
                }
                None => ins.push(Operation::Jump { label: body_label }),
            }
            Ok(())
        }
    }
}
