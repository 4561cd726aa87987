//! The typed abstract syntax tree and the [`DataType`] model.
//!
//! `DataType` is a shareable handle (an `Rc` chain) rather than the
//! deep-copied value type of the C compiler this pipeline descends from:
//! cloning a `DataType` clones the `Rc`, not the chain, so two variables
//! declared with the same type share structure. `final_points_to` walks the
//! chain to its terminal; `pointee_at_depth` walks exactly as many links as
//! a `Deref` needs.

use std::rc::Rc;

use crate::common::{CompileError, Id, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataType {
    pub name: Id,
    pub size: u32,
    pub points_to: Option<Rc<DataType>>,
}

impl DataType {
    /// The terminal non-pointer type: a 4-byte integer.
    pub fn int() -> DataType {
        DataType { name: Id::new("int".to_string()), size: 4, points_to: None }
    }

    /// Build a pointer type whose points-to link is `inner`.
    pub fn pointer_to(inner: DataType) -> DataType {
        DataType { name: Id::new("ptr".to_string()), size: 8, points_to: Some(Rc::new(inner)) }
    }

    pub fn is_pointer(&self) -> bool {
        self.points_to.is_some()
    }

    /// Walk the points-to chain to its terminal (non-pointer) type.
    pub fn final_points_to(&self) -> &DataType {
        match &self.points_to {
            Some(inner) => inner.final_points_to(),
            None => self,
        }
    }

    /// Walk `depth` points-to links, as required by a `Deref` of that depth.
    /// Chains shorter than `depth` are an `UnsupportedConstruct` error (the
    /// spec invariant: every `Deref{src, depth}` requires `src`'s pointer
    /// chain length to be >= depth).
    pub fn pointee_at_depth(&self, depth: u32) -> Result<DataType> {
        let mut cur = self.clone();
        for _ in 0..depth {
            match cur.points_to {
                Some(inner) => cur = (*inner).clone(),
                None => {
                    return Err(CompileError::unsupported(format!(
                        "cannot dereference non-pointer type {} at depth {depth}",
                        self.name
                    )))
                }
            }
        }
        Ok(cur)
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Id,
    pub ty: DataType,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Id,
    pub params: Vec<Param>,
    pub return_type: DataType,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub functions: Vec<Function>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Eq,
    Ne,
    Lt,
    Gt,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Const(i32),
    Var { name: Id, ty: DataType },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Addr(Box<Expr>),
    Deref { expr: Box<Expr>, depth: u32 },
    Call { name: Id, args: Vec<Expr>, return_type: DataType },
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Decl { name: Id, ty: DataType, init: Option<Expr> },
    Assign { lhs: Expr, rhs: Expr },
    Return(Expr),
    ExprStmt(Expr),
    If { cond: Expr, then_branch: Vec<Stmt>, else_branch: Vec<Stmt> },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        update: Option<Box<Stmt>>,
        body: Vec<Stmt>,
    },
}
