//! Common definitions that are shared between different parts of the compiler.

use derive_more::Display;

// Use sorted sets and maps for consistent output
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

/// Identifiers. Interning keeps name comparisons and hashing cheap across the
/// whole pipeline, since the same function/variable name is looked up many
/// times between the AST, the Quad IR, and the lowering context.
pub type Id = internment::Intern<String>;

/// Every error kind the compiler can produce, from lexing through emission.
///
/// Propagation policy: the first error aborts the compilation. Nothing is
/// recovered mid-frame.
#[derive(Debug, Display)]
pub enum CompileError {
    #[display("syntax error: {message}")]
    Syntax { message: String },
    #[display("type error: {message}")]
    Type { message: String },
    #[display("unsupported construct: {message}")]
    UnsupportedConstruct { message: String },
    #[display("missing symbol: {name}")]
    MissingSymbol { name: String },
    #[display("no free registers: {message}")]
    NoFreeRegisters { message: String },
    #[display("invalid operand: {message}")]
    InvalidOperand { message: String },
    #[display("I/O error: {source}")]
    Io { source: std::io::Error },
}

impl std::error::Error for CompileError {}

impl From<std::io::Error> for CompileError {
    fn from(source: std::io::Error) -> Self {
        CompileError::Io { source }
    }
}

impl CompileError {
    pub fn syntax(message: impl Into<String>) -> Self {
        CompileError::Syntax { message: message.into() }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        CompileError::Type { message: message.into() }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        CompileError::UnsupportedConstruct { message: message.into() }
    }

    pub fn missing_symbol(name: impl Into<String>) -> Self {
        CompileError::MissingSymbol { name: name.into() }
    }

    pub fn no_free_registers(message: impl Into<String>) -> Self {
        CompileError::NoFreeRegisters { message: message.into() }
    }

    pub fn invalid_operand(message: impl Into<String>) -> Self {
        CompileError::InvalidOperand { message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;
