//! `qcc` as a library: Quad IR generation, x86 lowering, register
//! allocation, and assembly emission. See `src/bin/qcc.rs` for the
//! executable that drives this pipeline end to end.

pub mod back;
pub mod common;
pub mod driver;
pub mod front;
pub mod middle;
