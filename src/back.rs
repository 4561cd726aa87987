//! The back end: the x86 IR model (C2), the lowering engine that builds it
//! from Quad IR (C4), the linear-scan register allocator (C5), and the
//! assembly emitter (C6).

pub mod alloc;
pub mod emit;
pub mod lower;
pub mod x86;

pub use alloc::allocate_program;
pub use emit::emit;
pub use lower::lower_program;
