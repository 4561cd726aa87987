//! The middle end: the Quad IR model and the builder that walks the typed
//! AST to produce it.

pub mod quad;

pub use quad::*;
