//! Parsed program representation.
//!
//! - `ast`   — arena-allocated syntax tree and the top-level ordering pass
//! - `scope` — nested declaration environments with liveness hints

pub mod ast;
pub mod scope;

pub use ast::{
    Ast, BinOp, Liveness, Node, NodeId, NodeKind, Param, ParsedProgram, TypeSpec, UnOp,
    ValueType, FIXED_FRACTION_BITS,
};
pub use scope::{Decl, FunctionSig, ScopeId, Scopes, Symbol};
