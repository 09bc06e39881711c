//! MIPS-like backend: lowers the parsed program to a linked instruction
//! stream.
//!
//! Module layout:
//! - `abi`         — register definitions and calling-convention constants
//! - `instruction` — typed machine instructions
//! - `builder`     — instruction accumulation and the linked `Program`
//! - `tracker`     — register and storage tracking
//! - `codegen`     — code generation driver (AST → instructions)
//! - `asm`         — parser for inline assembly blocks
//! - `optimize`    — peephole passes
//! - `link`        — label resolution
//! - `encode`      — binary instruction encoding

pub mod abi;
pub mod asm;
pub mod builder;
pub mod codegen;
pub mod encode;
pub mod instruction;
pub mod link;
pub mod optimize;
pub mod tracker;
