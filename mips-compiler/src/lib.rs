//! Compiler from a small C dialect to a 32-register, word-addressed
//! MIPS-like ISA, together with an interpreter for that ISA.
//!
//! Pipeline: [`frontend::lexer`] → [`frontend::parser`] (using [`ir::scope`])
//! → [`backend::codegen`] (using [`backend::tracker`]) → peephole passes and
//! linker in [`backend::builder`] → [`Program`], runnable on [`sim::Machine`].

pub mod backend;
pub mod frontend;
pub mod ir;
pub mod sim;

use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

pub use backend::abi::Reg;
pub use backend::builder::Program;
pub use backend::tracker::Location;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Lexical error: {0}")]
    Lexical(#[from] frontend::lexer::LexicalError),

    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("SemanticError:{kind} (line {line}) - {message}")]
    Semantic {
        kind: SemanticErrorKind,
        line: usize,
        message: String,
    },

    #[error("Register allocator invariant violated: {0}")]
    Allocator(String),

    #[error("Inline assembly error on line {line}: {message}")]
    Asm { line: usize, message: String },

    #[error("Link error: {0}")]
    Link(#[from] backend::link::LinkError),
}

impl CompileError {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        CompileError::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn semantic(kind: SemanticErrorKind, line: usize, message: impl Into<String>) -> Self {
        CompileError::Semantic {
            kind,
            line,
            message: message.into(),
        }
    }

    /// Source line the error points at, when known.
    pub fn line(&self) -> Option<usize> {
        match self {
            CompileError::Lexical(e) => Some(e.line),
            CompileError::Parse { line, .. }
            | CompileError::Semantic { line, .. }
            | CompileError::Asm { line, .. } => Some(*line),
            CompileError::Allocator(_) | CompileError::Link(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticErrorKind {
    VariableRedefinition,
    ArrayRedefinition,
    FunctionRedefinition,
    ParameterRedefinition,
    UndefinedVariable,
    UndefinedFunction,
    NotAFunction,
    FunctionUsedAsVariable,
    VariableUsedAsArray,
    SignatureMismatch,
    ArgumentCountMismatch,
    TooManyParameters,
    NestedFunction,
    ReturnOutsideFunction,
    BreakOutsideLoop,
    ContinueOutsideLoop,
    InvalidOperand,
    InvalidAssignment,
    VoidValue,
    NonConstantShift,
    RecursiveInline,
    InvalidInitializer,
}

impl std::fmt::Display for SemanticErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SemanticErrorKind::VariableRedefinition => write!(f, "VariableRedefinition"),
            SemanticErrorKind::ArrayRedefinition => write!(f, "ArrayRedefinition"),
            SemanticErrorKind::FunctionRedefinition => write!(f, "FunctionRedefinition"),
            SemanticErrorKind::ParameterRedefinition => write!(f, "ParameterRedefinition"),
            SemanticErrorKind::UndefinedVariable => write!(f, "UndefinedVariable"),
            SemanticErrorKind::UndefinedFunction => write!(f, "UndefinedFunction"),
            SemanticErrorKind::NotAFunction => write!(f, "NotAFunction"),
            SemanticErrorKind::FunctionUsedAsVariable => write!(f, "FunctionUsedAsVariable"),
            SemanticErrorKind::VariableUsedAsArray => write!(f, "VariableUsedAsArray"),
            SemanticErrorKind::SignatureMismatch => write!(f, "SignatureMismatch"),
            SemanticErrorKind::ArgumentCountMismatch => write!(f, "ArgumentCountMismatch"),
            SemanticErrorKind::TooManyParameters => write!(f, "TooManyParameters"),
            SemanticErrorKind::NestedFunction => write!(f, "NestedFunction"),
            SemanticErrorKind::ReturnOutsideFunction => write!(f, "ReturnOutsideFunction"),
            SemanticErrorKind::BreakOutsideLoop => write!(f, "BreakOutsideLoop"),
            SemanticErrorKind::ContinueOutsideLoop => write!(f, "ContinueOutsideLoop"),
            SemanticErrorKind::InvalidOperand => write!(f, "InvalidOperand"),
            SemanticErrorKind::InvalidAssignment => write!(f, "InvalidAssignment"),
            SemanticErrorKind::VoidValue => write!(f, "VoidValue"),
            SemanticErrorKind::NonConstantShift => write!(f, "NonConstantShift"),
            SemanticErrorKind::RecursiveInline => write!(f, "RecursiveInline"),
            SemanticErrorKind::InvalidInitializer => write!(f, "InvalidInitializer"),
        }
    }
}

// ============================================================================
// Configuration and entry points
// ============================================================================

/// Knobs for one compilation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Initial stack pointer written by the program prologue.
    pub stack_top: i32,
    /// Run the peephole passes before linking.
    pub optimize: bool,
    /// Check register tracker consistency after every statement.
    pub verify_allocator: bool,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            stack_top: 2047,
            optimize: true,
            verify_allocator: false,
        }
    }
}

/// A linked program plus where each top-level variable ends up.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub program: Program,
    pub symbols: BTreeMap<String, Location>,
}

impl Compilation {
    pub fn location(&self, name: &str) -> Option<Location> {
        self.symbols.get(name).copied()
    }

    /// Final value of a top-level variable after running on `machine`.
    pub fn value_of(&self, machine: &sim::Machine, name: &str) -> Option<i32> {
        match self.location(name)? {
            Location::Register(reg) => Some(machine.reg(reg)),
            Location::Memory(address) => machine.mem(address),
        }
    }
}

/// Tokenize and parse `source`.
pub fn parse_program(source: &str) -> Result<ir::ParsedProgram, CompileError> {
    let tokens = frontend::lexer::tokenize(source)?;
    frontend::parser::parse(&tokens)
}

/// Compile with the default configuration.
pub fn compile(source: &str) -> Result<Compilation, CompileError> {
    compile_with(source, &CompileConfig::default())
}

pub fn compile_with(source: &str, config: &CompileConfig) -> Result<Compilation, CompileError> {
    let mut parsed = parse_program(source)?;
    parsed.order_for_codegen();
    let generated = backend::codegen::generate(&parsed, config)?;
    let program = generated.builder.finish(config.optimize)?;
    Ok(Compilation {
        program,
        symbols: generated.symbols,
    })
}

/// Compile several sources as one translation unit, in order.
pub fn compile_sources<S: AsRef<str>>(
    sources: &[S],
    config: &CompileConfig,
) -> Result<Compilation, CompileError> {
    let joined = sources
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join("\n");
    compile_with(&joined, config)
}
