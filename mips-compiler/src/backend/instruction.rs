//! Target machine instructions.
//!
//! The ISA is closed: every operation the generator, the peephole passes,
//! the linker, the encoder and the interpreter understand is a variant of
//! [`Instr`]. Control-transfer instructions carry a symbolic [`Target`]
//! until the linker resolves it.

use super::abi::Reg;
use std::fmt;

// ============================================================================
// Jump targets
// ============================================================================

/// A symbolic jump target, resolved at link time.
///
/// For absolute instructions (`j`, `jal`, `bex`) the resolved value is the
/// destination address. For relative branches (`bne`, `blt`) it is
/// `target - self - 1`, added to the already-incremented program counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub label: String,
    pub resolved: Option<i32>,
}

impl Target {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            resolved: None,
        }
    }
}

// ============================================================================
// Instruction set
// ============================================================================

/// One machine instruction.
///
/// Formats:
///
/// - **R** (`op $rd, $rs, $rt`): ALU register operations.
/// - **I** (`op $rd, $rs, imm`): immediates, memory access and relative
///   branches.
/// - **J** (`op target`): absolute jumps and status-register operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    // ── R format ────────────────────────────────────────────────────────
    Add { rd: Reg, rs: Reg, rt: Reg },
    Sub { rd: Reg, rs: Reg, rt: Reg },
    And { rd: Reg, rs: Reg, rt: Reg },
    Or { rd: Reg, rs: Reg, rt: Reg },
    Mul { rd: Reg, rs: Reg, rt: Reg },
    Div { rd: Reg, rs: Reg, rt: Reg },
    /// `rd = (rs < rt) as i32`
    Slt { rd: Reg, rs: Reg, rt: Reg },
    /// `rd = (rs > rt) as i32`
    Sgt { rd: Reg, rs: Reg, rt: Reg },
    Sll { rd: Reg, rs: Reg, shamt: u8 },
    /// Arithmetic right shift.
    Sra { rd: Reg, rs: Reg, shamt: u8 },

    // ── I format ────────────────────────────────────────────────────────
    Addi { rd: Reg, rs: Reg, imm: i32 },
    /// `mem[rs + imm] = rd`
    Sw { rd: Reg, rs: Reg, imm: i32 },
    /// `rd = mem[rs + imm]`
    Lw { rd: Reg, rs: Reg, imm: i32 },
    /// Branch when `rd != rs`.
    Bne { rd: Reg, rs: Reg, target: Target },
    /// Branch when `rd < rs`.
    Blt { rd: Reg, rs: Reg, target: Target },

    // ── J format ────────────────────────────────────────────────────────
    J { target: Target },
    /// Jump and link: `$31 = pc + 1`.
    Jal { target: Target },
    /// Jump when the status register is non-zero.
    Bex { target: Target },
    Jr { rd: Reg },
    /// Write the status register.
    Setx { value: i32 },
    /// Append the value of `rd` to the interpreter's test log.
    TestLog { rd: Reg },
}

impl Instr {
    // ── Convenience constructors ─────────────────────────────────────────

    /// `add $0, $0, $0`, the placeholder used to anchor labels.
    pub fn noop() -> Self {
        Instr::Add {
            rd: Reg::ZERO,
            rs: Reg::ZERO,
            rt: Reg::ZERO,
        }
    }

    /// `add rd, $0, rs`
    pub fn mov(rd: Reg, rs: Reg) -> Self {
        Instr::Add {
            rd,
            rs: Reg::ZERO,
            rt: rs,
        }
    }

    /// `addi rd, $0, value`
    pub fn load_imm(rd: Reg, value: i32) -> Self {
        Instr::Addi {
            rd,
            rs: Reg::ZERO,
            imm: value,
        }
    }

    pub fn jump(label: impl Into<String>) -> Self {
        Instr::J {
            target: Target::new(label),
        }
    }

    pub fn call(label: impl Into<String>) -> Self {
        Instr::Jal {
            target: Target::new(label),
        }
    }

    pub fn bne(rd: Reg, rs: Reg, label: impl Into<String>) -> Self {
        Instr::Bne {
            rd,
            rs,
            target: Target::new(label),
        }
    }

    pub fn blt(rd: Reg, rs: Reg, label: impl Into<String>) -> Self {
        Instr::Blt {
            rd,
            rs,
            target: Target::new(label),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            Instr::Add { rd, rs, rt } if *rd == Reg::ZERO && *rs == Reg::ZERO && *rt == Reg::ZERO
        )
    }

    /// True for `j`, the only unconditional jump the passes rewrite.
    pub fn is_jump(&self) -> bool {
        matches!(self, Instr::J { .. })
    }

    /// True when execution never falls through to the next instruction.
    pub fn never_falls_through(&self) -> bool {
        matches!(self, Instr::J { .. } | Instr::Jr { .. })
    }

    /// Whether the instruction's target is a PC-relative offset.
    pub fn is_relative(&self) -> bool {
        matches!(self, Instr::Bne { .. } | Instr::Blt { .. })
    }

    pub fn target(&self) -> Option<&Target> {
        match self {
            Instr::J { target }
            | Instr::Jal { target }
            | Instr::Bex { target }
            | Instr::Bne { target, .. }
            | Instr::Blt { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn target_mut(&mut self) -> Option<&mut Target> {
        match self {
            Instr::J { target }
            | Instr::Jal { target }
            | Instr::Bex { target }
            | Instr::Bne { target, .. }
            | Instr::Blt { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instr::Add { .. } => "add",
            Instr::Sub { .. } => "sub",
            Instr::And { .. } => "and",
            Instr::Or { .. } => "or",
            Instr::Mul { .. } => "mul",
            Instr::Div { .. } => "div",
            Instr::Slt { .. } => "slt",
            Instr::Sgt { .. } => "sgt",
            Instr::Sll { .. } => "sll",
            Instr::Sra { .. } => "sra",
            Instr::Addi { .. } => "addi",
            Instr::Sw { .. } => "sw",
            Instr::Lw { .. } => "lw",
            Instr::Bne { .. } => "bne",
            Instr::Blt { .. } => "blt",
            Instr::J { .. } => "j",
            Instr::Jal { .. } => "jal",
            Instr::Bex { .. } => "bex",
            Instr::Jr { .. } => "jr",
            Instr::Setx { .. } => "setx",
            Instr::TestLog { .. } => "testlog",
        }
    }
}

// ============================================================================
// Assembly text
// ============================================================================

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.mnemonic();
        match self {
            Instr::Add { rd, rs, rt }
            | Instr::Sub { rd, rs, rt }
            | Instr::And { rd, rs, rt }
            | Instr::Or { rd, rs, rt }
            | Instr::Mul { rd, rs, rt }
            | Instr::Div { rd, rs, rt }
            | Instr::Slt { rd, rs, rt }
            | Instr::Sgt { rd, rs, rt } => write!(f, "{m} {rd}, {rs}, {rt}"),
            Instr::Sll { rd, rs, shamt } | Instr::Sra { rd, rs, shamt } => {
                write!(f, "{m} {rd}, {rs}, {shamt}")
            }
            Instr::Addi { rd, rs, imm } => write!(f, "{m} {rd}, {rs}, {imm}"),
            Instr::Sw { rd, rs, imm } | Instr::Lw { rd, rs, imm } => {
                write!(f, "{m} {rd}, {imm}({rs})")
            }
            Instr::Bne { rd, rs, target } | Instr::Blt { rd, rs, target } => {
                write!(f, "{m} {rd}, {rs}, {}", target.label)
            }
            Instr::J { target } | Instr::Jal { target } | Instr::Bex { target } => {
                write!(f, "{m} {}", target.label)
            }
            Instr::Jr { rd } | Instr::TestLog { rd } => write!(f, "{m} {rd}"),
            Instr::Setx { value } => write!(f, "{m} {value}"),
        }
    }
}
