//! Inline assembly parser.
//!
//! `__asm__` blocks are written in the interpreter's mnemonic syntax with
//! two substitutions: `(name)` stands for the register holding variable
//! `name`, and `$return` for the return-value register. Operands may be
//! separated by commas or whitespace, and an instruction may follow its
//! label on the same line:
//!
//! ```text
//! loop: addi (i), (i), -1
//!       sw (v) 4096((base))
//!       bne (i) $0 loop
//! ```
//!
//! Parsing produces [`AsmLine`]s with operands still symbolic; the code
//! generator resolves them against the register tracker.

use super::abi::Reg;
use super::instruction::Instr;
use crate::CompileError;

/// A register position: a physical register or a variable substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmOperand {
    Reg(Reg),
    Var(String),
}

impl AsmOperand {
    pub fn var(&self) -> Option<&str> {
        match self {
            AsmOperand::Var(name) => Some(name),
            AsmOperand::Reg(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluKind {
    Add,
    Sub,
    And,
    Or,
    Mul,
    Div,
    Slt,
    Sgt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    J,
    Jal,
    Bex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmOp {
    Alu {
        kind: AluKind,
        rd: AsmOperand,
        rs: AsmOperand,
        rt: AsmOperand,
    },
    Shift {
        arithmetic: bool,
        rd: AsmOperand,
        rs: AsmOperand,
        shamt: u8,
    },
    Addi {
        rd: AsmOperand,
        rs: AsmOperand,
        imm: i32,
    },
    Load {
        rd: AsmOperand,
        base: AsmOperand,
        offset: i32,
    },
    Store {
        rd: AsmOperand,
        base: AsmOperand,
        offset: i32,
    },
    Branch {
        less_than: bool,
        rd: AsmOperand,
        rs: AsmOperand,
        label: String,
    },
    Jump {
        kind: JumpKind,
        label: String,
    },
    Jr {
        rd: AsmOperand,
    },
    Setx {
        value: i32,
    },
    TestLog {
        rd: AsmOperand,
    },
    Noop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmLine {
    pub label: Option<String>,
    pub op: AsmOp,
}

impl AsmOp {
    /// Every register operand, in textual order.
    pub fn operands(&self) -> Vec<&AsmOperand> {
        match self {
            AsmOp::Alu { rd, rs, rt, .. } => vec![rd, rs, rt],
            AsmOp::Shift { rd, rs, .. } | AsmOp::Addi { rd, rs, .. } => vec![rd, rs],
            AsmOp::Load { rd, base, .. } | AsmOp::Store { rd, base, .. } => vec![rd, base],
            AsmOp::Branch { rd, rs, .. } => vec![rd, rs],
            AsmOp::Jr { rd } | AsmOp::TestLog { rd } => vec![rd],
            AsmOp::Jump { .. } | AsmOp::Setx { .. } | AsmOp::Noop => Vec::new(),
        }
    }

    /// The operand this instruction writes, if any.
    pub fn written(&self) -> Option<&AsmOperand> {
        match self {
            AsmOp::Alu { rd, .. }
            | AsmOp::Shift { rd, .. }
            | AsmOp::Addi { rd, .. }
            | AsmOp::Load { rd, .. } => Some(rd),
            _ => None,
        }
    }

    pub fn label_ref(&self) -> Option<&str> {
        match self {
            AsmOp::Branch { label, .. } | AsmOp::Jump { label, .. } => Some(label),
            _ => None,
        }
    }

    /// Lower to a machine instruction. `reg` resolves register operands and
    /// `label` maps referenced labels to their final names.
    pub fn lower<R, L>(&self, mut reg: R, label: L) -> Result<Instr, CompileError>
    where
        R: FnMut(&AsmOperand) -> Result<Reg, CompileError>,
        L: Fn(&str) -> String,
    {
        let instr = match self {
            AsmOp::Alu { kind, rd, rs, rt } => {
                let (rd, rs, rt) = (reg(rd)?, reg(rs)?, reg(rt)?);
                match kind {
                    AluKind::Add => Instr::Add { rd, rs, rt },
                    AluKind::Sub => Instr::Sub { rd, rs, rt },
                    AluKind::And => Instr::And { rd, rs, rt },
                    AluKind::Or => Instr::Or { rd, rs, rt },
                    AluKind::Mul => Instr::Mul { rd, rs, rt },
                    AluKind::Div => Instr::Div { rd, rs, rt },
                    AluKind::Slt => Instr::Slt { rd, rs, rt },
                    AluKind::Sgt => Instr::Sgt { rd, rs, rt },
                }
            }
            AsmOp::Shift {
                arithmetic,
                rd,
                rs,
                shamt,
            } => {
                let (rd, rs, shamt) = (reg(rd)?, reg(rs)?, *shamt);
                if *arithmetic {
                    Instr::Sra { rd, rs, shamt }
                } else {
                    Instr::Sll { rd, rs, shamt }
                }
            }
            AsmOp::Addi { rd, rs, imm } => Instr::Addi {
                rd: reg(rd)?,
                rs: reg(rs)?,
                imm: *imm,
            },
            AsmOp::Load { rd, base, offset } => Instr::Lw {
                rd: reg(rd)?,
                rs: reg(base)?,
                imm: *offset,
            },
            AsmOp::Store { rd, base, offset } => Instr::Sw {
                rd: reg(rd)?,
                rs: reg(base)?,
                imm: *offset,
            },
            AsmOp::Branch {
                less_than,
                rd,
                rs,
                label: target,
            } => {
                let (rd, rs) = (reg(rd)?, reg(rs)?);
                if *less_than {
                    Instr::blt(rd, rs, label(target))
                } else {
                    Instr::bne(rd, rs, label(target))
                }
            }
            AsmOp::Jump { kind, label: target } => match kind {
                JumpKind::J => Instr::jump(label(target)),
                JumpKind::Jal => Instr::call(label(target)),
                JumpKind::Bex => Instr::Bex {
                    target: super::instruction::Target::new(label(target)),
                },
            },
            AsmOp::Jr { rd } => Instr::Jr { rd: reg(rd)? },
            AsmOp::Setx { value } => Instr::Setx { value: *value },
            AsmOp::TestLog { rd } => Instr::TestLog { rd: reg(rd)? },
            AsmOp::Noop => Instr::noop(),
        };
        Ok(instr)
    }
}

// ============================================================================
// Parsing
// ============================================================================

struct Tokens<'a> {
    items: Vec<&'a str>,
    pos: usize,
    line: usize,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str, line: usize) -> Self {
        let items = text
            .lines()
            .map(|l| l.split('#').next().unwrap_or(""))
            .flat_map(|l| l.split(|c: char| c.is_whitespace() || c == ','))
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            items,
            pos: 0,
            line,
        }
    }

    fn next(&mut self) -> Option<&'a str> {
        let item = self.items.get(self.pos).copied();
        self.pos += 1;
        item
    }

    fn operand(&mut self, mnemonic: &str) -> Result<&'a str, CompileError> {
        self.next().ok_or_else(|| {
            CompileError::Asm {
                line: self.line,
                message: format!("{mnemonic} is missing an operand"),
            }
        })
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::Asm {
            line: self.line,
            message: message.into(),
        }
    }

    fn reg(&mut self, mnemonic: &str) -> Result<AsmOperand, CompileError> {
        let text = self.operand(mnemonic)?;
        self.register_operand(text)
    }

    fn register_operand(&self, text: &str) -> Result<AsmOperand, CompileError> {
        if text == "$return" {
            return Ok(AsmOperand::Reg(Reg::V0));
        }
        if text.starts_with('$') {
            return Reg::parse(text)
                .map(AsmOperand::Reg)
                .ok_or_else(|| self.error(format!("unknown register {text}")));
        }
        match text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            Some(name) if is_identifier(name) => Ok(AsmOperand::Var(name.to_string())),
            _ => Err(self.error(format!("expected a register or (variable), found {text}"))),
        }
    }

    fn imm(&mut self, mnemonic: &str) -> Result<i32, CompileError> {
        let text = self.operand(mnemonic)?;
        parse_int(text).ok_or_else(|| self.error(format!("invalid immediate {text}")))
    }

    /// `offset(base)` where base is a register or `(variable)`. The offset
    /// may be omitted.
    fn mem(&mut self, mnemonic: &str) -> Result<(i32, AsmOperand), CompileError> {
        let text = self.operand(mnemonic)?;
        let open = text
            .find('(')
            .ok_or_else(|| self.error(format!("invalid memory access {text}")))?;
        let inner = text[open..]
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .ok_or_else(|| self.error(format!("invalid memory access {text}")))?;
        let offset = match &text[..open] {
            "" => 0,
            o => parse_int(o).ok_or_else(|| self.error(format!("invalid offset {o}")))?,
        };
        Ok((offset, self.register_operand(inner)?))
    }

    fn alu(&mut self, kind: AluKind, mnemonic: &str) -> Result<AsmOp, CompileError> {
        Ok(AsmOp::Alu {
            kind,
            rd: self.reg(mnemonic)?,
            rs: self.reg(mnemonic)?,
            rt: self.reg(mnemonic)?,
        })
    }

    fn label(&mut self, mnemonic: &str) -> Result<String, CompileError> {
        let text = self.operand(mnemonic)?;
        if is_label(text) {
            Ok(text.to_string())
        } else {
            Err(self.error(format!("invalid label {text}")))
        }
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_label(text: &str) -> bool {
    is_identifier(text.trim_start_matches('.'))
}

fn parse_int(text: &str) -> Option<i32> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match digits.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    i32::try_from(if negative { -value } else { value }).ok()
}

/// Parse the text of one `__asm__` block. `line` is the source line of the
/// block, used for every error it reports.
pub fn parse(text: &str, line: usize) -> Result<Vec<AsmLine>, CompileError> {
    let mut tokens = Tokens::new(text, line);
    let mut lines = Vec::new();
    let mut pending: Option<String> = None;

    while let Some(token) = tokens.next() {
        if let Some(name) = token.strip_suffix(':') {
            if !is_label(name) {
                return Err(tokens.error(format!("invalid label {name}")));
            }
            if let Some(previous) = pending.replace(name.to_string()) {
                lines.push(AsmLine {
                    label: Some(previous),
                    op: AsmOp::Noop,
                });
            }
            continue;
        }

        let op = match token {
            "add" => tokens.alu(AluKind::Add, token)?,
            "sub" => tokens.alu(AluKind::Sub, token)?,
            "and" => tokens.alu(AluKind::And, token)?,
            "or" => tokens.alu(AluKind::Or, token)?,
            "mul" => tokens.alu(AluKind::Mul, token)?,
            "div" => tokens.alu(AluKind::Div, token)?,
            "slt" => tokens.alu(AluKind::Slt, token)?,
            "sgt" => tokens.alu(AluKind::Sgt, token)?,
            "sll" | "sra" => {
                let rd = tokens.reg(token)?;
                let rs = tokens.reg(token)?;
                let shamt = tokens.imm(token)?;
                let shamt = u8::try_from(shamt)
                    .ok()
                    .filter(|s| *s < 32)
                    .ok_or_else(|| tokens.error(format!("shift amount {shamt} out of range")))?;
                AsmOp::Shift {
                    arithmetic: token == "sra",
                    rd,
                    rs,
                    shamt,
                }
            }
            "addi" => AsmOp::Addi {
                rd: tokens.reg(token)?,
                rs: tokens.reg(token)?,
                imm: tokens.imm(token)?,
            },
            "lw" | "sw" => {
                let rd = tokens.reg(token)?;
                let (offset, base) = tokens.mem(token)?;
                if token == "lw" {
                    AsmOp::Load { rd, base, offset }
                } else {
                    AsmOp::Store { rd, base, offset }
                }
            }
            "bne" | "blt" => AsmOp::Branch {
                less_than: token == "blt",
                rd: tokens.reg(token)?,
                rs: tokens.reg(token)?,
                label: tokens.label(token)?,
            },
            "j" | "jal" | "bex" => AsmOp::Jump {
                kind: match token {
                    "j" => JumpKind::J,
                    "jal" => JumpKind::Jal,
                    _ => JumpKind::Bex,
                },
                label: tokens.label(token)?,
            },
            "jr" => AsmOp::Jr {
                rd: tokens.reg(token)?,
            },
            "setx" => AsmOp::Setx {
                value: tokens.imm(token)?,
            },
            "testlog" | "print" => AsmOp::TestLog {
                rd: tokens.reg(token)?,
            },
            "nop" | "noop" => AsmOp::Noop,
            other => return Err(tokens.error(format!("unknown instruction {other}"))),
        };
        lines.push(AsmLine {
            label: pending.take(),
            op,
        });
    }

    if let Some(label) = pending {
        lines.push(AsmLine {
            label: Some(label),
            op: AsmOp::Noop,
        });
    }
    Ok(lines)
}
