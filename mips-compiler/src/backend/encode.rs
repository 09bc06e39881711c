//! Fixed-width binary encoding, one 32-bit word per instruction.
//!
//! Field layout:
//!
//! ```text
//! R:  opcode[31:27] rd[26:22] rs[21:17] rt[16:12] shamt[11:7] aluop[6:2]
//! I:  opcode[31:27] rd[26:22] rs[21:17] imm[16:0]
//! J:  opcode[31:27] target[26:0]
//! ```

use super::abi::Reg;
use super::builder::Program;
use super::instruction::{Instr, Target};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Immediate {value} does not fit in {bits} bits (instruction {address}: {text})")]
    ImmediateOutOfRange {
        address: usize,
        value: i32,
        bits: u32,
        text: String,
    },

    #[error("Instruction {address} ({text}) has an unresolved target")]
    Unresolved { address: usize, text: String },
}

mod opcode {
    pub const ALU: u32 = 0b00000;
    pub const J: u32 = 0b00001;
    pub const BNE: u32 = 0b00010;
    pub const JAL: u32 = 0b00011;
    pub const JR: u32 = 0b00100;
    pub const ADDI: u32 = 0b00101;
    pub const BLT: u32 = 0b00110;
    pub const SW: u32 = 0b00111;
    pub const LW: u32 = 0b01000;
    pub const SETX: u32 = 0b10101;
    pub const BEX: u32 = 0b10110;
    pub const TESTLOG: u32 = 0b11111;
}

mod alu {
    pub const ADD: u32 = 0;
    pub const SUB: u32 = 1;
    pub const AND: u32 = 2;
    pub const OR: u32 = 3;
    pub const SLL: u32 = 4;
    pub const SRA: u32 = 5;
    pub const MUL: u32 = 6;
    pub const DIV: u32 = 7;
    pub const SLT: u32 = 8;
    pub const SGT: u32 = 9;
}

const IMM_BITS: u32 = 17;
const TARGET_BITS: u32 = 27;

fn r_type(aluop: u32, rd: Reg, rs: Reg, rt: Reg, shamt: u8) -> u32 {
    (opcode::ALU << 27)
        | ((rd.index() as u32) << 22)
        | ((rs.index() as u32) << 17)
        | ((rt.index() as u32) << 12)
        | (((shamt as u32) & 0x1f) << 7)
        | (aluop << 2)
}

/// Two's complement `value` truncated to `bits`, or `None` if it does not fit.
fn field(value: i32, bits: u32) -> Option<u32> {
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    let v = value as i64;
    if v < min || v > max {
        return None;
    }
    Some((value as u32) & ((1u32 << bits) - 1))
}

impl Instr {
    /// Encode this instruction as it sits at `address` in a linked program.
    pub fn encode(&self, address: usize) -> Result<u32, EncodeError> {
        let imm = |value: i32, bits: u32| {
            field(value, bits).ok_or_else(|| EncodeError::ImmediateOutOfRange {
                address,
                value,
                bits,
                text: self.to_string(),
            })
        };
        let resolved = |target: &Target| {
            target.resolved.ok_or_else(|| EncodeError::Unresolved {
                address,
                text: self.to_string(),
            })
        };
        let i_type = |op: u32, rd: Reg, rs: Reg, bits: u32| {
            (op << 27) | ((rd.index() as u32) << 22) | ((rs.index() as u32) << 17) | bits
        };
        let z = Reg::ZERO;

        Ok(match self {
            Instr::Add { rd, rs, rt } => r_type(alu::ADD, *rd, *rs, *rt, 0),
            Instr::Sub { rd, rs, rt } => r_type(alu::SUB, *rd, *rs, *rt, 0),
            Instr::And { rd, rs, rt } => r_type(alu::AND, *rd, *rs, *rt, 0),
            Instr::Or { rd, rs, rt } => r_type(alu::OR, *rd, *rs, *rt, 0),
            Instr::Mul { rd, rs, rt } => r_type(alu::MUL, *rd, *rs, *rt, 0),
            Instr::Div { rd, rs, rt } => r_type(alu::DIV, *rd, *rs, *rt, 0),
            Instr::Slt { rd, rs, rt } => r_type(alu::SLT, *rd, *rs, *rt, 0),
            Instr::Sgt { rd, rs, rt } => r_type(alu::SGT, *rd, *rs, *rt, 0),
            Instr::Sll { rd, rs, shamt } => r_type(alu::SLL, *rd, *rs, z, *shamt),
            Instr::Sra { rd, rs, shamt } => r_type(alu::SRA, *rd, *rs, z, *shamt),
            Instr::Addi { rd, rs, imm: v } => i_type(opcode::ADDI, *rd, *rs, imm(*v, IMM_BITS)?),
            Instr::Sw { rd, rs, imm: v } => i_type(opcode::SW, *rd, *rs, imm(*v, IMM_BITS)?),
            Instr::Lw { rd, rs, imm: v } => i_type(opcode::LW, *rd, *rs, imm(*v, IMM_BITS)?),
            Instr::Bne { rd, rs, target } => {
                i_type(opcode::BNE, *rd, *rs, imm(resolved(target)?, IMM_BITS)?)
            }
            Instr::Blt { rd, rs, target } => {
                i_type(opcode::BLT, *rd, *rs, imm(resolved(target)?, IMM_BITS)?)
            }
            Instr::J { target } => (opcode::J << 27) | imm(resolved(target)?, TARGET_BITS)?,
            Instr::Jal { target } => (opcode::JAL << 27) | imm(resolved(target)?, TARGET_BITS)?,
            Instr::Bex { target } => (opcode::BEX << 27) | imm(resolved(target)?, TARGET_BITS)?,
            Instr::Setx { value } => (opcode::SETX << 27) | imm(*value, TARGET_BITS)?,
            Instr::Jr { rd } => i_type(opcode::JR, *rd, z, 0),
            Instr::TestLog { rd } => i_type(opcode::TESTLOG, *rd, z, 0),
        })
    }
}

impl Program {
    pub fn encode(&self) -> Result<Vec<u32>, EncodeError> {
        self.instructions()
            .enumerate()
            .map(|(address, instr)| instr.encode(address))
            .collect()
    }

    /// Memory image text: one 32-digit binary word per line.
    pub fn to_mem_image(&self) -> Result<String, EncodeError> {
        let words = self.encode()?;
        let mut out = String::with_capacity(words.len() * 33);
        for word in words {
            out.push_str(&format!("{word:032b}\n"));
        }
        Ok(out)
    }
}
