//! Interpreter for the target ISA.
//!
//! Step semantics: `next_pc = pc + 1`, execute the instruction at `pc`
//! (jumps and branches overwrite `next_pc`), then commit `pc = next_pc`.
//! A run stops at the end of instruction memory or after the step bound.

use crate::backend::abi::Reg;
use crate::backend::builder::Program;
use crate::backend::instruction::{Instr, Target};
use thiserror::Error;

/// Fault codes written to the status register.
pub mod status {
    pub const ADD_OVERFLOW: i32 = 1;
    pub const ADDI_OVERFLOW: i32 = 2;
    pub const SUB_OVERFLOW: i32 = 3;
    pub const MUL_OVERFLOW: i32 = 4;
    pub const DIVIDE_BY_ZERO: i32 = 5;
}

pub const DEFAULT_DMEM_WORDS: usize = 4096;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MachineError {
    #[error("Memory access at address {address} is outside data memory (pc {pc})")]
    MemoryOutOfBounds { pc: usize, address: i64 },

    #[error("Instruction at pc {pc} was never linked ({text})")]
    Unlinked { pc: usize, text: String },
}

/// Registers, data memory and program counter.
#[derive(Debug, Clone)]
pub struct Machine {
    regs: [i32; Reg::COUNT],
    dmem: Vec<i32>,
    pc: usize,
    log: Vec<i32>,
}

impl Machine {
    pub fn new(dmem_words: usize) -> Self {
        Self {
            regs: [0; Reg::COUNT],
            dmem: vec![0; dmem_words],
            pc: 0,
            log: Vec::new(),
        }
    }

    pub fn reg(&self, reg: Reg) -> i32 {
        self.regs[reg.index()]
    }

    pub fn set_reg(&mut self, reg: Reg, value: i32) {
        if reg != Reg::ZERO {
            self.regs[reg.index()] = value;
        }
    }

    pub fn mem(&self, address: usize) -> Option<i32> {
        self.dmem.get(address).copied()
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Values written by `testlog`, in order.
    pub fn log(&self) -> &[i32] {
        &self.log
    }

    /// Execute up to `max_steps` instructions, returning the number run.
    pub fn run(&mut self, program: &Program, max_steps: usize) -> Result<usize, MachineError> {
        let mut steps = 0;
        while steps < max_steps {
            let Some(instr) = program.get(self.pc) else {
                break;
            };
            let mut next_pc = self.pc as i64 + 1;
            instr.execute(self, &mut next_pc)?;
            steps += 1;
            // A negative or past-the-end pc halts on the next fetch.
            self.pc = usize::try_from(next_pc).unwrap_or(usize::MAX);
        }
        log::debug!("machine ran {steps} steps, pc = {}", self.pc);
        Ok(steps)
    }

    fn address(&self, base: Reg, offset: i32) -> Result<usize, MachineError> {
        let address = self.reg(base) as i64 + offset as i64;
        usize::try_from(address)
            .ok()
            .filter(|&a| a < self.dmem.len())
            .ok_or(MachineError::MemoryOutOfBounds {
                pc: self.pc,
                address,
            })
    }

    fn resolved(&self, instr: &Instr, target: &Target) -> Result<i64, MachineError> {
        target
            .resolved
            .map(i64::from)
            .ok_or_else(|| MachineError::Unlinked {
                pc: self.pc,
                text: instr.to_string(),
            })
    }

    /// Write an ALU result and record `code` in the status register when the
    /// operation overflowed.
    fn write_checked(&mut self, rd: Reg, (value, overflow): (i32, bool), code: i32) {
        self.set_reg(rd, value);
        if overflow {
            self.set_reg(Reg::STATUS, code);
        }
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(DEFAULT_DMEM_WORDS)
    }
}

impl Instr {
    /// Execute one instruction against `m`.
    pub fn execute(&self, m: &mut Machine, next_pc: &mut i64) -> Result<(), MachineError> {
        match self {
            Instr::Add { rd, rs, rt } => {
                let r = m.reg(*rs).overflowing_add(m.reg(*rt));
                m.write_checked(*rd, r, status::ADD_OVERFLOW);
            }
            Instr::Addi { rd, rs, imm } => {
                let r = m.reg(*rs).overflowing_add(*imm);
                m.write_checked(*rd, r, status::ADDI_OVERFLOW);
            }
            Instr::Sub { rd, rs, rt } => {
                let r = m.reg(*rs).overflowing_sub(m.reg(*rt));
                m.write_checked(*rd, r, status::SUB_OVERFLOW);
            }
            Instr::Mul { rd, rs, rt } => {
                let r = m.reg(*rs).overflowing_mul(m.reg(*rt));
                m.write_checked(*rd, r, status::MUL_OVERFLOW);
            }
            Instr::Div { rd, rs, rt } => {
                let divisor = m.reg(*rt);
                if divisor == 0 {
                    m.set_reg(Reg::STATUS, status::DIVIDE_BY_ZERO);
                } else {
                    // i32::MIN / -1 wraps; there is no status code for it.
                    m.set_reg(*rd, m.reg(*rs).wrapping_div(divisor));
                }
            }
            Instr::And { rd, rs, rt } => m.set_reg(*rd, m.reg(*rs) & m.reg(*rt)),
            Instr::Or { rd, rs, rt } => m.set_reg(*rd, m.reg(*rs) | m.reg(*rt)),
            Instr::Slt { rd, rs, rt } => m.set_reg(*rd, (m.reg(*rs) < m.reg(*rt)) as i32),
            Instr::Sgt { rd, rs, rt } => m.set_reg(*rd, (m.reg(*rs) > m.reg(*rt)) as i32),
            Instr::Sll { rd, rs, shamt } => {
                m.set_reg(*rd, m.reg(*rs).wrapping_shl(*shamt as u32))
            }
            Instr::Sra { rd, rs, shamt } => {
                m.set_reg(*rd, m.reg(*rs).wrapping_shr(*shamt as u32))
            }
            Instr::Sw { rd, rs, imm } => {
                let address = m.address(*rs, *imm)?;
                m.dmem[address] = m.reg(*rd);
            }
            Instr::Lw { rd, rs, imm } => {
                let address = m.address(*rs, *imm)?;
                m.set_reg(*rd, m.dmem[address]);
            }
            Instr::J { target } => *next_pc = m.resolved(self, target)?,
            Instr::Jal { target } => {
                m.set_reg(Reg::RA, m.pc as i32 + 1);
                *next_pc = m.resolved(self, target)?;
            }
            Instr::Bex { target } => {
                if m.reg(Reg::STATUS) != 0 {
                    *next_pc = m.resolved(self, target)?;
                }
            }
            Instr::Bne { rd, rs, target } => {
                if m.reg(*rd) != m.reg(*rs) {
                    *next_pc += m.resolved(self, target)?;
                }
            }
            Instr::Blt { rd, rs, target } => {
                if m.reg(*rd) < m.reg(*rs) {
                    *next_pc += m.resolved(self, target)?;
                }
            }
            Instr::Jr { rd } => *next_pc = m.reg(*rd) as i64,
            Instr::Setx { value } => m.set_reg(Reg::STATUS, *value),
            Instr::TestLog { rd } => {
                let value = m.reg(*rd);
                m.log.push(value);
            }
        }
        Ok(())
    }
}
