//! `__asm__` blocks.

use super::Codegen;
use crate::backend::asm::{self, AsmLine, AsmOperand};
use crate::backend::abi::Reg;
use crate::ir::NodeId;
use crate::{CompileError, SemanticErrorKind};
use std::collections::{HashMap, HashSet};

impl<'a> Codegen<'a> {
    /// Lower an inline assembly block.
    ///
    /// Registers named directly are moved out of the way of variables
    /// first, then every `(name)` operand is bound to a register that stays
    /// fixed for the whole block. Labels defined inside the block are made
    /// unique to it unless they name a function.
    pub(super) fn compile_asm(&mut self, id: NodeId, text: &str) -> Result<(), CompileError> {
        let lines = asm::parse(text, self.ast.line(id))?;
        let block = self.asm_blocks;
        self.asm_blocks += 1;

        let local: HashSet<String> = lines
            .iter()
            .filter_map(|l| l.label.clone())
            .filter(|l| !self.functions.contains_key(l))
            .collect();
        let rename = |label: &str| {
            if local.contains(label) {
                format!(".asm{block}_{label}")
            } else {
                label.to_string()
            }
        };

        let has_control_flow = lines
            .iter()
            .any(|l| l.label.is_some() || l.op.label_ref().is_some());
        if has_control_flow {
            self.sync()?;
        }

        for reg in raw_registers(&lines) {
            self.tracker.reserve_register(reg, &mut self.out)?;
            self.tracker.hold(reg);
        }

        let mut regs: HashMap<String, Reg> = HashMap::new();
        for line in &lines {
            for name in line.op.operands().into_iter().filter_map(AsmOperand::var) {
                if regs.contains_key(name) {
                    continue;
                }
                if !self.tracker.is_defined(name) {
                    return Err(self.semantic(
                        SemanticErrorKind::UndefinedVariable,
                        id,
                        format!("{name} used in __asm__ is not defined"),
                    ));
                }
                let reg = self.fetch(name)?;
                regs.insert(name.to_string(), reg);
            }
        }
        log::trace!("asm block {block}: {} lines, {} variables", lines.len(), regs.len());

        for line in &lines {
            let instr = line.op.lower(
                |operand| match operand {
                    AsmOperand::Reg(reg) => Ok(*reg),
                    AsmOperand::Var(name) => regs.get(name).copied().ok_or_else(|| {
                        CompileError::Allocator(format!("{name} was not bound for __asm__"))
                    }),
                },
                &rename,
            )?;
            match &line.label {
                Some(label) => self.out.push_labeled(rename(label), instr),
                None => self.out.push(instr),
            };
        }

        for line in &lines {
            if let Some(name) = line.op.written().and_then(AsmOperand::var) {
                self.tracker.mark_written(name, &mut self.out)?;
            }
        }
        self.tracker.release_holds();
        self.tracker.unreserve_all();
        Ok(())
    }
}

/// Physical registers the block names directly, except `$0` and `$29`.
fn raw_registers(lines: &[AsmLine]) -> Vec<Reg> {
    let mut regs = Vec::new();
    for line in lines {
        for operand in line.op.operands() {
            if let AsmOperand::Reg(reg) = operand {
                if *reg != Reg::ZERO && *reg != Reg::SP && !regs.contains(reg) {
                    regs.push(*reg);
                }
            }
        }
    }
    regs
}
