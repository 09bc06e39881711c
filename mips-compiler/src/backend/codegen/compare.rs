//! Comparisons and logical operators.
//!
//! In branch mode a condition jumps to a label when it holds and falls
//! through otherwise. The ISA only has `blt` and `bne`, so the other
//! relations are rewritten:
//!
//! | op       | sequence                          |
//! |----------|-----------------------------------|
//! | `a < b`  | `blt a, b, T`                     |
//! | `a > b`  | `blt b, a, T`                     |
//! | `a <= b` | `blt b, a, nj; j T; nj:`          |
//! | `a >= b` | `blt a, b, nj; j T; nj:`          |
//! | `a == b` | `bne a, b, nj; j T; nj:`          |
//! | `a != b` | `bne a, b, T`                     |
//!
//! In value mode `<` and `>` use `slt`/`sgt`, `<=` and `>=` invert them,
//! and everything else branches to a block that sets 1 past one that
//! sets 0.

use super::Codegen;
use crate::backend::abi::Reg;
use crate::backend::instruction::Instr;
use crate::backend::tracker::NumKind;
use crate::ir::{BinOp, NodeId, NodeKind, UnOp};
use crate::CompileError;

impl<'a> Codegen<'a> {
    pub(super) fn compile_compare(
        &mut self,
        id: NodeId,
        break_to: Option<&str>,
    ) -> Result<Option<String>, CompileError> {
        match break_to {
            Some(label) => {
                self.branch_if(id, label)?;
                Ok(None)
            }
            None => self.compare_value(id).map(Some),
        }
    }

    /// Branch to `target` when `id` evaluates to non-zero. Every path out
    /// leaves the tracker synced.
    pub(super) fn branch_if(&mut self, id: NodeId, target: &str) -> Result<(), CompileError> {
        let ast = self.ast;
        match ast.kind(id) {
            NodeKind::Binary { op, left, right } if op.is_relational() => {
                self.branch_relational(*op, *left, *right, target)
            }
            NodeKind::Binary {
                op: BinOp::LogicalAnd,
                left,
                right,
            } => {
                let second = self.out.gen_label();
                let skip = self.out.gen_label();
                self.branch_if(*left, &second)?;
                self.jump(&skip)?;
                self.place_label(&second)?;
                self.branch_if(*right, target)?;
                self.place_label(&skip)
            }
            NodeKind::Binary {
                op: BinOp::LogicalOr,
                left,
                right,
            } => {
                self.branch_if(*left, target)?;
                self.branch_if(*right, target)
            }
            NodeKind::Unary {
                op: UnOp::Not,
                operand,
            } => {
                let reg = self.condition_register(*operand)?;
                let no_jump = self.out.gen_label();
                self.emit(Instr::bne(reg, Reg::ZERO, no_jump.as_str()));
                self.emit(Instr::jump(target));
                self.tracker.release_holds();
                self.place_label(&no_jump)
            }
            _ => {
                let reg = self.condition_register(id)?;
                self.emit(Instr::bne(reg, Reg::ZERO, target));
                self.tracker.release_holds();
                Ok(())
            }
        }
    }

    /// Evaluate `id` as a value and sync, returning the held register.
    fn condition_register(&mut self, id: NodeId) -> Result<Reg, CompileError> {
        let v = self.value(id)?;
        let reg = self.fetch(&v)?;
        self.free(&v)?;
        self.hint_last_use(id);
        self.sync()?;
        Ok(reg)
    }

    /// Both operands of a relation in registers, in a common kind. A
    /// literal zero on the right is read from `$0`.
    fn relation_operands(&mut self, left: NodeId, right: NodeId) -> Result<(Reg, Reg), CompileError> {
        let l = self.value(left)?;
        if matches!(self.ast.kind(right), NodeKind::Int(0)) {
            let ra = self.fetch(&l)?;
            self.free(&l)?;
            self.hint_last_use(left);
            return Ok((ra, Reg::ZERO));
        }
        let r = self.value(right)?;
        let (l, r) = if self.arith_kind(&l)? == NumKind::Fixed || self.arith_kind(&r)? == NumKind::Fixed {
            let l = self.convert(l, NumKind::Fixed)?;
            (l, self.convert(r, NumKind::Fixed)?)
        } else {
            (l, r)
        };
        let ra = self.fetch(&l)?;
        let rb = self.fetch(&r)?;
        self.free(&l)?;
        self.free(&r)?;
        self.hint_last_use(left);
        self.hint_last_use(right);
        Ok((ra, rb))
    }

    fn branch_relational(&mut self, op: BinOp, left: NodeId, right: NodeId, target: &str) -> Result<(), CompileError> {
        let (a, b) = self.relation_operands(left, right)?;
        self.sync()?;
        let no_jump = match op {
            BinOp::Lt => {
                self.emit(Instr::blt(a, b, target));
                None
            }
            BinOp::Gt => {
                self.emit(Instr::blt(b, a, target));
                None
            }
            BinOp::Ne => {
                self.emit(Instr::bne(a, b, target));
                None
            }
            BinOp::Le | BinOp::Ge | BinOp::Eq => {
                let nj = self.out.gen_label();
                let skip = match op {
                    BinOp::Le => Instr::blt(b, a, nj.as_str()),
                    BinOp::Ge => Instr::blt(a, b, nj.as_str()),
                    _ => Instr::bne(a, b, nj.as_str()),
                };
                self.emit(skip);
                self.emit(Instr::jump(target));
                Some(nj)
            }
            other => {
                return Err(CompileError::Allocator(format!(
                    "{} is not a relation",
                    other.symbol()
                )))
            }
        };
        self.tracker.release_holds();
        match no_jump {
            Some(label) => self.place_label(&label),
            None => Ok(()),
        }
    }

    /// Materialize a comparison as 0 or 1 in a fresh temporary.
    fn compare_value(&mut self, id: NodeId) -> Result<String, CompileError> {
        let ast = self.ast;
        if let NodeKind::Binary { op, left, right } = ast.kind(id) {
            if matches!(op, BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge) {
                let (a, b) = self.relation_operands(*left, *right)?;
                let (temp, rd) = self.new_temp(NumKind::Int, 0)?;
                match op {
                    BinOp::Lt | BinOp::Ge => self.emit(Instr::Slt { rd, rs: a, rt: b }),
                    _ => self.emit(Instr::Sgt { rd, rs: a, rt: b }),
                }
                if matches!(op, BinOp::Le | BinOp::Ge) {
                    // rd = 1 - rd
                    self.emit(Instr::Sub {
                        rd,
                        rs: Reg::ZERO,
                        rt: rd,
                    });
                    self.emit(Instr::Addi { rd, rs: rd, imm: 1 });
                }
                self.tracker.release_holds();
                return Ok(temp);
            }
        }

        let (temp, _) = self.new_temp(NumKind::Int, 0)?;
        let yes = self.out.gen_label();
        let end = self.out.gen_label();
        self.branch_if(id, &yes)?;
        let rd = self.fetch(&temp)?;
        self.emit(Instr::load_imm(rd, 0));
        self.jump(&end)?;
        self.place_label(&yes)?;
        let rd = self.fetch(&temp)?;
        self.emit(Instr::load_imm(rd, 1));
        self.place_label(&end)?;
        self.tracker.release_holds();
        Ok(temp)
    }
}
