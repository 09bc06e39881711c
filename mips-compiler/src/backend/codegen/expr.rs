//! Expression lowering: literals, arithmetic, memory access, assignment.

use super::Codegen;
use crate::backend::abi::Reg;
use crate::backend::instruction::Instr;
use crate::backend::tracker::NumKind;
use crate::ir::{BinOp, NodeId, NodeKind, UnOp, FIXED_FRACTION_BITS};
use crate::{CompileError, SemanticErrorKind};

/// Where an array element or dereferenced pointer lives.
enum ElementAddr {
    /// `offset(base)` with a fixed base register (`$0` or `$29`).
    Fixed { base: Reg, offset: i32 },
    /// `offset(reg)` where `reg` holds the value named `name`.
    Named { name: String, offset: i32 },
}

fn fits_imm(value: i64) -> bool {
    i16::try_from(value).is_ok()
}

impl<'a> Codegen<'a> {
    /// Compile an expression. With `break_to` set, comparisons compile to a
    /// branch taken when they hold and yield no value.
    pub(super) fn compile_op(
        &mut self,
        id: NodeId,
        break_to: Option<&str>,
    ) -> Result<Option<String>, CompileError> {
        let ast = self.ast;
        match ast.kind(id) {
            NodeKind::Int(v) => self.literal(*v, NumKind::Int).map(Some),
            NodeKind::Fixed(v) => self.literal(*v, NumKind::Fixed).map(Some),
            NodeKind::Ident(name) => {
                if !self.tracker.is_defined(name) {
                    let kind = if self.functions.contains_key(name) {
                        SemanticErrorKind::FunctionUsedAsVariable
                    } else {
                        SemanticErrorKind::UndefinedVariable
                    };
                    return Err(self.semantic(kind, id, format!("{name} not defined")));
                }
                Ok(Some(name.clone()))
            }
            NodeKind::Binary { op, left, right } => {
                if op.is_relational() || op.is_logical() {
                    self.compile_compare(id, break_to)
                } else {
                    self.compile_binary(id, *op, *left, *right).map(Some)
                }
            }
            NodeKind::Unary { op: UnOp::Not, .. } => self.compile_compare(id, break_to),
            NodeKind::Unary { op, operand } => self.compile_unary(id, *op, *operand).map(Some),
            NodeKind::Assign { op, target, value } => {
                self.compile_assign(id, *op, *target, *value).map(Some)
            }
            NodeKind::Call { name, args } => self.compile_call(id, name, args),
            NodeKind::Index { name, indices } => self.compile_index_read(id, name, indices).map(Some),
            _ => Err(self.semantic(
                SemanticErrorKind::InvalidOperand,
                id,
                format!("{} is not an expression", ast.render(id)),
            )),
        }
    }

    /// Compile an expression that must produce a value.
    pub(super) fn value(&mut self, id: NodeId) -> Result<String, CompileError> {
        match self.compile_op(id, None)? {
            Some(name) => Ok(name),
            None => Err(self.semantic(
                SemanticErrorKind::VoidValue,
                id,
                format!("{} does not produce a value", self.ast.render(id)),
            )),
        }
    }

    fn literal(&mut self, value: i32, kind: NumKind) -> Result<String, CompileError> {
        let (name, reg) = self.new_temp(kind, 0)?;
        self.load_literal(reg, value);
        self.tracker.release_holds();
        Ok(name)
    }

    /// Constant value of a literal node, scaled to `kind`.
    pub(super) fn constant(&self, id: NodeId, kind: NumKind) -> Option<i64> {
        let shift = FIXED_FRACTION_BITS as u32;
        match (self.ast.kind(id), kind) {
            (NodeKind::Int(v), NumKind::Int) | (NodeKind::Fixed(v), NumKind::Fixed) => {
                Some(*v as i64)
            }
            (NodeKind::Int(v), NumKind::Fixed) => Some((*v as i64) << shift),
            (NodeKind::Fixed(v), NumKind::Int) => Some((*v as i64) >> shift),
            _ => None,
        }
    }

    /// Literal right operand usable as an `addi` immediate next to a value
    /// of kind `kind`.
    fn immediate(&self, id: NodeId, kind: NumKind) -> Option<i64> {
        match (self.ast.kind(id), kind) {
            (NodeKind::Int(_), _) | (NodeKind::Fixed(_), NumKind::Fixed) => self.constant(id, kind),
            _ => None,
        }
    }

    // ── Numeric kinds ───────────────────────────────────────────────────

    /// Kind used for arithmetic: pointers are plain integers.
    pub(super) fn arith_kind(&self, name: &str) -> Result<NumKind, CompileError> {
        if self.tracker.get_type_refs(name)? > 0 {
            Ok(NumKind::Int)
        } else {
            self.kind_of(name)
        }
    }

    /// Arithmetic kind of the element a pointer or array `name` refers to.
    fn element_kind(&self, name: &str) -> Result<NumKind, CompileError> {
        if self.tracker.get_type_refs(name)? > 1 {
            Ok(NumKind::Int)
        } else {
            self.kind_of(name)
        }
    }

    /// Re-express `name` in `kind`, returning the name holding the result.
    pub(super) fn convert(&mut self, name: String, kind: NumKind) -> Result<String, CompileError> {
        let refs = self.tracker.get_type_refs(&name)?;
        if refs > 0 || self.kind_of(&name)? == kind {
            return Ok(name);
        }
        let shamt = FIXED_FRACTION_BITS;
        let src = self.fetch(&name)?;
        self.free(&name)?;
        let (temp, rd) = self.new_temp(kind, refs)?;
        match kind {
            NumKind::Fixed => self.emit(Instr::Sll { rd, rs: src, shamt }),
            NumKind::Int => self.emit(Instr::Sra { rd, rs: src, shamt }),
        }
        self.tracker.release_holds();
        Ok(temp)
    }

    /// Arithmetic shift of `name` into a new temporary.
    fn rescale(&mut self, name: String, shamt: u8) -> Result<String, CompileError> {
        let src = self.fetch(&name)?;
        self.free(&name)?;
        let (temp, rd) = self.new_temp(NumKind::Fixed, 0)?;
        self.emit(Instr::Sra { rd, rs: src, shamt });
        self.tracker.release_holds();
        Ok(temp)
    }

    // ── Binary arithmetic ───────────────────────────────────────────────

    fn compile_binary(
        &mut self,
        id: NodeId,
        op: BinOp,
        left: NodeId,
        right: NodeId,
    ) -> Result<String, CompileError> {
        if matches!(op, BinOp::Shl | BinOp::Shr) {
            return self.compile_shift(id, op, left, right);
        }

        let l = self.value(left)?;
        let kind = self.arith_kind(&l)?;

        // `x + 3`, `x - 3`: immediate form.
        if let (BinOp::Add | BinOp::Sub, Some(c)) = (op, self.immediate(right, kind)) {
            let imm = if op == BinOp::Sub { -c } else { c };
            if fits_imm(imm) {
                let refs = self.tracker.get_type_refs(&l)?;
                let kind = self.kind_of(&l)?;
                let ra = self.fetch(&l)?;
                self.free(&l)?;
                let (temp, rd) = self.new_temp(kind, refs)?;
                self.emit(Instr::Addi {
                    rd,
                    rs: ra,
                    imm: imm as i32,
                });
                self.tracker.release_holds();
                self.hint_last_use(left);
                return Ok(temp);
            }
        }

        let r = self.value(right)?;
        let result = self.binary_values(op, l, r)?;
        self.hint_last_use(left);
        self.hint_last_use(right);
        Ok(result)
    }

    /// Combine two named values with `op`, reconciling fixed-point kinds.
    pub(super) fn binary_values(&mut self, op: BinOp, l: String, r: String) -> Result<String, CompileError> {
        let (kl, kr) = (self.arith_kind(&l)?, self.arith_kind(&r)?);
        let fixed = kl == NumKind::Fixed || kr == NumKind::Fixed;
        let (refs_l, refs_r) = (
            self.tracker.get_type_refs(&l)?,
            self.tracker.get_type_refs(&r)?,
        );
        let refs = refs_l.max(refs_r);
        let kind = match (refs_l > 0, refs_r > 0) {
            (true, _) => self.kind_of(&l)?,
            (false, true) => self.kind_of(&r)?,
            _ if fixed => NumKind::Fixed,
            _ => NumKind::Int,
        };

        let (l, r, post_shift) = match (op, kl, kr) {
            // A product or quotient with one integer factor needs no scaling.
            (BinOp::Mul, NumKind::Fixed, NumKind::Int)
            | (BinOp::Mul, NumKind::Int, NumKind::Fixed)
            | (BinOp::Div, NumKind::Fixed, NumKind::Int) => (l, r, None),
            (BinOp::Mul, NumKind::Fixed, NumKind::Fixed) => {
                let half = FIXED_FRACTION_BITS / 2;
                (self.rescale(l, half)?, self.rescale(r, half)?, None)
            }
            (BinOp::Div, _, NumKind::Fixed) => {
                let half = FIXED_FRACTION_BITS / 2;
                let l = self.convert(l, NumKind::Fixed)?;
                (l, self.rescale(r, half)?, Some(half))
            }
            _ if fixed => (
                self.convert(l, NumKind::Fixed)?,
                self.convert(r, NumKind::Fixed)?,
                None,
            ),
            _ => (l, r, None),
        };

        let ra = self.fetch(&l)?;
        let rb = self.fetch(&r)?;
        self.free(&l)?;
        self.free(&r)?;
        let (temp, rd) = self.new_temp(kind, refs)?;
        self.emit_binary(op, rd, ra, rb)?;
        if let Some(shamt) = post_shift {
            self.emit(Instr::Sll { rd, rs: rd, shamt });
        }
        self.tracker.release_holds();
        Ok(temp)
    }

    /// `rd = ra op rb`. `rd` must differ from both operands.
    fn emit_binary(&mut self, op: BinOp, rd: Reg, ra: Reg, rb: Reg) -> Result<(), CompileError> {
        let instr = match op {
            BinOp::Add => Instr::Add { rd, rs: ra, rt: rb },
            BinOp::Sub => Instr::Sub { rd, rs: ra, rt: rb },
            BinOp::Mul => Instr::Mul { rd, rs: ra, rt: rb },
            BinOp::Div => Instr::Div { rd, rs: ra, rt: rb },
            BinOp::BitAnd => Instr::And { rd, rs: ra, rt: rb },
            BinOp::BitOr => Instr::Or { rd, rs: ra, rt: rb },
            BinOp::Xor => {
                // a ^ b = (a | b) - (a & b)
                self.emit(Instr::Or {
                    rd: Reg::AT,
                    rs: ra,
                    rt: rb,
                });
                self.emit(Instr::And { rd, rs: ra, rt: rb });
                Instr::Sub {
                    rd,
                    rs: Reg::AT,
                    rt: rd,
                }
            }
            BinOp::Mod => {
                // a % b = a - (a / b) * b
                self.emit(Instr::Div { rd, rs: ra, rt: rb });
                self.emit(Instr::Mul { rd, rs: rd, rt: rb });
                Instr::Sub { rd, rs: ra, rt: rd }
            }
            other => {
                return Err(CompileError::Allocator(format!(
                    "{} reached arithmetic lowering",
                    other.symbol()
                )))
            }
        };
        self.emit(instr);
        Ok(())
    }

    fn compile_shift(&mut self, id: NodeId, op: BinOp, left: NodeId, right: NodeId) -> Result<String, CompileError> {
        let shamt = match self.ast.kind(right) {
            NodeKind::Int(v) if (0..32).contains(v) => *v as u8,
            NodeKind::Int(v) => {
                return Err(self.semantic(
                    SemanticErrorKind::InvalidOperand,
                    id,
                    format!("Shift amount {v} out of range"),
                ))
            }
            _ => {
                return Err(self.semantic(
                    SemanticErrorKind::NonConstantShift,
                    id,
                    format!("Shift amount in {} must be a constant", self.ast.render(id)),
                ))
            }
        };
        let l = self.value(left)?;
        let kind = self.kind_of(&l)?;
        let refs = self.tracker.get_type_refs(&l)?;
        let rs = self.fetch(&l)?;
        self.free(&l)?;
        let (temp, rd) = self.new_temp(kind, refs)?;
        if op == BinOp::Shl {
            self.emit(Instr::Sll { rd, rs, shamt });
        } else {
            self.emit(Instr::Sra { rd, rs, shamt });
        }
        self.tracker.release_holds();
        self.hint_last_use(left);
        Ok(temp)
    }

    // ── Unary ───────────────────────────────────────────────────────────

    fn compile_unary(&mut self, id: NodeId, op: UnOp, operand: NodeId) -> Result<String, CompileError> {
        match op {
            UnOp::Neg => {
                let v = self.value(operand)?;
                let kind = self.kind_of(&v)?;
                let rs = self.fetch(&v)?;
                self.free(&v)?;
                let (temp, rd) = self.new_temp(kind, 0)?;
                self.emit(Instr::Sub {
                    rd,
                    rs: Reg::ZERO,
                    rt: rs,
                });
                self.tracker.release_holds();
                Ok(temp)
            }
            UnOp::Ref => {
                let name = self.operand_ident(id, operand)?;
                let refs = self.tracker.get_type_refs(&name)?;
                let kind = self.kind_of(&name)?;
                let addr = self.tracker.get_mem_addr(&name, &mut self.out)?;
                let refs = if self.tracker.is_array(&name) { refs } else { refs + 1 };
                let (temp, rd) = self.new_temp(kind, refs)?;
                let (base, offset) = addr.base();
                self.emit(Instr::Addi {
                    rd,
                    rs: base,
                    imm: offset,
                });
                self.tracker.release_holds();
                Ok(temp)
            }
            UnOp::Deref => {
                let name = self.operand_ident(id, operand)?;
                self.require_pointer(id, &name)?;
                let addr = ElementAddr::Named { name, offset: 0 };
                self.load_element(addr)
            }
            UnOp::Not => self.compile_compare(id, None).and_then(|v| {
                v.ok_or_else(|| CompileError::Allocator("negation produced no value".into()))
            }),
        }
    }

    fn operand_ident(&self, id: NodeId, operand: NodeId) -> Result<String, CompileError> {
        match self.ast.kind(operand) {
            NodeKind::Ident(name) if self.tracker.is_defined(name) => Ok(name.clone()),
            NodeKind::Ident(name) => Err(self.semantic(
                SemanticErrorKind::UndefinedVariable,
                id,
                format!("{name} not defined"),
            )),
            _ => Err(self.semantic(
                SemanticErrorKind::InvalidOperand,
                id,
                format!("Must use variable after ref or deref in {}", self.ast.render(id)),
            )),
        }
    }

    fn require_pointer(&self, id: NodeId, name: &str) -> Result<(), CompileError> {
        if self.tracker.get_type_refs(name)? == 0 {
            return Err(self.semantic(
                SemanticErrorKind::InvalidOperand,
                id,
                format!("{name} is not a pointer"),
            ));
        }
        Ok(())
    }

    // ── Memory access ───────────────────────────────────────────────────

    /// Address of `name[indices...]`. Constant indices into arrays fold
    /// into the instruction offset.
    fn element_address(&mut self, id: NodeId, name: &str, indices: &[NodeId]) -> Result<ElementAddr, CompileError> {
        if !self.tracker.is_defined(name) {
            return Err(self.semantic(
                SemanticErrorKind::UndefinedVariable,
                id,
                format!("{name} not defined"),
            ));
        }
        let is_array = self.tracker.is_array(name);
        if !is_array {
            self.require_pointer(id, name).map_err(|_| {
                self.semantic(
                    SemanticErrorKind::VariableUsedAsArray,
                    id,
                    format!("{name} is not an array or pointer"),
                )
            })?;
        }
        let dims = self.tracker.dims(name)?.to_vec();
        let strides: Vec<i64> = if dims.len() > 1 {
            (0..dims.len())
                .map(|i| dims[i + 1..].iter().product::<usize>() as i64)
                .collect()
        } else {
            vec![1; indices.len()]
        };

        let constant: Option<i64> = indices
            .iter()
            .zip(&strides)
            .map(|(&i, &stride)| match self.ast.kind(i) {
                NodeKind::Int(v) => Some(*v as i64 * stride),
                _ => None,
            })
            .sum();

        if let Some(offset) = constant.filter(|o| fits_imm(*o)) {
            if is_array {
                let (base, start) = self.tracker.array_address(name)?.base();
                let offset = start as i64 + offset;
                if fits_imm(offset) {
                    return Ok(ElementAddr::Fixed {
                        base,
                        offset: offset as i32,
                    });
                }
            } else {
                return Ok(ElementAddr::Named {
                    name: name.to_string(),
                    offset: offset as i32,
                });
            }
        }

        // Runtime index: linear = sum(index_i * stride_i).
        let mut linear: Option<String> = None;
        for (&index, &stride) in indices.iter().zip(&strides) {
            let v = self.value(index)?;
            let v = self.convert(v, NumKind::Int)?;
            let term = if stride == 1 {
                v
            } else {
                let s = self.literal(stride as i32, NumKind::Int)?;
                self.binary_values(BinOp::Mul, v, s)?
            };
            linear = Some(match linear {
                None => term,
                Some(acc) => self.binary_values(BinOp::Add, acc, term)?,
            });
        }
        let linear = linear.ok_or_else(|| {
            self.semantic(
                SemanticErrorKind::InvalidOperand,
                id,
                format!("{name} indexed without an index"),
            )
        })?;

        let rb = self.fetch(name)?;
        let ri = self.fetch(&linear)?;
        self.free(&linear)?;
        let (temp, rd) = self.new_temp(NumKind::Int, 1)?;
        self.emit(Instr::Add { rd, rs: rb, rt: ri });
        self.tracker.release_holds();
        Ok(ElementAddr::Named {
            name: temp,
            offset: 0,
        })
    }

    fn load_element(&mut self, addr: ElementAddr) -> Result<String, CompileError> {
        let (base, offset, kind, refs) = match &addr {
            ElementAddr::Fixed { base, offset } => (*base, *offset, NumKind::Int, 0),
            ElementAddr::Named { name, offset } => {
                let kind = self.kind_of(name)?;
                let refs = self.tracker.get_type_refs(name)?.saturating_sub(1);
                let base = self.fetch(name)?;
                self.free(name)?;
                (base, *offset, kind, refs)
            }
        };
        let (temp, rd) = self.new_temp(kind, refs)?;
        self.emit(Instr::Lw {
            rd,
            rs: base,
            imm: offset,
        });
        self.tracker.release_holds();
        Ok(temp)
    }

    fn store_element(&mut self, addr: ElementAddr, value: &str) -> Result<(), CompileError> {
        let rv = self.fetch(value)?;
        let (base, offset) = match &addr {
            ElementAddr::Fixed { base, offset } => (*base, *offset),
            ElementAddr::Named { name, offset } => {
                let base = self.fetch(name)?;
                self.free(name)?;
                (base, *offset)
            }
        };
        self.emit(Instr::Sw {
            rd: rv,
            rs: base,
            imm: offset,
        });
        self.tracker.release_holds();
        Ok(())
    }

    fn compile_index_read(&mut self, id: NodeId, name: &str, indices: &[NodeId]) -> Result<String, CompileError> {
        let addr = self.element_address(id, name, indices)?;
        let kind = self.kind_of(name)?;
        let refs = self.tracker.get_type_refs(name)?.saturating_sub(1);
        let temp = self.load_element(addr)?;
        self.tracker.set_type(&temp, kind)?;
        self.tracker.set_type_refs(&temp, refs)?;
        Ok(temp)
    }

    // ── Assignment ──────────────────────────────────────────────────────

    fn compile_assign(
        &mut self,
        id: NodeId,
        op: Option<BinOp>,
        target: NodeId,
        value: NodeId,
    ) -> Result<String, CompileError> {
        let ast = self.ast;
        match ast.kind(target) {
            NodeKind::Ident(name) => {
                if !self.tracker.is_defined(name) {
                    return Err(self.semantic(
                        SemanticErrorKind::UndefinedVariable,
                        id,
                        format!("{name} not defined"),
                    ));
                }
                if self.tracker.is_array(name) {
                    return Err(self.semantic(
                        SemanticErrorKind::InvalidAssignment,
                        id,
                        format!("Cannot assign to array {name}"),
                    ));
                }
                match op {
                    None => self.assign_node(name, value)?,
                    Some(op) => {
                        let v = match op {
                            BinOp::Shl | BinOp::Shr => self.compile_shift(id, op, target, value)?,
                            _ => {
                                let r = self.value(value)?;
                                self.binary_values(op, name.clone(), r)?
                            }
                        };
                        self.assign_name(name, v)?;
                    }
                }
                self.hint_last_use(value);
                Ok(name.clone())
            }
            NodeKind::Unary {
                op: UnOp::Deref,
                operand,
            } if op.is_none() => {
                let pointer = self.operand_ident(id, *operand)?;
                self.require_pointer(id, &pointer)?;
                let v = self.value(value)?;
                let kind = self.element_kind(&pointer)?;
                let v = self.convert(v, kind)?;
                self.store_element(
                    ElementAddr::Named {
                        name: pointer,
                        offset: 0,
                    },
                    &v,
                )?;
                Ok(v)
            }
            NodeKind::Index { name, indices } if op.is_none() => {
                let v = self.value(value)?;
                let kind = self.element_kind(name)?;
                let v = self.convert(v, kind)?;
                let addr = self.element_address(id, name, indices)?;
                self.store_element(addr, &v)?;
                Ok(v)
            }
            _ => Err(self.semantic(
                SemanticErrorKind::InvalidAssignment,
                id,
                format!("Cannot assign to {}", ast.render(target)),
            )),
        }
    }

    /// `name = <expression at value>`, converting to `name`'s kind.
    pub(super) fn assign_node(&mut self, name: &str, value: NodeId) -> Result<(), CompileError> {
        let kind = self.arith_kind(name)?;
        if let Some(c) = self.constant(value, kind) {
            if let Ok(c) = i32::try_from(c) {
                let rd = self.tracker.prepare_write(name, &mut self.out)?;
                self.load_literal(rd, c);
                self.tracker.mark_written(name, &mut self.out)?;
                self.tracker.release_holds();
                return Ok(());
            }
        }
        let v = self.value(value)?;
        self.assign_name(name, v)
    }

    /// Copy the value named `v` into variable `name`, releasing `v` if it
    /// is a temporary.
    pub(super) fn assign_name(&mut self, name: &str, v: String) -> Result<(), CompileError> {
        let kind = self.arith_kind(name)?;
        let v = self.convert(v, kind)?;
        if v == name {
            return Ok(());
        }
        let rs = self.fetch(&v)?;
        let rd = self.tracker.prepare_write(name, &mut self.out)?;
        if rd != rs {
            self.emit(Instr::mov(rd, rs));
        }
        self.free(&v)?;
        self.tracker.mark_written(name, &mut self.out)?;
        self.tracker.release_holds();
        Ok(())
    }
}
