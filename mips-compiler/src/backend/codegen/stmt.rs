//! Statements, structured control flow and function definitions.

use super::{kind_of_type, BreakScope, Codegen, ReturnTarget, INLINE_RETURN};
use crate::backend::abi::Reg;
use crate::backend::instruction::Instr;
use crate::backend::tracker::{LevelKind, NumKind};
use crate::ir::{NodeId, NodeKind, Param, TypeSpec};
use crate::{CompileError, SemanticErrorKind};

/// Kind a variable of type `ty` is computed in: pointers are plain words.
fn arith_kind_of_type(ty: TypeSpec) -> NumKind {
    if ty.refs > 0 {
        NumKind::Int
    } else {
        kind_of_type(ty)
    }
}

impl<'a> Codegen<'a> {
    pub(super) fn compile_stmt(&mut self, id: NodeId) -> Result<(), CompileError> {
        let ast = self.ast;
        match ast.kind(id) {
            NodeKind::Define { name, ty, value } => self.compile_define(name, *ty, *value),
            NodeKind::ArrayDef {
                name,
                ty,
                dims,
                init,
            } => self.compile_array_def(name, *ty, dims, init),
            NodeKind::Function {
                name,
                ret,
                params,
                body: Some(body),
                inline: false,
            } => self.compile_function(name, *ret, params, body),
            // Inline bodies are expanded at each call; headers emit nothing.
            NodeKind::Function { .. } => Ok(()),
            NodeKind::If {
                branches,
                otherwise,
            } => self.compile_if(branches, otherwise.as_deref()),
            NodeKind::While { cond, body } => self.compile_while(*cond, body),
            NodeKind::For {
                init,
                cond,
                step,
                body,
            } => self.compile_for(*init, *cond, *step, body),
            NodeKind::Return(value) => self.compile_return(id, *value),
            NodeKind::Break => match self.scope.brk.clone() {
                Some(label) => self.jump(&label),
                None => Err(self.semantic(
                    SemanticErrorKind::BreakOutsideLoop,
                    id,
                    "Break statement outside of loop",
                )),
            },
            NodeKind::Continue => match self.scope.cont.clone() {
                Some(label) => self.jump(&label),
                None => Err(self.semantic(
                    SemanticErrorKind::ContinueOutsideLoop,
                    id,
                    "Continue statement outside of loop",
                )),
            },
            NodeKind::Group(body) => self.compile_block(body),
            NodeKind::Asm(text) => self.compile_asm(id, text),
            _ => self.compile_expr_stmt(id),
        }
    }

    /// An expression evaluated for its side effects.
    fn compile_expr_stmt(&mut self, id: NodeId) -> Result<(), CompileError> {
        if let Some(v) = self.compile_op(id, None)? {
            self.free(&v)?;
        }
        self.hint_last_use(id);
        self.tracker.release_holds();
        Ok(())
    }

    /// `body` in its own block level.
    fn compile_block(&mut self, body: &[NodeId]) -> Result<(), CompileError> {
        self.tracker.push_block(LevelKind::Block);
        for &stmt in body {
            self.compile_statement(stmt)?;
        }
        self.tracker.pop_block()
    }

    // ── Definitions ─────────────────────────────────────────────────────

    fn compile_define(&mut self, name: &str, ty: TypeSpec, value: Option<NodeId>) -> Result<(), CompileError> {
        let kind = arith_kind_of_type(ty);
        match value {
            None => self.tracker.declare_variable(name)?,
            Some(value) => match self.constant(value, kind).and_then(|c| i32::try_from(c).ok()) {
                Some(c) => {
                    let rd = self.tracker.add_variable(name, None, &mut self.out)?;
                    self.load_literal(rd, c);
                }
                None => {
                    let v = self.value(value)?;
                    let v = if ty.refs > 0 { v } else { self.convert(v, kind)? };
                    if self.tracker.is_temp(&v) {
                        self.tracker.rename_temp(&v, name)?;
                    } else {
                        let rs = self.fetch(&v)?;
                        let rd = self.tracker.add_variable(name, None, &mut self.out)?;
                        self.emit(Instr::mov(rd, rs));
                    }
                    self.hint_last_use(value);
                }
            },
        }
        self.tracker.set_type(name, kind_of_type(ty))?;
        self.tracker.set_type_refs(name, ty.refs)?;
        if self.address_taken.contains(name) {
            self.tracker.set_must_reload(name)?;
            if value.is_some() {
                self.tracker.mark_written(name, &mut self.out)?;
            }
        }
        self.tracker.release_holds();
        Ok(())
    }

    fn compile_array_def(
        &mut self,
        name: &str,
        ty: TypeSpec,
        dims: &[usize],
        init: &[NodeId],
    ) -> Result<(), CompileError> {
        let size: usize = dims.iter().product();
        let size = i32::try_from(size).map_err(|_| {
            CompileError::Allocator(format!("array {name} of {size} words does not fit in memory"))
        })?;
        self.tracker.set_array(name, size)?;
        self.tracker.set_dims(name, dims.to_vec())?;
        self.tracker.set_type(name, kind_of_type(ty))?;
        self.tracker.set_type_refs(name, ty.refs + 1)?;

        let kind = arith_kind_of_type(ty);
        for (i, &element) in init.iter().enumerate() {
            let v = self.value(element)?;
            let v = self.convert(v, kind)?;
            let (base, start) = self.tracker.array_address(name)?.base();
            let rv = self.fetch(&v)?;
            self.store_word(rv, base, start + i as i32)?;
            self.free(&v)?;
            self.tracker.release_holds();
        }
        Ok(())
    }

    /// `sw value, offset(base)`, going through a scratch register when the
    /// offset does not fit an immediate.
    fn store_word(&mut self, value: Reg, base: Reg, offset: i32) -> Result<(), CompileError> {
        if i16::try_from(offset).is_ok() {
            self.emit(Instr::Sw {
                rd: value,
                rs: base,
                imm: offset,
            });
            return Ok(());
        }
        let (temp, addr) = self.new_temp(NumKind::Int, 1)?;
        self.load_literal(addr, offset);
        if base != Reg::ZERO {
            self.emit(Instr::Add {
                rd: addr,
                rs: addr,
                rt: base,
            });
        }
        self.emit(Instr::Sw {
            rd: value,
            rs: addr,
            imm: 0,
        });
        self.free(&temp)
    }

    // ── Control flow ────────────────────────────────────────────────────

    /// Conditions are tested in order; the `else` body follows the tests,
    /// then the `else if` bodies in reverse, with the first branch last.
    fn compile_if(&mut self, branches: &[(NodeId, Vec<NodeId>)], otherwise: Option<&[NodeId]>) -> Result<(), CompileError> {
        let end = self.out.gen_label();
        let labels: Vec<String> = branches.iter().map(|_| self.out.gen_label()).collect();

        for ((cond, _), label) in branches.iter().zip(&labels) {
            self.branch_if(*cond, label)?;
        }
        if let Some(body) = otherwise {
            self.compile_block(body)?;
        }
        self.jump(&end)?;

        for (i, ((_, body), label)) in branches.iter().zip(&labels).enumerate().rev() {
            self.place_label(label)?;
            self.compile_block(body)?;
            if i > 0 {
                self.jump(&end)?;
            }
        }
        self.place_label(&end)
    }

    /// `j cond; body: ...; cond: if (c) goto body; end:`
    fn compile_while(&mut self, cond: NodeId, body: &[NodeId]) -> Result<(), CompileError> {
        let body_label = self.out.gen_label();
        let cond_label = self.out.gen_label();
        let end = self.out.gen_label();

        self.jump(&cond_label)?;
        self.place_label(&body_label)?;
        let saved = self.enter_loop(&end, &cond_label);
        let result = self.compile_block(body);
        self.scope = saved;
        result?;

        self.place_label(&cond_label)?;
        self.branch_if(cond, &body_label)?;
        self.place_label(&end)
    }

    fn compile_for(
        &mut self,
        init: Option<NodeId>,
        cond: Option<NodeId>,
        step: Option<NodeId>,
        body: &[NodeId],
    ) -> Result<(), CompileError> {
        let body_label = self.out.gen_label();
        let step_label = self.out.gen_label();
        let cond_label = self.out.gen_label();
        let end = self.out.gen_label();

        self.tracker.push_block(LevelKind::Block);
        if let Some(init) = init {
            self.compile_stmt(init)?;
            self.tracker.release_holds();
        }
        self.jump(&cond_label)?;
        self.place_label(&body_label)?;
        let saved = self.enter_loop(&end, &step_label);
        let result = self.compile_block(body);
        self.scope = saved;
        result?;

        self.place_label(&step_label)?;
        if let Some(step) = step {
            self.compile_expr_stmt(step)?;
        }
        self.place_label(&cond_label)?;
        match cond {
            Some(cond) => self.branch_if(cond, &body_label)?,
            None => self.jump(&body_label)?,
        }
        self.place_label(&end)?;
        self.tracker.pop_block()
    }

    /// Point `break` and `continue` at a new loop, returning the scope to
    /// restore afterwards.
    fn enter_loop(&mut self, brk: &str, cont: &str) -> BreakScope {
        let inner = BreakScope {
            ret: self.scope.ret.clone(),
            brk: Some(brk.to_string()),
            cont: Some(cont.to_string()),
        };
        std::mem::replace(&mut self.scope, inner)
    }

    fn compile_return(&mut self, id: NodeId, value: Option<NodeId>) -> Result<(), CompileError> {
        let Some(target) = self.scope.ret.clone() else {
            return Err(self.semantic(
                SemanticErrorKind::ReturnOutsideFunction,
                id,
                "Return statement outside of function",
            ));
        };
        if target.inline {
            if let Some(value) = value {
                self.assign_node(INLINE_RETURN, value)?;
                self.hint_last_use(value);
                if let Some(returned) = self.inline_returned.last_mut() {
                    *returned = true;
                }
            }
            return self.jump(&target.label);
        }

        if let Some(value) = value {
            let v = self.value(value)?;
            let v = self.convert(v, arith_kind_of_type(target.ty))?;
            let rs = self.fetch(&v)?;
            self.emit(Instr::mov(Reg::V0, rs));
            self.free(&v)?;
            self.tracker.release_holds();
        }
        self.jump(&target.label)
    }

    // ── Functions ───────────────────────────────────────────────────────

    /// Emit a function body in place, jumped over by the surrounding code.
    ///
    /// Stack arguments are read before the prologue, while `$29` still
    /// points at them. The prologue and epilogue start as no-ops and are
    /// patched once the frame size is known.
    fn compile_function(&mut self, name: &str, ret: TypeSpec, params: &[Param], body: &[NodeId]) -> Result<(), CompileError> {
        log::trace!("function {name}");
        let after = self.out.gen_label();
        let ret_label = self.out.gen_label();
        self.jump(&after)?;
        self.out.place_label(name);
        self.tracker.inc_scope()?;

        for (i, param) in params.iter().enumerate().skip(Reg::ARG_REGS) {
            let rd = self.tracker.add_variable(&param.name, None, &mut self.out)?;
            self.emit(Instr::Lw {
                rd,
                rs: Reg::SP,
                imm: (i - Reg::ARG_REGS) as i32,
            });
        }
        let prologue = self.out.push(Instr::noop());
        for (i, param) in params.iter().enumerate().take(Reg::ARG_REGS) {
            self.tracker.add_variable(&param.name, Reg::arg(i), &mut self.out)?;
        }
        for param in params {
            self.tracker.set_type(&param.name, kind_of_type(param.ty))?;
            self.tracker.set_type_refs(&param.name, param.ty.refs)?;
            if self.address_taken.contains(&param.name) {
                self.tracker.set_must_reload(&param.name)?;
                self.tracker.mark_written(&param.name, &mut self.out)?;
            }
        }
        self.tracker.release_holds();

        let saved = std::mem::replace(
            &mut self.scope,
            BreakScope {
                ret: Some(ReturnTarget {
                    label: ret_label.clone(),
                    ty: ret,
                    inline: false,
                }),
                brk: None,
                cont: None,
            },
        );
        let result = body.iter().try_for_each(|&stmt| self.compile_statement(stmt));
        self.scope = saved;
        result?;

        self.place_label(&ret_label)?;
        let epilogue = self.out.push(Instr::noop());
        let frame = self.tracker.dec_scope(&mut self.out)?;
        if frame > 0 {
            self.out.patch(
                prologue,
                Instr::Addi {
                    rd: Reg::SP,
                    rs: Reg::SP,
                    imm: -frame,
                },
            );
            self.out.patch(
                epilogue,
                Instr::Addi {
                    rd: Reg::SP,
                    rs: Reg::SP,
                    imm: frame,
                },
            );
        }
        log::debug!("function {name}: {frame} frame words");
        self.emit(Instr::Jr { rd: Reg::RA });
        self.out.place_label(after);
        Ok(())
    }
}
