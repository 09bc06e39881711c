//! Function calls and inline expansion.
//!
//! Calling convention: the first four arguments travel in `$4`-`$7`, the
//! rest are pushed so that argument `i` sits at `(i - 4)($29)` on entry.
//! The result comes back in `$2`. The caller parks its live temporaries
//! (and `$31`) around the `jal`.

use super::{kind_of_type, BreakScope, Codegen, FunctionInfo, ReturnTarget, INLINE_RETURN};
use crate::backend::abi::Reg;
use crate::backend::instruction::Instr;
use crate::backend::tracker::{LevelKind, NumKind};
use crate::ir::{NodeId, TypeSpec};
use crate::{CompileError, SemanticErrorKind};

impl<'a> Codegen<'a> {
    pub(super) fn compile_call(
        &mut self,
        id: NodeId,
        name: &str,
        args: &[NodeId],
    ) -> Result<Option<String>, CompileError> {
        let Some(info) = self.functions.get(name).cloned() else {
            let kind = if self.tracker.is_defined(name) {
                SemanticErrorKind::NotAFunction
            } else {
                SemanticErrorKind::UndefinedFunction
            };
            return Err(self.semantic(kind, id, format!("{name} is not a function")));
        };
        if args.len() != info.params.len() {
            return Err(self.semantic(
                SemanticErrorKind::ArgumentCountMismatch,
                id,
                format!(
                    "{name} takes {} arguments but {} were given",
                    info.params.len(),
                    args.len()
                ),
            ));
        }
        if let (true, Some(body)) = (info.inline, info.body) {
            return self.expand_inline(id, name, args, &info, body);
        }

        let mut values = Vec::with_capacity(args.len());
        for (&arg, param) in args.iter().zip(info.params) {
            let v = self.argument(arg, param.ty)?;
            values.push(v);
        }

        for (i, v) in values.iter().enumerate().take(Reg::ARG_REGS) {
            let target = Reg::arg(i)
                .ok_or_else(|| CompileError::Allocator(format!("no argument register {i}")))?;
            self.tracker.reserve_register(target, &mut self.out)?;
            let rs = self.fetch(v)?;
            if rs != target {
                self.emit(Instr::mov(target, rs));
            }
            self.free(v)?;
        }

        // Stack arguments are read into registers before the save area is
        // pushed, so their values survive it.
        let mut stacked = Vec::new();
        for v in values.iter().skip(Reg::ARG_REGS) {
            stacked.push(self.fetch(v)?);
        }
        for v in values.iter().skip(Reg::ARG_REGS) {
            self.free(v)?;
        }

        self.tracker.store_current_registers_in_stack(&mut self.out)?;
        let words = stacked.len() as i32;
        if words > 0 {
            self.emit(Instr::Addi {
                rd: Reg::SP,
                rs: Reg::SP,
                imm: -words,
            });
            for (j, &reg) in stacked.iter().enumerate() {
                self.emit(Instr::Sw {
                    rd: reg,
                    rs: Reg::SP,
                    imm: j as i32,
                });
            }
            self.tracker.push_words(words);
        }
        self.emit(Instr::call(name));
        if words > 0 {
            self.emit(Instr::Addi {
                rd: Reg::SP,
                rs: Reg::SP,
                imm: words,
            });
            self.tracker.pop_words(words);
        }
        self.tracker.restore_registers_from_stack(&mut self.out)?;
        self.tracker.unreserve_all();
        self.tracker.release_holds();

        if info.ret.is_void() {
            return Ok(None);
        }
        let (temp, rd) = self.new_temp(kind_of_type(info.ret), info.ret.refs)?;
        self.emit(Instr::mov(rd, Reg::V0));
        self.tracker.release_holds();
        Ok(Some(temp))
    }

    /// Evaluate one argument in the representation parameter type `ty`
    /// expects.
    fn argument(&mut self, arg: NodeId, ty: TypeSpec) -> Result<String, CompileError> {
        let v = self.value(arg)?;
        let v = if ty.refs > 0 {
            v
        } else {
            self.convert(v, kind_of_type(ty))?
        };
        self.hint_last_use(arg);
        Ok(v)
    }

    /// Expand an inline function at the call site.
    ///
    /// Each parameter becomes an alias for a temporary holding its argument,
    /// and `return value` assigns a `return` pseudo-variable before jumping
    /// to the end of the expansion.
    fn expand_inline(
        &mut self,
        id: NodeId,
        name: &str,
        args: &[NodeId],
        info: &FunctionInfo<'a>,
        body: &'a [NodeId],
    ) -> Result<Option<String>, CompileError> {
        if self.inline_stack.iter().any(|n| n == name) {
            return Err(self.semantic(
                SemanticErrorKind::RecursiveInline,
                id,
                format!("Inline function {name} expands into itself"),
            ));
        }
        let mut temps = Vec::with_capacity(args.len());
        for (&arg, param) in args.iter().zip(info.params) {
            let v = self.argument(arg, param.ty)?;
            let temp = if self.tracker.is_temp(&v) {
                v
            } else {
                let rs = self.fetch(&v)?;
                let (temp, rd) = self.new_temp(NumKind::Int, 0)?;
                self.emit(Instr::mov(rd, rs));
                temp
            };
            self.tracker.set_type(&temp, kind_of_type(param.ty))?;
            self.tracker.set_type_refs(&temp, param.ty.refs)?;
            self.tracker.release_holds();
            temps.push(temp);
        }

        self.tracker.push_block(LevelKind::Inline);
        for (param, temp) in info.params.iter().zip(&temps) {
            self.tracker.set_alias(&param.name, temp)?;
        }
        if !info.ret.is_void() {
            self.tracker.declare_variable(INLINE_RETURN)?;
            self.tracker.set_type(INLINE_RETURN, kind_of_type(info.ret))?;
            self.tracker.set_type_refs(INLINE_RETURN, info.ret.refs)?;
        }

        let end = self.out.gen_label();
        let saved = std::mem::replace(
            &mut self.scope,
            BreakScope {
                ret: Some(ReturnTarget {
                    label: end.clone(),
                    ty: info.ret,
                    inline: true,
                }),
                brk: None,
                cont: None,
            },
        );
        self.inline_stack.push(name.to_string());
        self.inline_returned.push(false);
        log::trace!("expanding inline {name}");
        let result = body.iter().try_for_each(|&stmt| self.compile_statement(stmt));
        self.scope = saved;
        self.inline_stack.pop();
        let returned = self.inline_returned.pop().unwrap_or(false);
        result?;
        self.place_label(&end)?;

        let value = if info.ret.is_void() {
            None
        } else if returned {
            Some(self.tracker.detach_as_temp(INLINE_RETURN, &mut self.out)?)
        } else {
            // Only inline assembly can have produced the result, in `$2`.
            self.tracker.remove_variable(INLINE_RETURN)?;
            let (temp, rd) = self.new_temp(kind_of_type(info.ret), info.ret.refs)?;
            self.emit(Instr::mov(rd, Reg::V0));
            Some(temp)
        };
        for param in info.params {
            self.tracker.remove_alias(&param.name);
        }
        self.tracker.pop_block()?;
        for temp in &temps {
            self.free(temp)?;
        }
        self.tracker.release_holds();
        Ok(value)
    }
}
