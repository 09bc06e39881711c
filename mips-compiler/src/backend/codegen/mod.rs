//! Code generation driver.
//!
//! Walks the ordered top-level statements and emits instructions into a
//! [`Builder`], consulting the [`Tracker`] for every register decision.
//!
//! Expressions compile to the *name* of the value that holds their result:
//! an existing variable, or a fresh temporary that the consumer releases
//! with `remove_if_temp` once it has read the register. Comparisons can
//! instead compile straight to a branch (see `compare`).
//!
//! Submodules:
//! - `expr`       — arithmetic, memory access and assignment
//! - `compare`    — branch-mode and value-mode comparisons
//! - `stmt`       — statements, control flow and function bodies
//! - `call`       — calls and inline expansion
//! - `inline_asm` — `__asm__` blocks

mod call;
mod compare;
mod expr;
mod inline_asm;
mod stmt;

use super::abi::Reg;
use super::builder::Builder;
use super::instruction::Instr;
use super::tracker::{Location, NumKind, Tracker};
use crate::ir::{Ast, NodeId, NodeKind, Param, ParsedProgram, TypeSpec, UnOp};
use crate::{CompileConfig, CompileError, SemanticErrorKind};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Output of code generation: unlinked instructions plus the final
/// location of every top-level variable.
#[derive(Debug)]
pub struct Generated {
    pub builder: Builder,
    pub symbols: BTreeMap<String, Location>,
}

/// Generate code for a parsed program whose statements are already in
/// execution order (see [`ParsedProgram::order_for_codegen`]).
pub fn generate(parsed: &ParsedProgram, config: &CompileConfig) -> Result<Generated, CompileError> {
    let mut cg = Codegen::new(&parsed.ast, config);
    cg.collect_functions(&parsed.statements);
    cg.collect_address_taken();

    cg.load_literal(Reg::SP, config.stack_top);
    for &stmt in &parsed.statements {
        cg.compile_statement(stmt)?;
    }

    let mut symbols = BTreeMap::new();
    for name in cg.tracker.root_names() {
        if let Some(location) = cg.tracker.location(&name) {
            symbols.insert(name, location);
        }
    }
    log::debug!(
        "generated {} instructions, {} global words",
        cg.out.len(),
        cg.tracker.globals_used()
    );
    Ok(Generated {
        builder: cg.out,
        symbols,
    })
}

// ============================================================================
// Codegen state
// ============================================================================

#[derive(Debug, Clone)]
struct FunctionInfo<'a> {
    ret: TypeSpec,
    params: &'a [Param],
    body: Option<&'a [NodeId]>,
    inline: bool,
}

/// Where `return` goes in the construct being compiled.
#[derive(Debug, Clone)]
struct ReturnTarget {
    label: String,
    ty: TypeSpec,
    /// Inside an inline expansion the value goes to the `return`
    /// pseudo-variable instead of `$2`.
    inline: bool,
}

/// Jump targets for `return`, `break` and `continue`, saved and restored
/// around each construct that changes them.
#[derive(Debug, Clone, Default)]
struct BreakScope {
    ret: Option<ReturnTarget>,
    brk: Option<String>,
    cont: Option<String>,
}

/// Name of the pseudo-variable that captures an inline function's result.
const INLINE_RETURN: &str = "return";

pub(crate) struct Codegen<'a> {
    ast: &'a Ast,
    config: &'a CompileConfig,
    out: Builder,
    tracker: Tracker,
    functions: HashMap<String, FunctionInfo<'a>>,
    /// Names whose address is taken somewhere; kept write-through.
    address_taken: HashSet<String>,
    scope: BreakScope,
    /// Inline functions being expanded, innermost last.
    inline_stack: Vec<String>,
    /// Whether each active inline expansion has executed `return value`.
    inline_returned: Vec<bool>,
    asm_blocks: usize,
}

impl<'a> Codegen<'a> {
    fn new(ast: &'a Ast, config: &'a CompileConfig) -> Self {
        Self {
            ast,
            config,
            out: Builder::new(),
            tracker: Tracker::new(),
            functions: HashMap::new(),
            address_taken: HashSet::new(),
            scope: BreakScope::default(),
            inline_stack: Vec::new(),
            inline_returned: Vec::new(),
            asm_blocks: 0,
        }
    }

    // ── Pre-passes ──────────────────────────────────────────────────────

    /// Record every function's signature, so calls can precede bodies.
    fn collect_functions(&mut self, statements: &[NodeId]) {
        let ast = self.ast;
        for &id in statements {
            if let NodeKind::Function {
                name,
                ret,
                params,
                body,
                inline,
            } = ast.kind(id)
            {
                let info = FunctionInfo {
                    ret: *ret,
                    params,
                    body: body.as_deref(),
                    inline: *inline,
                };
                let defined = self.functions.get(name).is_some_and(|f| f.body.is_some());
                if !(defined && body.is_none()) {
                    self.functions.insert(name.clone(), info);
                }
            }
        }
    }

    fn collect_address_taken(&mut self) {
        for index in 0..self.ast.len() {
            let id = NodeId::from_index(index);
            if let NodeKind::Unary {
                op: UnOp::Ref,
                operand,
            } = self.ast.kind(id)
            {
                if let NodeKind::Ident(name) = self.ast.kind(*operand) {
                    self.address_taken.insert(name.clone());
                }
            }
        }
    }

    // ── Statement boundary ──────────────────────────────────────────────

    /// Compile one statement, then check that no temporaries leaked.
    fn compile_statement(&mut self, id: NodeId) -> Result<(), CompileError> {
        self.compile_stmt(id)?;
        self.tracker.release_holds();
        if self.inline_stack.is_empty() {
            let leftover = self.tracker.live_temps();
            if !leftover.is_empty() {
                if self.config.verify_allocator {
                    return Err(CompileError::Allocator(format!(
                        "temporaries {} outlived the statement on line {}",
                        leftover.join(", "),
                        self.ast.line(id)
                    )));
                }
                self.tracker.discard_temps()?;
            }
        }
        if self.config.verify_allocator {
            self.tracker.check_consistency()?;
        }
        Ok(())
    }

    // ── Emission helpers ────────────────────────────────────────────────

    fn emit(&mut self, instr: Instr) {
        self.out.push(instr);
    }

    /// `rd = value`, in one `addi` when it fits, otherwise as a high half
    /// shifted into place plus a sign-corrected low half.
    fn load_literal(&mut self, rd: Reg, value: i32) {
        if i16::try_from(value).is_ok() {
            self.emit(Instr::load_imm(rd, value));
            return;
        }
        let mut high = value >> 16;
        let mut low = value & 0xffff;
        if low > i16::MAX as i32 {
            low -= 0x10000;
            high += 1;
        }
        self.emit(Instr::load_imm(rd, high));
        self.emit(Instr::Sll {
            rd,
            rs: rd,
            shamt: 16,
        });
        if low != 0 {
            self.emit(Instr::Addi { rd, rs: rd, imm: low });
        }
    }

    /// A fresh temporary and its register.
    fn new_temp(&mut self, kind: NumKind, refs: u8) -> Result<(String, Reg), CompileError> {
        let name = self.tracker.add_temp_variable(&mut self.out)?;
        let reg = self.tracker.get_register(&name, false, &mut self.out)?;
        self.tracker.set_type(&name, kind)?;
        self.tracker.set_type_refs(&name, refs)?;
        Ok((name, reg))
    }

    /// Register holding the current value of `name`.
    fn fetch(&mut self, name: &str) -> Result<Reg, CompileError> {
        self.tracker.get_register(name, true, &mut self.out)
    }

    fn free(&mut self, name: &str) -> Result<(), CompileError> {
        self.tracker.remove_if_temp(name)
    }

    fn sync(&mut self) -> Result<(), CompileError> {
        self.tracker.sync(&mut self.out)
    }

    /// Place a merge-point label. Callers have already synced any path
    /// jumping here; the fallthrough path is synced now.
    fn place_label(&mut self, label: &str) -> Result<(), CompileError> {
        self.sync()?;
        self.out.place_label(label);
        Ok(())
    }

    fn jump(&mut self, label: &str) -> Result<(), CompileError> {
        self.sync()?;
        self.emit(Instr::jump(label));
        Ok(())
    }

    /// Liveness hint: the identifier at `id` is not read again.
    fn hint_last_use(&mut self, id: NodeId) {
        let node = self.ast.node(id);
        if let (NodeKind::Ident(name), crate::ir::Liveness::LastUse) = (&node.kind, node.track) {
            self.tracker.demote(name);
        }
    }

    fn kind_of(&self, name: &str) -> Result<NumKind, CompileError> {
        self.tracker.get_type(name)
    }

    fn semantic(&self, kind: SemanticErrorKind, id: NodeId, message: impl Into<String>) -> CompileError {
        CompileError::semantic(kind, self.ast.line(id), message)
    }
}

/// Numeric kind of a declared type. For pointers this is the kind of the
/// value pointed at.
fn kind_of_type(ty: TypeSpec) -> NumKind {
    if ty.base.is_fixed() {
        NumKind::Fixed
    } else {
        NumKind::Int
    }
}
