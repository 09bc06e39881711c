//! Register and storage tracking.
//!
//! The tracker is the only component that decides where values live. Every
//! named variable gets a memory *home* when it is introduced: a global slot
//! at top level, a frame slot inside a function. Its current storage is a
//! register, its home, or a call save slot. Temporaries get a home only when
//! register pressure forces one out; named variables are evicted first.
//!
//! Code that moves values between registers and memory (writeback, reload,
//! relocation, call save and restore) is emitted into the [`Builder`]
//! passed to each operation.
//!
//! Control-flow merges are handled with [`Tracker::sync`]: before any jump
//! or branch to a merge label, and before placing one, dirty variables are
//! written home and every named binding is dropped. Live temporaries are
//! brought into registers and pinned there until they die, so all paths
//! meet in the same state.

mod lru;

pub use lru::LruOrder;

use super::abi::Reg;
use super::builder::Builder;
use super::instruction::Instr;
use crate::CompileError;
use std::collections::{HashMap, HashSet, VecDeque};

/// Where a top-level variable ended up, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Location {
    Register(Reg),
    Memory(usize),
}

/// Numeric interpretation of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumKind {
    Int,
    /// 16.16 fixed-point.
    Fixed,
}

/// An address the generator can materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAddr {
    /// Absolute data-memory address.
    Absolute(i32),
    /// Offset from the current stack pointer.
    StackRelative(i32),
}

impl MemAddr {
    pub fn base(self) -> (Reg, i32) {
        match self {
            MemAddr::Absolute(a) => (Reg::ZERO, a),
            MemAddr::StackRelative(o) => (Reg::SP, o),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Home {
    Global(i32),
    /// Slot index within the current function frame.
    Frame(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    Register(Reg),
    Global(i32),
    Stack(i32),
    /// Offset in a call save area, or an absolute scratch address at top
    /// level.
    SavedDuringCall(i32),
}

impl Storage {
    fn from_home(home: Home) -> Self {
        match home {
            Home::Global(a) => Storage::Global(a),
            Home::Frame(k) => Storage::Stack(k),
        }
    }
}

type VarId = usize;

#[derive(Debug, Clone)]
struct Var {
    name: String,
    temp: bool,
    level: usize,
    home: Option<Home>,
    /// Arrays are addresses: their value is rematerialized, never stored.
    array: Option<Home>,
    dims: Vec<usize>,
    storage: Storage,
    dirty: bool,
    kind: NumKind,
    refs: u8,
    must_reload: bool,
    /// Live across a merge point: the temporary keeps its register.
    pinned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelKind {
    Root,
    Function,
    Block,
    /// An inline expansion. Like a function, it hides the caller's locals.
    Inline,
}

#[derive(Debug)]
struct Level {
    kind: LevelKind,
    names: HashMap<String, VarId>,
    aliases: HashMap<String, VarId>,
}

impl Level {
    fn new(kind: LevelKind) -> Self {
        Self {
            kind,
            names: HashMap::new(),
            aliases: HashMap::new(),
        }
    }
}

/// One pending call: what was saved and how to undo it.
#[derive(Debug)]
struct CallSave {
    saved: Vec<(VarId, Reg, i32)>,
    /// Words pushed for the save area; zero at top level.
    words: i32,
}

/// Register state outside a function body, restored when it ends.
#[derive(Debug)]
struct Snapshot {
    bindings: Vec<(VarId, Reg, bool)>,
    free: VecDeque<Reg>,
    lru: LruOrder<VarId>,
    dynamic: i32,
}

#[derive(Debug)]
pub struct Tracker {
    vars: Vec<Option<Var>>,
    levels: Vec<Level>,
    temps: HashMap<String, VarId>,
    next_temp: usize,

    owner: [Option<VarId>; Reg::COUNT],
    free: VecDeque<Reg>,
    lru: LruOrder<VarId>,
    /// Registers in use by the instruction being assembled.
    held: HashSet<Reg>,
    /// Pool registers taken out of circulation by `reserve_register`.
    reserved: HashSet<Reg>,

    next_global: i32,
    /// Frame slots allocated in the current function.
    frame_slots: Option<i32>,
    /// Words pushed below the frame (call save areas, extra arguments).
    dynamic: i32,
    call_saves: Vec<CallSave>,
    snapshot: Option<Snapshot>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

fn invariant(message: impl Into<String>) -> CompileError {
    CompileError::Allocator(message.into())
}

impl Tracker {
    pub fn new() -> Self {
        Self {
            vars: Vec::new(),
            levels: vec![Level::new(LevelKind::Root)],
            temps: HashMap::new(),
            next_temp: 0,
            owner: [None; Reg::COUNT],
            free: Reg::pool().collect(),
            lru: LruOrder::new(),
            held: HashSet::new(),
            reserved: HashSet::new(),
            next_global: 0,
            frame_slots: None,
            dynamic: 0,
            call_saves: Vec::new(),
            snapshot: None,
        }
    }

    pub fn in_function(&self) -> bool {
        self.frame_slots.is_some()
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Resolve `name` from the innermost level outward. Function and inline
    /// levels hide everything between them and the root.
    fn lookup(&self, name: &str) -> Option<VarId> {
        if let Some(&id) = self.temps.get(name) {
            return Some(id);
        }
        for level in self.levels.iter().rev() {
            if let Some(&id) = level.aliases.get(name).or_else(|| level.names.get(name)) {
                return Some(id);
            }
            if matches!(level.kind, LevelKind::Function | LevelKind::Inline) {
                let root = &self.levels[0];
                return root
                    .aliases
                    .get(name)
                    .or_else(|| root.names.get(name))
                    .copied();
            }
        }
        None
    }

    fn resolve(&self, name: &str) -> Result<VarId, CompileError> {
        self.lookup(name)
            .ok_or_else(|| invariant(format!("{name} has no storage location")))
    }

    fn var(&self, id: VarId) -> Result<&Var, CompileError> {
        self.vars
            .get(id)
            .and_then(Option::as_ref)
            .ok_or_else(|| invariant(format!("stale variable handle {id}")))
    }

    fn var_mut(&mut self, id: VarId) -> Result<&mut Var, CompileError> {
        self.vars
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| invariant(format!("stale variable handle {id}")))
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn is_temp(&self, name: &str) -> bool {
        self.temps.contains_key(name)
    }

    pub fn is_array(&self, name: &str) -> bool {
        self.lookup(name)
            .and_then(|id| self.var(id).ok())
            .is_some_and(|v| v.array.is_some())
    }

    /// Final location of a top-level variable. Memory is authoritative for
    /// must-reload variables, since a pointer may have written it.
    pub fn location(&self, name: &str) -> Option<Location> {
        let id = *self.levels[0].names.get(name)?;
        let var = self.var(id).ok()?;
        match var.storage {
            Storage::Register(r) if var.array.is_none() && !var.must_reload => {
                Some(Location::Register(r))
            }
            _ => match var.array.or(var.home)? {
                Home::Global(a) => usize::try_from(a).ok().map(Location::Memory),
                Home::Frame(_) => None,
            },
        }
    }

    /// Names declared at top level.
    pub fn root_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.levels[0].names.keys().cloned().collect();
        names.sort();
        names
    }

    // ========================================================================
    // Register pool
    // ========================================================================

    /// Pin `reg` until [`Tracker::release_holds`].
    pub fn hold(&mut self, reg: Reg) {
        self.held.insert(reg);
    }

    pub fn release_holds(&mut self) {
        self.held.clear();
    }

    fn release_reg(&mut self, reg: Reg) {
        self.owner[reg.index()] = None;
        if reg.is_pool() && !self.reserved.contains(&reg) && !self.free.contains(&reg) {
            self.free.push_back(reg);
        }
    }

    /// Take the least recently freed register, evicting if none is free.
    /// Named variables are evicted before temporaries.
    fn alloc_reg(&mut self, out: &mut Builder) -> Result<Reg, CompileError> {
        if let Some(pos) = self.free.iter().position(|r| !self.held.contains(r)) {
            if let Some(reg) = self.free.remove(pos) {
                return Ok(reg);
            }
        }
        let victim = self
            .find_victim(|v| !v.temp)
            .or_else(|| self.find_victim(|v| v.temp && !v.pinned))
            .ok_or_else(|| invariant("out of registers: every register is held or pinned"))?;
        self.evict(victim, out)
    }

    /// Least recently used variable in an unheld pool register that
    /// satisfies `eligible`.
    fn find_victim(&self, eligible: impl Fn(&Var) -> bool) -> Option<VarId> {
        self.lru.iter().copied().find(|&id| {
            self.var(id).is_ok_and(|v| {
                eligible(v)
                    && matches!(v.storage, Storage::Register(r)
                        if r.is_pool() && !self.held.contains(&r))
            })
        })
    }

    fn bind(&mut self, id: VarId, reg: Reg) -> Result<(), CompileError> {
        self.owner[reg.index()] = Some(id);
        self.var_mut(id)?.storage = Storage::Register(reg);
        self.lru.touch(id);
        self.held.insert(reg);
        Ok(())
    }

    /// Unbind `id` from its register without writing it back. The register
    /// is returned to the pool.
    fn unbind(&mut self, id: VarId) -> Result<Option<Reg>, CompileError> {
        let var = self.var(id)?;
        let Storage::Register(reg) = var.storage else {
            return Ok(None);
        };
        let home = var.array.or(var.home);
        self.lru.remove(&id);
        self.release_reg(reg);
        let var = self.var_mut(id)?;
        var.dirty = false;
        if let Some(home) = home {
            var.storage = Storage::from_home(home);
        }
        Ok(Some(reg))
    }

    fn home_operand(&self, home: Home) -> Result<(Reg, i32), CompileError> {
        match home {
            Home::Global(a) => Ok((Reg::ZERO, a)),
            Home::Frame(k) if self.in_function() => Ok((Reg::SP, self.dynamic + k)),
            Home::Frame(_) => Err(invariant("frame slot referenced outside a function")),
        }
    }

    fn write_back(&mut self, id: VarId, reg: Reg, out: &mut Builder) -> Result<(), CompileError> {
        let var = self.var(id)?;
        let home = var
            .home
            .ok_or_else(|| invariant(format!("spilling {} which has no known location", var.name)))?;
        let (base, offset) = self.home_operand(home)?;
        log::trace!("write back {} from {reg}", var.name);
        out.push(Instr::Sw {
            rd: reg,
            rs: base,
            imm: offset,
        });
        self.var_mut(id)?.dirty = false;
        Ok(())
    }

    /// Free the register held by `id`, writing it home first if dirty. A
    /// temporary is given a home on its first spill and always written.
    fn evict(&mut self, id: VarId, out: &mut Builder) -> Result<Reg, CompileError> {
        let var = self.var(id)?;
        let Storage::Register(reg) = var.storage else {
            return Err(invariant(format!("spilling {} which is not in a register", var.name)));
        };
        if var.pinned {
            return Err(invariant(format!("temporary {} is pinned to {reg}", var.name)));
        }
        let (temp, dirty, home, array) = (var.temp, var.dirty, var.home, var.array);
        if temp {
            if home.is_none() {
                let slot = self.alloc_home(1);
                self.var_mut(id)?.home = Some(slot);
            }
            self.write_back(id, reg, out)?;
        } else if array.is_none() && home.is_none() {
            return Err(invariant(format!("spilling {} which has no known location", var.name)));
        } else if dirty {
            self.write_back(id, reg, out)?;
        }
        log::trace!("evict {} from {reg}", self.var(id)?.name);
        self.unbind(id)?;
        self.free.retain(|&r| r != reg);
        Ok(reg)
    }

    /// Load `id`'s current value into `reg`.
    fn load_into(&mut self, id: VarId, reg: Reg, out: &mut Builder) -> Result<(), CompileError> {
        let var = self.var(id)?;
        match (var.array, var.storage) {
            (Some(home), _) => {
                let (base, offset) = self.home_operand(home)?;
                out.push(Instr::Addi {
                    rd: reg,
                    rs: base,
                    imm: offset,
                });
            }
            (None, Storage::Global(a)) => {
                out.push(Instr::Lw {
                    rd: reg,
                    rs: Reg::ZERO,
                    imm: a,
                });
            }
            (None, Storage::Stack(k)) => {
                let (base, offset) = self.home_operand(Home::Frame(k))?;
                out.push(Instr::Lw {
                    rd: reg,
                    rs: base,
                    imm: offset,
                });
            }
            (None, Storage::Register(_)) => {
                let home = var
                    .home
                    .ok_or_else(|| invariant(format!("reloading {} which has no home", var.name)))?;
                let (base, offset) = self.home_operand(home)?;
                out.push(Instr::Lw {
                    rd: reg,
                    rs: base,
                    imm: offset,
                });
            }
            (None, Storage::SavedDuringCall(_)) => {
                return Err(invariant(format!("{} is parked for a call", var.name)))
            }
        }
        log::trace!("reload {} into {reg}", self.var(id)?.name);
        Ok(())
    }

    // ========================================================================
    // Homes
    // ========================================================================

    fn alloc_home(&mut self, words: i32) -> Home {
        match self.frame_slots.as_mut() {
            Some(slots) => {
                let k = *slots;
                *slots += words;
                Home::Frame(k)
            }
            None => {
                let a = self.next_global;
                self.next_global += words;
                Home::Global(a)
            }
        }
    }

    /// A fresh global word, used for top-level call spills.
    fn alloc_global(&mut self) -> i32 {
        let a = self.next_global;
        self.next_global += 1;
        a
    }

    /// Words of global memory handed out so far.
    pub fn globals_used(&self) -> i32 {
        self.next_global
    }

    fn current_level(&self) -> usize {
        self.levels.len() - 1
    }

    fn insert_var(&mut self, var: Var) -> VarId {
        self.vars.push(Some(var));
        self.vars.len() - 1
    }

    fn check_unbound(&self, name: &str) -> Result<(), CompileError> {
        if self.levels[self.current_level()].names.contains_key(name) {
            return Err(invariant(format!("{name} is already bound in this scope")));
        }
        Ok(())
    }

    // ========================================================================
    // Variables
    // ========================================================================

    /// Bind a new variable in the current level to `reg`, or to a register
    /// from the pool. The caller writes its value next, so it starts dirty.
    pub fn add_variable(
        &mut self,
        name: &str,
        reg: Option<Reg>,
        out: &mut Builder,
    ) -> Result<Reg, CompileError> {
        self.check_unbound(name)?;
        let reg = match reg {
            Some(r) => {
                if self.owner[r.index()].is_some() {
                    return Err(invariant(format!("{r} is already in use")));
                }
                self.free.retain(|&f| f != r);
                r
            }
            None => self.alloc_reg(out)?,
        };
        let home = self.alloc_home(1);
        let level = self.current_level();
        let id = self.insert_var(Var {
            name: name.to_string(),
            temp: false,
            level,
            home: Some(home),
            array: None,
            dims: Vec::new(),
            storage: Storage::Register(reg),
            dirty: true,
            kind: NumKind::Int,
            refs: 0,
            must_reload: false,
            pinned: false,
        });
        self.levels[level].names.insert(name.to_string(), id);
        self.bind(id, reg)?;
        Ok(reg)
    }

    /// Declare a variable that starts in its home with no register.
    pub fn declare_variable(&mut self, name: &str) -> Result<(), CompileError> {
        self.check_unbound(name)?;
        let home = self.alloc_home(1);
        let level = self.current_level();
        let id = self.insert_var(Var {
            name: name.to_string(),
            temp: false,
            level,
            home: Some(home),
            array: None,
            dims: Vec::new(),
            storage: Storage::from_home(home),
            dirty: false,
            kind: NumKind::Int,
            refs: 0,
            must_reload: false,
            pinned: false,
        });
        self.levels[level].names.insert(name.to_string(), id);
        Ok(())
    }

    /// A fresh unnamed temporary holding a register.
    pub fn add_temp_variable(&mut self, out: &mut Builder) -> Result<String, CompileError> {
        let reg = self.alloc_reg(out)?;
        let name = format!("%t{}", self.next_temp);
        self.next_temp += 1;
        let level = self.current_level();
        let id = self.insert_var(Var {
            name: name.clone(),
            temp: true,
            level,
            home: None,
            array: None,
            dims: Vec::new(),
            storage: Storage::Register(reg),
            dirty: false,
            kind: NumKind::Int,
            refs: 0,
            must_reload: false,
            pinned: false,
        });
        self.temps.insert(name.clone(), id);
        self.bind(id, reg)?;
        Ok(name)
    }

    /// Turn a temporary into the named variable `name` in the current
    /// level. A temporary in a register keeps it; a spilled one keeps its
    /// spill slot as the new variable's home.
    pub fn rename_temp(&mut self, temp: &str, name: &str) -> Result<(), CompileError> {
        self.check_unbound(name)?;
        let id = *self
            .temps
            .get(temp)
            .ok_or_else(|| invariant(format!("{temp} is not a temporary")))?;
        let storage = self.var(id)?.storage;
        let (home, dirty) = match (storage, self.var(id)?.home) {
            (Storage::Register(_), _) => (self.alloc_home(1), true),
            (Storage::Global(_) | Storage::Stack(_), Some(home)) => (home, false),
            _ => return Err(invariant(format!("{temp} has no usable location"))),
        };
        self.temps.remove(temp);
        let level = self.current_level();
        let var = self.var_mut(id)?;
        var.name = name.to_string();
        var.temp = false;
        var.pinned = false;
        var.level = level;
        var.home = Some(home);
        var.dirty = dirty;
        self.levels[level].names.insert(name.to_string(), id);
        if matches!(storage, Storage::Register(_)) {
            self.lru.touch(id);
        }
        Ok(())
    }

    /// Convert the named variable `name` into a temporary owned by the
    /// enclosing level, so it survives [`Tracker::pop_block`].
    pub fn detach_as_temp(&mut self, name: &str, out: &mut Builder) -> Result<String, CompileError> {
        let reg = self.get_register(name, true, out)?;
        let id = self.resolve(name)?;
        let level = self.var(id)?.level;
        self.levels[level].names.remove(name);
        let temp = format!("%t{}", self.next_temp);
        self.next_temp += 1;
        let parent = level.saturating_sub(1);
        let var = self.var_mut(id)?;
        var.name = temp.clone();
        var.temp = true;
        var.level = parent;
        var.home = None;
        var.dirty = false;
        var.must_reload = false;
        self.temps.insert(temp.clone(), id);
        self.hold(reg);
        Ok(temp)
    }

    /// The register holding `name`, loading it first if it lives in memory.
    /// With `modify` set, a must-reload variable is reloaded even when it is
    /// already in a register.
    pub fn get_register(
        &mut self,
        name: &str,
        modify: bool,
        out: &mut Builder,
    ) -> Result<Reg, CompileError> {
        let id = self.resolve(name)?;
        let var = self.var(id)?;
        if let Storage::Register(reg) = var.storage {
            if modify && var.must_reload && !var.dirty {
                self.load_into(id, reg, out)?;
            }
            self.lru.touch(id);
            self.held.insert(reg);
            return Ok(reg);
        }
        let reg = self.alloc_reg(out)?;
        self.load_into(id, reg, out)?;
        self.bind(id, reg)?;
        self.var_mut(id)?.dirty = false;
        Ok(reg)
    }

    /// A register for overwriting `name` without loading its old value.
    /// The variable is marked dirty.
    pub fn prepare_write(&mut self, name: &str, out: &mut Builder) -> Result<Reg, CompileError> {
        let id = self.resolve(name)?;
        let var = self.var(id)?;
        if var.array.is_some() {
            return Err(invariant(format!("array {name} cannot be assigned")));
        }
        let storage = var.storage;
        let reg = match storage {
            Storage::Register(reg) => {
                self.lru.touch(id);
                self.held.insert(reg);
                reg
            }
            _ => {
                let reg = self.alloc_reg(out)?;
                self.bind(id, reg)?;
                reg
            }
        };
        self.var_mut(id)?.dirty = true;
        Ok(reg)
    }

    /// Record that `name`'s register was just written. Must-reload
    /// variables are written through to memory immediately.
    pub fn mark_written(&mut self, name: &str, out: &mut Builder) -> Result<(), CompileError> {
        let id = self.resolve(name)?;
        let var = self.var_mut(id)?;
        if var.temp {
            return Ok(());
        }
        var.dirty = true;
        if let (true, Storage::Register(reg)) = (var.must_reload, var.storage) {
            self.write_back(id, reg, out)?;
        }
        Ok(())
    }

    pub fn remove_variable(&mut self, name: &str) -> Result<(), CompileError> {
        let id = self.resolve(name)?;
        self.drop_var(id)
    }

    /// Release `name` if it is a temporary; no-op for named variables.
    pub fn remove_if_temp(&mut self, name: &str) -> Result<(), CompileError> {
        match self.temps.get(name) {
            Some(&id) => self.drop_var(id),
            None => Ok(()),
        }
    }

    fn drop_var(&mut self, id: VarId) -> Result<(), CompileError> {
        self.unbind(id)?;
        let var = self.var(id)?;
        let (name, level, temp) = (var.name.clone(), var.level, var.temp);
        if temp {
            self.temps.remove(&name);
        } else if let Some(l) = self.levels.get_mut(level) {
            if l.names.get(&name) == Some(&id) {
                l.names.remove(&name);
            }
        }
        self.lru.remove(&id);
        self.vars[id] = None;
        Ok(())
    }

    /// Temporaries still alive.
    pub fn live_temps(&self) -> Vec<String> {
        let mut names: Vec<String> = self.temps.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every temporary, returning how many there were.
    pub fn discard_temps(&mut self) -> Result<usize, CompileError> {
        let ids: Vec<VarId> = self.temps.values().copied().collect();
        for &id in &ids {
            self.drop_var(id)?;
        }
        Ok(ids.len())
    }

    /// Make `reg` free by moving its occupant elsewhere (emitting a move),
    /// and keep it out of the pool until [`Tracker::unreserve_all`].
    pub fn reserve_register(&mut self, reg: Reg, out: &mut Builder) -> Result<(), CompileError> {
        if let Some(id) = self.owner[reg.index()] {
            self.held.insert(reg);
            let target = self.alloc_reg(out)?;
            log::trace!("relocate {} from {reg} to {target}", self.var(id)?.name);
            out.push(Instr::mov(target, reg));
            self.owner[reg.index()] = None;
            self.bind(id, target)?;
        }
        self.free.retain(|&r| r != reg);
        if reg.is_pool() {
            self.reserved.insert(reg);
        }
        Ok(())
    }

    pub fn unreserve_all(&mut self) {
        let regs: Vec<Reg> = self.reserved.drain().collect();
        for reg in regs {
            if self.owner[reg.index()].is_none() {
                self.release_reg(reg);
            }
        }
    }

    // ========================================================================
    // Arrays and addresses
    // ========================================================================

    /// Allocate `size` words for array `name`: in global memory at top
    /// level, in the frame inside a function.
    pub fn set_array(&mut self, name: &str, size: i32) -> Result<(), CompileError> {
        self.check_unbound(name)?;
        let home = self.alloc_home(size.max(1));
        let level = self.current_level();
        let id = self.insert_var(Var {
            name: name.to_string(),
            temp: false,
            level,
            home: None,
            array: Some(home),
            dims: Vec::new(),
            storage: Storage::from_home(home),
            dirty: false,
            kind: NumKind::Int,
            refs: 1,
            must_reload: false,
            pinned: false,
        });
        self.levels[level].names.insert(name.to_string(), id);
        Ok(())
    }

    pub fn set_dims(&mut self, name: &str, dims: Vec<usize>) -> Result<(), CompileError> {
        let id = self.resolve(name)?;
        self.var_mut(id)?.dims = dims;
        Ok(())
    }

    /// Declared dimensions of an array; empty for scalars and pointers.
    pub fn dims(&self, name: &str) -> Result<&[usize], CompileError> {
        Ok(&self.var(self.resolve(name)?)?.dims)
    }

    /// Current address of an array's first element.
    pub fn array_address(&self, name: &str) -> Result<MemAddr, CompileError> {
        let id = self.resolve(name)?;
        match self.var(id)?.array {
            Some(home) => self.mem_addr(home),
            None => Err(invariant(format!("{name} is not an array"))),
        }
    }

    fn mem_addr(&self, home: Home) -> Result<MemAddr, CompileError> {
        let (base, offset) = self.home_operand(home)?;
        Ok(if base == Reg::ZERO {
            MemAddr::Absolute(offset)
        } else {
            MemAddr::StackRelative(offset)
        })
    }

    /// Address of `name`'s home. The variable is written back and from now
    /// on reloaded on every read, since a pointer may change it.
    pub fn get_mem_addr(&mut self, name: &str, out: &mut Builder) -> Result<MemAddr, CompileError> {
        let id = self.resolve(name)?;
        let var = self.var(id)?;
        if let Some(home) = var.array {
            return self.mem_addr(home);
        }
        let home = var
            .home
            .ok_or_else(|| invariant(format!("{name} has no address")))?;
        if let (Storage::Register(reg), true) = (var.storage, var.dirty) {
            self.write_back(id, reg, out)?;
        }
        self.var_mut(id)?.must_reload = true;
        self.mem_addr(home)
    }

    pub fn set_must_reload(&mut self, name: &str) -> Result<(), CompileError> {
        let id = self.resolve(name)?;
        self.var_mut(id)?.must_reload = true;
        Ok(())
    }

    // ========================================================================
    // Kinds and aliases
    // ========================================================================

    pub fn set_type(&mut self, name: &str, kind: NumKind) -> Result<(), CompileError> {
        let id = self.resolve(name)?;
        self.var_mut(id)?.kind = kind;
        Ok(())
    }

    pub fn get_type(&self, name: &str) -> Result<NumKind, CompileError> {
        Ok(self.var(self.resolve(name)?)?.kind)
    }

    pub fn set_type_refs(&mut self, name: &str, refs: u8) -> Result<(), CompileError> {
        let id = self.resolve(name)?;
        self.var_mut(id)?.refs = refs;
        Ok(())
    }

    pub fn get_type_refs(&self, name: &str) -> Result<u8, CompileError> {
        Ok(self.var(self.resolve(name)?)?.refs)
    }

    /// Make `name` resolve to `target`'s storage within the current level.
    pub fn set_alias(&mut self, name: &str, target: &str) -> Result<(), CompileError> {
        let id = self.resolve(target)?;
        let level = self.current_level();
        self.levels[level].aliases.insert(name.to_string(), id);
        Ok(())
    }

    pub fn remove_alias(&mut self, name: &str) {
        let level = self.current_level();
        self.levels[level].aliases.remove(name);
    }

    /// Consider `name` first for eviction.
    pub fn demote(&mut self, name: &str) {
        if let Some(id) = self.lookup(name) {
            self.lru.demote(&id);
        }
    }

    // ========================================================================
    // Control flow
    // ========================================================================

    /// Write back every dirty variable and drop every named binding. Live
    /// temporaries are reloaded if spilled and pinned to their registers.
    pub fn sync(&mut self, out: &mut Builder) -> Result<(), CompileError> {
        for index in 0..Reg::COUNT {
            let Some(id) = self.owner[index] else {
                continue;
            };
            let var = self.var(id)?;
            if var.temp {
                continue;
            }
            if var.dirty {
                let reg = Reg::new(index as u8)
                    .ok_or_else(|| invariant(format!("bad register index {index}")))?;
                self.write_back(id, reg, out)?;
            }
            self.unbind(id)?;
        }

        let mut temps: Vec<VarId> = self.temps.values().copied().collect();
        temps.sort_unstable();
        for &id in &temps {
            let var = self.var_mut(id)?;
            if matches!(var.storage, Storage::Register(_)) {
                var.pinned = true;
            }
        }
        for id in temps {
            if matches!(self.var(id)?.storage, Storage::Global(_) | Storage::Stack(_)) {
                let reg = self.alloc_reg(out)?;
                self.load_into(id, reg, out)?;
                self.bind(id, reg)?;
                log::trace!("pin spilled {} to {reg}", self.var(id)?.name);
                self.var_mut(id)?.pinned = true;
            }
        }
        Ok(())
    }

    pub fn push_block(&mut self, kind: LevelKind) {
        self.levels.push(Level::new(kind));
    }

    /// Leave a block: its variables are discarded without writeback.
    pub fn pop_block(&mut self) -> Result<(), CompileError> {
        if self.levels.len() <= 1 {
            return Err(invariant("popped the root level"));
        }
        let level = self.current_level();
        let ids: Vec<VarId> = self.levels[level].names.values().copied().collect();
        for id in ids {
            self.drop_var(id)?;
        }
        self.levels.pop();
        Ok(())
    }

    /// Enter a function body. The surrounding bindings are snapshotted and
    /// hidden; the body starts with an empty register file and frame.
    pub fn inc_scope(&mut self) -> Result<(), CompileError> {
        if self.in_function() {
            return Err(invariant("nested function scope"));
        }
        let mut bindings = Vec::new();
        for index in 0..Reg::COUNT {
            if let Some(id) = self.owner[index] {
                let var = self.var(id)?;
                if var.temp {
                    return Err(invariant(format!(
                        "temporary {} is live at a function definition",
                        var.name
                    )));
                }
                if let Storage::Register(reg) = var.storage {
                    bindings.push((id, reg, var.dirty));
                }
            }
        }
        self.snapshot = Some(Snapshot {
            bindings: bindings.clone(),
            free: self.free.clone(),
            lru: self.lru.clone(),
            dynamic: self.dynamic,
        });
        for (id, _, _) in bindings {
            self.unbind(id)?;
        }
        self.free = Reg::pool().collect();
        self.lru.clear();
        self.dynamic = 0;
        self.frame_slots = Some(0);
        self.levels.push(Level::new(LevelKind::Function));
        Ok(())
    }

    /// Leave a function body, returning its frame size in words. Top-level
    /// variables still dirty in registers are written back first.
    pub fn dec_scope(&mut self, out: &mut Builder) -> Result<i32, CompileError> {
        for index in 0..Reg::COUNT {
            if let Some(id) = self.owner[index] {
                let var = self.var(id)?;
                if let (0, false, true, Storage::Register(reg)) =
                    (var.level, var.temp, var.dirty, var.storage)
                {
                    self.write_back(id, reg, out)?;
                }
            }
        }
        while self.levels.len() > 1 {
            let level = self.current_level();
            let ids: Vec<VarId> = self.levels[level].names.values().copied().collect();
            for id in ids {
                self.drop_var(id)?;
            }
            self.levels.pop();
        }
        for index in 0..Reg::COUNT {
            if let Some(id) = self.owner[index] {
                self.unbind(id)?;
            }
        }
        let temps: Vec<VarId> = self.temps.values().copied().collect();
        for id in temps {
            self.drop_var(id)?;
        }

        let size = self.frame_slots.take().unwrap_or(0);
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| invariant("function scope closed without being opened"))?;
        self.free = snapshot.free;
        self.lru = snapshot.lru;
        self.dynamic = snapshot.dynamic;
        for (id, reg, dirty) in snapshot.bindings {
            self.owner[reg.index()] = Some(id);
            let var = self.var_mut(id)?;
            var.storage = Storage::Register(reg);
            var.dirty = dirty;
        }
        self.held.clear();
        Ok(size)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Record `words` pushed onto the stack by generated code.
    pub fn push_words(&mut self, words: i32) {
        self.dynamic += words;
    }

    pub fn pop_words(&mut self, words: i32) {
        self.dynamic -= words;
    }

    /// Prepare for a call: named variables go home, and temporaries are
    /// saved (with the return address) in a stack save area, or in global
    /// scratch words at top level.
    pub fn store_current_registers_in_stack(&mut self, out: &mut Builder) -> Result<(), CompileError> {
        let mut temps = Vec::new();
        for index in 0..Reg::COUNT {
            let Some(id) = self.owner[index] else {
                continue;
            };
            let var = self.var(id)?;
            let Storage::Register(reg) = var.storage else {
                continue;
            };
            if var.temp {
                temps.push((id, reg));
            } else {
                if var.dirty {
                    self.write_back(id, reg, out)?;
                }
                self.unbind(id)?;
            }
        }

        let mut saved = Vec::new();
        let words = if self.in_function() {
            let words = temps.len() as i32 + 1;
            out.push(Instr::Addi {
                rd: Reg::SP,
                rs: Reg::SP,
                imm: -words,
            });
            self.dynamic += words;
            out.push(Instr::Sw {
                rd: Reg::RA,
                rs: Reg::SP,
                imm: 0,
            });
            for (i, (id, reg)) in temps.into_iter().enumerate() {
                let slot = i as i32 + 1;
                out.push(Instr::Sw {
                    rd: reg,
                    rs: Reg::SP,
                    imm: slot,
                });
                saved.push((id, reg, slot));
            }
            words
        } else {
            for (id, reg) in temps {
                let address = self.alloc_global();
                out.push(Instr::Sw {
                    rd: reg,
                    rs: Reg::ZERO,
                    imm: address,
                });
                saved.push((id, reg, address));
            }
            0
        };

        for &(id, reg, slot) in &saved {
            self.owner[reg.index()] = None;
            self.lru.remove(&id);
            self.var_mut(id)?.storage = Storage::SavedDuringCall(slot);
        }
        log::trace!("saved {} temporaries for a call", saved.len());
        self.call_saves.push(CallSave { saved, words });
        Ok(())
    }

    /// Undo the matching [`Tracker::store_current_registers_in_stack`].
    /// Temporaries come back in the registers they left.
    pub fn restore_registers_from_stack(&mut self, out: &mut Builder) -> Result<(), CompileError> {
        let save = self
            .call_saves
            .pop()
            .ok_or_else(|| invariant("restore without a matching save"))?;
        let base = if save.words > 0 { Reg::SP } else { Reg::ZERO };
        for (id, reg, slot) in save.saved {
            out.push(Instr::Lw {
                rd: reg,
                rs: base,
                imm: slot,
            });
            self.bind(id, reg)?;
        }
        if save.words > 0 {
            out.push(Instr::Lw {
                rd: Reg::RA,
                rs: Reg::SP,
                imm: 0,
            });
            out.push(Instr::Addi {
                rd: Reg::SP,
                rs: Reg::SP,
                imm: save.words,
            });
            self.dynamic -= save.words;
        }
        Ok(())
    }

    // ========================================================================
    // Consistency
    // ========================================================================

    /// Check that the register map, the variable table and the free pool
    /// agree.
    pub fn check_consistency(&self) -> Result<(), CompileError> {
        for (index, owner) in self.owner.iter().enumerate() {
            if let Some(id) = *owner {
                let var = self.var(id)?;
                if var.storage != Storage::Register(Reg::new(index as u8).unwrap_or(Reg::ZERO)) {
                    return Err(invariant(format!("${index} claims {} which lives elsewhere", var.name)));
                }
            }
        }
        let mut seen = HashSet::new();
        for (id, var) in self.vars.iter().enumerate() {
            let Some(var) = var else { continue };
            if let Storage::Register(reg) = var.storage {
                if self.owner[reg.index()] != Some(id) {
                    return Err(invariant(format!("{} thinks it holds {reg}", var.name)));
                }
                if !seen.insert(reg) {
                    return Err(invariant(format!("{reg} is claimed twice")));
                }
            }
        }
        for reg in &self.free {
            if self.owner[reg.index()].is_some() {
                return Err(invariant(format!("{reg} is both free and owned")));
            }
        }
        for var in self.vars.iter().flatten() {
            if var.pinned && matches!(var.storage, Storage::Global(_) | Storage::Stack(_)) {
                return Err(invariant(format!("pinned temporary {} was spilled", var.name)));
            }
        }
        Ok(())
    }

    /// Current register of every bound name, for diagnostics.
    pub fn bindings(&self) -> Vec<(String, Reg)> {
        self.owner
            .iter()
            .enumerate()
            .filter_map(|(index, owner)| {
                let var = self.var((*owner)?).ok()?;
                Some((var.name.clone(), Reg::new(index as u8)?))
            })
            .collect()
    }
}
