//! Declaration environments.
//!
//! Scopes form a tree stored in an arena; each frame refers to its parent
//! by index. Besides declarations, each frame remembers the most recent
//! occurrence of every name declared in it, which drives the per-node
//! [`Liveness`] hint.

use super::ast::{Ast, Liveness, NodeId, TypeSpec};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSig {
    pub ret: TypeSpec,
    pub params: Vec<TypeSpec>,
    /// Whether a body has been seen (as opposed to a header only).
    pub defined: bool,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decl {
    Variable(TypeSpec),
    Array { ty: TypeSpec, dims: Vec<usize> },
    Function(FunctionSig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub decl: Decl,
    /// Line of the declaration, for redefinition messages.
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(usize);

#[derive(Debug)]
struct Frame {
    parent: Option<ScopeId>,
    depth: usize,
    symbols: HashMap<String, Symbol>,
    last_use: HashMap<String, NodeId>,
}

#[derive(Debug)]
pub struct Scopes {
    frames: Vec<Frame>,
    current: ScopeId,
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}

impl Scopes {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame {
                parent: None,
                depth: 0,
                symbols: HashMap::new(),
                last_use: HashMap::new(),
            }],
            current: ScopeId(0),
        }
    }

    pub fn current(&self) -> ScopeId {
        self.current
    }

    /// Nesting depth of the current frame; the root is 0.
    pub fn depth(&self) -> usize {
        self.frames[self.current.0].depth
    }

    pub fn is_base(&self) -> bool {
        self.depth() == 0
    }

    /// Open a child of the current frame and make it current.
    pub fn enter(&mut self) -> ScopeId {
        let id = ScopeId(self.frames.len());
        self.frames.push(Frame {
            parent: Some(self.current),
            depth: self.depth() + 1,
            symbols: HashMap::new(),
            last_use: HashMap::new(),
        });
        self.current = id;
        id
    }

    /// Return to the parent frame.
    pub fn exit(&mut self) {
        if let Some(parent) = self.frames[self.current.0].parent {
            self.current = parent;
        }
    }

    /// Insert or overwrite `name` in the current frame, resetting its
    /// occurrence chain.
    pub fn add(&mut self, name: &str, symbol: Symbol) {
        let frame = &mut self.frames[self.current.0];
        frame.last_use.remove(name);
        frame.symbols.insert(name.to_string(), symbol);
    }

    /// Lookup restricted to the current frame.
    pub fn find_local(&self, name: &str) -> Option<&Symbol> {
        self.frames[self.current.0].symbols.get(name)
    }

    /// Walk outward from the current frame.
    pub fn find(&self, name: &str) -> Option<&Symbol> {
        self.declaring_frame(name)
            .and_then(|id| self.frames[id.0].symbols.get(name))
    }

    fn declaring_frame(&self, name: &str) -> Option<ScopeId> {
        let mut cursor = Some(self.current);
        while let Some(id) = cursor {
            let frame = &self.frames[id.0];
            if frame.symbols.contains_key(name) {
                return Some(id);
            }
            cursor = frame.parent;
        }
        None
    }

    /// Record `node` as the newest occurrence of `name`. The previous
    /// occurrence is marked [`Liveness::Live`].
    pub fn touch(&mut self, name: &str, node: NodeId, ast: &mut Ast) {
        let Some(id) = self.declaring_frame(name) else {
            return;
        };
        let frame = &mut self.frames[id.0];
        if let Some(previous) = frame.last_use.insert(name.to_string(), node) {
            ast.node_mut(previous).track = Liveness::Live;
        }
        ast.node_mut(node).track = Liveness::LastUse;
    }
}
