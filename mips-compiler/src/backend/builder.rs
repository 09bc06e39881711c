//! Instruction accumulation.
//!
//! The code generator appends [`Entry`]s to a [`Builder`]; a label is bound
//! to at most one entry. [`Builder::finish`] runs the peephole passes and
//! the linker and yields an immutable [`Program`].

use super::instruction::Instr;
use super::link::{self, LinkError};
use super::optimize;
use std::fmt::Write as _;

/// An instruction together with the label bound to it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub instr: Instr,
    pub label: Option<String>,
}

impl Entry {
    pub fn new(instr: Instr) -> Self {
        Self { instr, label: None }
    }

    pub fn labeled(label: impl Into<String>, instr: Instr) -> Self {
        Self {
            instr,
            label: Some(label.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct Builder {
    entries: Vec<Entry>,
    next_label: usize,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instruction, returning its index for later patching.
    pub fn push(&mut self, instr: Instr) -> usize {
        self.entries.push(Entry::new(instr));
        self.entries.len() - 1
    }

    pub fn push_labeled(&mut self, label: impl Into<String>, instr: Instr) -> usize {
        self.entries.push(Entry::labeled(label, instr));
        self.entries.len() - 1
    }

    /// Bind `label` to a no-op anchor at the current position.
    pub fn place_label(&mut self, label: impl Into<String>) {
        self.push_labeled(label, Instr::noop());
    }

    /// A fresh label. Generated names start with `.` so they never collide
    /// with function names.
    pub fn gen_label(&mut self) -> String {
        let label = format!(".L{}", self.next_label);
        self.next_label += 1;
        label
    }

    /// Replace the instruction at `index`, keeping its label.
    pub fn patch(&mut self, index: usize, instr: Instr) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.instr = instr;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Optionally run the peephole passes, then link.
    pub fn finish(self, optimize: bool) -> Result<Program, LinkError> {
        let mut entries = self.entries;
        log::debug!("generated {} instructions", entries.len());
        if optimize {
            optimize::optimize(&mut entries);
            log::debug!("{} instructions after peephole", entries.len());
        }
        link::link(entries)
    }
}

// ============================================================================
// Linked program
// ============================================================================

/// A linked instruction sequence. Every target is resolved and an
/// instruction's address is its index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    entries: Vec<Entry>,
}

impl Program {
    pub(crate) fn from_linked(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instr> {
        self.entries.iter().map(|e| &e.instr)
    }

    pub fn get(&self, address: usize) -> Option<&Instr> {
        self.entries.get(address).map(|e| &e.instr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn address_of(&self, label: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.label.as_deref() == Some(label))
    }

    /// Human-readable assembly listing.
    pub fn to_asm_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            if let Some(label) = &entry.label {
                let _ = writeln!(out, "{label}:");
            }
            let _ = writeln!(out, "  {}", entry.instr);
        }
        out
    }
}
