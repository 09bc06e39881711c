//! Peephole passes over the generated instruction list.
//!
//! Each pass implements the `AsmPass` trait and rewrites the entry list in
//! place. Passes are composed via the `PassManager` and run after code
//! generation, before linking. Running the whole pipeline a second time is
//! a no-op.

use super::builder::Entry;

// ============================================================================
// Pass infrastructure
// ============================================================================

/// A single optimization pass over the entry list.
pub trait AsmPass {
    fn name(&self) -> &'static str;
    fn run(&self, entries: &mut Vec<Entry>);
}

/// Runs a sequence of `AsmPass`es in order.
struct PassManager {
    passes: Vec<Box<dyn AsmPass>>,
}

impl PassManager {
    fn new() -> Self {
        Self { passes: Vec::new() }
    }

    fn add(&mut self, pass: Box<dyn AsmPass>) {
        self.passes.push(pass);
    }

    fn run_all(&self, entries: &mut Vec<Entry>) {
        for pass in &self.passes {
            let before = entries.len();
            pass.run(entries);
            log::trace!("{}: {} -> {} instructions", pass.name(), before, entries.len());
        }
    }
}

/// Point every reference to `from` at `to`. Returns whether anything changed.
fn retarget(entries: &mut [Entry], from: &str, to: &str) -> bool {
    let mut changed = false;
    for entry in entries.iter_mut() {
        if let Some(target) = entry.instr.target_mut() {
            if target.label == from {
                target.label = to.to_string();
                changed = true;
            }
        }
    }
    changed
}

// ============================================================================
// No-op elision
// ============================================================================

/// Drops `add $0, $0, $0` anchors, moving their labels forward.
struct NoopElision;

impl AsmPass for NoopElision {
    fn name(&self) -> &'static str {
        "noop-elision"
    }

    fn run(&self, entries: &mut Vec<Entry>) {
        let mut i = 0;
        while i < entries.len() {
            if !entries[i].instr.is_noop() {
                i += 1;
                continue;
            }
            match entries[i].label.clone() {
                None => {
                    entries.remove(i);
                }
                // The last anchor is where execution ends; keep it.
                Some(_) if i + 1 == entries.len() => i += 1,
                Some(label) => {
                    match entries[i + 1].label.clone() {
                        None => entries[i + 1].label = Some(label),
                        Some(next) => {
                            retarget(entries, &label, &next);
                        }
                    }
                    entries.remove(i);
                }
            }
        }
    }
}

// ============================================================================
// Jump-chain collapse
// ============================================================================

/// `L: j T` lets every reference to `L` jump straight to `T`. The jump
/// itself is removed only when nothing can fall through into it.
struct JumpChainCollapse;

impl AsmPass for JumpChainCollapse {
    fn name(&self) -> &'static str {
        "jump-chain-collapse"
    }

    fn run(&self, entries: &mut Vec<Entry>) {
        let mut i = 0;
        while i < entries.len() {
            let (label, dest) = match (&entries[i].label, entries[i].instr.target()) {
                (Some(label), Some(target)) if entries[i].instr.is_jump() => {
                    (label.clone(), target.label.clone())
                }
                _ => {
                    i += 1;
                    continue;
                }
            };
            if label == dest {
                i += 1;
                continue;
            }

            let changed = retarget(entries, &label, &dest);
            let unreachable_by_fallthrough =
                i > 0 && entries[i - 1].instr.never_falls_through();
            if changed && unreachable_by_fallthrough {
                entries.remove(i);
            } else {
                i += 1;
            }
        }
    }
}

// ============================================================================
// Jump-to-fallthrough elision
// ============================================================================

/// Removes `j X` when the next instruction is labelled `X`.
struct FallthroughJumpElision;

impl AsmPass for FallthroughJumpElision {
    fn name(&self) -> &'static str {
        "fallthrough-jump-elision"
    }

    fn run(&self, entries: &mut Vec<Entry>) {
        let mut i = 0;
        while i + 1 < entries.len() {
            let redundant = entries[i].instr.is_jump()
                && matches!(
                    (entries[i].instr.target(), &entries[i + 1].label),
                    (Some(target), Some(next)) if &target.label == next
                );
            if !redundant {
                i += 1;
                continue;
            }

            let removed = entries.remove(i);
            if let (Some(label), Some(next)) = (removed.label, entries[i].label.clone()) {
                retarget(entries, &label, &next);
            }
            // The previous jump may now precede its own target.
            i = i.saturating_sub(1);
        }
    }
}

/// Run the three cleanup passes in order.
pub fn optimize(entries: &mut Vec<Entry>) {
    let mut pm = PassManager::new();
    pm.add(Box::new(NoopElision));
    pm.add(Box::new(JumpChainCollapse));
    pm.add(Box::new(FallthroughJumpElision));
    pm.run_all(entries);
}
