use mips_compiler::backend::abi::Reg;
use mips_compiler::backend::builder::Entry;
use mips_compiler::backend::instruction::Instr;
use mips_compiler::backend::link::{link, link_entries, LinkError};
use mips_compiler::backend::optimize::optimize;
use mips_compiler::compile;

// ── No-op elision ────────────────────────────────────────────────────────

#[test]
fn unlabeled_noops_are_dropped() {
    let mut entries = vec![
        Entry::new(Instr::noop()),
        Entry::new(Instr::load_imm(r(8), 1)),
        Entry::new(Instr::noop()),
        Entry::new(Instr::load_imm(r(9), 2)),
    ];
    optimize(&mut entries);
    assert_eq!(
        entries,
        vec![
            Entry::new(Instr::load_imm(r(8), 1)),
            Entry::new(Instr::load_imm(r(9), 2)),
        ]
    );
}

#[test]
fn label_moves_onto_the_next_instruction() {
    let mut entries = vec![
        Entry::new(Instr::jump("L")),
        Entry::new(Instr::load_imm(r(8), 1)),
        Entry::labeled("L", Instr::noop()),
        Entry::new(Instr::load_imm(r(9), 2)),
    ];
    optimize(&mut entries);
    assert_eq!(entries[2], Entry::labeled("L", Instr::load_imm(r(9), 2)));
    assert_eq!(entries.len(), 3);
}

#[test]
fn stacked_labels_merge() {
    let mut entries = vec![
        Entry::new(Instr::jump("A")),
        Entry::new(Instr::jump("B")),
        Entry::labeled("A", Instr::noop()),
        Entry::labeled("B", Instr::load_imm(r(8), 1)),
    ];
    optimize(&mut entries);
    for entry in &entries {
        if let Some(target) = entry.instr.target() {
            assert_eq!(target.label, "B");
        }
    }
    assert!(entries.iter().all(|e| e.label.as_deref() != Some("A")));
}

#[test]
fn trailing_anchor_is_kept() {
    let mut entries = vec![
        Entry::new(Instr::bne(r(8), Reg::ZERO, "end")),
        Entry::new(Instr::load_imm(r(8), 1)),
        Entry::labeled("end", Instr::noop()),
    ];
    optimize(&mut entries);
    assert_eq!(entries.last(), Some(&Entry::labeled("end", Instr::noop())));
}

// ── Jump chains ──────────────────────────────────────────────────────────

#[test]
fn jump_to_jump_is_collapsed() {
    let mut entries = vec![
        Entry::new(Instr::bne(r(8), Reg::ZERO, "mid")),
        Entry::new(Instr::load_imm(r(8), 1)),
        Entry::new(Instr::jump("out")),
        Entry::labeled("mid", Instr::jump("end")),
        Entry::labeled("out", Instr::load_imm(r(9), 1)),
        Entry::labeled("end", Instr::load_imm(r(10), 1)),
    ];
    optimize(&mut entries);
    assert_eq!(entries[0].instr.target().map(|t| t.label.as_str()), Some("end"));
    assert!(
        entries.iter().all(|e| e.label.as_deref() != Some("mid")),
        "unreachable chain jump should be removed: {:?}",
        entries
    );
}

#[test]
fn chain_jump_reachable_by_fallthrough_stays() {
    let mut entries = vec![
        Entry::new(Instr::bne(r(8), Reg::ZERO, "mid")),
        Entry::new(Instr::load_imm(r(8), 1)),
        Entry::labeled("mid", Instr::jump("end")),
        Entry::new(Instr::load_imm(r(9), 1)),
        Entry::labeled("end", Instr::load_imm(r(10), 1)),
    ];
    optimize(&mut entries);
    assert_eq!(entries[0].instr.target().map(|t| t.label.as_str()), Some("end"));
    assert!(entries.iter().any(|e| e.instr == Instr::jump("end")));
}

// ── Fallthrough jumps ────────────────────────────────────────────────────

#[test]
fn jump_to_the_next_instruction_is_removed() {
    let mut entries = vec![
        Entry::new(Instr::load_imm(r(8), 1)),
        Entry::new(Instr::jump("next")),
        Entry::labeled("next", Instr::load_imm(r(9), 2)),
    ];
    optimize(&mut entries);
    assert_eq!(entries.len(), 2);
    assert!(!entries.iter().any(|e| e.instr.is_jump()));
}

#[test]
fn labels_on_noops_fold_into_following_code() {
    let mut entries = vec![
        Entry::new(Instr::bne(r(8), Reg::ZERO, "then")),
        Entry::new(Instr::jump("end")),
        Entry::labeled("then", Instr::noop()),
        Entry::new(Instr::load_imm(r(9), 2)),
        Entry::labeled("end", Instr::noop()),
        Entry::new(Instr::load_imm(r(10), 3)),
    ];
    optimize(&mut entries);
    let program = link(entries).unwrap();
    assert_eq!(program.len(), 4);
}

// ── Whole programs ───────────────────────────────────────────────────────

#[test]
fn optimizing_twice_changes_nothing() {
    let sources = [
        "int s = 0; for (int i = 0; i < 5; i += 1) { if (i == 2) { continue; } s += i; }",
        "int a = 3; int r; if (a == 1) { r = 1; } else if (a == 2) { r = 2; } else { r = 3; }",
        "int f(int n) { while (n > 0) { if (n == 3) { break; } n -= 1; } return n; } int x = f(7);",
        "int g(int a, int b) { return a < b && b < 10 || a == 0; } int y = g(1, 2);",
    ];
    for source in sources {
        let program = compile(source).unwrap();
        let once = program.program.entries().to_vec();
        let mut twice = once.clone();
        optimize(&mut twice);
        assert_eq!(once, twice, "second pass changed:\n{}", program.program.to_asm_text());
    }
}

// ── Linking ──────────────────────────────────────────────────────────────

#[test]
fn branch_offsets_are_relative_and_jumps_absolute() {
    let entries = vec![
        Entry::new(Instr::bne(r(8), Reg::ZERO, "end")),
        Entry::new(Instr::load_imm(r(8), 1)),
        Entry::new(Instr::jump("end")),
        Entry::labeled("end", Instr::load_imm(r(9), 1)),
    ];
    let program = link(entries).unwrap();
    assert_eq!(program.get(0).and_then(|i| i.target()).and_then(|t| t.resolved), Some(2));
    assert_eq!(program.get(2).and_then(|i| i.target()).and_then(|t| t.resolved), Some(3));
    assert_eq!(program.address_of("end"), Some(3));
}

#[test]
fn dangling_label_leaves_entries_untouched() {
    let mut entries = vec![
        Entry::labeled("top", Instr::load_imm(r(8), 1)),
        Entry::new(Instr::jump("top")),
        Entry::new(Instr::bne(r(8), Reg::ZERO, "nowhere")),
    ];
    let before = entries.clone();
    assert_eq!(
        link_entries(&mut entries),
        Err(LinkError::MissingLabel("nowhere".to_string()))
    );
    assert_eq!(entries, before);
}

#[test]
fn duplicate_label_is_rejected() {
    let entries = vec![
        Entry::labeled("x", Instr::load_imm(r(8), 1)),
        Entry::labeled("x", Instr::load_imm(r(9), 1)),
    ];
    assert_eq!(link(entries), Err(LinkError::DuplicateLabel("x".to_string())));
}

// ── Helper ───────────────────────────────────────────────────────────────

fn r(index: u8) -> Reg {
    Reg::new(index).unwrap()
}
