use mips_compiler::backend::abi::Reg;
use mips_compiler::backend::builder::{Builder, Program};
use mips_compiler::backend::instruction::{Instr, Target};
use mips_compiler::sim::{status, Machine, MachineError};

// ── Arithmetic ───────────────────────────────────────────────────────────

#[test]
fn alu_operations() {
    let program = assemble(|b| {
        b.push(Instr::load_imm(r(8), 12));
        b.push(Instr::load_imm(r(9), -5));
        b.push(Instr::Add { rd: r(10), rs: r(8), rt: r(9) });
        b.push(Instr::Sub { rd: r(11), rs: r(8), rt: r(9) });
        b.push(Instr::Mul { rd: r(12), rs: r(8), rt: r(9) });
        b.push(Instr::Div { rd: r(13), rs: r(8), rt: r(9) });
        b.push(Instr::And { rd: r(14), rs: r(8), rt: r(9) });
        b.push(Instr::Or { rd: r(15), rs: r(8), rt: r(9) });
        b.push(Instr::Slt { rd: r(16), rs: r(9), rt: r(8) });
        b.push(Instr::Sgt { rd: r(17), rs: r(9), rt: r(8) });
        b.push(Instr::Sll { rd: r(18), rs: r(8), shamt: 3 });
        b.push(Instr::Sra { rd: r(19), rs: r(9), shamt: 1 });
    });
    let m = execute(&program);
    assert_eq!(m.reg(r(10)), 7);
    assert_eq!(m.reg(r(11)), 17);
    assert_eq!(m.reg(r(12)), -60);
    assert_eq!(m.reg(r(13)), -2);
    assert_eq!(m.reg(r(14)), 12 & -5);
    assert_eq!(m.reg(r(15)), 12 | -5);
    assert_eq!(m.reg(r(16)), 1);
    assert_eq!(m.reg(r(17)), 0);
    assert_eq!(m.reg(r(18)), 96);
    assert_eq!(m.reg(r(19)), -3);
    assert_eq!(m.reg(Reg::STATUS), 0);
}

#[test]
fn register_zero_ignores_writes() {
    let program = assemble(|b| {
        b.push(Instr::load_imm(Reg::ZERO, 5));
        b.push(Instr::Addi { rd: r(8), rs: Reg::ZERO, imm: 1 });
    });
    let m = execute(&program);
    assert_eq!(m.reg(Reg::ZERO), 0);
    assert_eq!(m.reg(r(8)), 1);
}

#[test]
fn overflow_wraps_and_sets_status() {
    let program = assemble(|b| {
        b.push(Instr::load_imm(r(8), 1));
        b.push(Instr::Sll { rd: r(8), rs: r(8), shamt: 30 });
        b.push(Instr::Add { rd: r(9), rs: r(8), rt: r(8) });
    });
    let m = execute(&program);
    assert_eq!(m.reg(r(9)), i32::MIN);
    assert_eq!(m.reg(Reg::STATUS), status::ADD_OVERFLOW);
}

#[test]
fn divide_by_zero_sets_status_and_keeps_destination() {
    let program = assemble(|b| {
        b.push(Instr::load_imm(r(8), 9));
        b.push(Instr::load_imm(r(10), 4));
        b.push(Instr::Div { rd: r(10), rs: r(8), rt: Reg::ZERO });
    });
    let m = execute(&program);
    assert_eq!(m.reg(r(10)), 4);
    assert_eq!(m.reg(Reg::STATUS), status::DIVIDE_BY_ZERO);
}

#[test]
fn division_overflow_wraps_without_status() {
    let program = assemble(|b| {
        b.push(Instr::load_imm(r(8), 1));
        b.push(Instr::Sll { rd: r(8), rs: r(8), shamt: 31 });
        b.push(Instr::load_imm(r(9), -1));
        b.push(Instr::Div { rd: r(10), rs: r(8), rt: r(9) });
    });
    let m = execute(&program);
    assert_eq!(m.reg(r(10)), i32::MIN);
    assert_eq!(m.reg(Reg::STATUS), 0);
}

#[test]
fn bex_follows_the_status_register() {
    let program = assemble(|b| {
        b.push(Instr::Setx { value: 3 });
        b.push(Instr::Bex { target: Target::new("fault") });
        b.push(Instr::load_imm(r(8), 1));
        b.push_labeled("fault", Instr::load_imm(r(9), 2));
    });
    let m = execute(&program);
    assert_eq!(m.reg(r(8)), 0);
    assert_eq!(m.reg(r(9)), 2);
}

// ── Memory ───────────────────────────────────────────────────────────────

#[test]
fn load_and_store() {
    let program = assemble(|b| {
        b.push(Instr::load_imm(r(8), 100));
        b.push(Instr::load_imm(r(9), 42));
        b.push(Instr::Sw { rd: r(9), rs: r(8), imm: 5 });
        b.push(Instr::Lw { rd: r(10), rs: Reg::ZERO, imm: 105 });
    });
    let m = execute(&program);
    assert_eq!(m.mem(105), Some(42));
    assert_eq!(m.reg(r(10)), 42);
}

#[test]
fn out_of_bounds_access_is_an_error() {
    let program = assemble(|b| {
        b.push(Instr::load_imm(r(8), -1));
        b.push(Instr::Lw { rd: r(9), rs: r(8), imm: 0 });
    });
    let mut m = Machine::new(16);
    match m.run(&program, 100) {
        Err(MachineError::MemoryOutOfBounds { pc, address }) => {
            assert_eq!(pc, 1);
            assert_eq!(address, -1);
        }
        other => panic!("Expected an out of bounds error, got: {:?}", other),
    }
}

// ── Control flow ─────────────────────────────────────────────────────────

#[test]
fn branches_are_relative() {
    let program = assemble(|b| {
        b.push(Instr::load_imm(r(8), 1));
        b.push(Instr::bne(r(8), Reg::ZERO, "skip"));
        b.push(Instr::load_imm(r(9), 99));
        b.push_labeled("skip", Instr::blt(Reg::ZERO, r(8), "done"));
        b.push(Instr::load_imm(r(10), 99));
        b.push_labeled("done", Instr::load_imm(r(11), 7));
    });
    let m = execute(&program);
    assert_eq!(m.reg(r(9)), 0);
    assert_eq!(m.reg(r(10)), 0);
    assert_eq!(m.reg(r(11)), 7);
}

#[test]
fn call_and_return() {
    let program = assemble(|b| {
        b.push(Instr::load_imm(Reg::A0, 20));
        b.push(Instr::call("double"));
        b.push(Instr::mov(r(8), Reg::V0));
        b.push(Instr::jump("end"));
        b.push_labeled("double", Instr::Add { rd: Reg::V0, rs: Reg::A0, rt: Reg::A0 });
        b.push(Instr::Jr { rd: Reg::RA });
        b.place_label("end");
    });
    let m = execute(&program);
    assert_eq!(m.reg(r(8)), 40);
    assert_eq!(m.reg(Reg::RA), 2);
}

#[test]
fn step_bound_stops_an_infinite_loop() {
    let program = assemble(|b| {
        b.push_labeled("spin", Instr::Addi { rd: r(8), rs: r(8), imm: 1 });
        b.push(Instr::jump("spin"));
    });
    let mut m = Machine::new(16);
    let steps = m.run(&program, 10).unwrap();
    assert_eq!(steps, 10);
    assert_eq!(m.reg(r(8)), 5);
}

#[test]
fn run_ends_past_the_last_instruction() {
    let program = assemble(|b| {
        b.push(Instr::load_imm(r(8), 1));
        b.push(Instr::load_imm(r(9), 2));
    });
    let mut m = Machine::new(16);
    assert_eq!(m.run(&program, 100).unwrap(), 2);
    assert_eq!(m.pc(), 2);
}

#[test]
fn testlog_appends_values() {
    let program = assemble(|b| {
        b.push(Instr::load_imm(r(8), 3));
        b.push(Instr::TestLog { rd: r(8) });
        b.push(Instr::Addi { rd: r(8), rs: r(8), imm: 4 });
        b.push(Instr::TestLog { rd: r(8) });
    });
    let m = execute(&program);
    assert_eq!(m.log(), &[3, 7]);
}

// ── Encoding ─────────────────────────────────────────────────────────────

#[test]
fn encodes_each_format() {
    let program = assemble(|b| {
        b.push(Instr::Add { rd: r(8), rs: r(9), rt: r(10) });
        b.push(Instr::Addi { rd: r(8), rs: Reg::ZERO, imm: -1 });
        b.push(Instr::jump("end"));
        b.push_labeled("end", Instr::Sll { rd: r(8), rs: r(8), shamt: 16 });
    });
    let words = program.encode().unwrap();
    assert_eq!(words[0], (8 << 22) | (9 << 17) | (10 << 12));
    assert_eq!(words[1], (0b00101 << 27) | (8 << 22) | 0x1ffff);
    assert_eq!(words[2], (0b00001 << 27) | 3);
    assert_eq!(words[3], (8 << 22) | (8 << 17) | (16 << 7) | (4 << 2));
}

#[test]
fn memory_image_has_one_word_per_line() {
    let program = assemble(|b| {
        b.push(Instr::load_imm(r(8), 1));
        b.push(Instr::TestLog { rd: r(8) });
    });
    let image = program.to_mem_image().unwrap();
    let lines: Vec<&str> = image.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l.len() == 32 && l.chars().all(|c| c == '0' || c == '1')));
    assert!(lines[1].starts_with("11111"));
}

#[test]
fn oversized_immediate_fails_to_encode() {
    let program = assemble(|b| {
        b.push(Instr::Addi { rd: r(8), rs: Reg::ZERO, imm: 1 << 20 });
    });
    assert!(program.encode().is_err());
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn r(index: u8) -> Reg {
    Reg::new(index).unwrap()
}

fn assemble(build: impl FnOnce(&mut Builder)) -> Program {
    let mut b = Builder::new();
    build(&mut b);
    b.finish(false).unwrap()
}

fn execute(program: &Program) -> Machine {
    let mut m = Machine::new(256);
    let steps = m.run(program, 1000).unwrap();
    assert!(steps < 1000);
    m
}
