use mips_compiler::sim::Machine;
use mips_compiler::{compile, compile_sources, CompileConfig, Compilation};

// ── Sample programs ──────────────────────────────────────────────────────
// Each sample under samples/ compiles, runs to completion, and leaves its
// answer in a top-level variable.

#[test]
fn fib_sample() {
    let (c, m) = run_sample("fib.c");
    assert_eq!(value(&c, &m, "result"), 144);
}

#[test]
fn gcd_sample() {
    let (c, m) = run_sample("gcd.c");
    assert_eq!(value(&c, &m, "result"), 21);
}

#[test]
fn bubble_sort_sample() {
    let (c, m) = run_sample("bubble_sort.c");
    assert_eq!(value(&c, &m, "smallest"), 1);
    assert_eq!(value(&c, &m, "largest"), 9);

    let sorted: Vec<i32> = (0..8)
        .map(|i| {
            let Some(mips_compiler::Location::Memory(base)) = c.location("data") else {
                panic!("data should live in memory");
            };
            m.mem(base + i).unwrap()
        })
        .collect();
    assert_eq!(sorted, vec![1, 2, 3, 4, 5, 7, 8, 9]);
}

#[test]
fn primes_sample() {
    let (c, m) = run_sample("primes.c");
    assert_eq!(value(&c, &m, "count"), 15);
}

#[test]
fn fixed_point_sample() {
    let (c, m) = run_sample("fixed_point.c");
    assert_eq!(value(&c, &m, "whole"), 19);
}

#[test]
fn matrix_sample() {
    let (c, m) = run_sample("matrix.c");
    assert_eq!(value(&c, &m, "trace"), 69);
}

#[test]
fn inline_asm_sample() {
    let (c, m) = run_sample("inline_asm.c");
    assert_eq!(m.log(), &[42]);
    assert_eq!(value(&c, &m, "logged"), 43);
}

#[test]
fn samples_render_as_memory_images() {
    for name in ["fib.c", "gcd.c", "bubble_sort.c", "primes.c", "matrix.c"] {
        let c = compile(&read_sample(name)).unwrap();
        let image = c.program.to_mem_image().unwrap();
        assert_eq!(image.lines().count(), c.program.len(), "{name}");
    }
}

#[test]
fn sources_are_joined_in_order() {
    let header = "int twice(int x);\nint seed = 4;\n";
    let body = "int twice(int x) { return x * 2; }\nint result = twice(seed);\n";
    let c = compile_sources(&[header, body], &CompileConfig::default()).unwrap();
    let mut m = Machine::new(2048);
    m.run(&c.program, 10_000).unwrap();
    assert_eq!(value(&c, &m, "result"), 8);
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn read_sample(name: &str) -> String {
    std::fs::read_to_string(format!("../samples/{name}"))
        .unwrap_or_else(|e| panic!("Failed to read samples/{name}: {e}"))
}

fn run_sample(name: &str) -> (Compilation, Machine) {
    let c = compile(&read_sample(name)).unwrap_or_else(|e| panic!("{name} should compile: {e}"));
    let mut m = Machine::default();
    let steps = m.run(&c.program, 1_000_000).unwrap();
    assert!(steps < 1_000_000, "{name} did not finish");
    (c, m)
}

fn value(c: &Compilation, m: &Machine, name: &str) -> i32 {
    c.value_of(m, name)
        .unwrap_or_else(|| panic!("{name} is not a top-level variable"))
}
