use mips_compiler::sim::Machine;
use mips_compiler::{compile, compile_with, CompileConfig, Compilation, Location};

// ── Straight-line code ───────────────────────────────────────────────────

#[test]
fn definitions_round_trip() {
    let (c, m, steps) = run_counted("int a = 1; int b = a + 2;");
    assert_eq!(value(&c, &m, "a"), 1);
    assert_eq!(value(&c, &m, "b"), 3);
    assert!(steps <= 8, "Two definitions took {} steps", steps);
}

#[test]
fn uninitialized_definition_then_assignment() {
    let (c, m) = run("int a; a = 9; int b = a * a;");
    assert_eq!(value(&c, &m, "b"), 81);
}

#[test]
fn arithmetic_operators() {
    let source = r#"
        int a = 17;
        int b = 5;
        int sum = a + b;
        int diff = a - b;
        int prod = a * b;
        int quot = a / b;
        int rem = a % b;
        int neg = -a;
        int mixed = (a + b) * (a - b) / 4;
    "#;
    let (c, m) = run(source);
    assert_eq!(value(&c, &m, "sum"), 22);
    assert_eq!(value(&c, &m, "diff"), 12);
    assert_eq!(value(&c, &m, "prod"), 85);
    assert_eq!(value(&c, &m, "quot"), 3);
    assert_eq!(value(&c, &m, "rem"), 2);
    assert_eq!(value(&c, &m, "neg"), -17);
    assert_eq!(value(&c, &m, "mixed"), 66);
}

#[test]
fn bitwise_operators() {
    let source = r#"
        int a = 12;
        int b = 10;
        int and = a & b;
        int or = a | b;
        int xor = a ^ b;
        int shl = a << 2;
        int shr = a >> 2;
    "#;
    let (c, m) = run(source);
    assert_eq!(value(&c, &m, "and"), 8);
    assert_eq!(value(&c, &m, "or"), 14);
    assert_eq!(value(&c, &m, "xor"), 6);
    assert_eq!(value(&c, &m, "shl"), 48);
    assert_eq!(value(&c, &m, "shr"), 3);
}

#[test]
fn compound_assignment_operators() {
    let source = r#"
        int a = 13; a += 3;
        int b = 13; b -= 3;
        int c = 13; c *= 3;
        int d = 13; d /= 3;
        int e = 13; e &= 6;
        int f = 13; f |= 2;
        int g = 13; g ^= 1;
        int h = 13; h <<= 1;
        int i = 13; i >>= 1;
    "#;
    let (c, m) = run(source);
    assert_eq!(value(&c, &m, "a"), 16);
    assert_eq!(value(&c, &m, "b"), 10);
    assert_eq!(value(&c, &m, "c"), 39);
    assert_eq!(value(&c, &m, "d"), 4);
    assert_eq!(value(&c, &m, "e"), 4);
    assert_eq!(value(&c, &m, "f"), 15);
    assert_eq!(value(&c, &m, "g"), 12);
    assert_eq!(value(&c, &m, "h"), 26);
    assert_eq!(value(&c, &m, "i"), 6);
}

#[test]
fn large_literals_are_built_in_two_halves() {
    let source = r#"
        int big = 100000;
        int neg = -100000;
        int edge = 32768;
        int sum = big + 70000;
    "#;
    let (c, m) = run(source);
    assert_eq!(value(&c, &m, "big"), 100000);
    assert_eq!(value(&c, &m, "neg"), -100000);
    assert_eq!(value(&c, &m, "edge"), 32768);
    assert_eq!(value(&c, &m, "sum"), 170000);
}

#[test]
fn chained_assignment() {
    let (c, m) = run("int a; int b; a = b = 7;");
    assert_eq!(value(&c, &m, "a"), 7);
    assert_eq!(value(&c, &m, "b"), 7);
}

#[test]
fn character_and_null_literals() {
    let (c, m) = run("int ch = 'A' + 1; int *p = NULL;");
    assert_eq!(value(&c, &m, "ch"), 66);
    assert_eq!(value(&c, &m, "p"), 0);
}

// ── Fixed point ──────────────────────────────────────────────────────────

#[test]
fn fixed_point_arithmetic() {
    let source = r#"
        float x = 1.5;
        float y = x * 2.0;
        float h = 1.5 + 2;
        float q = 7.0 / 2.0;
        int whole = y;
        int half = q * 2;
    "#;
    let (c, m) = run(source);
    assert_eq!(value(&c, &m, "x"), 98304);
    assert_eq!(value(&c, &m, "y"), 3 << 16);
    assert_eq!(value(&c, &m, "h"), 229376);
    assert_eq!(value(&c, &m, "q"), 229376);
    assert_eq!(value(&c, &m, "whole"), 3);
    assert_eq!(value(&c, &m, "half"), 7);
}

#[test]
fn fixed_and_int_conversions() {
    let source = r#"
        int n = 5;
        float f = n;
        float g = f / 2;
        int back = g;
    "#;
    let (c, m) = run(source);
    assert_eq!(value(&c, &m, "f"), 5 << 16);
    assert_eq!(value(&c, &m, "g"), 163840);
    assert_eq!(value(&c, &m, "back"), 2);
}

// ── Comparisons ──────────────────────────────────────────────────────────

#[test]
fn comparison_values_match_branches() {
    let ops = ["<", ">", "<=", ">=", "==", "!="];
    let pairs = [(1, 2), (2, 1), (3, 3), (-4, 2), (0, 0), (5, -5)];
    for op in ops {
        for (x, y) in pairs {
            let source = format!(
                "int a = {x}; int b = {y}; int v = a {op} b; int t = 0; if (a {op} b) {{ t = 1; }}"
            );
            let (c, m) = run(&source);
            let expected = match op {
                "<" => x < y,
                ">" => x > y,
                "<=" => x <= y,
                ">=" => x >= y,
                "==" => x == y,
                _ => x != y,
            } as i32;
            assert_eq!(value(&c, &m, "v"), expected, "value of {x} {op} {y}");
            assert_eq!(value(&c, &m, "t"), expected, "branch on {x} {op} {y}");
        }
    }
}

#[test]
fn comparison_against_zero() {
    let source = r#"
        int a = 3;
        int pos = 0;
        int zero = 0;
        if (a > 0) { pos = 1; }
        if (a - 3 == 0) { zero = 1; }
    "#;
    let (c, m) = run(source);
    assert_eq!(value(&c, &m, "pos"), 1);
    assert_eq!(value(&c, &m, "zero"), 1);
}

#[test]
fn logical_operators() {
    let source = r#"
        int a = 2;
        int b = 0;
        int and = a && b;
        int or = a || b;
        int not = !b;
        int both = 0;
        if (a > 1 && a < 3) { both = 1; }
        int either = 0;
        if (b == 1 || a == 2) { either = 1; }
        int neither = 0;
        if (!(a == 1 || b == 1)) { neither = 1; }
    "#;
    let (c, m) = run(source);
    assert_eq!(value(&c, &m, "and"), 0);
    assert_eq!(value(&c, &m, "or"), 1);
    assert_eq!(value(&c, &m, "not"), 1);
    assert_eq!(value(&c, &m, "both"), 1);
    assert_eq!(value(&c, &m, "either"), 1);
    assert_eq!(value(&c, &m, "neither"), 1);
}

#[test]
fn fixed_comparison() {
    let source = r#"
        float x = 1.5;
        int bigger = x > 1;
        int smaller = x < 2;
    "#;
    let (c, m) = run(source);
    assert_eq!(value(&c, &m, "bigger"), 1);
    assert_eq!(value(&c, &m, "smaller"), 1);
}

// ── Conditionals ─────────────────────────────────────────────────────────

#[test]
fn if_else_chain() {
    for (input, expected) in [(1, 10), (2, 20), (3, 30), (7, 0)] {
        let source = format!(
            r#"
            int a = {input};
            int r;
            if (a == 1) {{ r = 10; }}
            else if (a == 2) {{ r = 20; }}
            else if (a == 3) {{ r = 30; }}
            else {{ r = 0; }}
            "#
        );
        let (c, m) = run(&source);
        assert_eq!(value(&c, &m, "r"), expected, "branch taken for a = {input}");
    }
}

#[test]
fn if_without_else_falls_through() {
    let (c, m) = run("int a = 5; int b = 1; if (a < 3) { b = 2; } b = b + 10;");
    assert_eq!(value(&c, &m, "b"), 11);
}

#[test]
fn block_locals_shadow_outer_names() {
    let source = r#"
        int a = 1;
        int b = 0;
        if (a == 1) {
            int a = 40;
            b = a + 2;
        }
        int c = a;
    "#;
    let (c, m) = run(source);
    assert_eq!(value(&c, &m, "b"), 42);
    assert_eq!(value(&c, &m, "c"), 1);
}

// ── Loops ────────────────────────────────────────────────────────────────

#[test]
fn while_loop() {
    let (c, m) = run("int a = 0; while (a < 5) { a = a + 2; }");
    assert_eq!(value(&c, &m, "a"), 6);
}

#[test]
fn while_loop_never_entered() {
    let (c, m) = run("int a = 10; while (a < 5) { a = a + 2; }");
    assert_eq!(value(&c, &m, "a"), 10);
}

#[test]
fn for_loop() {
    let (c, m) = run("int s = 0; for (int i = 0; i < 5; i += 1) { s += i; }");
    assert_eq!(value(&c, &m, "s"), 10);
}

#[test]
fn for_loop_with_outer_counter() {
    let (c, m) = run("int i; int s = 0; for (i = 1; i <= 4; i = i + 1) { s = s + i; }");
    assert_eq!(value(&c, &m, "s"), 10);
    assert_eq!(value(&c, &m, "i"), 5);
}

#[test]
fn for_loop_without_clauses() {
    let source = r#"
        int n = 0;
        for (;;) {
            n += 3;
            if (n > 10) { break; }
        }
    "#;
    let (c, m) = run(source);
    assert_eq!(value(&c, &m, "n"), 12);
}

#[test]
fn break_leaves_the_innermost_loop() {
    let source = r#"
        int s = 0;
        for (int i = 0; i < 10; i += 1) {
            if (i == 3) { break; }
            s += 2;
        }
    "#;
    let (c, m) = run(source);
    assert_eq!(value(&c, &m, "s"), 6);
}

#[test]
fn continue_skips_to_the_step() {
    let source = r#"
        int s = 0;
        for (int i = 0; i < 5; i += 1) {
            if (i == 2) { continue; }
            s += 2;
        }
    "#;
    let (c, m) = run(source);
    assert_eq!(value(&c, &m, "s"), 8);
}

#[test]
fn continue_in_while() {
    let source = r#"
        int i = 0;
        int odd = 0;
        while (i < 10) {
            i += 1;
            if (i % 2 == 0) { continue; }
            odd += 1;
        }
    "#;
    let (c, m) = run(source);
    assert_eq!(value(&c, &m, "odd"), 5);
}

#[test]
fn nested_loops() {
    let source = r#"
        int count = 0;
        for (int i = 0; i < 4; i += 1) {
            int j = 0;
            while (j < i) {
                count += 1;
                j += 1;
            }
        }
    "#;
    let (c, m) = run(source);
    assert_eq!(value(&c, &m, "count"), 6);
}

// ── Register pressure ────────────────────────────────────────────────────

#[test]
fn many_live_variables_spill_and_reload() {
    let mut source = String::new();
    for i in 0..25 {
        source.push_str(&format!("int v{i} = {i};\n"));
    }
    let sum: Vec<String> = (0..25).map(|i| format!("v{i}")).collect();
    source.push_str(&format!("int s = {};\n", sum.join(" + ")));
    source.push_str("int first = v0;\nint last = v24;\n");

    let config = CompileConfig {
        verify_allocator: true,
        ..CompileConfig::default()
    };
    let c = compile_with(&source, &config).unwrap();
    let mut m = Machine::new(2048);
    m.run(&c.program, MAX_STEPS).unwrap();
    assert_eq!(value(&c, &m, "s"), 300);
    assert_eq!(value(&c, &m, "first"), 0);
    assert_eq!(value(&c, &m, "last"), 24);
}

#[test]
fn deeply_nested_temporaries_spill_and_reload() {
    let source = format!("int x = 1;\nint r = {};\n", nested_sum(1, 25, "x"));
    let c = compile_with(&source, &checked()).unwrap();
    let mut m = Machine::new(2048);
    m.run(&c.program, MAX_STEPS).unwrap();
    assert_eq!(value(&c, &m, "r"), 326);
    assert_eq!(value(&c, &m, "x"), 1);
}

#[test]
fn nested_temporaries_spill_to_the_frame() {
    let source = format!(
        "int f(int x) {{ return {}; }}\nint r = f(2);\n",
        nested_sum(1, 25, "x")
    );
    let c = compile_with(&source, &checked()).unwrap();
    let mut m = Machine::new(2048);
    m.run(&c.program, MAX_STEPS).unwrap();
    assert_eq!(value(&c, &m, "r"), 327);
}

#[test]
fn spilled_temporaries_survive_a_branch() {
    let inner = nested_sum(4, 25, "x");
    let source = format!(
        "int x = 1;\nint r = {};\n",
        nested_sum(1, 3, &format!("({inner}) + (x && 1)"))
    );
    let c = compile_with(&source, &checked()).unwrap();
    let mut m = Machine::new(2048);
    m.run(&c.program, MAX_STEPS).unwrap();
    assert_eq!(value(&c, &m, "r"), 327);
}

#[test]
fn live_variables_keep_distinct_registers() {
    let mut source = String::new();
    for i in 0..30 {
        source.push_str(&format!("int v{i} = {};\n", i * 3));
    }
    let c = compile(&source).unwrap();
    let mut registers = Vec::new();
    for i in 0..30 {
        if let Some(Location::Register(reg)) = c.location(&format!("v{i}")) {
            assert!(!registers.contains(&reg), "{} reported twice", reg);
            registers.push(reg);
        }
    }
    let mut m = Machine::new(2048);
    m.run(&c.program, MAX_STEPS).unwrap();
    for i in 0..30 {
        assert_eq!(value(&c, &m, &format!("v{i}")), i * 3);
    }
}

#[test]
fn unoptimized_program_behaves_the_same() {
    let source = r#"
        int s = 0;
        for (int i = 0; i < 6; i += 1) {
            if (i == 4) { continue; }
            s += i;
        }
    "#;
    let config = CompileConfig {
        optimize: false,
        ..CompileConfig::default()
    };
    let plain = compile_with(source, &config).unwrap();
    let optimized = compile(source).unwrap();
    assert!(optimized.program.len() < plain.program.len());

    let mut m = Machine::new(2048);
    m.run(&plain.program, MAX_STEPS).unwrap();
    assert_eq!(value(&plain, &m, "s"), 11);
    let mut m = Machine::new(2048);
    m.run(&optimized.program, MAX_STEPS).unwrap();
    assert_eq!(value(&optimized, &m, "s"), 11);
}

#[test]
fn custom_stack_top() {
    let source = "int f(int x) { int y = x + 1; return y * 2; } int a = f(4);";
    let config = CompileConfig {
        stack_top: 500,
        ..CompileConfig::default()
    };
    let c = compile_with(source, &config).unwrap();
    let mut m = Machine::new(512);
    m.run(&c.program, MAX_STEPS).unwrap();
    assert_eq!(value(&c, &m, "a"), 10);
}

// ── Helpers ──────────────────────────────────────────────────────────────

const MAX_STEPS: usize = 200_000;

fn run(source: &str) -> (Compilation, Machine) {
    let (c, m, _) = run_counted(source);
    (c, m)
}

fn run_counted(source: &str) -> (Compilation, Machine, usize) {
    let c = compile(source).unwrap_or_else(|e| panic!("compile failed: {e}\n{source}"));
    let mut m = Machine::new(2048);
    let steps = m.run(&c.program, MAX_STEPS).unwrap();
    assert!(steps < MAX_STEPS, "Program did not finish:\n{}", c.program.to_asm_text());
    (c, m, steps)
}

fn value(c: &Compilation, m: &Machine, name: &str) -> i32 {
    c.value_of(m, name)
        .unwrap_or_else(|| panic!("{name} is not a top-level variable"))
}

fn checked() -> CompileConfig {
    CompileConfig {
        verify_allocator: true,
        ..CompileConfig::default()
    }
}

/// `from + (from+1 + (... + (to + (core))))`, one live literal per level.
fn nested_sum(from: i32, to: i32, core: &str) -> String {
    (from..=to)
        .rev()
        .fold(core.to_string(), |inner, k| format!("{k} + ({inner})"))
}
