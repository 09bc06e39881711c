use mips_compiler::frontend::lexer::{tokenize, Token};
use mips_compiler::ir::{Liveness, NodeId, NodeKind, ParsedProgram};
use mips_compiler::{parse_program, CompileError};

// ── Precedence and associativity ─────────────────────────────────────────

#[test]
fn binary_precedence() {
    assert_eq!(
        render_first("1 + 4 * 2 / 9 & 5 - 8;"),
        "((1 + ((4 * 2) / 9)) & (5 - 8))"
    );
}

#[test]
fn parentheses_override_precedence() {
    assert_eq!(
        render_first("(1 + 4) * 2 / (9 & 5) - 8;"),
        "((((1 + 4) * 2) / (9 & 5)) - 8)"
    );
}

#[test]
fn nested_parentheses() {
    assert_eq!(render_first("((1 + 2) * (3 - (4 + 5)));"), "((1 + 2) * (3 - (4 + 5)))");
}

#[test]
fn subtraction_is_left_associative() {
    assert_eq!(render_first("10 - 4 - 3;"), "((10 - 4) - 3)");
}

#[test]
fn assignment_is_right_associative() {
    let parsed = parse_program("int a; int b; a = b = 3;").unwrap();
    assert_eq!(parsed.ast.render(parsed.statements[2]), "(a = (b = 3))");
}

#[test]
fn relational_binds_looser_than_shift() {
    assert_eq!(render_first("1 << 2 < 3 + 4;"), "((1 << 2) < (3 + 4))");
}

#[test]
fn logical_operators() {
    assert_eq!(
        render_first("1 < 2 && 3 != 4 || 5 == 6;"),
        "(((1 < 2) && (3 != 4)) || (5 == 6))"
    );
}

#[test]
fn compound_assignment() {
    let parsed = parse_program("int a = 1; a += 2 * 3;").unwrap();
    assert_eq!(parsed.ast.render(parsed.statements[1]), "(a += (2 * 3))");
}

#[test]
fn unary_operators() {
    let parsed = parse_program("int a = 2; int *p = &a; int b = -*p + !a;").unwrap();
    let NodeKind::Define { value: Some(value), .. } = parsed.ast.kind(parsed.statements[2]) else {
        panic!("expected a definition");
    };
    assert_eq!(parsed.ast.render(*value), "(-*p + !a)");
}

#[test]
fn calls_and_indexing() {
    let source = "int m[2][3]; int f(int x, int y); int v = f(m[1][2], 3) * 2;";
    let parsed = parse_program(source).unwrap();
    let NodeKind::Define { value: Some(value), .. } = parsed.ast.kind(parsed.statements[2]) else {
        panic!("expected a definition");
    };
    assert_eq!(parsed.ast.render(*value), "(f(m[1][2], 3) * 2)");
}

// ── Lexing ───────────────────────────────────────────────────────────────

#[test]
fn comments_and_directives_are_skipped() {
    let source = r#"
        #include <stdio.h>
        // line comment
        int a = 1; /* block
                      comment */
        int b = a;
    "#;
    let parsed = parse_program(source).unwrap();
    assert_eq!(parsed.statements.len(), 2);
}

#[test]
fn lines_are_counted_through_block_comments() {
    let tokens = tokenize("int a; /* one\ntwo\n * three */\nint b;").unwrap();
    let b = tokens
        .iter()
        .find(|lx| lx.token == Token::Ident("b".to_string()))
        .unwrap();
    assert_eq!(b.line, 4);

    let err = parse_program("int a = 1;\n/* a\n   b */ int c = d;").unwrap_err();
    assert_eq!(err.line(), Some(3));
}

#[test]
fn block_comment_contents_are_ignored() {
    let parsed = parse_program("int a = 1 /* + @ ' */ + 2; /**/ /***/").unwrap();
    assert_eq!(parsed.statements.len(), 1);
    assert_eq!(render_first("1 /* * 3 */ + 2;"), "(1 + 2)");
}

#[test]
fn unterminated_block_comment_is_a_lexical_error() {
    match parse_program("int a = 1;\nint b = 2; /* never closed") {
        Err(CompileError::Lexical(e)) => assert_eq!(e.line, 2),
        other => panic!("Expected a lexical error, got: {:?}", other.err()),
    }
}

#[test]
fn character_literal_is_an_integer() {
    let parsed = parse_program("int c = 'a';").unwrap();
    let NodeKind::Define { value: Some(value), .. } = parsed.ast.kind(parsed.statements[0]) else {
        panic!("expected a definition");
    };
    assert_eq!(parsed.ast.kind(*value), &NodeKind::Int(97));
}

#[test]
fn fixed_literal_is_sixteen_sixteen() {
    let parsed = parse_program("float f = 1.5;").unwrap();
    let NodeKind::Define { value: Some(value), .. } = parsed.ast.kind(parsed.statements[0]) else {
        panic!("expected a definition");
    };
    assert_eq!(parsed.ast.kind(*value), &NodeKind::Fixed(98304));
}

#[test]
fn unknown_character_is_a_lexical_error() {
    let result = parse_program("int a = 1;\nint b = a @ 2;");
    match result {
        Err(CompileError::Lexical(e)) => assert_eq!(e.line, 2),
        other => panic!("Expected a lexical error, got: {:?}", other.err()),
    }
}

// ── Liveness hints ───────────────────────────────────────────────────────

#[test]
fn earlier_uses_are_live_and_the_newest_is_last() {
    let parsed = parse_program("int a = 1; int b = a + 1; int c = a * 2;").unwrap();
    let uses = [
        left_operand(&parsed, defined_value(&parsed, parsed.statements[1])),
        left_operand(&parsed, defined_value(&parsed, parsed.statements[2])),
    ];
    assert_eq!(
        uses.map(|id| parsed.ast.node(id).track),
        [Liveness::Live, Liveness::LastUse]
    );
}

#[test]
fn shadowing_declaration_starts_its_own_chain() {
    let source = r#"
        int a = 1;
        int b = a;
        if (b) {
            int a = 2;
            int c = a;
            int e = a;
        }
        int d = a;
    "#;
    let parsed = parse_program(source).unwrap();
    let NodeKind::If { branches, .. } = parsed.ast.kind(parsed.statements[2]) else {
        panic!("expected an if statement");
    };
    let body = &branches[0].1;
    let outer_first = defined_value(&parsed, parsed.statements[1]);
    let inner_first = defined_value(&parsed, body[1]);
    let inner_last = defined_value(&parsed, body[2]);
    let outer_last = defined_value(&parsed, parsed.statements[3]);

    assert_eq!(parsed.ast.node(outer_first).track, Liveness::Live);
    assert_eq!(parsed.ast.node(inner_first).track, Liveness::Live);
    assert_eq!(parsed.ast.node(inner_last).track, Liveness::LastUse);
    assert_eq!(parsed.ast.node(outer_last).track, Liveness::LastUse);
}

// ── Statement structure ──────────────────────────────────────────────────

#[test]
fn function_definitions_move_after_code() {
    let source = r#"
        int twice(int x) { return x * 2; }
        int main() { return twice(3); }
        int a = 1;
    "#;
    let mut parsed = parse_program(source).unwrap();
    parsed.order_for_codegen();
    let kinds: Vec<&str> = parsed
        .statements
        .iter()
        .map(|&id| statement_kind(&parsed, id))
        .collect();
    assert_eq!(kinds, ["define", "function twice", "function main", "call main"]);
}

#[test]
fn inline_functions_stay_in_place() {
    let source = r#"
        inline int twice(int x) { return x * 2; }
        int a = twice(1);
    "#;
    let mut parsed = parse_program(source).unwrap();
    parsed.order_for_codegen();
    let kinds: Vec<&str> = parsed
        .statements
        .iter()
        .map(|&id| statement_kind(&parsed, id))
        .collect();
    assert_eq!(kinds, ["function twice", "define"]);
}

#[test]
fn asm_strings_become_lines() {
    let parsed = parse_program(r#"int a; __asm__("addi (a), $0, 1" "addi (a), (a), 2");"#).unwrap();
    match parsed.ast.kind(parsed.statements[1]) {
        NodeKind::Asm(text) => assert_eq!(text.lines().count(), 2),
        other => panic!("expected an asm block, got {:?}", other),
    }
}

#[test]
fn missing_semicolon_is_a_parse_error() {
    let result = parse_program("int a = 1\nint b = 2;");
    assert!(
        matches!(result, Err(CompileError::Parse { .. })),
        "Expected a parse error, got: {:?}",
        result.err()
    );
}

#[test]
fn unbalanced_parentheses_is_a_parse_error() {
    let result = parse_program("int a = (1 + 2;");
    assert!(
        matches!(result, Err(CompileError::Parse { .. })),
        "Expected a parse error, got: {:?}",
        result.err()
    );
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn render_first(source: &str) -> String {
    let parsed = parse_program(source).unwrap();
    parsed.ast.render(parsed.statements[0])
}

fn defined_value(parsed: &ParsedProgram, id: NodeId) -> NodeId {
    match parsed.ast.kind(id) {
        NodeKind::Define { value: Some(value), .. } => *value,
        other => panic!("expected an initialized definition, got {:?}", other),
    }
}

fn left_operand(parsed: &ParsedProgram, id: NodeId) -> NodeId {
    match parsed.ast.kind(id) {
        NodeKind::Binary { left, .. } => *left,
        other => panic!("expected a binary expression, got {:?}", other),
    }
}

fn statement_kind(parsed: &ParsedProgram, id: NodeId) -> &'static str {
    match parsed.ast.kind(id) {
        NodeKind::Define { .. } => "define",
        NodeKind::Function { name, .. } if name == "twice" => "function twice",
        NodeKind::Function { name, .. } if name == "main" => "function main",
        NodeKind::Call { name, .. } if name == "main" => "call main",
        _ => "other",
    }
}
