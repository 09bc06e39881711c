use mips_compiler::backend::link::LinkError;
use mips_compiler::{compile, CompileError, Compilation, SemanticErrorKind};

// ── Declarations ─────────────────────────────────────────────────────────

#[test]
fn variable_redefinition() {
    assert_semantic_error(
        compile("int a = 1; int a = 2;"),
        SemanticErrorKind::VariableRedefinition,
    );
}

#[test]
fn redefinition_in_an_inner_block_is_allowed() {
    assert!(compile("int a = 1; if (a) { int a = 2; }").is_ok());
}

#[test]
fn array_redefinition() {
    assert_semantic_error(
        compile("int a[2]; int a[3];"),
        SemanticErrorKind::ArrayRedefinition,
    );
}

#[test]
fn function_redefinition() {
    let source = r#"
        int f() { return 1; }
        int f() { return 2; }
    "#;
    assert_semantic_error(compile(source), SemanticErrorKind::FunctionRedefinition);
}

#[test]
fn parameter_redefinition() {
    assert_semantic_error(
        compile("int f(int a, int a) { return a; }"),
        SemanticErrorKind::ParameterRedefinition,
    );
}

#[test]
fn signature_mismatch() {
    let source = r#"
        int f(int a);
        int f(int a, int b) { return a + b; }
    "#;
    assert_semantic_error(compile(source), SemanticErrorKind::SignatureMismatch);
}

#[test]
fn too_many_parameters() {
    let params: Vec<String> = (0..17).map(|i| format!("int p{i}")).collect();
    let source = format!("int f({}) {{ return p0; }}", params.join(", "));
    assert_semantic_error(compile(&source), SemanticErrorKind::TooManyParameters);
}

#[test]
fn nested_function() {
    let source = r#"
        int f() {
            int g() { return 1; }
            return 2;
        }
    "#;
    assert_semantic_error(compile(source), SemanticErrorKind::NestedFunction);
}

#[test]
fn void_variable() {
    assert_semantic_error(compile("void x = 1;"), SemanticErrorKind::VoidValue);
}

#[test]
fn too_many_initializers() {
    assert_semantic_error(
        compile("int a[2] = {1, 2, 3};"),
        SemanticErrorKind::InvalidInitializer,
    );
}

// ── Names ────────────────────────────────────────────────────────────────

#[test]
fn undefined_variable() {
    assert_semantic_error(compile("int b = a + 1;"), SemanticErrorKind::UndefinedVariable);
}

#[test]
fn variable_used_after_its_block() {
    let source = r#"
        int a = 1;
        if (a) { int inner = 2; }
        a = inner;
    "#;
    assert_semantic_error(compile(source), SemanticErrorKind::UndefinedVariable);
}

#[test]
fn undefined_function() {
    assert_semantic_error(compile("int a = foo(1);"), SemanticErrorKind::UndefinedFunction);
}

#[test]
fn variable_called_as_function() {
    assert_semantic_error(
        compile("int a = 1; int b = a(2);"),
        SemanticErrorKind::NotAFunction,
    );
}

#[test]
fn function_used_as_variable() {
    let source = r#"
        int f() { return 1; }
        int a = f + 1;
    "#;
    assert_semantic_error(compile(source), SemanticErrorKind::FunctionUsedAsVariable);
}

#[test]
fn scalar_indexed() {
    assert_semantic_error(
        compile("int a = 1; int b = a[0];"),
        SemanticErrorKind::VariableUsedAsArray,
    );
}

#[test]
fn wrong_number_of_indices() {
    assert_semantic_error(
        compile("int m[2][2]; int b = m[1];"),
        SemanticErrorKind::VariableUsedAsArray,
    );
}

// ── Calls ────────────────────────────────────────────────────────────────

#[test]
fn too_many_arguments() {
    let source = r#"
        int f(int a) { return a; }
        int b = f(1, 2);
    "#;
    assert_semantic_error(compile(source), SemanticErrorKind::ArgumentCountMismatch);
}

#[test]
fn too_few_arguments() {
    let source = r#"
        int f(int a, int b) { return a + b; }
        int c = f(1);
    "#;
    assert_semantic_error(compile(source), SemanticErrorKind::ArgumentCountMismatch);
}

#[test]
fn void_result_used_as_value() {
    let source = r#"
        void f() { }
        int a = f();
    "#;
    assert_semantic_error(compile(source), SemanticErrorKind::VoidValue);
}

#[test]
fn recursive_inline() {
    let source = r#"
        inline int f(int n) { return f(n - 1); }
        int a = f(3);
    "#;
    assert_semantic_error(compile(source), SemanticErrorKind::RecursiveInline);
}

#[test]
fn declared_but_never_defined() {
    let source = r#"
        int f(int a);
        int b = f(1);
    "#;
    match compile(source) {
        Err(CompileError::Link(LinkError::MissingLabel(label))) => assert_eq!(label, "f"),
        other => panic!("Expected a missing label, got: {:?}", other.err()),
    }
}

// ── Control flow ─────────────────────────────────────────────────────────

#[test]
fn return_outside_function() {
    assert_semantic_error(compile("int a = 1; return a;"), SemanticErrorKind::ReturnOutsideFunction);
}

#[test]
fn break_outside_loop() {
    assert_semantic_error(compile("int a = 1; break;"), SemanticErrorKind::BreakOutsideLoop);
}

#[test]
fn continue_outside_loop() {
    let source = r#"
        int a = 1;
        if (a) { continue; }
    "#;
    assert_semantic_error(compile(source), SemanticErrorKind::ContinueOutsideLoop);
}

#[test]
fn break_inside_function_called_from_loop() {
    let source = r#"
        void f() { break; }
        for (int i = 0; i < 2; i += 1) { f(); }
    "#;
    assert_semantic_error(compile(source), SemanticErrorKind::BreakOutsideLoop);
}

// ── Operands ─────────────────────────────────────────────────────────────

#[test]
fn non_constant_shift() {
    assert_semantic_error(
        compile("int a = 1; int b = 2; int c = a << b;"),
        SemanticErrorKind::NonConstantShift,
    );
}

#[test]
fn address_of_a_literal() {
    assert_semantic_error(compile("int *p = &3;"), SemanticErrorKind::InvalidOperand);
}

#[test]
fn dereference_of_a_non_pointer() {
    assert_semantic_error(
        compile("int a = 1; int b = *a;"),
        SemanticErrorKind::InvalidOperand,
    );
}

#[test]
fn assignment_to_an_array() {
    assert_semantic_error(compile("int a[2]; a = 3;"), SemanticErrorKind::InvalidAssignment);
}

#[test]
fn assignment_to_an_expression() {
    assert_semantic_error(
        compile("int a = 1; a + 1 = 3;"),
        SemanticErrorKind::InvalidAssignment,
    );
}

// ── Inline assembly ──────────────────────────────────────────────────────

#[test]
fn asm_unknown_instruction() {
    let result = compile("int a = 1;\n__asm__(\"frob $1, $2\");");
    match result {
        Err(CompileError::Asm { line, .. }) => assert_eq!(line, 2),
        other => panic!("Expected an asm error, got: {:?}", other.err()),
    }
}

#[test]
fn asm_unknown_register() {
    let result = compile(r#"__asm__("addi $40, $0, 1");"#);
    assert!(
        matches!(result, Err(CompileError::Asm { .. })),
        "Expected an asm error, got: {:?}",
        result.err()
    );
}

#[test]
fn asm_undefined_variable() {
    assert_semantic_error(
        compile(r#"__asm__("addi (ghost), $0, 1");"#),
        SemanticErrorKind::UndefinedVariable,
    );
}

// ── Error location accuracy ─────────────────────────────────────────────

#[test]
fn error_location_single_line() {
    match compile("int x = 1; int y = z;") {
        Err(e @ CompileError::Semantic { .. }) => assert_eq!(e.line(), Some(1)),
        other => panic!("Expected a semantic error, got: {:?}", other.err()),
    }
}

#[test]
fn error_location_multiline() {
    let source = "int a = 1;\nint b = 2;\n\nint c = d + a;\n";
    match compile(source) {
        Err(e @ CompileError::Semantic { .. }) => assert_eq!(e.line(), Some(4)),
        other => panic!("Expected a semantic error, got: {:?}", other.err()),
    }
}

#[test]
fn semantic_error_message_format() {
    let err = compile("int a = 1;\nint b = q;").unwrap_err();
    let text = err.to_string();
    assert!(
        text.starts_with("SemanticError:UndefinedVariable (line 2)"),
        "unexpected message: {}",
        text
    );
}

// ── Helper ───────────────────────────────────────────────────────────────

fn assert_semantic_error(result: Result<Compilation, CompileError>, expected: SemanticErrorKind) {
    match result {
        Ok(_) => panic!("Expected {:?} error, but compilation succeeded", expected),
        Err(CompileError::Semantic { kind, .. }) => {
            assert_eq!(kind, expected);
        }
        Err(other) => panic!("Expected {:?} semantic error, got: {:?}", expected, other),
    }
}
