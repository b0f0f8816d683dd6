//! End-to-end interpreter scenarios.

use pretty_assertions::assert_eq;

use sap::interp::ast::QualifiedId;
use sap::interp::cst::DeclId;
use sap::interp::eval::Evaluator;
use sap::interp::parser::parse_script;
use sap::interp::value::Value;
use sap::interp::Interpreter;

// Checks a script and returns the evaluator's view of its globals.
fn run(source: &str) -> (sap::interp::typecheck::Typechecker, Vec<(String, Value)>) {
    let mut interpreter = Interpreter::new();
    let stmts = parse_script("test.sap", source).unwrap();
    let block = interpreter.tc.check_block(&stmts).unwrap();

    let mut evaluator = Evaluator::new(&interpreter.tc);
    evaluator.eval_block(&block).unwrap();

    let mut globals = Vec::new();
    for (i, decl) in interpreter.tc.decls.iter().enumerate() {
        if let Some(value) = evaluator.global(DeclId(i as u32)) {
            globals.push((decl.name.clone(), value.clone()));
        }
    }

    (interpreter.tc, globals)
}

fn global<'a>(globals: &'a [(String, Value)], name: &str) -> &'a Value {
    &globals
        .iter()
        .find(|(n, _)| n == name)
        .unwrap_or_else(|| panic!("no global named '{}'", name))
        .1
}

#[test]
fn arithmetic_with_precedence() {
    let (tc, globals) = run("let x: int = 2 + 3 * 4;");
    assert_eq!(global(&globals, "x").as_int(), Some(14));

    // The declaration's inferred type is int.
    let decls = tc.forest.lookup(tc.forest.root(), &QualifiedId::plain("x"));
    assert_eq!(tc.declaration(decls[0]).ty, tc.types.int());
}

#[test]
fn overloads_select_by_argument_type() {
    let (_, globals) = run(
        "fn f(x: int) -> int { return x * 2; }\n\
         fn f(x: float) -> float { return x + 1.0; }\n\
         let a = f(3);\n\
         let b = f(3.0);",
    );
    assert_eq!(global(&globals, "a").as_int(), Some(6));
    assert_eq!(global(&globals, "b").as_float(), Some(4.0));
}

#[test]
fn string_literal_unicode_escape() {
    let mut interpreter = Interpreter::new();
    let stmts = parse_script("test.sap", r#"let s = "hello — world";"#).unwrap();
    let block = interpreter.tc.check_block(&stmts).unwrap();

    // The CST string carries the decoded escape.
    let sap::interp::cst::StmtKind::Let {
        init: Some(init), ..
    } = &block.stmts[0].kind
    else {
        panic!("expected a let statement");
    };
    let sap::interp::cst::ExprKind::StringLit(text) = &init.kind else {
        panic!("expected a string literal");
    };
    assert_eq!(text.chars().nth(6), Some('\u{2014}'));
}

#[test]
fn struct_defaults_and_update() {
    let (_, globals) = run(
        "struct S { a: int, b: int = 7 }\n\
         let first = S{a: 1};\n\
         let second = S{a: 1} // {b: 9};",
    );

    let Value::Struct { fields, .. } = global(&globals, "first") else {
        panic!("expected a struct value");
    };
    assert_eq!(fields[0].as_int(), Some(1));
    assert_eq!(fields[1].as_int(), Some(7));

    let Value::Struct { fields, .. } = global(&globals, "second") else {
        panic!("expected a struct value");
    };
    assert_eq!(fields[0].as_int(), Some(1));
    assert_eq!(fields[1].as_int(), Some(9));
}

#[test]
fn returning_a_local_moves_it_out() {
    let (_, globals) = run(
        "fn make() -> string { let s = \"abc\"; return s; }\n\
         let out = make();",
    );
    assert_eq!(global(&globals, "out").as_string().as_deref(), Some("abc"));
}

#[test]
fn while_loop_with_break_and_continue() {
    let (_, globals) = run(
        "var total = 0;\n\
         var i = 0;\n\
         while true {\n\
             i += 1;\n\
             if i > 10 { break; }\n\
             if i % 2 == 0 { continue; }\n\
             total += i;\n\
         }",
    );
    // 1 + 3 + 5 + 7 + 9
    assert_eq!(global(&globals, "total").as_int(), Some(25));
}

#[test]
fn chained_comparisons() {
    let (_, globals) = run("let ok = 1 < 2 < 3;\nlet bad = 1 < 3 < 2;");
    assert_eq!(global(&globals, "ok").as_bool(), Some(true));
    assert_eq!(global(&globals, "bad").as_bool(), Some(false));
}

#[test]
fn optionals_and_null_coalesce() {
    let (_, globals) = run(
        "let some: ?int = 5;\n\
         let none: ?int = null;\n\
         let a = some ?? 0;\n\
         let b = none ?? 7;\n\
         let has = some?;",
    );
    assert_eq!(global(&globals, "a").as_int(), Some(5));
    assert_eq!(global(&globals, "b").as_int(), Some(7));
    assert_eq!(global(&globals, "has").as_bool(), Some(true));
}

#[test]
fn enums_and_context_identifiers() {
    let (_, globals) = run(
        "enum Colour { red, green, blue }\n\
         let c: Colour = .green;\n\
         let n = cast(c, int);",
    );
    assert_eq!(global(&globals, "n").as_int(), Some(1));
}

#[test]
fn unions_and_variant_cast() {
    let (_, globals) = run(
        "union Shape { Circle(radius: float), Square(side: float) }\n\
         let s: Shape = .Circle(radius: 2.0);",
    );
    let Value::Union { case, fields, .. } = global(&globals, "s") else {
        panic!("expected a union value");
    };
    assert_eq!(*case, 0);
    assert_eq!(fields[0].as_float(), Some(2.0));
}

#[test]
fn ufcs_call_takes_pointer_receiver() {
    let (_, globals) = run(
        "struct Counter { n: int }\n\
         fn bump(self: &mut Counter) -> int { self.n += 1; return self.n; }\n\
         var c = Counter{n: 41};\n\
         let out = c.bump();",
    );
    assert_eq!(global(&globals, "out").as_int(), Some(42));
    let Value::Struct { fields, .. } = global(&globals, "c") else {
        panic!("expected a struct value");
    };
    assert_eq!(fields[0].as_int(), Some(42));
}

#[test]
fn fstrings_interpolate() {
    let (_, globals) = run("let x = 6;\nlet s = f\"x = {x * 7}!\";");
    assert_eq!(
        global(&globals, "s").as_string().as_deref(),
        Some("x = 42!")
    );
}

#[test]
fn variadic_builtin_call() {
    // `print` takes a variadic [any...]; exercising the packing path.
    let (_, globals) = run("fn sum2(a: int, b: int) -> int { return a + b; }\nlet s = sum2(b: 2, a: 40);");
    assert_eq!(global(&globals, "s").as_int(), Some(42));
}

#[test]
fn no_matching_overload_lists_candidates() {
    let mut interpreter = Interpreter::new();
    let stmts = parse_script(
        "test.sap",
        "fn g(x: bool) -> int { return 1; }\nlet y = g(3);",
    )
    .unwrap();
    let error = interpreter.tc.check_block(&stmts).unwrap_err();
    assert!(error.message.contains("no matching overload"));
    assert!(!error.infos.is_empty());
    assert!(error.infos[0].message.contains("rejected"));
}

#[test]
fn ambiguous_reference_is_an_error() {
    let mut interpreter = Interpreter::new();
    let stmts = parse_script(
        "test.sap",
        "fn h(x: int) -> int { return x; }\n\
         fn h(x: any) -> int { return 0; }\n\
         let k = h(1.5);",
    )
    .unwrap();
    // 1.5 -> any costs 5; no other candidate converts; unique winner.
    assert!(interpreter.tc.check_block(&stmts).is_ok());
}

#[test]
fn document_run_produces_content() {
    let mut interpreter = Interpreter::new();
    let output = interpreter
        .run_document(
            "test.sap",
            "let greeting = \"hello\";\n\\start_document;\nplain words here",
        )
        .unwrap();
    assert_eq!(
        output.content,
        [
            sap::interp::ContentPiece::Word("plain".to_string()),
            sap::interp::ContentPiece::Word("words".to_string()),
            sap::interp::ContentPiece::Word("here".to_string()),
        ]
    );
}
