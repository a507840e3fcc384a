//! Expression typing tests
//!
//! Every expression is checked while the command tree is built; these tests
//! drive the checks through whole macro sources.

use macro_core::{build, compile, Command, Error, Expr, ValueKind};

fn macro_with(header: &str, line: &str) -> String {
    format!("m .macro {}\n{}\n\t.mend\n", header, line)
}

fn set_value(header: &str, line: &str) -> Expr {
    let def = build(&macro_with(header, line)).unwrap();
    match def.body.into_iter().next() {
        Some(Command::Set { value, .. }) => value,
        other => panic!("expected .set, got {:?}", other),
    }
}

fn rejected(header: &str, line: &str) -> String {
    match build(&macro_with(header, line)) {
        Err(Error::SyntaxError { message, .. }) => message,
        other => panic!("expected a syntax error, got {:?}", other),
    }
}

// ===== Arithmetic =====

#[test]
fn test_int_arithmetic_stays_int() {
    let value = set_value("x:int,y:int", "x .set x * y + 1");
    assert_eq!(value.kind(), ValueKind::Integer);
}

#[test]
fn test_mixed_arithmetic_widens_to_real() {
    let value = set_value("x:int,r:real", "r .set x + r");
    assert_eq!(value.kind(), ValueKind::Real);
}

#[test]
fn test_real_into_int_truncates_through_call() {
    let value = set_value("x:int,r:real", "x .set r");
    assert!(matches!(value, Expr::Call { .. }));
    assert_eq!(value.kind(), ValueKind::Integer);
}

#[test]
fn test_string_arithmetic_rejected() {
    assert!(rejected("s:str", "s .set s - 1").contains("numeric"));
}

// ===== Comparison and logic =====

#[test]
fn test_comparison_of_bools_only_equality() {
    let b = build(&macro_with("a:bool,b:bool", "a .set a == b")).map(|_| ());
    assert!(b.is_ok());
    assert!(build(&macro_with("a:bool,b:bool", "a .set a < b")).is_err());
}

#[test]
fn test_array_comparison_rejected() {
    assert!(build(&macro_with("a:int[],b:int[],f:bool", "f .set a == b")).is_err());
}

#[test]
fn test_logic_needs_bools() {
    assert!(build(&macro_with("x:int,f:bool", "f .set x && f")).is_err());
    assert!(build(&macro_with("x:int,f:bool", "f .set !(x > 1) || f")).is_ok());
}

// ===== Ternary, concatenation, indexing =====

#[test]
fn test_ternary_unifies_numeric_branches() {
    let value = set_value("x:int,r:real", "r .set (x > 0) ? x : r");
    assert_eq!(value.kind(), ValueKind::Real);
}

#[test]
fn test_ternary_condition_must_be_bool() {
    assert!(build(&macro_with("x:int", "x .set x ? 1 : 2")).is_err());
}

#[test]
fn test_concat_stringifies_operands() {
    let value = set_value("x:int,s:str", "s .set \"n=\" # x # true");
    assert_eq!(value.kind(), ValueKind::String);
}

#[test]
fn test_index_requires_int_and_array() {
    let value = set_value("a:real[],r:real", "r .set a[1]");
    assert_eq!(value.kind(), ValueKind::Real);
    assert!(build(&macro_with("x:int,r:real", "r .set x[1]")).is_err());
    assert!(build(&macro_with("a:real[],r:real", "r .set a[\"1\"]")).is_err());
}

// ===== Intrinsics =====

#[test]
fn test_intrinsic_result_kinds() {
    assert_eq!(set_value("x:int", "x .set len(\"abc\")").kind(), ValueKind::Integer);
    assert_eq!(set_value("s:str", "s .set environment(\"HOME\")").kind(), ValueKind::String);
    assert_eq!(set_value("f:bool,k:int=", "f .set exists(k)").kind(), ValueKind::Boolean);
    assert_eq!(set_value("x:int", "x .set uniqueG()").kind(), ValueKind::Integer);
}

#[test]
fn test_intrinsic_arity_and_argument_kinds() {
    assert!(build(&macro_with("x:int", "x .set len()")).is_err());
    assert!(build(&macro_with("x:int", "x .set len(1, 2)")).is_err());
    assert!(build(&macro_with("x:int,f:bool", "f .set bool(x)")).is_err());
    assert!(build(&macro_with("x:int,f:bool", "f .set exists(x + 1)")).is_err());
    assert!(rejected("x:int", "x .set nothing(1)").contains("unknown function"));
}

// ===== Conversions on assignment =====

#[test]
fn test_bool_into_int_is_illegal() {
    assert!(rejected("x:int,f:bool", "x .set f").contains("cannot convert"));
}

#[test]
fn test_scalar_into_array_rejected_in_code() {
    assert!(build(&macro_with("a:int[]", "a .set 1")).is_err());
}

#[test]
fn test_any_kind_renders_into_string() {
    for header in ["v:int", "v:real", "v:bool", "v:int[]"] {
        let source = format!("m .macro {},s:str\ns .set v\n\t.mend\n", header);
        assert!(compile(&source).is_ok(), "{} should render into str", header);
    }
}

#[test]
fn test_constant_parse_failure_reported_at_build() {
    let err = build(&macro_with("x:int", "x .set \"abc\"")).unwrap_err();
    assert_eq!(err.position().map(|p| p.0), Some(2));
}
