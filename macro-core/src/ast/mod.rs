//! Abstract Syntax Tree definitions for macros
//!
//! Expressions are typed at construction: the parser only ever builds nodes
//! whose operand kinds agree, so [`Expr::kind`] never fails.

use std::fmt;
use crate::error::{Error, Result};
use crate::types::conversion::convert;
use crate::types::intrinsics::Intrinsic;
use crate::types::{Value, ValueKind};

mod command;

pub use command::{Branch, Case, Command, Declarations, MacroDef, Slot};

/// Which part of the declaration list a slot belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRole {
    Positional,
    Key,
    Local,
}

impl fmt::Display for SlotRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotRole::Positional => write!(f, "positional parameter"),
            SlotRole::Key => write!(f, "key parameter"),
            SlotRole::Local => write!(f, "local"),
        }
    }
}

/// Reference to a declared slot
#[derive(Debug, Clone, PartialEq)]
pub struct SlotRef {
    /// Sequential slot number, assigned at declaration
    pub index: usize,
    pub name: String,
    pub kind: ValueKind,
    pub role: SlotRole,
}

/// Name lookup used while parsing expressions
pub trait SymbolResolver {
    fn resolve(&self, name: &str) -> Option<SlotRef>;
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg, // -
    Not, // !
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add, // +
    Sub, // -
    Mul, // *
    Div, // /
    Rem, // %
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq, // ==
    Ne, // !=
    Lt, // <
    Le, // <=
    Gt, // >
    Ge, // >=
}

impl CompareOp {
    pub fn inverse(self) -> CompareOp {
        match self {
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Ge => CompareOp::Lt,
        }
    }

    /// Branch instruction testing this relation against zero
    pub fn branch(self) -> &'static str {
        match self {
            CompareOp::Eq => "ifeq",
            CompareOp::Ne => "ifne",
            CompareOp::Lt => "iflt",
            CompareOp::Le => "ifle",
            CompareOp::Gt => "ifgt",
            CompareOp::Ge => "ifge",
        }
    }

    /// Apply to an ordering; an unordered pair (NaN) counts as greater
    pub fn holds(self, ordering: Option<std::cmp::Ordering>) -> bool {
        use std::cmp::Ordering::*;
        let ordering = ordering.unwrap_or(Greater);
        match self {
            CompareOp::Eq => ordering == Equal,
            CompareOp::Ne => ordering != Equal,
            CompareOp::Lt => ordering == Less,
            CompareOp::Le => ordering != Greater,
            CompareOp::Gt => ordering == Greater,
            CompareOp::Ge => ordering != Less,
        }
    }
}

/// Short-circuit connectives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And, // &&
    Or,  // ||
}

/// Typed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Value),

    /// Read of a whole slot
    Slot(SlotRef),

    Unary { op: UnaryOp, operand: Box<Expr> },

    /// Both operands have `kind` (int or real) after widening
    Arithmetic {
        op: ArithOp,
        kind: ValueKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Operands share one scalar kind
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Logical { op: LogicalOp, operands: Vec<Expr> },

    Ternary {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },

    /// All operands are strings
    Concat(Vec<Expr>),

    /// Element read `name[index]`
    Index { slot: SlotRef, index: Box<Expr> },

    /// Intrinsic call; implicit conversions are calls too
    Call { function: Intrinsic, args: Vec<Expr> },
}

impl Expr {
    pub fn string(text: impl Into<String>) -> Expr {
        Expr::Constant(Value::Str(text.into()))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Expr::Constant(value) => value.kind(),
            Expr::Slot(slot) => slot.kind,
            Expr::Unary { op: UnaryOp::Neg, operand } => operand.kind(),
            Expr::Unary { op: UnaryOp::Not, .. } => ValueKind::Boolean,
            Expr::Arithmetic { kind, .. } => *kind,
            Expr::Compare { .. } | Expr::Logical { .. } => ValueKind::Boolean,
            Expr::Ternary { then_branch, .. } => then_branch.kind(),
            Expr::Concat(_) => ValueKind::String,
            Expr::Index { slot, .. } => slot.kind.element_kind(),
            Expr::Call { function, .. } => function.result_kind(),
        }
    }

    /// True when the node is built from constants only and calls no
    /// non-deterministic intrinsic
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Constant(_) => true,
            Expr::Slot(_) | Expr::Index { .. } => false,
            Expr::Unary { operand, .. } => operand.is_constant(),
            Expr::Arithmetic { left, right, .. } | Expr::Compare { left, right, .. } => {
                left.is_constant() && right.is_constant()
            }
            Expr::Logical { operands, .. } | Expr::Concat(operands) => {
                operands.iter().all(Expr::is_constant)
            }
            Expr::Ternary { condition, then_branch, else_branch } => {
                condition.is_constant() && then_branch.is_constant() && else_branch.is_constant()
            }
            Expr::Call { function, args } => {
                function.is_deterministic() && args.iter().all(Expr::is_constant)
            }
        }
    }

    /// Evaluate a constant-only expression
    pub fn evaluate_constant(&self) -> Result<Value> {
        match self {
            Expr::Constant(value) => Ok(value.clone()),
            Expr::Slot(slot) | Expr::Index { slot, .. } => Err(Error::calculation(format!(
                "'{}' is not a constant",
                slot.name
            ))),
            Expr::Unary { op, operand } => {
                let value = operand.evaluate_constant()?;
                match (op, value) {
                    (UnaryOp::Neg, Value::Int(v)) => Ok(Value::Int(v.wrapping_neg())),
                    (UnaryOp::Neg, Value::Real(v)) => Ok(Value::Real(-v)),
                    (UnaryOp::Not, Value::Bool(v)) => Ok(Value::Bool(!v)),
                    (_, v) => Err(Error::calculation(format!("bad operand kind {}", v.kind()))),
                }
            }
            Expr::Arithmetic { op, left, right, .. } => {
                let l = left.evaluate_constant()?;
                let r = right.evaluate_constant()?;
                match (l, r) {
                    (Value::Int(a), Value::Int(b)) => arith_long(*op, a, b).map(Value::Int),
                    (Value::Real(a), Value::Real(b)) => Ok(Value::Real(arith_double(*op, a, b))),
                    (a, b) => Err(Error::calculation(format!(
                        "bad operand kinds {} and {}",
                        a.kind(),
                        b.kind()
                    ))),
                }
            }
            Expr::Compare { op, left, right } => {
                let l = left.evaluate_constant()?;
                let r = right.evaluate_constant()?;
                let ordering = match (&l, &r) {
                    (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
                    (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
                    (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                    (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
                    _ => {
                        return Err(Error::calculation(format!(
                            "cannot compare {} with {}",
                            l.kind(),
                            r.kind()
                        )));
                    }
                };
                Ok(Value::Bool(op.holds(ordering)))
            }
            Expr::Logical { op, operands } => {
                for operand in operands {
                    let v = operand.evaluate_constant()?.as_bool()?;
                    match op {
                        LogicalOp::And if !v => return Ok(Value::Bool(false)),
                        LogicalOp::Or if v => return Ok(Value::Bool(true)),
                        _ => {}
                    }
                }
                Ok(Value::Bool(*op == LogicalOp::And))
            }
            Expr::Ternary { condition, then_branch, else_branch } => {
                if condition.evaluate_constant()?.as_bool()? {
                    then_branch.evaluate_constant()
                } else {
                    else_branch.evaluate_constant()
                }
            }
            Expr::Concat(operands) => {
                let mut out = String::new();
                for operand in operands {
                    out.push_str(operand.evaluate_constant()?.as_str()?);
                }
                Ok(Value::Str(out))
            }
            Expr::Call { function, args } => {
                if !function.is_deterministic() {
                    return Err(Error::calculation(format!("{}() is not a constant", function)));
                }
                let arg = args
                    .first()
                    .ok_or_else(|| Error::internal(format!("{}() without argument", function)))?
                    .evaluate_constant()?;
                match function {
                    Intrinsic::Len => Ok(Value::Int(arg.len()? as i64)),
                    other => convert(&arg, other.result_kind()),
                }
            }
        }
    }
}

/// Integer arithmetic with wrap-around; division by zero is an error
pub fn arith_long(op: ArithOp, a: i64, b: i64) -> Result<i64> {
    match op {
        ArithOp::Add => Ok(a.wrapping_add(b)),
        ArithOp::Sub => Ok(a.wrapping_sub(b)),
        ArithOp::Mul => Ok(a.wrapping_mul(b)),
        ArithOp::Div | ArithOp::Rem if b == 0 => Err(Error::calculation("division by zero")),
        ArithOp::Div => Ok(a.wrapping_div(b)),
        ArithOp::Rem => Ok(a.wrapping_rem(b)),
    }
}

pub fn arith_double(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Rem => a % b,
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArithOp::Add => write!(f, "+"),
            ArithOp::Sub => write!(f, "-"),
            ArithOp::Mul => write!(f, "*"),
            ArithOp::Div => write!(f, "/"),
            ArithOp::Rem => write!(f, "%"),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "=="),
            CompareOp::Ne => write!(f, "!="),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Le => write!(f, "<="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Ge => write!(f, ">="),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Box<Expr> {
        Box::new(Expr::Constant(Value::Int(v)))
    }

    fn slot() -> SlotRef {
        SlotRef { index: 0, name: "x".into(), kind: ValueKind::Integer, role: SlotRole::Positional }
    }

    #[test]
    fn test_fold_precedence_shape() {
        // 1 + 2 * 3
        let expr = Expr::Arithmetic {
            op: ArithOp::Add,
            kind: ValueKind::Integer,
            left: int(1),
            right: Box::new(Expr::Arithmetic {
                op: ArithOp::Mul,
                kind: ValueKind::Integer,
                left: int(2),
                right: int(3),
            }),
        };
        assert!(expr.is_constant());
        assert_eq!(expr.kind(), ValueKind::Integer);
        assert_eq!(expr.evaluate_constant().unwrap(), Value::Int(7));
    }

    #[test]
    fn test_division_by_zero() {
        let expr = Expr::Arithmetic { op: ArithOp::Div, kind: ValueKind::Integer, left: int(1), right: int(0) };
        assert!(matches!(expr.evaluate_constant(), Err(Error::CalculationError { .. })));
    }

    #[test]
    fn test_slots_are_not_constant() {
        let expr = Expr::Compare { op: CompareOp::Lt, left: Box::new(Expr::Slot(slot())), right: int(3) };
        assert!(!expr.is_constant());
        assert_eq!(expr.kind(), ValueKind::Boolean);
        assert!(expr.evaluate_constant().is_err());
    }

    #[test]
    fn test_nondeterministic_call_not_folded() {
        let call = Expr::Call { function: Intrinsic::UniqueL, args: vec![] };
        assert!(!call.is_constant());
        let conv = Expr::Call { function: Intrinsic::Str, args: vec![Expr::Constant(Value::Real(2.0))] };
        assert!(conv.is_constant());
        assert_eq!(conv.evaluate_constant().unwrap(), Value::Str("2.0".into()));
    }

    #[test]
    fn test_compare_inverse_and_nan() {
        assert_eq!(CompareOp::Lt.inverse(), CompareOp::Ge);
        assert_eq!(CompareOp::Le.inverse().inverse(), CompareOp::Le);
        assert!(!CompareOp::Lt.holds(None));
        assert!(CompareOp::Gt.holds(None));
    }

    #[test]
    fn test_logical_short_circuit_fold() {
        let expr = Expr::Logical {
            op: LogicalOp::Or,
            operands: vec![Expr::Constant(Value::Bool(false)), Expr::Constant(Value::Bool(true))],
        };
        assert_eq!(expr.evaluate_constant().unwrap(), Value::Bool(true));
    }
}
