//! Built-in function signatures
//!
//! Each intrinsic has a fixed arity and result kind. The parser checks
//! argument kinds with [`Intrinsic::accepts`]; the generator lowers calls to
//! `MacroExecutor` invocations or inline conversions.

use super::ValueKind;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    /// Per-instance counter, incremented on every call
    UniqueL,
    /// Process-wide number assigned when the instance is created
    UniqueG,
    /// Whether a slot holds a value
    Exists,
    Int,
    Real,
    Str,
    Bool,
    /// Array length or string length
    Len,
    /// Environment variable lookup, empty string when unset
    Environment,
}

impl Intrinsic {
    pub const ALL: [Intrinsic; 9] = [
        Intrinsic::UniqueL,
        Intrinsic::UniqueG,
        Intrinsic::Exists,
        Intrinsic::Int,
        Intrinsic::Real,
        Intrinsic::Str,
        Intrinsic::Bool,
        Intrinsic::Len,
        Intrinsic::Environment,
    ];

    pub fn from_name(name: &str) -> Option<Intrinsic> {
        Self::ALL.into_iter().find(|i| i.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Intrinsic::UniqueL => "uniqueL",
            Intrinsic::UniqueG => "uniqueG",
            Intrinsic::Exists => "exists",
            Intrinsic::Int => "int",
            Intrinsic::Real => "real",
            Intrinsic::Str => "str",
            Intrinsic::Bool => "bool",
            Intrinsic::Len => "len",
            Intrinsic::Environment => "environment",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Intrinsic::UniqueL | Intrinsic::UniqueG => 0,
            _ => 1,
        }
    }

    pub fn result_kind(self) -> ValueKind {
        match self {
            Intrinsic::UniqueL | Intrinsic::UniqueG | Intrinsic::Int | Intrinsic::Len => ValueKind::Integer,
            Intrinsic::Real => ValueKind::Real,
            Intrinsic::Str | Intrinsic::Environment => ValueKind::String,
            Intrinsic::Exists | Intrinsic::Bool => ValueKind::Boolean,
        }
    }

    /// Deterministic intrinsics may be folded when their arguments are constant
    pub fn is_deterministic(self) -> bool {
        !matches!(
            self,
            Intrinsic::UniqueL | Intrinsic::UniqueG | Intrinsic::Exists | Intrinsic::Environment
        )
    }

    /// Argument check. `is_slot` is true when the argument is a bare slot reference.
    pub fn accepts(self, kind: ValueKind, is_slot: bool) -> bool {
        match self {
            Intrinsic::UniqueL | Intrinsic::UniqueG => false,
            Intrinsic::Exists => is_slot,
            Intrinsic::Int | Intrinsic::Real => {
                matches!(kind, ValueKind::Integer | ValueKind::Real | ValueKind::String)
            }
            Intrinsic::Str => true,
            Intrinsic::Bool => matches!(kind, ValueKind::String | ValueKind::Boolean),
            Intrinsic::Len => kind == ValueKind::String || (is_slot && kind.is_array()),
            Intrinsic::Environment => kind == ValueKind::String,
        }
    }

    /// Human-readable signature for diagnostics
    pub fn signature(self) -> &'static str {
        match self {
            Intrinsic::UniqueL => "uniqueL() -> int",
            Intrinsic::UniqueG => "uniqueG() -> int",
            Intrinsic::Exists => "exists(slot) -> bool",
            Intrinsic::Int => "int(int|real|str) -> int",
            Intrinsic::Real => "real(int|real|str) -> real",
            Intrinsic::Str => "str(any) -> str",
            Intrinsic::Bool => "bool(str|bool) -> bool",
            Intrinsic::Len => "len(array slot|str) -> int",
            Intrinsic::Environment => "environment(str) -> str",
        }
    }
}

impl fmt::Display for Intrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
