//! Type system for macro values
//!
//! Eight kinds: four scalars and their array counterparts. Every slot and
//! every expression node carries exactly one kind, fixed at declaration.
//! - [`conversion`]: the destination × source conversion table
//! - [`intrinsics`]: built-in function signatures

use crate::error::{Error, Result};
use std::fmt;

pub mod conversion;
pub mod intrinsics;

/// Value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Integer,
    Real,
    String,
    Boolean,
    IntegerArray,
    RealArray,
    StringArray,
    BooleanArray,
}

impl ValueKind {
    pub const ALL: [ValueKind; 8] = [
        ValueKind::Integer,
        ValueKind::Real,
        ValueKind::String,
        ValueKind::Boolean,
        ValueKind::IntegerArray,
        ValueKind::RealArray,
        ValueKind::StringArray,
        ValueKind::BooleanArray,
    ];

    /// Parse a source spelling: `int`, `real`, `str`, `bool` (or `boolean`),
    /// optionally with `[]`
    pub fn from_source(text: &str) -> Option<ValueKind> {
        let text = text.trim();
        let (base, array) = match text.strip_suffix("[]") {
            Some(base) => (base.trim_end(), true),
            None => (text, false),
        };
        let scalar = match base {
            "int" => ValueKind::Integer,
            "real" => ValueKind::Real,
            "str" => ValueKind::String,
            "bool" | "boolean" => ValueKind::Boolean,
            _ => return None,
        };
        Some(if array { scalar.array_of() } else { scalar })
    }

    pub fn is_array(self) -> bool {
        matches!(
            self,
            ValueKind::IntegerArray | ValueKind::RealArray | ValueKind::StringArray | ValueKind::BooleanArray
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ValueKind::Integer | ValueKind::Real)
    }

    /// Element kind of an array kind; scalars map to themselves
    pub fn element_kind(self) -> ValueKind {
        match self {
            ValueKind::IntegerArray => ValueKind::Integer,
            ValueKind::RealArray => ValueKind::Real,
            ValueKind::StringArray => ValueKind::String,
            ValueKind::BooleanArray => ValueKind::Boolean,
            scalar => scalar,
        }
    }

    /// Array kind holding elements of this kind; array kinds map to themselves
    pub fn array_of(self) -> ValueKind {
        match self {
            ValueKind::Integer => ValueKind::IntegerArray,
            ValueKind::Real => ValueKind::RealArray,
            ValueKind::String => ValueKind::StringArray,
            ValueKind::Boolean => ValueKind::BooleanArray,
            array => array,
        }
    }

    /// Numeric values occupy two operand stack cells on the target machine
    pub fn is_wide(self) -> bool {
        self.is_numeric()
    }

    /// Accessor suffix used in slot instructions (`getLong`, `setStringAt`, ...)
    pub fn accessor(self) -> &'static str {
        match self.element_kind() {
            ValueKind::Integer => "Long",
            ValueKind::Real => "Double",
            ValueKind::String => "String",
            _ => "Boolean",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.element_kind() {
            ValueKind::Integer => "int",
            ValueKind::Real => "real",
            ValueKind::String => "str",
            _ => "bool",
        };
        if self.is_array() {
            write!(f, "{}[]", base)
        } else {
            write!(f, "{}", base)
        }
    }
}

/// A literal value tagged by kind
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Real(f64),
    Str(String),
    Bool(bool),
    IntArray(Vec<i64>),
    RealArray(Vec<f64>),
    StrArray(Vec<String>),
    BoolArray(Vec<bool>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Integer,
            Value::Real(_) => ValueKind::Real,
            Value::Str(_) => ValueKind::String,
            Value::Bool(_) => ValueKind::Boolean,
            Value::IntArray(_) => ValueKind::IntegerArray,
            Value::RealArray(_) => ValueKind::RealArray,
            Value::StrArray(_) => ValueKind::StringArray,
            Value::BoolArray(_) => ValueKind::BooleanArray,
        }
    }

    /// Empty array of the given array kind
    pub fn empty_array(kind: ValueKind) -> Option<Value> {
        match kind {
            ValueKind::IntegerArray => Some(Value::IntArray(Vec::new())),
            ValueKind::RealArray => Some(Value::RealArray(Vec::new())),
            ValueKind::StringArray => Some(Value::StrArray(Vec::new())),
            ValueKind::BooleanArray => Some(Value::BoolArray(Vec::new())),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(wrong_accessor("int", other)),
        }
    }

    pub fn as_real(&self) -> Result<f64> {
        match self {
            Value::Real(v) => Ok(*v),
            other => Err(wrong_accessor("real", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(v) => Ok(v),
            other => Err(wrong_accessor("str", other)),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(wrong_accessor("bool", other)),
        }
    }

    /// Number of elements of an array value, or characters of a string
    pub fn len(&self) -> Result<usize> {
        match self {
            Value::Str(s) => Ok(s.chars().count()),
            Value::IntArray(v) => Ok(v.len()),
            Value::RealArray(v) => Ok(v.len()),
            Value::StrArray(v) => Ok(v.len()),
            Value::BoolArray(v) => Ok(v.len()),
            other => Err(Error::calculation(format!("len() is not defined for {}", other.kind()))),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Element at `index` of an array value
    pub fn element(&self, index: i64) -> Result<Value> {
        let len = self.len()?;
        let i = checked_index(index, len)?;
        match self {
            Value::IntArray(v) => Ok(Value::Int(v[i])),
            Value::RealArray(v) => Ok(Value::Real(v[i])),
            Value::StrArray(v) => Ok(Value::Str(v[i].clone())),
            Value::BoolArray(v) => Ok(Value::Bool(v[i])),
            other => Err(wrong_accessor("array", other)),
        }
    }

    /// Replace the element at `index`; the element must already have the element kind
    pub fn set_element(&mut self, index: i64, element: Value) -> Result<()> {
        let len = self.len()?;
        let i = checked_index(index, len)?;
        match (self, element) {
            (Value::IntArray(v), Value::Int(e)) => v[i] = e,
            (Value::RealArray(v), Value::Real(e)) => v[i] = e,
            (Value::StrArray(v), Value::Str(e)) => v[i] = e,
            (Value::BoolArray(v), Value::Bool(e)) => v[i] = e,
            (array, element) => {
                return Err(Error::calculation(format!(
                    "cannot store {} into {}",
                    element.kind(),
                    array.kind()
                )));
            }
        }
        Ok(())
    }
}

fn wrong_accessor(wanted: &str, value: &Value) -> Error {
    Error::calculation(format!("value of kind {} read as {}", value.kind(), wanted))
}

fn checked_index(index: i64, len: usize) -> Result<usize> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or_else(|| Error::calculation(format!("index {} out of range 0..{}", index, len)))
}

/// Render a real so that it always reads back as a real (`6.0`, `0.5`, `1e20`)
pub fn render_real(v: f64) -> String {
    format!("{:?}", v)
}

fn write_list<T>(f: &mut fmt::Formatter<'_>, items: &[T], each: impl Fn(&T) -> String) -> fmt::Result {
    write!(f, "{{")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{}", each(item))?;
    }
    write!(f, "}}")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", render_real(*v)),
            Value::Str(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::IntArray(v) => write_list(f, v, |e| e.to_string()),
            Value::RealArray(v) => write_list(f, v, |e| render_real(*e)),
            Value::StrArray(v) => write_list(f, v, |e| e.clone()),
            Value::BoolArray(v) => write_list(f, v, |e| e.to_string()),
        }
    }
}
