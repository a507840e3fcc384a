//! Kind conversion table
//!
//! Indexed by destination kind × source kind. The table is total: every one of
//! the 64 pairs maps to a [`Conversion`], and `Illegal` is a defined failure.

use super::{Value, ValueKind};
use crate::error::{Error, Result};

/// How a value of one kind becomes a value of another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Same kind
    Identity,
    /// real → int, toward zero
    Truncate,
    /// int → real
    Widen,
    /// str → int/real/bool by parsing text
    Parse,
    /// anything → str by textual rendering
    Render,
    /// scalar → one-element array, element converted by the scalar rule
    Wrap,
    /// array → array, element by element
    ElementWise,
    /// No conversion exists
    Illegal,
}

/// Look up the conversion from `src` into `dest`
pub fn conversion(dest: ValueKind, src: ValueKind) -> Conversion {
    use ValueKind::*;

    if dest == src {
        return Conversion::Identity;
    }
    if dest.is_array() {
        let element = scalar_conversion(dest.element_kind(), src.element_kind());
        if element == Conversion::Illegal {
            return Conversion::Illegal;
        }
        return if src.is_array() { Conversion::ElementWise } else { Conversion::Wrap };
    }
    if src.is_array() {
        return if dest == String { Conversion::Render } else { Conversion::Illegal };
    }
    scalar_conversion(dest, src)
}

fn scalar_conversion(dest: ValueKind, src: ValueKind) -> Conversion {
    use ValueKind::*;

    match (dest, src) {
        (d, s) if d == s => Conversion::Identity,
        (Integer, Real) => Conversion::Truncate,
        (Integer, String) | (Real, String) | (Boolean, String) => Conversion::Parse,
        (Real, Integer) => Conversion::Widen,
        (String, _) => Conversion::Render,
        _ => Conversion::Illegal,
    }
}

/// Whether `src` converts into `dest` at all
pub fn is_convertible(dest: ValueKind, src: ValueKind) -> bool {
    conversion(dest, src) != Conversion::Illegal
}

/// Convert a value into `dest` following the table
pub fn convert(value: &Value, dest: ValueKind) -> Result<Value> {
    let src = value.kind();
    match conversion(dest, src) {
        Conversion::Identity => Ok(value.clone()),
        Conversion::Illegal => Err(illegal(dest, src)),
        Conversion::Render => Ok(Value::Str(value.to_string())),
        Conversion::Truncate | Conversion::Widen | Conversion::Parse => convert_scalar(value, dest),
        Conversion::Wrap => {
            let element = convert_scalar(value, dest.element_kind())?;
            Ok(wrap(element))
        }
        Conversion::ElementWise => {
            let len = value.len()?;
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                out.push(convert_scalar(&value.element(i as i64)?, dest.element_kind())?);
            }
            collect(dest, out)
        }
    }
}

fn convert_scalar(value: &Value, dest: ValueKind) -> Result<Value> {
    match (dest, value) {
        (_, v) if v.kind() == dest => Ok(v.clone()),
        (ValueKind::Integer, Value::Real(r)) => Ok(Value::Int(r.trunc() as i64)),
        (ValueKind::Integer, Value::Str(s)) => parse_long(s).map(Value::Int),
        (ValueKind::Real, Value::Int(i)) => Ok(Value::Real(*i as f64)),
        (ValueKind::Real, Value::Str(s)) => parse_double(s).map(Value::Real),
        (ValueKind::Boolean, Value::Str(s)) => parse_bool(s).map(Value::Bool),
        (ValueKind::String, v) => Ok(Value::Str(v.to_string())),
        (dest, v) => Err(illegal(dest, v.kind())),
    }
}

fn wrap(element: Value) -> Value {
    match element {
        Value::Int(v) => Value::IntArray(vec![v]),
        Value::Real(v) => Value::RealArray(vec![v]),
        Value::Str(v) => Value::StrArray(vec![v]),
        Value::Bool(v) => Value::BoolArray(vec![v]),
        array => array,
    }
}

/// Build an array value of kind `dest` from already-converted elements
pub fn collect(dest: ValueKind, elements: Vec<Value>) -> Result<Value> {
    let mut out = Value::empty_array(dest)
        .ok_or_else(|| Error::internal(format!("{} is not an array kind", dest)))?;
    for element in elements {
        match (&mut out, element) {
            (Value::IntArray(v), Value::Int(e)) => v.push(e),
            (Value::RealArray(v), Value::Real(e)) => v.push(e),
            (Value::StrArray(v), Value::Str(e)) => v.push(e),
            (Value::BoolArray(v), Value::Bool(e)) => v.push(e),
            (_, e) => return Err(illegal(dest.element_kind(), e.kind())),
        }
    }
    Ok(out)
}

fn illegal(dest: ValueKind, src: ValueKind) -> Error {
    Error::calculation(format!("cannot convert {} to {}", src, dest))
}

/// Parse integer text; surrounding blanks are ignored
pub fn parse_long(text: &str) -> Result<i64> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| Error::calculation(format!("'{}' is not an integer", text)))
}

/// Parse real text; surrounding blanks are ignored
pub fn parse_double(text: &str) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| Error::calculation(format!("'{}' is not a real number", text)))
}

/// Only the exact words `true` and `false` are booleans
pub fn parse_bool(text: &str) -> Result<bool> {
    match text.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::calculation(format!("'{}' is not a boolean", text))),
    }
}
