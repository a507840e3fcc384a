//! Binder and per-call instancing
//!
//! A built [`MacroDef`] is frozen inside a [`MacroTemplate`]. Every call takes a
//! fresh [`MacroInstance`] from the template, then [`bind`] assigns the call's
//! arguments to it through the conversion table.
//!
//! Call-site syntax:
//!
//! ```text
//! name(100, "text", key1=1, key3={"a","b"})
//! 100,,bare text,key2=false
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::ast::{MacroDef, Slot, SlotRole};
use crate::builder::{is_ident, split_top_level};
use crate::error::{Error, Result};
use crate::lexer::{Lexer, Token};
use crate::types::conversion::{collect, convert};
use crate::types::{Value, ValueKind};

static UNIQUE_G: AtomicU64 = AtomicU64::new(0);

/// One argument of a call
#[derive(Debug, Clone, PartialEq)]
pub struct CallArg {
    /// `Some` for `key=value`
    pub key: Option<String>,
    /// `None` for an empty positional entry
    pub value: Option<Value>,
    /// 1-based column in the call text
    pub col: usize,
}

/// Parsed call-site text
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    /// Macro name, when written as `name(...)`
    pub name: Option<String>,
    pub args: Vec<CallArg>,
    pub line: usize,
}

impl CallSite {
    /// Anchor positions reported by [`bind`] on `line`
    pub fn at_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    pub fn positional(&self) -> impl Iterator<Item = &CallArg> {
        self.args.iter().filter(|a| a.key.is_none())
    }

    pub fn keys(&self) -> impl Iterator<Item = &CallArg> {
        self.args.iter().filter(|a| a.key.is_some())
    }
}

/// Parse `name(arg, ...)` or a bare `arg, ...` list
pub fn parse_call(text: &str) -> Result<CallSite> {
    let trimmed_start = text.len() - text.trim_start().len();
    let body = text.trim();

    let (name, list, list_offset) = match body.find('(') {
        Some(open) if is_ident(body[..open].trim_end()) && body.ends_with(')') => (
            Some(body[..open].trim_end().to_string()),
            &body[open + 1..body.len() - 1],
            trimmed_start + open + 1,
        ),
        _ => (None, body, trimmed_start),
    };

    let mut args = Vec::new();
    if !list.trim().is_empty() {
        for (offset, item) in split_top_level(list) {
            let lead = item.len() - item.trim_start().len();
            let col = list_offset + offset + lead + 1;
            args.push(parse_arg(item.trim(), col)?);
        }
    }
    debug!(name = ?name, args = args.len(), "call parsed");
    Ok(CallSite { name, args, line: 1 })
}

fn parse_arg(item: &str, col: usize) -> Result<CallArg> {
    if let Some(eq) = item.find('=') {
        let key = item[..eq].trim();
        if is_ident(key) {
            let value_text = item[eq + 1..].trim();
            if value_text.is_empty() {
                return Err(Error::syntax(format!("value for key '{}' is missing", key), 1, col));
            }
            let value = parse_value(value_text, col + eq + 1)?;
            return Ok(CallArg { key: Some(key.to_string()), value: Some(value), col });
        }
    }
    let value = if item.is_empty() { None } else { Some(parse_value(item, col)?) };
    Ok(CallArg { key: None, value, col })
}

/// Constant value of a call argument
fn parse_value(text: &str, col: usize) -> Result<Value> {
    if text.starts_with('{') {
        let inner = text
            .strip_suffix('}')
            .map(|t| &t[1..])
            .ok_or_else(|| Error::syntax("missing '}' in array value", 1, col))?;
        if inner.trim().is_empty() {
            return Ok(Value::StrArray(Vec::new()));
        }
        let mut elements = Vec::new();
        for (offset, item) in split_top_level(inner) {
            let item_col = col + 1 + offset;
            let element = parse_scalar(item.trim(), item_col)?;
            elements.push(element);
        }
        return array_of(elements, col);
    }
    parse_scalar(text, col)
}

fn parse_scalar(text: &str, col: usize) -> Result<Value> {
    if text.starts_with('"') {
        let tokens = Lexer::with_origin(text, 1, col).tokenize()?;
        return match tokens.as_slice() {
            [Token::Str(s)] => Ok(Value::Str(s.clone())),
            _ => Err(Error::syntax(format!("invalid constant value {}", text), 1, col)),
        };
    }
    match text {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "" => return Err(Error::syntax("invalid constant value: empty element", 1, col)),
        _ => {}
    }
    if looks_numeric(text) {
        let digits = text.strip_suffix(['l', 'L']).unwrap_or(text);
        if let Ok(v) = digits.parse::<i64>() {
            return Ok(Value::Int(v));
        }
        if let Ok(v) = text.parse::<f64>() {
            return Ok(Value::Real(v));
        }
    }
    Ok(Value::Str(text.to_string()))
}

/// Sign, then a digit or a dot followed by a digit
fn looks_numeric(text: &str) -> bool {
    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
    let mut chars = unsigned.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('.') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

/// Array value from literal elements; ints widen to real when mixed with reals
fn array_of(elements: Vec<Value>, col: usize) -> Result<Value> {
    let kinds: Vec<ValueKind> = elements.iter().map(Value::kind).collect();
    let kind = if kinds.iter().all(|k| *k == kinds[0]) {
        kinds[0]
    } else if kinds.iter().all(|k| k.is_numeric()) {
        ValueKind::Real
    } else {
        return Err(Error::syntax("array value mixes element kinds", 1, col));
    };
    let elements = elements
        .iter()
        .map(|e| convert(e, kind))
        .collect::<Result<Vec<_>>>()
        .map_err(|e| Error::syntax(e.to_string(), 1, col))?;
    collect(kind.array_of(), elements).map_err(|e| Error::syntax(e.to_string(), 1, col))
}

/// Shareable, immutable macro
#[derive(Debug, Clone)]
pub struct MacroTemplate(Arc<MacroDef>);

impl MacroTemplate {
    pub fn new(def: MacroDef) -> Self {
        Self(Arc::new(def))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn definition(&self) -> &MacroDef {
        &self.0
    }

    /// Fresh instance: every slot holds its default or initial value
    pub fn instantiate(&self) -> MacroInstance {
        let values = self.0.declarations.slots().iter().map(|s| s.default.clone()).collect();
        MacroInstance {
            def: Arc::clone(&self.0),
            values,
            unique_g: UNIQUE_G.fetch_add(1, Ordering::Relaxed) + 1,
            unique_l: 0,
        }
    }
}

impl From<MacroDef> for MacroTemplate {
    fn from(def: MacroDef) -> Self {
        Self::new(def)
    }
}

/// Per-call slot storage
#[derive(Debug, Clone)]
pub struct MacroInstance {
    def: Arc<MacroDef>,
    values: Vec<Option<Value>>,
    unique_g: u64,
    unique_l: u64,
}

impl MacroInstance {
    pub fn definition(&self) -> &MacroDef {
        &self.def
    }

    pub fn slots(&self) -> &[Slot] {
        self.def.declarations.slots()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn slot(&self, index: usize) -> Result<&Slot> {
        self.def
            .declarations
            .by_index(index)
            .ok_or_else(|| Error::calculation(format!("slot {} does not exist", index)))
    }

    /// Current value of slot `index`, if it has one
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Current value, failing when the slot is unset
    pub fn value(&self, index: usize) -> Result<&Value> {
        let slot = self.slot(index)?;
        self.get(index)
            .ok_or_else(|| Error::calculation(format!("'{}' has no value", slot.name)))
    }

    pub fn exists(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Store `value`; it must already have the slot's kind
    pub fn set(&mut self, index: usize, value: Value) -> Result<()> {
        let slot = self.slot(index)?;
        if value.kind() != slot.kind {
            return Err(Error::calculation(format!(
                "cannot store {} into '{}' of kind {}",
                value.kind(),
                slot.name,
                slot.kind
            )));
        }
        self.values[index] = Some(value);
        Ok(())
    }

    /// Replace one element of an array slot
    pub fn set_index(&mut self, index: usize, element: i64, value: Value) -> Result<()> {
        self.slot(index)?;
        let name = &self.def.declarations.slots()[index].name;
        match self.values[index].as_mut() {
            Some(array) => array.set_element(element, value),
            None => Err(Error::calculation(format!("'{}' has no value", name))),
        }
    }

    pub fn unique_g(&self) -> u64 {
        self.unique_g
    }

    /// Local unique number: 0, 1, 2, ... within this instance
    pub fn next_unique_l(&mut self) -> u64 {
        let current = self.unique_l;
        self.unique_l += 1;
        current
    }

    /// `(name, value)` pairs in slot order
    pub fn names(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.slots().iter().zip(&self.values).map(|(s, v)| (s.name.as_str(), v.as_ref()))
    }
}

/// Bind call arguments to a fresh instance of `template`
pub fn bind(template: &MacroTemplate, call: &CallSite) -> Result<MacroInstance> {
    let def = template.definition();
    let line = call.line;
    if let Some(name) = &call.name {
        if name != &def.name {
            return Err(Error::syntax(
                format!("call names macro '{}', but this macro is '{}'", name, def.name),
                line,
                1,
            ));
        }
    }

    let mut instance = template.instantiate();
    let positional_slots = def.declarations.positional_count();
    let mut position = 0;
    let mut seen_key = false;
    let mut supplied: Vec<&str> = Vec::new();

    for arg in &call.args {
        let slot = match &arg.key {
            None => {
                if seen_key {
                    return Err(Error::syntax(
                        "mix of the parameters: positional argument after a key argument",
                        line,
                        arg.col,
                    ));
                }
                if position >= positional_slots {
                    return Err(Error::syntax(
                        format!("too many positionals: macro '{}' takes {}", def.name, positional_slots),
                        line,
                        arg.col,
                    ));
                }
                position += 1;
                &def.declarations.slots()[position - 1]
            }
            Some(key) => {
                seen_key = true;
                let slot = def.declarations.get(key).ok_or_else(|| {
                    Error::syntax(format!("unknown key parameter '{}'", key), line, arg.col)
                })?;
                if slot.role != SlotRole::Key {
                    return Err(Error::syntax(
                        format!("'{}' is a {}, not a key parameter", key, slot.role),
                        line,
                        arg.col,
                    ));
                }
                if supplied.contains(&key.as_str()) {
                    return Err(Error::syntax(format!("key '{}' supplied twice", key), line, arg.col));
                }
                supplied.push(key);
                slot
            }
        };

        let Some(value) = &arg.value else {
            continue;
        };
        let converted = convert(value, slot.kind).map_err(|e| {
            Error::syntax(
                format!(
                    "invalid constant value for '{}': {} does not convert to {} ({})",
                    slot.name,
                    value.kind(),
                    slot.kind,
                    e
                ),
                line,
                arg.col,
            )
        })?;
        instance.set(slot.index, converted)?;
    }

    debug!(
        name = %def.name,
        positional = position,
        keys = supplied.len(),
        unique_g = instance.unique_g(),
        "call bound"
    );
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;

    fn template(header: &str) -> MacroTemplate {
        let source = format!("{}\n\t.exit\n\t.mend\n", header);
        MacroTemplate::new(build(&source).unwrap())
    }

    fn bind_text(t: &MacroTemplate, text: &str) -> Result<MacroInstance> {
        bind(t, &parse_call(text)?)
    }

    #[test]
    fn test_parse_call_forms() {
        let call = parse_call("name(100, \"a,b\", key={1, 2.5})").unwrap();
        assert_eq!(call.name.as_deref(), Some("name"));
        assert_eq!(call.args.len(), 3);
        assert_eq!(call.args[1].value, Some(Value::Str("a,b".into())));
        assert_eq!(call.args[2].key.as_deref(), Some("key"));
        assert_eq!(call.args[2].value, Some(Value::RealArray(vec![1.0, 2.5])));

        let call = parse_call("1,,bare text , -7, 1e3, true").unwrap();
        assert_eq!(call.name, None);
        assert_eq!(call.args[1].value, None);
        assert_eq!(call.args[2].value, Some(Value::Str("bare text".into())));
        assert_eq!(call.args[2].col, 4);
        assert_eq!(call.args[3].value, Some(Value::Int(-7)));
        assert_eq!(call.args[4].value, Some(Value::Real(1000.0)));
        assert_eq!(call.args[5].value, Some(Value::Bool(true)));
        assert!(parse_call("").unwrap().args.is_empty());
        assert!(parse_call("k=").is_err());
        assert!(parse_call("{1,\"a\"}").is_err());
    }

    #[test]
    fn test_bind_scalars_and_defaults() {
        let t = template("name .macro var1:int,key1:int=,key2:boolean=true");
        let inst = bind_text(&t, "100,key2=false,key1=1").unwrap();
        assert_eq!(inst.get(0), Some(&Value::Int(100)));
        assert_eq!(inst.get(1), Some(&Value::Int(1)));
        assert_eq!(inst.get(2), Some(&Value::Bool(false)));

        let inst = bind_text(&t, "-10").unwrap();
        assert_eq!(inst.get(0), Some(&Value::Int(-10)));
        assert!(!inst.exists(1));
        assert!(inst.exists(2));
    }

    #[test]
    fn test_bind_errors() {
        let t = template("name .macro var1:int,key1:int=,key2:boolean=true");
        let err = bind_text(&t, "100,key2=unknown,key1=1").unwrap_err();
        assert!(err.to_string().contains("invalid constant value for 'key2'"));
        assert_eq!(err.position(), Some((1, 5)));
        assert!(bind_text(&t, "100,200").unwrap_err().to_string().contains("too many positionals"));
        assert!(bind_text(&t, "100,key1=10,200").unwrap_err().to_string().contains("mix of the parameters"));
        assert!(bind_text(&t, "1,nokey=1").unwrap_err().to_string().contains("unknown key"));
        assert!(bind_text(&t, "1,var1=1").unwrap_err().to_string().contains("not a key"));
        assert!(bind_text(&t, "1,key1=1,key1=2").unwrap_err().to_string().contains("twice"));
        assert!(bind_text(&t, "other(1)").unwrap_err().to_string().contains("'other'"));
        assert!(bind_text(&t, "1.9").is_ok());
    }

    #[test]
    fn test_bind_arrays() {
        let t = template("name .macro var1:int[],key1:int=,key2:boolean=true,key3:str[]={\"init1\"}");
        let inst = bind_text(&t, "{10,20},key1=1").unwrap();
        assert_eq!(inst.get(0), Some(&Value::IntArray(vec![10, 20])));
        assert_eq!(inst.get(3), Some(&Value::StrArray(vec!["init1".into()])));

        let inst = bind_text(&t, "10,key3=\"val1\"").unwrap();
        assert_eq!(inst.get(0), Some(&Value::IntArray(vec![10])));
        assert_eq!(inst.get(3), Some(&Value::StrArray(vec!["val1".into()])));

        let inst = bind_text(&t, "10,key3={\"val1\",\"val2\"}").unwrap();
        assert_eq!(inst.get(3), Some(&Value::StrArray(vec!["val1".into(), "val2".into()])));
        assert!(bind_text(&t, "{true}").is_err());
    }

    #[test]
    fn test_instances_are_independent() {
        let t = template("name .macro x:int,k:str=\"d\"");
        let mut a = bind_text(&t, "1").unwrap();
        let b = bind_text(&t, "2,k=\"other\"").unwrap();
        a.set(1, Value::Str("changed".into())).unwrap();
        assert_eq!(b.get(0), Some(&Value::Int(2)));
        assert_eq!(b.get(1), Some(&Value::Str("other".into())));
        assert_eq!(t.instantiate().get(1), Some(&Value::Str("d".into())));
        assert_ne!(a.unique_g(), b.unique_g());
        assert!(a.set(0, Value::Str("x".into())).is_err());
    }

    #[test]
    fn test_unique_l_counts_from_zero() {
        let t = template("name .macro");
        let mut inst = t.instantiate();
        assert_eq!(inst.next_unique_l(), 0);
        assert_eq!(inst.next_unique_l(), 1);
        assert_eq!(t.instantiate().next_unique_l(), 0);
    }

    #[test]
    fn test_set_index_and_names() {
        let t = template("name .macro a:int[]");
        let mut inst = bind_text(&t, "{1,2}").unwrap();
        inst.set_index(0, 1, Value::Int(9)).unwrap();
        assert_eq!(inst.value(0).unwrap(), &Value::IntArray(vec![1, 9]));
        assert!(inst.set_index(0, 5, Value::Int(9)).is_err());
        let names: Vec<&str> = inst.names().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a"]);
        assert!(t.instantiate().value(0).is_err());
    }
}
