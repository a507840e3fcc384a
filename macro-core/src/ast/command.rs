//! Command tree and declaration list

use std::collections::HashMap;

use super::{Expr, SlotRef, SlotRole, SymbolResolver};
use crate::error::{Error, Result};
use crate::types::{Value, ValueKind};

/// One `.if`/`.elseif` arm
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub condition: Expr,
    pub body: Vec<Command>,
    pub line: usize,
}

/// One `.of` arm
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub value: Expr,
    pub body: Vec<Command>,
    pub line: usize,
}

/// One directive or substitution line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `name .set expr`
    Set { target: SlotRef, value: Expr, line: usize },

    /// `name .setindex index = expr`
    SetIndexed {
        target: SlotRef,
        index: Expr,
        value: Expr,
        line: usize,
    },

    /// `.if` / `.elseif` arms in order, then the `.else` body
    If {
        branches: Vec<Branch>,
        otherwise: Option<Vec<Command>>,
        line: usize,
    },

    While {
        label: Option<String>,
        condition: Expr,
        body: Vec<Command>,
        line: usize,
    },

    /// `.for var = init to limit step step`; operands already have the variable's kind
    For {
        label: Option<String>,
        var: SlotRef,
        init: Expr,
        limit: Expr,
        step: Expr,
        body: Vec<Command>,
        line: usize,
    },

    /// `.forall var in source splitted by separator`
    ForEach {
        label: Option<String>,
        var: SlotRef,
        source: Expr,
        separator: Expr,
        body: Vec<Command>,
        line: usize,
    },

    Break { label: Option<String>, line: usize },

    Continue { label: Option<String>, line: usize },

    /// `.choise selector` with `.of` arms and an optional `.otherwise`
    Choice {
        selector: Expr,
        cases: Vec<Case>,
        otherwise: Option<Vec<Command>>,
        line: usize,
    },

    /// `.error message`
    MError { message: Expr, line: usize, col: usize },

    Exit { line: usize },

    /// Literal text with interpolations; every part is a string expression
    Substitution { parts: Vec<Expr>, line: usize },
}

impl Command {
    pub fn line(&self) -> usize {
        match self {
            Command::Set { line, .. }
            | Command::SetIndexed { line, .. }
            | Command::If { line, .. }
            | Command::While { line, .. }
            | Command::For { line, .. }
            | Command::ForEach { line, .. }
            | Command::Break { line, .. }
            | Command::Continue { line, .. }
            | Command::Choice { line, .. }
            | Command::MError { line, .. }
            | Command::Exit { line }
            | Command::Substitution { line, .. } => *line,
        }
    }

    /// Control never falls through to the next command
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Command::Break { .. } | Command::Continue { .. } | Command::Exit { .. } | Command::MError { .. }
        )
    }

    /// Loop label, for loop commands
    pub fn label(&self) -> Option<&str> {
        match self {
            Command::While { label, .. } | Command::For { label, .. } | Command::ForEach { label, .. } => {
                label.as_deref()
            }
            _ => None,
        }
    }

    /// Number of commands in this subtree, this one included
    pub fn count(&self) -> usize {
        let nested: usize = match self {
            Command::If { branches, otherwise, .. } => {
                branches.iter().map(|b| count_all(&b.body)).sum::<usize>()
                    + otherwise.as_deref().map_or(0, count_all)
            }
            Command::While { body, .. } | Command::For { body, .. } | Command::ForEach { body, .. } => {
                count_all(body)
            }
            Command::Choice { cases, otherwise, .. } => {
                cases.iter().map(|c| count_all(&c.body)).sum::<usize>()
                    + otherwise.as_deref().map_or(0, count_all)
            }
            _ => 0,
        };
        nested + 1
    }
}

fn count_all(commands: &[Command]) -> usize {
    commands.iter().map(Command::count).sum()
}

/// A declared slot with its default or initial value
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub index: usize,
    pub name: String,
    pub kind: ValueKind,
    pub role: SlotRole,
    pub default: Option<Value>,
    pub line: usize,
}

impl Slot {
    pub fn to_ref(&self) -> SlotRef {
        SlotRef {
            index: self.index,
            name: self.name.clone(),
            kind: self.kind,
            role: self.role,
        }
    }
}

/// Ordered slot list: positional parameters, key parameters, then locals.
/// Append-only until committed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Declarations {
    slots: Vec<Slot>,
    by_name: HashMap<String, usize>,
    committed: bool,
}

impl Declarations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a slot. `default` must already have `kind`.
    pub fn declare(
        &mut self,
        name: &str,
        kind: ValueKind,
        role: SlotRole,
        default: Option<Value>,
        line: usize,
    ) -> Result<SlotRef> {
        if self.committed {
            return Err(Error::syntax(
                format!("'{}' declared after the declarations were committed", name),
                line,
                1,
            ));
        }
        if self.by_name.contains_key(name) {
            return Err(Error::syntax(format!("duplicate name '{}'", name), line, 1));
        }
        if let Some(last) = self.slots.last() {
            let out_of_order = match role {
                SlotRole::Positional => last.role != SlotRole::Positional,
                SlotRole::Key => last.role == SlotRole::Local,
                SlotRole::Local => false,
            };
            if out_of_order {
                return Err(Error::syntax(
                    format!("{} '{}' cannot follow a {}", role, name, last.role),
                    line,
                    1,
                ));
            }
        }
        if let Some(value) = &default {
            if value.kind() != kind {
                return Err(Error::internal(format!(
                    "default for '{}' has kind {}, slot has {}",
                    name,
                    value.kind(),
                    kind
                )));
            }
        }

        let index = self.slots.len();
        self.slots.push(Slot {
            index,
            name: name.to_string(),
            kind,
            role,
            default,
            line,
        });
        self.by_name.insert(name.to_string(), index);
        Ok(self.slots[index].to_ref())
    }

    /// Freeze the list; later `declare` calls fail
    pub fn commit(&mut self) {
        self.committed = true;
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn get(&self, name: &str) -> Option<&Slot> {
        self.by_name.get(name).map(|&i| &self.slots[i])
    }

    pub fn by_index(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn positional_count(&self) -> usize {
        self.slots.iter().filter(|s| s.role == SlotRole::Positional).count()
    }
}

impl SymbolResolver for Declarations {
    fn resolve(&self, name: &str) -> Option<SlotRef> {
        self.get(name).map(Slot::to_ref)
    }
}

/// Root of a built macro
#[derive(Debug, Clone, PartialEq)]
pub struct MacroDef {
    pub name: String,
    pub declarations: Declarations,
    pub body: Vec<Command>,
    pub line: usize,
}

impl MacroDef {
    /// Total number of commands in the body, nested ones included
    pub fn command_count(&self) -> usize {
        count_all(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration_order() {
        let mut decls = Declarations::new();
        decls.declare("a", ValueKind::Integer, SlotRole::Positional, None, 1).unwrap();
        decls.declare("k", ValueKind::String, SlotRole::Key, None, 1).unwrap();
        let err = decls.declare("b", ValueKind::Integer, SlotRole::Positional, None, 1).unwrap_err();
        assert!(err.to_string().contains("cannot follow"));
        let local = decls.declare("l", ValueKind::Real, SlotRole::Local, Some(Value::Real(1.0)), 2).unwrap();
        assert_eq!(local.index, 2);
        assert!(decls.declare("k2", ValueKind::Integer, SlotRole::Key, None, 3).is_err());
        assert_eq!(decls.positional_count(), 1);
    }

    #[test]
    fn test_duplicates_and_commit() {
        let mut decls = Declarations::new();
        decls.declare("a", ValueKind::Integer, SlotRole::Positional, None, 1).unwrap();
        assert!(decls.declare("a", ValueKind::Integer, SlotRole::Local, None, 2).is_err());
        decls.commit();
        let err = decls.declare("z", ValueKind::Integer, SlotRole::Local, None, 5).unwrap_err();
        assert_eq!(err.position(), Some((5, 1)));
    }

    #[test]
    fn test_resolver() {
        let mut decls = Declarations::new();
        decls.declare("x", ValueKind::IntegerArray, SlotRole::Positional, None, 1).unwrap();
        let slot = decls.resolve("x").unwrap();
        assert_eq!(slot.kind, ValueKind::IntegerArray);
        assert_eq!(slot.index, 0);
        assert!(decls.resolve("y").is_none());
    }

    #[test]
    fn test_terminal_commands() {
        assert!(Command::Exit { line: 1 }.is_terminal());
        assert!(Command::Break { label: None, line: 1 }.is_terminal());
        let text = Command::Substitution { parts: vec![Expr::string("x\n")], line: 1 };
        assert!(!text.is_terminal());
        assert_eq!(text.count(), 1);
    }
}
