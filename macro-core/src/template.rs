//! Template repository
//!
//! A resource is a list of named parts:
//!
//! ```text
//! {storeInt}
//! 	invokeinterface	Slot.setLong
//! {comparison}
//! 	&skipCommand	&labelFalse
//! ```
//!
//! A `{name}` line starts a part; every line up to the next marker belongs
//! to it. Appending a part replaces `&name` placeholders with values looked
//! up through a [`NameKeeper`] scope chain; `&&` stands for a literal `&`.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

const BUILTIN: &str = include_str!("../resources/macrocompiler.tpl");

#[derive(Debug, Clone)]
struct Part {
    name: String,
    content: String,
}

/// Immutable table of named parts, sorted by name
#[derive(Debug, Clone)]
pub struct TemplateRepo {
    parts: Vec<Part>,
}

impl TemplateRepo {
    /// Parse a template resource
    pub fn parse(source: &str) -> Result<Self> {
        let mut parts: Vec<Part> = Vec::new();
        let mut current: Option<Part> = None;

        for (index, line) in source.lines().enumerate() {
            let line_no = index + 1;
            if let Some(rest) = line.strip_prefix('{') {
                let close = rest
                    .find('}')
                    .ok_or_else(|| Error::template("missing '}'", line_no))?;
                let name = &rest[..close];
                if !is_name(name) {
                    return Err(Error::template(format!("invalid part name '{}'", name), line_no));
                }
                if !rest[close + 1..].trim().is_empty() {
                    return Err(Error::template(format!("text after part marker '{{{}}}'", name), line_no));
                }
                if let Some(done) = current.take() {
                    parts.push(done);
                }
                current = Some(Part { name: name.to_string(), content: String::new() });
                continue;
            }
            match current.as_mut() {
                Some(part) => {
                    part.content.push_str(line);
                    part.content.push('\n');
                }
                None if line.trim().is_empty() || line.trim_start().starts_with(';') => {}
                None => return Err(Error::template("content before the first part marker", line_no)),
            }
        }
        if let Some(done) = current.take() {
            parts.push(done);
        }

        parts.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(pair) = parts.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(Error::template(format!("duplicate part '{}'", pair[0].name), 0));
        }
        debug!(parts = parts.len(), "template repository loaded");
        Ok(Self { parts })
    }

    /// The resource shipped with the crate
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN)
    }

    /// Load a resource from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&source)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.name.as_str())
    }

    fn find(&self, name: &str) -> Option<&Part> {
        self.parts
            .binary_search_by(|p| p.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.parts[i])
    }

    /// Append part `name` to `out`, substituting placeholders from `scope`
    pub fn append(&self, out: &mut String, name: &str, scope: &NameKeeper<'_>) -> Result<()> {
        let part = self
            .find(name)
            .ok_or_else(|| Error::internal(format!("template part '{}' is missing", name)))?;
        substitute(out, &part.content, scope)
            .map_err(|missing| Error::internal(format!("name '{}' is not defined for part '{}'", missing, name)))
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_name_char)
}

/// Expand `&name` placeholders; returns the first undefined name on failure
fn substitute(out: &mut String, content: &str, scope: &NameKeeper<'_>) -> std::result::Result<(), String> {
    let mut rest = content;
    while let Some(at) = rest.find('&') {
        out.push_str(&rest[..at]);
        let after = &rest[at + 1..];
        if let Some(tail) = after.strip_prefix('&') {
            out.push('&');
            rest = tail;
            continue;
        }
        let len = after.find(|c: char| !is_name_char(c)).unwrap_or(after.len());
        if len == 0 {
            out.push('&');
            rest = after;
            continue;
        }
        let name = &after[..len];
        let value = scope.get(name).ok_or_else(|| name.to_string())?;
        out.push_str(value);
        rest = &after[len..];
    }
    out.push_str(rest);
    Ok(())
}

/// Chained name scope: lookups that miss fall through to the parent
#[derive(Debug, Default)]
pub struct NameKeeper<'p> {
    parent: Option<&'p NameKeeper<'p>>,
    names: HashMap<String, String>,
}

impl<'p> NameKeeper<'p> {
    pub fn new() -> Self {
        Self { parent: None, names: HashMap::new() }
    }

    /// Child scope borrowing this one as parent
    pub fn push(&self) -> NameKeeper<'_> {
        NameKeeper { parent: Some(self), names: HashMap::new() }
    }

    pub fn put(&mut self, name: &str, value: impl Display) -> &mut Self {
        self.names.insert(name.to_string(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        match self.names.get(name) {
            Some(value) => Some(value.as_str()),
            None => self.parent.and_then(|p| p.get(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "; leading comment\n{zeta}\nz &value\n{alpha}\n\tgoto &label\n&label:\n{amp}\na && b\n";

    #[test]
    fn test_parts_sorted_and_found() {
        let repo = TemplateRepo::parse(SAMPLE).unwrap();
        let names: Vec<&str> = repo.part_names().collect();
        assert_eq!(names, vec!["alpha", "amp", "zeta"]);
        assert!(repo.contains("zeta"));
        assert!(!repo.contains("beta"));
    }

    #[test]
    fn test_substitution_through_scopes() {
        let repo = TemplateRepo::parse(SAMPLE).unwrap();
        let mut root = NameKeeper::new();
        root.put("label", "label1");
        let mut child = root.push();
        child.put("value", 42);

        let mut out = String::new();
        repo.append(&mut out, "alpha", &child).unwrap();
        repo.append(&mut out, "zeta", &child).unwrap();
        repo.append(&mut out, "amp", &root).unwrap();
        assert_eq!(out, "\tgoto label1\nlabel1:\nz 42\na & b\n");
    }

    #[test]
    fn test_child_shadows_parent() {
        let mut root = NameKeeper::new();
        root.put("x", "outer");
        let mut child = root.push();
        child.put("x", "inner");
        assert_eq!(child.get("x"), Some("inner"));
        assert_eq!(root.get("x"), Some("outer"));
        assert_eq!(child.push().get("x"), Some("inner"));
    }

    #[test]
    fn test_missing_name_is_internal_error() {
        let repo = TemplateRepo::parse(SAMPLE).unwrap();
        let mut out = String::new();
        let err = repo.append(&mut out, "zeta", &NameKeeper::new()).unwrap_err();
        assert!(matches!(err, Error::InternalError { .. }));
        let err = repo.append(&mut out, "nope", &NameKeeper::new()).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_malformed_resources() {
        let err = TemplateRepo::parse("{open\nx\n").unwrap_err();
        assert_eq!(err, Error::template("missing '}'", 1));
        assert!(TemplateRepo::parse("text\n{a}\n").is_err());
        assert!(TemplateRepo::parse("{a}\n1\n{a}\n2\n").is_err());
        assert!(TemplateRepo::parse("{a b}\n").is_err());
    }

    #[test]
    fn test_builtin_has_generator_parts() {
        let repo = TemplateRepo::builtin().unwrap();
        for name in [
            "start",
            "finish",
            "markedFinish",
            "substitutionConst",
            "extractCharConst",
            "prepareWrapper",
            "validateVarValue",
            "storeInt",
            "storeReal",
            "storeString",
            "storeBoolean",
            "storeArray",
            "storeIntIndex",
            "storeRealIndex",
            "storeStringIndex",
            "storeBooleanIndex",
            "comparison",
            "materializeBoolean",
            "concatBefore",
            "concatAppend",
            "concatAfter",
            "ternaryElse",
            "ternaryAfter",
            "merror",
        ] {
            assert!(repo.contains(name), "missing part {}", name);
        }
    }
}
