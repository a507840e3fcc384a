//! Command tree builder
//!
//! A single-pass line state machine:
//!
//! ```text
//! BeforeMacro --.macro--> InDeclarations --first non-.local--> InBody --.mend--> AfterMacro
//! ```
//!
//! Each line is `[name[:]] <blank> directive arguments`. A word in column one
//! names the directive's target or, with a trailing `:`, labels a loop. A
//! line whose directive word is not recognized is a substitution line.
//! Open containers live on an explicit frame stack and must balance.

use tracing::debug;

use crate::ast::{
    Branch, Case, Command, Declarations, Expr, MacroDef, SlotRef, SlotRole, SymbolResolver,
};
use crate::error::{Error, Result};
use crate::parser::{coerce, stringify, Parser, Precedence};
use crate::types::{Value, ValueKind};

/// Builder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    BeforeMacro,
    InDeclarations,
    InBody,
    AfterMacro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    Macro,
    Local,
    Set,
    SetIndex,
    If,
    ElseIf,
    Else,
    EndIf,
    While,
    EndWhile,
    For,
    EndFor,
    ForAll,
    EndForAll,
    Break,
    Continue,
    Choise,
    Of,
    Otherwise,
    EndChoise,
    Error,
    Exit,
    Mend,
}

/// What a directive accepts in column one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Head {
    /// A target name is required; labels are rejected
    Name,
    /// An optional loop label; plain names are rejected
    Label,
    /// Nothing
    Empty,
}

impl Directive {
    fn from_word(word: &str) -> Option<Directive> {
        Some(match word {
            ".macro" => Directive::Macro,
            ".local" => Directive::Local,
            ".set" => Directive::Set,
            ".setindex" => Directive::SetIndex,
            ".if" => Directive::If,
            ".elseif" => Directive::ElseIf,
            ".else" => Directive::Else,
            ".endif" => Directive::EndIf,
            ".while" => Directive::While,
            ".endwhile" => Directive::EndWhile,
            ".for" => Directive::For,
            ".endfor" => Directive::EndFor,
            ".forall" => Directive::ForAll,
            ".endforall" => Directive::EndForAll,
            ".break" => Directive::Break,
            ".continue" => Directive::Continue,
            ".choise" => Directive::Choise,
            ".of" => Directive::Of,
            ".otherwise" => Directive::Otherwise,
            ".endchoise" => Directive::EndChoise,
            ".error" | ".merror" => Directive::Error,
            ".exit" => Directive::Exit,
            ".mend" => Directive::Mend,
            _ => return None,
        })
    }

    fn spelling(self) -> &'static str {
        match self {
            Directive::Macro => ".macro",
            Directive::Local => ".local",
            Directive::Set => ".set",
            Directive::SetIndex => ".setindex",
            Directive::If => ".if",
            Directive::ElseIf => ".elseif",
            Directive::Else => ".else",
            Directive::EndIf => ".endif",
            Directive::While => ".while",
            Directive::EndWhile => ".endwhile",
            Directive::For => ".for",
            Directive::EndFor => ".endfor",
            Directive::ForAll => ".forall",
            Directive::EndForAll => ".endforall",
            Directive::Break => ".break",
            Directive::Continue => ".continue",
            Directive::Choise => ".choise",
            Directive::Of => ".of",
            Directive::Otherwise => ".otherwise",
            Directive::EndChoise => ".endchoise",
            Directive::Error => ".error",
            Directive::Exit => ".exit",
            Directive::Mend => ".mend",
        }
    }

    fn head(self) -> Head {
        match self {
            Directive::Macro | Directive::Local | Directive::Set | Directive::SetIndex => Head::Name,
            Directive::While | Directive::For | Directive::ForAll => Head::Label,
            _ => Head::Empty,
        }
    }
}

/// Column-one word
#[derive(Debug, Clone)]
struct HeadWord {
    name: String,
    is_label: bool,
    col: usize,
}

/// Split result for one source line
#[derive(Debug)]
struct LineParts<'a> {
    head: Option<HeadWord>,
    directive: Directive,
    directive_col: usize,
    rest: &'a str,
    rest_col: usize,
}

pub(crate) fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Next whitespace-delimited word at or after `from`: (start, end)
fn next_word(text: &str, from: usize) -> Option<(usize, usize)> {
    let start = from + text[from..].find(|c: char| !c.is_whitespace())?;
    let end = text[start..]
        .find(char::is_whitespace)
        .map_or(text.len(), |i| start + i);
    Some((start, end))
}

/// Recognize a directive line; `None` means a substitution line
fn split_line(text: &str) -> Option<LineParts<'_>> {
    let (first_start, first_end) = next_word(text, 0)?;
    let first = &text[first_start..first_end];

    let (head, directive, directive_start, directive_end) = if first_start > 0 {
        (None, Directive::from_word(first)?, first_start, first_end)
    } else if let Some(directive) = Directive::from_word(first) {
        (None, directive, first_start, first_end)
    } else if let Some((start, end)) = next_word(text, first_end)
        .filter(|&(s, e)| Directive::from_word(&text[s..e]).is_some())
    {
        let directive = Directive::from_word(&text[start..end])?;
        (Some(first.to_string()), directive, start, end)
    } else {
        // `name.set ...` written without a blank
        let dot = first.find('.')?;
        let directive = Directive::from_word(&first[dot..])?;
        (Some(first[..dot].to_string()), directive, dot, first_end)
    };

    let head = head.map(|word| {
        let (name, is_label) = match word.strip_suffix(':') {
            Some(name) => (name.to_string(), true),
            None => (word, false),
        };
        let name = name.strip_prefix('&').map(str::to_string).unwrap_or(name);
        HeadWord { name, is_label, col: 1 }
    });

    let rest_start = text[directive_end..]
        .find(|c: char| !c.is_whitespace())
        .map_or(text.len(), |i| directive_end + i);
    Some(LineParts {
        head,
        directive,
        directive_col: directive_start + 1,
        rest: text[rest_start..].trim_end(),
        rest_col: rest_start + 1,
    })
}

/// Split on top-level commas (outside quotes and braces), keeping byte offsets
pub(crate) fn split_top_level(text: &str) -> Vec<(usize, &str)> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '(' | '[' => depth += 1,
            '}' | ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push((start, &text[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push((start, &text[start..]));
    items
}

/// Index of the `]` closing a `[` at `open`, skipping string literals
fn matching_bracket(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[open..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug)]
enum FrameKind {
    If {
        branches: Vec<Branch>,
        condition: Option<(Expr, usize)>,
        in_else: bool,
    },
    While {
        label: Option<String>,
        condition: Expr,
    },
    For {
        label: Option<String>,
        var: SlotRef,
        init: Expr,
        limit: Expr,
        step: Expr,
    },
    ForEach {
        label: Option<String>,
        var: SlotRef,
        source: Expr,
        separator: Expr,
    },
    Choice {
        selector: Expr,
        cases: Vec<Case>,
        pending: Option<(Expr, usize)>,
        in_otherwise: bool,
    },
}

/// An open container and the commands collected for its current arm
#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    line: usize,
    body: Vec<Command>,
}

impl Frame {
    fn is_loop(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::While { .. } | FrameKind::For { .. } | FrameKind::ForEach { .. }
        )
    }

    fn label(&self) -> Option<&str> {
        match &self.kind {
            FrameKind::While { label, .. } | FrameKind::For { label, .. } | FrameKind::ForEach { label, .. } => {
                label.as_deref()
            }
            _ => None,
        }
    }

    fn opener(&self) -> &'static str {
        match self.kind {
            FrameKind::If { .. } => ".if",
            FrameKind::While { .. } => ".while",
            FrameKind::For { .. } => ".for",
            FrameKind::ForEach { .. } => ".forall",
            FrameKind::Choice { .. } => ".choise",
        }
    }
}

/// Line-by-line macro builder
#[derive(Debug)]
pub struct MacroBuilder {
    state: BuildState,
    name: String,
    macro_line: usize,
    declarations: Declarations,
    body: Vec<Command>,
    frames: Vec<Frame>,
}

impl Default for MacroBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroBuilder {
    pub fn new() -> Self {
        Self {
            state: BuildState::BeforeMacro,
            name: String::new(),
            macro_line: 0,
            declarations: Declarations::new(),
            body: Vec::new(),
            frames: Vec::new(),
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Feed one source line (1-based `line_no`, no trailing newline)
    pub fn process_line(&mut self, line_no: usize, text: &str) -> Result<()> {
        let text = text.trim_end_matches(['\r', '\n']);
        let blank = text.trim().is_empty();
        let comment = text.trim_start().starts_with("//");

        match self.state {
            BuildState::BeforeMacro | BuildState::AfterMacro if blank || comment => return Ok(()),
            BuildState::InDeclarations if blank => return Ok(()),
            _ => {}
        }

        let Some(parts) = split_line(text) else {
            return match self.state {
                BuildState::BeforeMacro => Err(Error::syntax("text outside .macro", line_no, 1)),
                BuildState::AfterMacro => Err(Error::syntax("text after .mend", line_no, 1)),
                _ => {
                    self.enter_body();
                    let parts = self.substitution(text, line_no)?;
                    self.append(Command::Substitution { parts, line: line_no }, line_no, 1)
                }
            };
        };

        debug!(line = line_no, directive = parts.directive.spelling(), "directive");
        self.check_head(&parts, line_no)?;
        match (self.state, parts.directive) {
            (BuildState::BeforeMacro, Directive::Macro) => self.open_macro(&parts, line_no),
            (BuildState::BeforeMacro, _) => Err(Error::syntax(
                format!("{} outside .macro", parts.directive.spelling()),
                line_no,
                parts.directive_col,
            )),
            (BuildState::AfterMacro, _) => Err(Error::syntax("text after .mend", line_no, parts.directive_col)),
            (_, Directive::Macro) => Err(Error::syntax(
                ".macro inside .macro; is .mend missing?",
                line_no,
                parts.directive_col,
            )),
            (BuildState::InDeclarations, Directive::Local) => self.declare_local(&parts, line_no),
            (_, Directive::Local) => Err(Error::syntax(
                ".local must immediately follow .macro",
                line_no,
                parts.directive_col,
            )),
            (BuildState::InDeclarations, Directive::Mend) => {
                Err(Error::syntax("empty .macro body", line_no, parts.directive_col))
            }
            _ => {
                self.enter_body();
                self.body_directive(&parts, line_no)
            }
        }
    }

    /// Complete the build; the macro must have been closed by `.mend`
    pub fn finish(self) -> Result<MacroDef> {
        match self.state {
            BuildState::AfterMacro => Ok(MacroDef {
                name: self.name,
                declarations: self.declarations,
                body: self.body,
                line: self.macro_line,
            }),
            BuildState::BeforeMacro => Err(Error::syntax("no .macro found", 1, 1)),
            _ => Err(Error::syntax(
                format!("macro '{}' is not closed by .mend", self.name),
                self.macro_line,
                1,
            )),
        }
    }

    fn enter_body(&mut self) {
        if self.state == BuildState::InDeclarations {
            self.declarations.commit();
            self.state = BuildState::InBody;
            debug!(
                name = %self.name,
                slots = self.declarations.len(),
                "declarations committed"
            );
        }
    }

    fn check_head(&self, parts: &LineParts<'_>, line_no: usize) -> Result<()> {
        let spelling = parts.directive.spelling();
        match (parts.directive.head(), &parts.head) {
            (Head::Name, None) => Err(Error::syntax(
                format!("{} requires a name in the first column", spelling),
                line_no,
                parts.directive_col,
            )),
            (Head::Name, Some(h)) if h.is_label => Err(Error::syntax(
                format!("{} takes a name, not a label; remove ':'", spelling),
                line_no,
                h.col,
            )),
            (Head::Label, Some(h)) if !h.is_label => Err(Error::syntax(
                format!("{} takes a label, not a name; add ':'", spelling),
                line_no,
                h.col,
            )),
            (Head::Empty, Some(h)) => Err(Error::syntax(
                format!("{} takes neither a name nor a label", spelling),
                line_no,
                h.col,
            )),
            (_, Some(h)) if !is_ident(&h.name) => Err(Error::syntax(
                format!("invalid name '{}'", h.name),
                line_no,
                h.col,
            )),
            _ => Ok(()),
        }
    }

    // ===== Declarations =====

    fn open_macro(&mut self, parts: &LineParts<'_>, line_no: usize) -> Result<()> {
        let name = parts.head.as_ref().map(|h| h.name.clone()).unwrap_or_default();
        self.name = name;
        self.macro_line = line_no;
        self.state = BuildState::InDeclarations;

        if parts.rest.is_empty() {
            return Ok(());
        }
        for (offset, item) in split_top_level(parts.rest) {
            let col = parts.rest_col + offset + item.len() - item.trim_start().len();
            self.declare_parameter(item.trim(), line_no, col)?;
        }
        debug!(name = %self.name, params = self.declarations.len(), "macro opened");
        Ok(())
    }

    /// `name:type` (positional) or `name:type=[default]` (key)
    fn declare_parameter(&mut self, item: &str, line_no: usize, col: usize) -> Result<()> {
        if item.is_empty() {
            return Err(Error::syntax("empty parameter declaration", line_no, col));
        }
        let (decl, default) = match item.find('=') {
            Some(eq) => (&item[..eq], Some((eq + 1, &item[eq + 1..]))),
            None => (item, None),
        };
        let (name, kind_text) = match decl.find(':') {
            Some(colon) => (decl[..colon].trim(), Some(decl[colon + 1..].trim())),
            None => (decl.trim(), None),
        };
        let name = name.strip_prefix('&').unwrap_or(name);
        if !is_ident(name) {
            return Err(Error::syntax(format!("invalid parameter name '{}'", name), line_no, col));
        }
        let kind_text = kind_text
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::syntax(format!("parameter '{}' without type", name), line_no, col))?;
        let kind = ValueKind::from_source(kind_text).ok_or_else(|| {
            Error::syntax(format!("parameter '{}' has unknown type '{}'", name, kind_text), line_no, col)
        })?;

        match default {
            None => {
                self.declarations.declare(name, kind, SlotRole::Positional, None, line_no)?;
            }
            Some((offset, text)) => {
                let value = if text.trim().is_empty() {
                    None
                } else {
                    Some(self.constant(text, kind, line_no, col + offset)?)
                };
                self.declarations.declare(name, kind, SlotRole::Key, value, line_no)?;
            }
        }
        Ok(())
    }

    /// `name .local type [= initializer]`
    fn declare_local(&mut self, parts: &LineParts<'_>, line_no: usize) -> Result<()> {
        let name = parts.head.as_ref().map(|h| h.name.clone()).unwrap_or_default();
        let (kind_text, init) = match parts.rest.find('=') {
            Some(eq) => (&parts.rest[..eq], Some((eq + 1, &parts.rest[eq + 1..]))),
            None => (parts.rest, None),
        };
        if kind_text.trim().is_empty() {
            return Err(Error::syntax(format!("local '{}' without type", name), line_no, parts.rest_col));
        }
        let kind = ValueKind::from_source(kind_text).ok_or_else(|| {
            Error::syntax(format!("unknown type '{}'", kind_text.trim()), line_no, parts.rest_col)
        })?;
        let value = match init {
            Some((_, text)) if text.trim().is_empty() => {
                return Err(Error::syntax(
                    format!("local '{}' without initial value after '='", name),
                    line_no,
                    parts.rest_col + parts.rest.len(),
                ));
            }
            Some((offset, text)) => Some(self.constant(text, kind, line_no, parts.rest_col + offset)?),
            None => None,
        };
        self.declarations.declare(&name, kind, SlotRole::Local, value, line_no)?;
        Ok(())
    }

    fn constant(&self, text: &str, kind: ValueKind, line_no: usize, col: usize) -> Result<Value> {
        let mut parser = Parser::for_text(text, line_no, col, &self.declarations)?;
        let value = parser.parse_initializer(kind)?;
        parser.expect_end()?;
        Ok(value)
    }

    // ===== Body =====

    fn parser<'s>(&'s self, parts: &LineParts<'_>, line_no: usize) -> Result<Parser<'s>> {
        Parser::for_text(parts.rest, line_no, parts.rest_col, &self.declarations)
    }

    fn expression(&self, parts: &LineParts<'_>, line_no: usize) -> Result<Expr> {
        let mut parser = self.parser(parts, line_no)?;
        let expr = parser.parse_expression()?;
        parser.expect_end()?;
        Ok(expr)
    }

    fn condition(&self, parts: &LineParts<'_>, line_no: usize) -> Result<Expr> {
        let expr = self.expression(parts, line_no)?;
        if expr.kind() != ValueKind::Boolean {
            return Err(Error::syntax(
                format!("{} needs a bool condition, found {}", parts.directive.spelling(), expr.kind()),
                line_no,
                parts.rest_col,
            ));
        }
        Ok(expr)
    }

    fn expect_no_args(parts: &LineParts<'_>, line_no: usize) -> Result<()> {
        if parts.rest.is_empty() || parts.rest.starts_with("//") {
            Ok(())
        } else {
            Err(Error::syntax(
                format!("{} takes no arguments", parts.directive.spelling()),
                line_no,
                parts.rest_col,
            ))
        }
    }

    fn target(&self, parts: &LineParts<'_>, line_no: usize) -> Result<SlotRef> {
        let head = parts
            .head
            .as_ref()
            .ok_or_else(|| Error::syntax("target name is missing", line_no, 1))?;
        self.declarations.resolve(&head.name).ok_or_else(|| {
            Error::syntax(format!("undeclared name '{}'", head.name), line_no, head.col)
        })
    }

    fn label(parts: &LineParts<'_>) -> Option<String> {
        parts.head.as_ref().filter(|h| h.is_label).map(|h| h.name.clone())
    }

    fn body_directive(&mut self, parts: &LineParts<'_>, line_no: usize) -> Result<()> {
        let col = parts.directive_col;
        match parts.directive {
            Directive::Set => {
                let target = self.target(parts, line_no)?;
                let value = self.expression(parts, line_no)?;
                let value = coerce(value, target.kind, line_no, parts.rest_col)?;
                self.append(Command::Set { target, value, line: line_no }, line_no, col)
            }
            Directive::SetIndex => {
                let target = self.target(parts, line_no)?;
                if !target.kind.is_array() {
                    return Err(Error::syntax(
                        format!("'{}' is not an array", target.name),
                        line_no,
                        1,
                    ));
                }
                let (index, value) = {
                    let mut parser = self.parser(parts, line_no)?;
                    let index_span = parser.current_span();
                    let index = parser.parse_expression()?;
                    parser.expect(crate::lexer::Token::Eq)?;
                    let value_span = parser.current_span();
                    let value = parser.parse_expression()?;
                    parser.expect_end()?;
                    (
                        coerce(index, ValueKind::Integer, index_span.line, index_span.col)?,
                        coerce(value, target.kind.element_kind(), value_span.line, value_span.col)?,
                    )
                };
                self.append(Command::SetIndexed { target, index, value, line: line_no }, line_no, col)
            }
            Directive::If => {
                let condition = self.condition(parts, line_no)?;
                self.open(
                    FrameKind::If { branches: Vec::new(), condition: Some((condition, line_no)), in_else: false },
                    line_no,
                    col,
                )
            }
            Directive::ElseIf => {
                let condition = self.condition(parts, line_no)?;
                self.next_if_arm(Some(condition), line_no, col)
            }
            Directive::Else => {
                Self::expect_no_args(parts, line_no)?;
                self.next_if_arm(None, line_no, col)
            }
            Directive::EndIf => {
                Self::expect_no_args(parts, line_no)?;
                self.close(Directive::EndIf, line_no, col)
            }
            Directive::While => {
                let condition = self.condition(parts, line_no)?;
                self.open(FrameKind::While { label: Self::label(parts), condition }, line_no, col)
            }
            Directive::For => {
                let kind = self.for_loop(parts, line_no)?;
                self.open(kind, line_no, col)
            }
            Directive::ForAll => {
                let kind = self.for_each(parts, line_no)?;
                self.open(kind, line_no, col)
            }
            Directive::EndWhile | Directive::EndFor | Directive::EndForAll | Directive::EndChoise => {
                Self::expect_no_args(parts, line_no)?;
                self.close(parts.directive, line_no, col)
            }
            Directive::Break | Directive::Continue => {
                let label = self.jump_label(parts, line_no)?;
                let command = if parts.directive == Directive::Break {
                    Command::Break { label, line: line_no }
                } else {
                    Command::Continue { label, line: line_no }
                };
                self.append(command, line_no, col)
            }
            Directive::Choise => {
                let selector = self.expression(parts, line_no)?;
                if selector.kind().is_array() {
                    return Err(Error::syntax(
                        format!(".choise cannot select on {}", selector.kind()),
                        line_no,
                        parts.rest_col,
                    ));
                }
                self.open(
                    FrameKind::Choice { selector, cases: Vec::new(), pending: None, in_otherwise: false },
                    line_no,
                    col,
                )
            }
            Directive::Of => {
                let value = self.expression(parts, line_no)?;
                self.next_case(Some(value), line_no, parts.rest_col)
            }
            Directive::Otherwise => {
                Self::expect_no_args(parts, line_no)?;
                self.next_case(None, line_no, col)
            }
            Directive::Error => {
                let message = self.expression(parts, line_no)?;
                if message.kind() != ValueKind::String {
                    return Err(Error::syntax(
                        format!(".error needs a str message, found {}", message.kind()),
                        line_no,
                        parts.rest_col,
                    ));
                }
                self.append(Command::MError { message, line: line_no, col: parts.rest_col }, line_no, col)
            }
            Directive::Exit => {
                Self::expect_no_args(parts, line_no)?;
                self.append(Command::Exit { line: line_no }, line_no, col)
            }
            Directive::Mend => {
                Self::expect_no_args(parts, line_no)?;
                if let Some(open) = self.frames.last() {
                    return Err(Error::syntax(
                        format!(
                            "{} unclosed operator(s); innermost is {} at line {}",
                            self.frames.len(),
                            open.opener(),
                            open.line
                        ),
                        line_no,
                        col,
                    ));
                }
                self.state = BuildState::AfterMacro;
                debug!(name = %self.name, commands = self.body.len(), "macro closed");
                Ok(())
            }
            Directive::Macro | Directive::Local => Err(Error::internal(format!(
                "{} reached the body handler",
                parts.directive.spelling()
            ))),
        }
    }

    /// `.for var = init to limit [step step]`
    fn for_loop(&self, parts: &LineParts<'_>, line_no: usize) -> Result<FrameKind> {
        let mut parser = self.parser(parts, line_no)?;
        if parser.is_at_end() {
            return Err(parser.error("loop variable is missing"));
        }
        let var_span = parser.current_span();
        let var = parser.parse_slot_name()?;
        if !var.kind.is_numeric() {
            return Err(Error::syntax(
                format!(".for variable '{}' must be int or real, found {}", var.name, var.kind),
                var_span.line,
                var_span.col,
            ));
        }
        parser.expect(crate::lexer::Token::Eq)?;
        let bound = |parser: &mut Parser<'_>| -> Result<Expr> {
            let span = parser.current_span();
            if parser.is_at_end() {
                return Err(parser.error("expression is missing"));
            }
            let expr = parser.parse_at(Precedence::Additive)?;
            if !expr.kind().is_numeric() {
                return Err(Error::syntax(
                    format!("illegal data type {} in .for", expr.kind()),
                    span.line,
                    span.col,
                ));
            }
            coerce(expr, var.kind, span.line, span.col)
        };
        let init = bound(&mut parser)?;
        parser.expect_word("to")?;
        let limit = bound(&mut parser)?;
        let step = if parser.accept_word("step") {
            bound(&mut parser)?
        } else {
            coerce(Expr::Constant(Value::Int(1)), var.kind, line_no, parts.rest_col)?
        };
        parser.expect_end()?;
        Ok(FrameKind::For { label: Self::label(parts), var, init, limit, step })
    }

    /// `.forall var in source splitted by separator`
    fn for_each(&self, parts: &LineParts<'_>, line_no: usize) -> Result<FrameKind> {
        let mut parser = self.parser(parts, line_no)?;
        if parser.is_at_end() {
            return Err(parser.error("loop variable is missing"));
        }
        let var_span = parser.current_span();
        let var = parser.parse_slot_name()?;
        if var.kind != ValueKind::String {
            return Err(Error::syntax(
                format!(".forall variable '{}' must be str, found {}", var.name, var.kind),
                var_span.line,
                var_span.col,
            ));
        }
        parser.expect_word("in")?;
        let string = |parser: &mut Parser<'_>| -> Result<Expr> {
            let span = parser.current_span();
            if parser.is_at_end() {
                return Err(parser.error("expression is missing"));
            }
            let expr = parser.parse_at(Precedence::Concat)?;
            if expr.kind() != ValueKind::String {
                return Err(Error::syntax(
                    format!(".forall operand must be str, found {}", expr.kind()),
                    span.line,
                    span.col,
                ));
            }
            Ok(expr)
        };
        let source = string(&mut parser)?;
        parser.expect_word("splitted")?;
        parser.expect_word("by")?;
        let separator = string(&mut parser)?;
        parser.expect_end()?;
        Ok(FrameKind::ForEach { label: Self::label(parts), var, source, separator })
    }

    /// Validate a `.break`/`.continue` target against the open loops
    fn jump_label(&self, parts: &LineParts<'_>, line_no: usize) -> Result<Option<String>> {
        let spelling = parts.directive.spelling();
        let label = if parts.rest.is_empty() {
            None
        } else if is_ident(parts.rest) {
            Some(parts.rest.to_string())
        } else {
            return Err(Error::syntax(format!("invalid label '{}'", parts.rest), line_no, parts.rest_col));
        };

        let mut loops = self.frames.iter().rev().filter(|f| f.is_loop());
        match &label {
            None if loops.next().is_none() => Err(Error::syntax(
                format!("{} outside the loop", spelling),
                line_no,
                parts.directive_col,
            )),
            Some(name) if !loops.any(|f| f.label() == Some(name.as_str())) => Err(Error::syntax(
                format!("{}: label '{}' does not name an enclosing loop", spelling, name),
                line_no,
                parts.rest_col,
            )),
            _ => Ok(label),
        }
    }

    // ===== Substitution lines =====

    fn substitution(&self, text: &str, line_no: usize) -> Result<Vec<Expr>> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut pos = 0;

        while let Some(found) = text[pos..].find('&') {
            let at = pos + found;
            literal.push_str(&text[pos..at]);
            let after = &text[at + 1..];

            if after.starts_with('&') {
                literal.push('&');
                pos = at + 2;
                continue;
            }
            let name_len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            let name = &after[..name_len];
            if !is_ident(name) {
                literal.push('&');
                pos = at + 1;
                continue;
            }

            let slot = self.declarations.resolve(name).ok_or_else(|| {
                Error::syntax(format!("undeclared name '{}'", name), line_no, at + 1)
            })?;
            let mut end = at + 1 + name_len;
            let expr = if text[end..].starts_with('[') {
                if !slot.kind.is_array() {
                    return Err(Error::syntax(format!("'{}' is not an array", name), line_no, end + 1));
                }
                let close = matching_bracket(text, end)
                    .ok_or_else(|| Error::syntax("missing ']'", line_no, end + 1))?;
                let inner = &text[end + 1..close];
                let mut parser = Parser::for_text(inner, line_no, end + 2, &self.declarations)?;
                let index = parser.parse_expression()?;
                parser.expect_end()?;
                let index = coerce(index, ValueKind::Integer, line_no, end + 2)?;
                end = close + 1;
                Expr::Index { slot, index: Box::new(index) }
            } else {
                if text[end..].starts_with('.') {
                    end += 1;
                }
                Expr::Slot(slot)
            };

            if !literal.is_empty() {
                parts.push(Expr::string(std::mem::take(&mut literal)));
            }
            parts.push(stringify(expr));
            pos = end;
        }
        literal.push_str(&text[pos..]);
        literal.push('\n');
        parts.push(Expr::string(literal));
        Ok(parts)
    }

    // ===== Containers =====

    fn container(&mut self) -> &mut Vec<Command> {
        match self.frames.last_mut() {
            Some(frame) => &mut frame.body,
            None => &mut self.body,
        }
    }

    /// Reject commands that can never run, or that sit between `.choise` and its first `.of`
    fn ensure_reachable(&self, line_no: usize, col: usize) -> Result<()> {
        if let Some(Frame { kind: FrameKind::Choice { pending: None, in_otherwise: false, .. }, .. }) =
            self.frames.last()
        {
            return Err(Error::syntax("only .of may follow .choise", line_no, col));
        }
        let container = match self.frames.last() {
            Some(frame) => &frame.body,
            None => &self.body,
        };
        match container.last() {
            Some(last) if last.is_terminal() => Err(Error::syntax(
                format!("dead code after the command at line {}", last.line()),
                line_no,
                col,
            )),
            _ => Ok(()),
        }
    }

    fn append(&mut self, command: Command, line_no: usize, col: usize) -> Result<()> {
        self.ensure_reachable(line_no, col)?;
        self.container().push(command);
        Ok(())
    }

    fn open(&mut self, kind: FrameKind, line_no: usize, col: usize) -> Result<()> {
        self.ensure_reachable(line_no, col)?;
        self.frames.push(Frame { kind, line: line_no, body: Vec::new() });
        Ok(())
    }

    /// `.elseif cond` (Some) or `.else` (None)
    fn next_if_arm(&mut self, condition: Option<Expr>, line_no: usize, col: usize) -> Result<()> {
        let spelling = if condition.is_some() { ".elseif" } else { ".else" };
        let Some(frame) = self.frames.last_mut() else {
            return Err(Error::syntax(format!("{} without .if", spelling), line_no, col));
        };
        let (opener, opened_at) = (frame.opener(), frame.line);
        let FrameKind::If { branches, condition: pending, in_else } = &mut frame.kind else {
            return Err(Error::syntax(
                format!("{} inside {} opened at line {}", spelling, opener, opened_at),
                line_no,
                col,
            ));
        };
        if *in_else {
            return Err(Error::syntax(format!("{} after .else", spelling), line_no, col));
        }
        let (finished, arm_line) = pending
            .take()
            .ok_or_else(|| Error::internal(".if frame without a pending condition"))?;
        branches.push(Branch { condition: finished, body: std::mem::take(&mut frame.body), line: arm_line });
        match condition {
            Some(next) => *pending = Some((next, line_no)),
            None => *in_else = true,
        }
        Ok(())
    }

    /// `.of value` (Some) or `.otherwise` (None)
    fn next_case(&mut self, value: Option<Expr>, line_no: usize, col: usize) -> Result<()> {
        let spelling = if value.is_some() { ".of" } else { ".otherwise" };
        let Some(frame) = self.frames.last_mut() else {
            return Err(Error::syntax(format!("{} without .choise", spelling), line_no, col));
        };
        let (opener, opened_at) = (frame.opener(), frame.line);
        let FrameKind::Choice { selector, cases, pending, in_otherwise } = &mut frame.kind else {
            return Err(Error::syntax(
                format!("{} inside {} opened at line {}", spelling, opener, opened_at),
                line_no,
                col,
            ));
        };
        if *in_otherwise {
            return Err(Error::syntax(format!("{} after .otherwise", spelling), line_no, col));
        }
        let value = match value {
            Some(v) => {
                let kind = selector.kind();
                let widened = v.kind() == ValueKind::Integer && kind == ValueKind::Real;
                if v.kind() != kind && !widened {
                    return Err(Error::syntax(
                        format!(".of value is {} but .choise selects on {}", v.kind(), kind),
                        line_no,
                        col,
                    ));
                }
                Some(coerce(v, kind, line_no, col)?)
            }
            None => {
                if pending.is_none() {
                    return Err(Error::syntax(".otherwise before any .of", line_no, col));
                }
                None
            }
        };
        if let Some((done, case_line)) = pending.take() {
            cases.push(Case { value: done, body: std::mem::take(&mut frame.body), line: case_line });
        }
        match value {
            Some(v) => *pending = Some((v, line_no)),
            None => *in_otherwise = true,
        }
        Ok(())
    }

    fn close(&mut self, directive: Directive, line_no: usize, col: usize) -> Result<()> {
        let spelling = directive.spelling();
        let Some(frame) = self.frames.pop() else {
            return Err(Error::syntax(format!("{} without an open operator", spelling), line_no, col));
        };
        let Frame { kind, line, body } = frame;
        let command = match (directive, kind) {
            (Directive::EndIf, FrameKind::If { mut branches, condition, in_else }) => {
                let otherwise = if in_else {
                    Some(body)
                } else {
                    let (condition, arm_line) = condition
                        .ok_or_else(|| Error::internal(".if frame without a pending condition"))?;
                    branches.push(Branch { condition, body, line: arm_line });
                    None
                };
                Command::If { branches, otherwise, line }
            }
            (Directive::EndWhile, FrameKind::While { label, condition }) => {
                Command::While { label, condition, body, line }
            }
            (Directive::EndFor, FrameKind::For { label, var, init, limit, step }) => {
                Command::For { label, var, init, limit, step, body, line }
            }
            (Directive::EndForAll, FrameKind::ForEach { label, var, source, separator }) => {
                Command::ForEach { label, var, source, separator, body, line }
            }
            (Directive::EndChoise, FrameKind::Choice { selector, mut cases, pending, in_otherwise }) => {
                let otherwise = if in_otherwise {
                    Some(body)
                } else {
                    match pending {
                        Some((value, case_line)) => cases.push(Case { value, body, line: case_line }),
                        None => return Err(Error::syntax(".choise without any .of", line_no, col)),
                    }
                    None
                };
                Command::Choice { selector, cases, otherwise, line }
            }
            (_, kind) => {
                let opened = Frame { kind, line, body: Vec::new() };
                return Err(Error::syntax(
                    format!("{} closes {} opened at line {}", spelling, opened.opener(), line),
                    line_no,
                    col,
                ));
            }
        };
        self.container().push(command);
        Ok(())
    }
}

/// Build a macro definition from source text
pub fn build(source: &str) -> Result<MacroDef> {
    let mut builder = MacroBuilder::new();
    for (index, line) in source.lines().enumerate() {
        builder.process_line(index + 1, line)?;
    }
    builder.finish()
}
