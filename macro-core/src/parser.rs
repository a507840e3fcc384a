//! Expression parser
//!
//! Precedence climbing over ten levels, loosest first:
//!
//! ```text
//! Or  ||  >  And &&  >  Not !  >  Compare == != < <= > >=  >  Ternary ?:
//!     >  Concat #  >  Additive + -  >  Multiplicative * / %  >  Unary -  >  Term
//! ```
//!
//! Type checking happens while the tree is built: every constructor checks
//! its operand kinds, widens int to real where needed and wraps non-string
//! operands of `#` in a `str()` conversion.

use crate::ast::{ArithOp, CompareOp, Expr, LogicalOp, SymbolResolver, UnaryOp};
use crate::error::{Error, Result};
use crate::lexer::{Lexer, Span, SpannedToken, Token};
use crate::types::conversion::{collect, conversion, convert, Conversion};
use crate::types::intrinsics::Intrinsic;
use crate::types::{Value, ValueKind};

/// Priority levels, loosest binding first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    Or,
    And,
    Not,
    Compare,
    Ternary,
    Concat,
    Additive,
    Multiplicative,
    Unary,
    Term,
}

pub struct Parser<'r> {
    tokens: Vec<SpannedToken>,
    pos: usize,
    end: Span,
    resolver: &'r dyn SymbolResolver,
}

impl<'r> Parser<'r> {
    pub fn new(tokens: Vec<SpannedToken>, end: Span, resolver: &'r dyn SymbolResolver) -> Self {
        Self { tokens, pos: 0, end, resolver }
    }

    /// Lex `text`, which starts at `line`:`col` of the macro source
    pub fn for_text(text: &str, line: usize, col: usize, resolver: &'r dyn SymbolResolver) -> Result<Self> {
        let lexer = Lexer::with_origin(text, line, col);
        let tokens = lexer.tokenize_with_spans()?;
        Ok(Self::new(tokens, lexer.end_span(), resolver))
    }

    /// Parse a full expression
    pub fn parse_expression(&mut self) -> Result<Expr> {
        if self.is_at_end() {
            return Err(self.error("expression is missing"));
        }
        self.parse_at(Precedence::Or)
    }

    /// Parse starting at a given priority level
    pub fn parse_at(&mut self, level: Precedence) -> Result<Expr> {
        match level {
            Precedence::Or => self.parse_logical(LogicalOp::Or),
            Precedence::And => self.parse_logical(LogicalOp::And),
            Precedence::Not => self.parse_not(),
            Precedence::Compare => self.parse_compare(),
            Precedence::Ternary => self.parse_ternary(),
            Precedence::Concat => self.parse_concat(),
            Precedence::Additive => self.parse_additive(),
            Precedence::Multiplicative => self.parse_multiplicative(),
            Precedence::Unary => self.parse_unary(),
            Precedence::Term => self.parse_term(),
        }
    }

    /// Parse a constant initializer (`{c1,c2,...}` or a constant expression)
    /// and convert it to `kind`
    pub fn parse_initializer(&mut self, kind: ValueKind) -> Result<Value> {
        let span = self.current_span();
        if self.is_at_end() {
            return Err(self.error("initial value is missing"));
        }
        let value = if matches!(self.peek_token(), Some(Token::LBrace)) {
            self.advance();
            let mut elements = Vec::new();
            if !matches!(self.peek_token(), Some(Token::RBrace)) {
                loop {
                    let element_span = self.current_span();
                    let element = self.parse_constant()?;
                    let element = convert(&element, kind.element_kind())
                        .map_err(|e| syntax_at(&e.to_string(), element_span))?;
                    elements.push(element);
                    if matches!(self.peek_token(), Some(Token::Comma)) {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
            self.expect(Token::RBrace)?;
            if !kind.is_array() {
                return Err(syntax_at(&format!("array initializer for {} slot", kind), span));
            }
            collect(kind, elements)?
        } else {
            self.parse_constant()?
        };
        convert(&value, kind).map_err(|e| syntax_at(&e.to_string(), span))
    }

    fn parse_constant(&mut self) -> Result<Value> {
        let span = self.current_span();
        let expr = self.parse_at(Precedence::Or)?;
        if !expr.is_constant() {
            return Err(syntax_at("constant value expected", span));
        }
        expr.evaluate_constant().map_err(|e| syntax_at(&e.to_string(), span))
    }

    /// Fail when tokens remain
    pub fn expect_end(&self) -> Result<()> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(self.error("unparsed tail"))
        }
    }

    /// Parse `name` or `&name` and resolve it
    pub fn parse_slot_name(&mut self) -> Result<crate::ast::SlotRef> {
        let span = self.current_span();
        if matches!(self.peek_token(), Some(Token::Amp)) {
            self.advance();
        }
        let name = self.expect_ident()?;
        self.resolver
            .resolve(&name)
            .ok_or_else(|| syntax_at(&format!("undeclared name '{}'", name), span))
    }

    // ===== Levels =====

    fn parse_logical(&mut self, op: LogicalOp) -> Result<Expr> {
        let (token, next) = match op {
            LogicalOp::Or => (Token::OrOr, Precedence::And),
            LogicalOp::And => (Token::AndAnd, Precedence::Not),
        };
        let span = self.current_span();
        let first = self.parse_at(next)?;
        if self.peek_token() != Some(&token) {
            return Ok(first);
        }

        require_kind(&first, ValueKind::Boolean, span, "logical operand")?;
        let mut operands = vec![first];
        while self.peek_token() == Some(&token) {
            self.advance();
            let span = self.current_span();
            let operand = self.parse_at(next)?;
            require_kind(&operand, ValueKind::Boolean, span, "logical operand")?;
            operands.push(operand);
        }
        Ok(Expr::Logical { op, operands })
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if !matches!(self.peek_token(), Some(Token::Bang)) {
            return self.parse_at(Precedence::Compare);
        }
        self.advance();
        let span = self.current_span();
        let operand = self.parse_not()?;
        require_kind(&operand, ValueKind::Boolean, span, "operand of '!'")?;
        Ok(Expr::Unary { op: UnaryOp::Not, operand: Box::new(operand) })
    }

    fn parse_compare(&mut self) -> Result<Expr> {
        let span = self.current_span();
        let left = self.parse_at(Precedence::Ternary)?;
        let op = match self.peek_token() {
            Some(Token::EqEq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Ge) => CompareOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_at(Precedence::Ternary)?;

        let (left, right) = unify(left, right, span, &format!("operator '{}'", op))?;
        let kind = left.kind();
        if kind.is_array() {
            return Err(syntax_at(&format!("arrays cannot be compared ({})", kind), span));
        }
        if kind == ValueKind::Boolean && !matches!(op, CompareOp::Eq | CompareOp::Ne) {
            return Err(syntax_at(&format!("operator '{}' is not defined for bool", op), span));
        }
        Ok(Expr::Compare { op, left: Box::new(left), right: Box::new(right) })
    }

    fn parse_ternary(&mut self) -> Result<Expr> {
        let span = self.current_span();
        let condition = self.parse_at(Precedence::Concat)?;
        if !matches!(self.peek_token(), Some(Token::Question)) {
            return Ok(condition);
        }
        require_kind(&condition, ValueKind::Boolean, span, "ternary condition")?;
        self.advance();
        let then_branch = self.parse_at(Precedence::Or)?;
        self.expect(Token::Colon)?;
        let else_branch = self.parse_at(Precedence::Or)?;
        let (then_branch, else_branch) = unify(then_branch, else_branch, span, "ternary branches")?;
        Ok(Expr::Ternary {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    fn parse_concat(&mut self) -> Result<Expr> {
        let first = self.parse_at(Precedence::Additive)?;
        if !matches!(self.peek_token(), Some(Token::Hash)) {
            return Ok(first);
        }
        let mut operands = vec![stringify(first)];
        while matches!(self.peek_token(), Some(Token::Hash)) {
            self.advance();
            let operand = self.parse_at(Precedence::Additive)?;
            operands.push(stringify(operand));
        }
        Ok(Expr::Concat(operands))
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let span = self.current_span();
        let mut left = self.parse_at(Precedence::Multiplicative)?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_at(Precedence::Multiplicative)?;
            left = arithmetic(op, left, right, span)?;
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let span = self.current_span();
        let mut left = self.parse_at(Precedence::Unary)?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                Some(Token::Percent) => ArithOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_at(Precedence::Unary)?;
            left = arithmetic(op, left, right, span)?;
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if !matches!(self.peek_token(), Some(Token::Minus)) {
            return self.parse_at(Precedence::Term);
        }
        let span = self.current_span();
        self.advance();
        let operand = self.parse_unary()?;
        if !operand.kind().is_numeric() {
            return Err(syntax_at(
                &format!("unary '-' needs a numeric operand, found {}", operand.kind()),
                span,
            ));
        }
        Ok(match operand {
            Expr::Constant(Value::Int(v)) => Expr::Constant(Value::Int(v.wrapping_neg())),
            Expr::Constant(Value::Real(v)) => Expr::Constant(Value::Real(-v)),
            other => Expr::Unary { op: UnaryOp::Neg, operand: Box::new(other) },
        })
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let span = self.current_span();
        let token = match self.peek_token() {
            Some(token) => token.clone(),
            None => return Err(self.error("operand is missing")),
        };
        match token {
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Constant(Value::Str(s)))
            }
            Token::Int(v) => {
                self.advance();
                Ok(Expr::Constant(Value::Int(v)))
            }
            Token::Real(v) => {
                self.advance();
                Ok(Expr::Constant(Value::Real(v)))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Constant(Value::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Constant(Value::Bool(false)))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_at(Precedence::Or)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Amp => {
                self.advance();
                let name = self.expect_ident()?;
                self.parse_name(name, span)
            }
            Token::Ident(name) => {
                self.advance();
                if matches!(self.peek_token(), Some(Token::LParen)) {
                    if let Some(function) = Intrinsic::from_name(&name) {
                        return self.parse_call(function, span);
                    }
                    return Err(syntax_at(&format!("unknown function '{}'", name), span));
                }
                self.parse_name(name, span)
            }
            other => Err(syntax_at(&format!("unexpected {:?}", other), span)),
        }
    }

    /// Slot read, optionally indexed
    fn parse_name(&mut self, name: String, span: Span) -> Result<Expr> {
        let slot = self
            .resolver
            .resolve(&name)
            .ok_or_else(|| syntax_at(&format!("undeclared name '{}'", name), span))?;
        if !matches!(self.peek_token(), Some(Token::LBracket)) {
            return Ok(Expr::Slot(slot));
        }
        if !slot.kind.is_array() {
            return Err(syntax_at(&format!("'{}' is not an array", name), span));
        }
        self.advance();
        let index_span = self.current_span();
        let index = self.parse_at(Precedence::Or)?;
        require_kind(&index, ValueKind::Integer, index_span, "array index")?;
        self.expect(Token::RBracket)?;
        Ok(Expr::Index { slot, index: Box::new(index) })
    }

    fn parse_call(&mut self, function: Intrinsic, span: Span) -> Result<Expr> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if !matches!(self.peek_token(), Some(Token::RParen)) {
            loop {
                args.push(self.parse_at(Precedence::Or)?);
                if matches!(self.peek_token(), Some(Token::Comma)) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;

        if args.len() != function.arity() {
            return Err(syntax_at(
                &format!(
                    "{}() takes {} argument(s), {} given ({})",
                    function,
                    function.arity(),
                    args.len(),
                    function.signature()
                ),
                span,
            ));
        }
        if let Some(arg) = args.first() {
            let is_slot = matches!(arg, Expr::Slot(_));
            if !function.accepts(arg.kind(), is_slot) {
                return Err(syntax_at(
                    &format!("illegal argument {} for {}", arg.kind(), function.signature()),
                    span,
                ));
            }
        }
        Ok(Expr::Call { function, args })
    }

    // ===== Helper Methods =====

    /// Peek at the current token (without span)
    pub fn peek_token(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|st| &st.token)
    }

    /// Get the span of the current token
    pub fn current_span(&self) -> Span {
        self.tokens.get(self.pos).map(|st| st.span).unwrap_or(self.end)
    }

    pub fn advance(&mut self) -> Option<&SpannedToken> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn expect(&mut self, expected: Token) -> Result<()> {
        match self.peek_token() {
            Some(token) if std::mem::discriminant(token) == std::mem::discriminant(&expected) => {
                self.advance();
                Ok(())
            }
            _ => Err(self.error(&format!("expected {}", describe(&expected)))),
        }
    }

    /// Consume a contextual keyword such as `to` or `splitted`
    pub fn expect_word(&mut self, word: &str) -> Result<()> {
        match self.peek_token() {
            Some(token) if token.is_word(word) => {
                self.advance();
                Ok(())
            }
            _ => Err(self.error(&format!("missing '{}'", word))),
        }
    }

    /// Consume a contextual keyword if present
    pub fn accept_word(&mut self, word: &str) -> bool {
        if self.peek_token().is_some_and(|t| t.is_word(word)) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn expect_ident(&mut self) -> Result<String> {
        match self.peek_token() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    pub fn error(&self, message: &str) -> Error {
        syntax_at(message, self.current_span())
    }
}

fn describe(token: &Token) -> &'static str {
    match token {
        Token::RParen => "')'",
        Token::RBracket => "']'",
        Token::RBrace => "'}'",
        Token::Colon => "':'",
        Token::Eq => "'='",
        Token::Comma => "','",
        _ => "token",
    }
}

fn syntax_at(message: &str, span: Span) -> Error {
    Error::syntax(message, span.line, span.col)
}

fn require_kind(expr: &Expr, kind: ValueKind, span: Span, what: &str) -> Result<()> {
    if expr.kind() == kind {
        Ok(())
    } else {
        Err(syntax_at(&format!("{} must be {}, found {}", what, kind, expr.kind()), span))
    }
}

/// Wrap a non-string expression in `str()`
pub fn stringify(expr: Expr) -> Expr {
    if expr.kind() == ValueKind::String {
        expr
    } else {
        Expr::Call { function: Intrinsic::Str, args: vec![expr] }
    }
}

/// Widen an int expression to real; constants are converted in place
fn widen(expr: Expr) -> Expr {
    match expr {
        Expr::Constant(Value::Int(v)) => Expr::Constant(Value::Real(v as f64)),
        e if e.kind() == ValueKind::Integer => Expr::Call { function: Intrinsic::Real, args: vec![e] },
        e => e,
    }
}

/// Bring two operands to one kind, widening int to real
fn unify(left: Expr, right: Expr, span: Span, what: &str) -> Result<(Expr, Expr)> {
    let (lk, rk) = (left.kind(), right.kind());
    if lk == rk {
        return Ok((left, right));
    }
    if lk.is_numeric() && rk.is_numeric() {
        return Ok((widen(left), widen(right)));
    }
    Err(syntax_at(&format!("{}: kinds {} and {} differ", what, lk, rk), span))
}

fn arithmetic(op: ArithOp, left: Expr, right: Expr, span: Span) -> Result<Expr> {
    if !left.kind().is_numeric() || !right.kind().is_numeric() {
        return Err(syntax_at(
            &format!("operator '{}' needs numeric operands, found {} and {}", op, left.kind(), right.kind()),
            span,
        ));
    }
    let (left, right) = unify(left, right, span, &format!("operator '{}'", op))?;
    Ok(Expr::Arithmetic { op, kind: left.kind(), left: Box::new(left), right: Box::new(right) })
}

/// Convert an expression to `dest` through the conversion table.
/// Constants are converted immediately; other expressions get a conversion call.
pub fn coerce(expr: Expr, dest: ValueKind, line: usize, col: usize) -> Result<Expr> {
    let src = expr.kind();
    let rule = conversion(dest, src);
    if rule == Conversion::Identity {
        return Ok(expr);
    }
    if rule == Conversion::Illegal {
        return Err(Error::syntax(format!("cannot convert {} to {}", src, dest), line, col));
    }
    if dest.is_array() {
        return Err(Error::syntax(format!("{} cannot be assigned to {}", src, dest), line, col));
    }
    if expr.is_constant() {
        let value = expr
            .evaluate_constant()
            .and_then(|v| convert(&v, dest))
            .map_err(|e| Error::syntax(e.to_string(), line, col))?;
        return Ok(Expr::Constant(value));
    }
    let function = match (rule, dest) {
        (Conversion::Render, _) => Intrinsic::Str,
        (Conversion::Truncate, _) | (Conversion::Parse, ValueKind::Integer) => Intrinsic::Int,
        (Conversion::Widen, _) | (Conversion::Parse, ValueKind::Real) => Intrinsic::Real,
        (Conversion::Parse, ValueKind::Boolean) => Intrinsic::Bool,
        _ => {
            return Err(Error::syntax(
                format!("{} cannot be assigned to {} here; use a constant", src, dest),
                line,
                col,
            ));
        }
    };
    Ok(Expr::Call { function, args: vec![expr] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Declarations, SlotRole};

    fn decls() -> Declarations {
        let mut d = Declarations::new();
        d.declare("x", ValueKind::Integer, SlotRole::Positional, None, 1).unwrap();
        d.declare("r", ValueKind::Real, SlotRole::Positional, None, 1).unwrap();
        d.declare("s", ValueKind::String, SlotRole::Key, None, 1).unwrap();
        d.declare("b", ValueKind::Boolean, SlotRole::Key, None, 1).unwrap();
        d.declare("a", ValueKind::IntegerArray, SlotRole::Local, None, 2).unwrap();
        d
    }

    fn parse(source: &str) -> Result<Expr> {
        let d = decls();
        let mut parser = Parser::for_text(source, 1, 1, &d)?;
        let expr = parser.parse_expression()?;
        parser.expect_end()?;
        Ok(expr)
    }

    #[test]
    fn test_constant_fold_precedence() {
        let expr = parse("1+2*3").unwrap();
        assert!(expr.is_constant());
        assert_eq!(expr.kind(), ValueKind::Integer);
        assert_eq!(expr.evaluate_constant().unwrap(), Value::Int(7));
    }

    #[test]
    fn test_widening_in_arithmetic() {
        let expr = parse("x + r").unwrap();
        assert_eq!(expr.kind(), ValueKind::Real);
        match expr {
            Expr::Arithmetic { left, .. } => {
                assert!(matches!(*left, Expr::Call { function: Intrinsic::Real, .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(parse("1 + 0.5").unwrap().evaluate_constant().unwrap(), Value::Real(1.5));
    }

    #[test]
    fn test_concat_wraps_non_strings() {
        let expr = parse("s # x # true").unwrap();
        match expr {
            Expr::Concat(parts) => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(parts[1], Expr::Call { function: Intrinsic::Str, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            parse("\"n=\" # 4").unwrap().evaluate_constant().unwrap(),
            Value::Str("n=4".into())
        );
    }

    #[test]
    fn test_sigil_names_and_indexing() {
        assert_eq!(parse("&x").unwrap().kind(), ValueKind::Integer);
        assert_eq!(parse("a[x+1]").unwrap().kind(), ValueKind::Integer);
        assert!(parse("x[1]").is_err());
        assert!(parse("a[true]").is_err());
    }

    #[test]
    fn test_logical_requires_booleans() {
        assert!(parse("b && x > 1 || !b").is_ok());
        assert!(parse("b && x").is_err());
        assert!(parse("!x").is_err());
    }

    #[test]
    fn test_comparison_rules() {
        assert!(parse("s == \"a\"").is_ok());
        assert!(parse("x < r").is_ok());
        assert!(parse("b == true").is_ok());
        assert!(parse("b < true").is_err());
        assert!(parse("s < 1").is_err());
        assert!(parse("a == a").is_err());
    }

    #[test]
    fn test_ternary() {
        let expr = parse("b ? 1 : 2.5").unwrap();
        assert_eq!(expr.kind(), ValueKind::Real);
        assert!(parse("b ? 1 : \"x\"").is_err());
        assert!(parse("x ? 1 : 2").is_err());
        assert_eq!(parse("(1 > 2) ? 1 : 2").unwrap().evaluate_constant().unwrap(), Value::Int(2));
    }

    #[test]
    fn test_intrinsics() {
        assert_eq!(parse("exists(x)").unwrap().kind(), ValueKind::Boolean);
        assert!(parse("exists(x+1)").is_err());
        assert!(parse("uniqueL(1)").is_err());
        assert!(parse("bool(1)").is_err());
        assert_eq!(parse("len(a)").unwrap().kind(), ValueKind::Integer);
        assert_eq!(parse("int(\"12\")").unwrap().evaluate_constant().unwrap(), Value::Int(12));
        assert!(!parse("uniqueG()").unwrap().is_constant());
        assert!(parse("nothing(1)").is_err());
    }

    #[test]
    fn test_unknown_name_reports_position() {
        let d = decls();
        let mut parser = Parser::for_text("x + zz", 7, 12, &d).unwrap();
        let err = parser.parse_expression().unwrap_err();
        assert_eq!(err.position(), Some((7, 16)));
    }

    #[test]
    fn test_unparsed_tail() {
        let err = parse("x 1").unwrap_err();
        assert!(err.to_string().contains("unparsed tail"));
    }

    #[test]
    fn test_negative_literals_fold() {
        assert_eq!(parse("-5").unwrap(), Expr::Constant(Value::Int(-5)));
        assert!(parse("-s").is_err());
    }

    #[test]
    fn test_initializer() {
        let d = decls();
        let mut p = Parser::for_text("{1, 2, 3}", 1, 1, &d).unwrap();
        assert_eq!(p.parse_initializer(ValueKind::RealArray).unwrap(), Value::RealArray(vec![1.0, 2.0, 3.0]));
        let mut p = Parser::for_text("\"7\"", 1, 1, &d).unwrap();
        assert_eq!(p.parse_initializer(ValueKind::Integer).unwrap(), Value::Int(7));
        let mut p = Parser::for_text("x", 1, 1, &d).unwrap();
        assert!(p.parse_initializer(ValueKind::Integer).is_err());
        let mut p = Parser::for_text("{1}", 1, 1, &d).unwrap();
        assert!(p.parse_initializer(ValueKind::Integer).is_err());
    }

    #[test]
    fn test_coerce() {
        let e = coerce(Expr::Constant(Value::Int(3)), ValueKind::String, 1, 1).unwrap();
        assert_eq!(e, Expr::string("3"));
        let slot = decls().resolve("r").unwrap();
        let e = coerce(Expr::Slot(slot), ValueKind::Integer, 1, 1).unwrap();
        assert!(matches!(e, Expr::Call { function: Intrinsic::Int, .. }));
        assert!(coerce(Expr::Constant(Value::Bool(true)), ValueKind::Integer, 2, 3).is_err());
    }
}
