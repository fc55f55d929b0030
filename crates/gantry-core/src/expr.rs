//! Gate condition evaluation.
//!
//! Conditions are small boolean expressions over the trigger context
//! and the aggregate outcome of prerequisite instances:
//!
//! ```text
//! startsWith(ref, 'v')
//! ref matches 'v*' && event == 'push'
//! success() || failure()
//! always()
//! ```
//!
//! Evaluation is side-effect free. Unknown identifiers or functions
//! produce an eval error; the caller skips the owning instance rather
//! than failing it.

use crate::trigger::TriggerContext;
use crate::{Error, Result};

/// Aggregate status of an instance's prerequisites at gate time.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeedsOutcome {
    pub total: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl NeedsOutcome {
    /// True when every prerequisite succeeded (vacuously true for
    /// root jobs).
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    pub fn any_failed(&self) -> bool {
        self.failed > 0
    }
}

/// Inputs available to a condition.
#[derive(Debug, Clone)]
pub struct EvalContext<'a> {
    pub trigger: &'a TriggerContext,
    pub needs: NeedsOutcome,
}

impl<'a> EvalContext<'a> {
    pub fn new(trigger: &'a TriggerContext, needs: NeedsOutcome) -> Self {
        Self { trigger, needs }
    }
}

/// The gate applied when a job declares no condition.
pub const DEFAULT_CONDITION: &str = "success()";

/// Evaluate a condition string to a boolean.
pub fn evaluate(expr: &str, ctx: &EvalContext<'_>) -> Result<bool> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        expr,
        tokens,
        pos: 0,
    };
    let value = parser.parse_or(ctx)?;
    parser.expect_end()?;
    match value {
        Value::Bool(b) => Ok(b),
        Value::Str(_) => Err(Error::ExpressionSyntax {
            expr: expr.to_string(),
            message: "condition does not evaluate to a boolean".to_string(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Bool(bool),
    Str(String),
}

impl Value {
    fn as_text(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Str(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    Comma,
    AndAnd,
    OrOr,
    Bang,
    EqEq,
    NotEq,
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let syntax_err = |message: String| Error::ExpressionSyntax {
        expr: expr.to_string(),
        message,
    };

    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '&' => {
                chars.next();
                if chars.next() != Some('&') {
                    return Err(syntax_err("expected '&&'".to_string()));
                }
                tokens.push(Token::AndAnd);
            }
            '|' => {
                chars.next();
                if chars.next() != Some('|') {
                    return Err(syntax_err("expected '||'".to_string()));
                }
                tokens.push(Token::OrOr);
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::NotEq);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            '=' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(syntax_err("expected '=='".to_string()));
                }
                tokens.push(Token::EqEq);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut lit = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => lit.push(ch),
                        None => return Err(syntax_err("unterminated string literal".to_string())),
                    }
                }
                tokens.push(Token::Str(lit));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(syntax_err(format!("unexpected character '{}'", other)));
            }
        }
    }

    Ok(tokens)
}

struct Parser<'e> {
    expr: &'e str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'e> Parser<'e> {
    fn syntax_err(&self, message: impl Into<String>) -> Error {
        Error::ExpressionSyntax {
            expr: self.expr.to_string(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            other => Err(self.syntax_err(format!("expected {:?}, found {:?}", expected, other))),
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.syntax_err("trailing tokens after expression"))
        }
    }

    fn parse_or(&mut self, ctx: &EvalContext<'_>) -> Result<Value> {
        let mut left = self.parse_and(ctx)?;
        while self.peek() == Some(&Token::OrOr) {
            self.next();
            let right = self.parse_and(ctx)?;
            left = Value::Bool(to_bool(&left, self.expr)? || to_bool(&right, self.expr)?);
        }
        Ok(left)
    }

    fn parse_and(&mut self, ctx: &EvalContext<'_>) -> Result<Value> {
        let mut left = self.parse_unary(ctx)?;
        while self.peek() == Some(&Token::AndAnd) {
            self.next();
            let right = self.parse_unary(ctx)?;
            left = Value::Bool(to_bool(&left, self.expr)? && to_bool(&right, self.expr)?);
        }
        Ok(left)
    }

    fn parse_unary(&mut self, ctx: &EvalContext<'_>) -> Result<Value> {
        if self.peek() == Some(&Token::Bang) {
            self.next();
            let value = self.parse_unary(ctx)?;
            return Ok(Value::Bool(!to_bool(&value, self.expr)?));
        }
        self.parse_comparison(ctx)
    }

    fn parse_comparison(&mut self, ctx: &EvalContext<'_>) -> Result<Value> {
        let left = self.parse_operand(ctx)?;

        match self.peek() {
            Some(Token::EqEq) => {
                self.next();
                let right = self.parse_operand(ctx)?;
                Ok(Value::Bool(left.as_text() == right.as_text()))
            }
            Some(Token::NotEq) => {
                self.next();
                let right = self.parse_operand(ctx)?;
                Ok(Value::Bool(left.as_text() != right.as_text()))
            }
            // Infix spellings of the prefix/glob tests, so gates read
            // naturally: `ref matches 'v*'`.
            Some(Token::Ident(op)) if op == "matches" => {
                self.next();
                let right = self.parse_operand(ctx)?;
                Ok(Value::Bool(glob_match(&right.as_text(), &left.as_text())))
            }
            Some(Token::Ident(op)) if op == "startsWith" => {
                self.next();
                let right = self.parse_operand(ctx)?;
                Ok(Value::Bool(left.as_text().starts_with(&right.as_text())))
            }
            _ => Ok(left),
        }
    }

    fn parse_operand(&mut self, ctx: &EvalContext<'_>) -> Result<Value> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Value::Str(s)),
            Some(Token::LParen) => {
                let value = self.parse_or(ctx)?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_or(ctx)?);
                            if self.peek() == Some(&Token::Comma) {
                                self.next();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    self.call(&name, args, ctx)
                } else {
                    self.identifier(&name, ctx)
                }
            }
            other => Err(self.syntax_err(format!("expected operand, found {:?}", other))),
        }
    }

    fn identifier(&self, name: &str, ctx: &EvalContext<'_>) -> Result<Value> {
        match name {
            "ref" => Ok(Value::Str(ctx.trigger.short_ref().to_string())),
            "event" => Ok(Value::Str(ctx.trigger.event.as_str().to_string())),
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Err(Error::UnknownIdentifier(other.to_string())),
        }
    }

    fn call(&self, name: &str, args: Vec<Value>, ctx: &EvalContext<'_>) -> Result<Value> {
        let arity = |expected: usize| -> Result<()> {
            if args.len() == expected {
                Ok(())
            } else {
                Err(self.syntax_err(format!(
                    "{}() takes {} argument(s), got {}",
                    name,
                    expected,
                    args.len()
                )))
            }
        };

        match name {
            "always" => {
                arity(0)?;
                Ok(Value::Bool(true))
            }
            "never" => {
                arity(0)?;
                Ok(Value::Bool(false))
            }
            "success" => {
                arity(0)?;
                Ok(Value::Bool(ctx.needs.all_succeeded()))
            }
            "failure" => {
                arity(0)?;
                Ok(Value::Bool(ctx.needs.any_failed()))
            }
            "startsWith" => {
                arity(2)?;
                Ok(Value::Bool(
                    args[0].as_text().starts_with(&args[1].as_text()),
                ))
            }
            "matches" => {
                arity(2)?;
                Ok(Value::Bool(glob_match(&args[1].as_text(), &args[0].as_text())))
            }
            other => Err(Error::UnknownFunction(other.to_string())),
        }
    }
}

fn to_bool(value: &Value, expr: &str) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Str(_) => Err(Error::ExpressionSyntax {
            expr: expr.to_string(),
            message: "string used where a boolean is required".to_string(),
        }),
    }
}

/// Single-segment glob matching, same semantics as trigger patterns:
/// `*` matches any run of characters.
fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*')
        && !prefix.contains('*')
    {
        return text.starts_with(prefix);
    }
    if pattern.contains('*') {
        let parts: Vec<&str> = pattern.split('*').collect();
        if parts.len() == 2 {
            return text.starts_with(parts[0])
                && text.ends_with(parts[1])
                && text.len() >= parts[0].len() + parts[1].len();
        }
    }
    pattern == text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{EventKind, TriggerContext};

    fn push(ref_name: &str) -> TriggerContext {
        TriggerContext::new(EventKind::Push, ref_name)
    }

    fn eval(expr: &str, trigger: &TriggerContext, needs: NeedsOutcome) -> Result<bool> {
        evaluate(expr, &EvalContext::new(trigger, needs))
    }

    #[test]
    fn test_tag_gate_matches_release_ref() {
        let trigger = push("refs/tags/v1.2.0");
        assert!(eval("ref matches 'v*'", &trigger, NeedsOutcome::default()).unwrap());
        assert!(eval("startsWith(ref, 'v')", &trigger, NeedsOutcome::default()).unwrap());
    }

    #[test]
    fn test_tag_gate_rejects_branch_ref() {
        let trigger = push("main");
        assert!(!eval("ref matches 'v*'", &trigger, NeedsOutcome::default()).unwrap());
    }

    #[test]
    fn test_equality_and_logical_operators() {
        let trigger = push("main");
        let needs = NeedsOutcome::default();
        assert!(eval("ref == 'main' && event == 'push'", &trigger, needs).unwrap());
        assert!(eval("ref == 'dev' || event == 'push'", &trigger, needs).unwrap());
        assert!(eval("!(ref == 'dev')", &trigger, needs).unwrap());
        assert!(!eval("ref != 'main'", &trigger, needs).unwrap());
    }

    #[test]
    fn test_status_predicates() {
        let trigger = push("main");
        let clean = NeedsOutcome {
            total: 2,
            failed: 0,
            skipped: 0,
        };
        let broken = NeedsOutcome {
            total: 2,
            failed: 1,
            skipped: 0,
        };

        assert!(eval("success()", &trigger, clean).unwrap());
        assert!(!eval("success()", &trigger, broken).unwrap());
        assert!(eval("failure()", &trigger, broken).unwrap());
        assert!(eval("always()", &trigger, broken).unwrap());
        assert!(!eval("never()", &trigger, clean).unwrap());
    }

    #[test]
    fn test_success_is_vacuously_true_for_roots() {
        let trigger = push("main");
        assert!(eval(DEFAULT_CONDITION, &trigger, NeedsOutcome::default()).unwrap());
    }

    #[test]
    fn test_unknown_identifier_is_eval_error() {
        let trigger = push("main");
        let err = eval("branch == 'main'", &trigger, NeedsOutcome::default()).unwrap_err();
        assert!(matches!(err, Error::UnknownIdentifier(_)));
    }

    #[test]
    fn test_unknown_function_is_eval_error() {
        let trigger = push("main");
        let err = eval("cancelled()", &trigger, NeedsOutcome::default()).unwrap_err();
        assert!(matches!(err, Error::UnknownFunction(_)));
    }

    #[test]
    fn test_bare_string_condition_is_rejected() {
        let trigger = push("main");
        let err = eval("'main'", &trigger, NeedsOutcome::default()).unwrap_err();
        assert!(matches!(err, Error::ExpressionSyntax { .. }));
    }

    #[test]
    fn test_unterminated_literal_is_rejected() {
        let trigger = push("main");
        let err = eval("ref == 'main", &trigger, NeedsOutcome::default()).unwrap_err();
        assert!(matches!(err, Error::ExpressionSyntax { .. }));
    }

    #[test]
    fn test_glob_suffix_and_infix_patterns() {
        assert!(glob_match("v*", "v1.2.0"));
        assert!(glob_match("release-*-rc", "release-1.0-rc"));
        assert!(!glob_match("v*", "main"));
        assert!(glob_match("main", "main"));
    }
}
