use thiserror::Error;

use super::{BinOp, Expr, Func, Member, UnOp, Value};
use crate::host::HostObjects;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Float(f64),
    Int(i64),
    Ident(String),
    Str(String),
    Sym(&'static str),
    End,
}

const SYMBOLS: [&str; 21] = [
    "&&", "||", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "!", "?", ":", "(", ")", ",", ".", "=",
];

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let c = bytes[pos] as char;
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let start = pos;
        if c.is_ascii_digit() {
            let mut is_float = false;
            while pos < bytes.len() {
                let d = bytes[pos] as char;
                if d.is_ascii_digit() || d == '_' {
                    pos += 1;
                } else if d == '.' && !is_float && bytes.get(pos + 1).is_some_and(|n| n.is_ascii_digit()) {
                    is_float = true;
                    pos += 1;
                } else if (d == 'e' || d == 'E')
                    && bytes.get(pos + 1).is_some_and(|n| n.is_ascii_digit() || *n == b'-' || *n == b'+')
                {
                    is_float = true;
                    pos += 2;
                } else {
                    break;
                }
            }
            let text: String = src[start..pos].chars().filter(|ch| *ch != '_').collect();
            let token = if is_float {
                Token::Float(text.parse().map_err(|_| err(start, format!("invalid number '{text}'")))?)
            } else {
                Token::Int(text.parse().map_err(|_| err(start, format!("invalid integer '{text}'")))?)
            };
            out.push((start, token));
        } else if c.is_ascii_alphabetic() || c == '_' {
            while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                pos += 1;
            }
            out.push((start, Token::Ident(src[start..pos].to_string())));
        } else if c == '"' {
            pos += 1;
            let mut text = String::new();
            loop {
                match bytes.get(pos) {
                    None => return Err(err(start, "unterminated string")),
                    Some(b'"') => {
                        pos += 1;
                        break;
                    }
                    Some(b'\\') => {
                        match bytes.get(pos + 1) {
                            Some(b'"') => text.push('"'),
                            Some(b'\\') => text.push('\\'),
                            _ => return Err(err(pos, "unsupported escape")),
                        }
                        pos += 2;
                    }
                    Some(_) => {
                        let ch = src[pos..].chars().next().unwrap_or('\0');
                        text.push(ch);
                        pos += ch.len_utf8();
                    }
                }
            }
            out.push((start, Token::Str(text)));
        } else {
            let sym = SYMBOLS
                .iter()
                .find(|sym| src[pos..].starts_with(**sym))
                .ok_or_else(|| err(pos, format!("unexpected character '{c}'")))?;
            pos += sym.len();
            out.push((start, Token::Sym(*sym)));
        }
    }
    out.push((src.len(), Token::End));
    Ok(out)
}

/// Deepest tree the parser builds. Every later pass recurses over the tree, and printed units
/// must stay within the serving engine's expression depth.
pub const MAX_NESTING: usize = 64;

fn err(offset: usize, message: impl Into<String>) -> ParseError {
    ParseError { offset, message: message.into() }
}

struct Parser<'a> {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
    hosts: &'a HostObjects,
}

/// Parses the textual expression language. `timer("..")` and `entity("..")` are resolved
/// against `hosts` immediately, so the tree holds the runtime objects themselves.
pub fn parse(src: &str, hosts: &HostObjects) -> Result<Expr, ParseError> {
    let mut parser = Parser { tokens: tokenize(src)?, pos: 0, depth: 0, hosts };
    let expr = parser.expr()?;
    match parser.peek() {
        Token::End => Ok(expr),
        other => Err(err(parser.offset(), format!("unexpected trailing {other:?}"))),
    }
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].1
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].0
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos].1.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Token::Sym(s) if *s == sym) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, sym: &str) -> Result<(), ParseError> {
        if self.eat(sym) {
            Ok(())
        } else {
            Err(err(self.offset(), format!("expected '{sym}', found {:?}", self.peek())))
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == word)
    }

    // One level per node the caller is about to nest under; callers reset `depth` when done.
    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(err(self.offset(), format!("expression nested more than {MAX_NESTING} levels deep")));
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let base = self.depth;
        self.enter()?;
        let expr = self.expr_body()?;
        self.depth = base;
        Ok(expr)
    }

    fn expr_body(&mut self) -> Result<Expr, ParseError> {
        if self.is_keyword("let") {
            self.bump();
            let offset = self.offset();
            let name = match self.bump() {
                Token::Ident(name) => checked_ident(name, offset)?,
                other => return Err(err(offset, format!("expected binding name, found {other:?}"))),
            };
            self.expect("=")?;
            let value = self.expr()?;
            if !self.is_keyword("in") {
                return Err(err(self.offset(), "expected 'in' after let binding"));
            }
            self.bump();
            let body = self.expr()?;
            return Ok(Expr::let_in(name, value, body));
        }
        let cond = self.or()?;
        if self.eat("?") {
            let then = self.expr()?;
            self.expect(":")?;
            let otherwise = self.expr()?;
            return Ok(Expr::branch(cond, then, otherwise));
        }
        Ok(cond)
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let base = self.depth;
        let mut lhs = self.and()?;
        while self.eat("||") {
            self.enter()?;
            lhs = Expr::call(Func::Or, vec![lhs, self.and()?]);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let base = self.depth;
        let mut lhs = self.equality()?;
        while self.eat("&&") {
            self.enter()?;
            lhs = Expr::call(Func::And, vec![lhs, self.equality()?]);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        let base = self.depth;
        let mut lhs = self.comparison()?;
        loop {
            let op = if self.eat("==") {
                BinOp::Eq
            } else if self.eat("!=") {
                BinOp::Ne
            } else {
                self.depth = base;
                return Ok(lhs);
            };
            self.enter()?;
            lhs = Expr::binary(op, lhs, self.comparison()?);
        }
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let base = self.depth;
        let mut lhs = self.additive()?;
        loop {
            let op = if self.eat("<=") {
                BinOp::Le
            } else if self.eat(">=") {
                BinOp::Ge
            } else if self.eat("<") {
                BinOp::Lt
            } else if self.eat(">") {
                BinOp::Gt
            } else {
                self.depth = base;
                return Ok(lhs);
            };
            self.enter()?;
            lhs = Expr::binary(op, lhs, self.additive()?);
        }
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let base = self.depth;
        let mut lhs = self.multiplicative()?;
        loop {
            let add = if self.eat("+") {
                true
            } else if self.eat("-") {
                false
            } else {
                self.depth = base;
                return Ok(lhs);
            };
            self.enter()?;
            let rhs = self.multiplicative()?;
            lhs = if add { Expr::call(Func::Add, vec![lhs, rhs]) } else { Expr::binary(BinOp::Sub, lhs, rhs) };
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let base = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat("*") {
                None
            } else if self.eat("/") {
                Some(BinOp::Div)
            } else if self.eat("%") {
                Some(BinOp::Rem)
            } else {
                self.depth = base;
                return Ok(lhs);
            };
            self.enter()?;
            let rhs = self.unary()?;
            lhs = match op {
                Some(op) => Expr::binary(op, lhs, rhs),
                None => Expr::call(Func::Mul, vec![lhs, rhs]),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let base = self.depth;
        let expr = if self.eat("-") {
            self.enter()?;
            match self.unary()? {
                Expr::Const(Value::Float(v)) => Expr::float(-v),
                Expr::Const(Value::Int(v)) => Expr::int(-v),
                inner => Expr::Unary(UnOp::Neg, Box::new(inner)),
            }
        } else if self.eat("!") {
            self.enter()?;
            Expr::Unary(UnOp::Not, Box::new(self.unary()?))
        } else {
            self.postfix()?
        };
        self.depth = base;
        Ok(expr)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let base = self.depth;
        let mut expr = self.primary()?;
        while self.eat(".") {
            self.enter()?;
            let offset = self.offset();
            let member = match self.bump() {
                Token::Ident(name) => {
                    Member::from_name(&name).ok_or_else(|| err(offset, format!("unknown member '{name}'")))?
                }
                other => return Err(err(offset, format!("expected member name, found {other:?}"))),
            };
            expr = Expr::Member(Box::new(expr), member);
        }
        self.depth = base;
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let offset = self.offset();
        match self.bump() {
            Token::Float(v) => Ok(Expr::float(v)),
            Token::Int(v) => Ok(Expr::int(v)),
            Token::Sym("(") => {
                let inner = self.expr()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Const(Value::Bool(true))),
                "false" => Ok(Expr::Const(Value::Bool(false))),
                "timer" => {
                    let key = self.string_arg()?;
                    Ok(Expr::Const(Value::Timer(self.hosts.timer(&key))))
                }
                "entity" => {
                    let key = self.string_arg()?;
                    let entity =
                        self.hosts.entity(&key).ok_or_else(|| err(offset, format!("unknown entity '{key}'")))?;
                    Ok(Expr::Const(Value::Entity(entity)))
                }
                _ if self.eat("(") => {
                    let func =
                        Func::from_name(&name).ok_or_else(|| err(offset, format!("unknown function '{name}'")))?;
                    let mut args = Vec::new();
                    if !self.eat(")") {
                        loop {
                            args.push(self.expr()?);
                            if self.eat(")") {
                                break;
                            }
                            self.expect(",")?;
                        }
                    }
                    Ok(Expr::Call(func, args))
                }
                _ => Ok(Expr::Var(checked_ident(name, offset)?)),
            },
            other => Err(err(offset, format!("unexpected {other:?}"))),
        }
    }

    fn string_arg(&mut self) -> Result<String, ParseError> {
        self.expect("(")?;
        let offset = self.offset();
        let key = match self.bump() {
            Token::Str(key) => key,
            other => return Err(err(offset, format!("expected string key, found {other:?}"))),
        };
        self.expect(")")?;
        Ok(key)
    }
}

// Double underscores are reserved for names generated while baking.
fn checked_ident(name: String, offset: usize) -> Result<String, ParseError> {
    if name.contains("__") {
        return Err(err(offset, format!("identifier '{name}' uses reserved '__'")));
    }
    if matches!(name.as_str(), "let" | "in" | "true" | "false" | "timer" | "entity" | "fn" | "return" | "if" | "else")
    {
        return Err(err(offset, format!("'{name}' is a keyword")));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(src: &str) -> Expr {
        parse(src, &HostObjects::new()).expect("parse")
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        assert_eq!(
            p("1 + 2 * t"),
            Expr::call(Func::Add, vec![Expr::int(1), Expr::call(Func::Mul, vec![Expr::int(2), Expr::var("t")])])
        );
    }

    #[test]
    fn let_and_ternary_nest() {
        let expr = p("let a = t * 2.0 in a > 1.0 ? a : -a");
        match expr {
            Expr::Let { name, body, .. } => {
                assert_eq!(name, "a");
                assert!(matches!(*body, Expr::Branch { .. }));
            }
            other => panic!("expected let, got {other:?}"),
        }
    }

    #[test]
    fn host_lookups_capture_objects() {
        let hosts = HostObjects::new();
        let expr = parse("timer(\"spin\").elapsed", &hosts).expect("parse");
        match expr {
            Expr::Member(inner, Member::Elapsed) => {
                assert_eq!(*inner, Expr::Const(Value::Timer(hosts.timer("spin"))));
            }
            other => panic!("unexpected {other:?}"),
        }
        let missing = parse("entity(\"nobody\").hp", &hosts).unwrap_err();
        assert!(missing.message.contains("unknown entity"));
    }

    #[test]
    fn nesting_is_bounded() {
        let hosts = HostObjects::new();
        let parens = format!("{}t{}", "(".repeat(10_000), ")".repeat(10_000));
        let deep = parse(&parens, &hosts).unwrap_err();
        assert!(deep.message.contains("nested"), "{deep}");
        let chain = format!("t{}", " - 1.0".repeat(10_000));
        assert!(parse(&chain, &hosts).unwrap_err().message.contains("nested"));
        let negations = format!("{}t", "-".repeat(10_000));
        assert!(parse(&negations, &hosts).unwrap_err().message.contains("nested"));

        let limit = MAX_NESTING - 8;
        assert!(parse(&format!("{}t{}", "(".repeat(limit), ")".repeat(limit)), &hosts).is_ok());
        assert!(parse(&format!("t{}", " - 1.0".repeat(limit)), &hosts).is_ok());
    }

    #[test]
    fn operator_chains_nest_but_arguments_do_not() {
        let terms = (0..MAX_NESTING * 2).map(|i| format!("(t * {i}.0)")).collect::<Vec<_>>().join(" + ");
        assert!(parse(&terms, &HostObjects::new()).is_err());
        let siblings = (0..MAX_NESTING * 2).map(|i| format!("sin(t * {i}.0)")).collect::<Vec<_>>().join(", ");
        assert!(parse(&format!("max({siblings})"), &HostObjects::new()).is_ok());
    }

    #[test]
    fn reserved_names_are_rejected() {
        let e = parse("timer__0 + 1", &HostObjects::new()).unwrap_err();
        assert!(e.message.contains("reserved"));
        assert!(parse("1 +", &HostObjects::new()).is_err());
        assert!(parse("nope(1)", &HostObjects::new()).is_err());
    }
}
