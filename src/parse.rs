//! Tokenizer and parser for the built-in module format
//!
//! The grammar is deliberately small; its only job is to get elaborated
//! transition systems and property expressions into the checker. One parser
//! serves both whole files (`module … endmodule`) and the bare expressions
//! arriving via `-p` / `--reset`.
//!
//! Precedence, tightest first: primary; `!` `-` `~`; `*`; `+` `-`;
//! `<<` `>>`; `<` `<=` `>` `>=`; `==` `!=`; `&`; `^`; `|`; `&&`; `||`;
//! `->` (right-assoc); `until`; prefix `always` / `next`.
//!
//! `next` is overloaded the way hardware languages overload it: `next(x)`
//! with a bare identifier inside the parentheses is the next-state reference
//! to variable `x`; any other operand makes it the temporal operator.

#![forbid(unsafe_code)]

use crate::expr::{BinOp, Expr, Sort};
use crate::symtab::{Module, PropertyDecl, VarDecl, VarKind};

/// Parse failure with source position.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("line {line}, column {col}: unexpected character `{ch}`")]
    BadChar { line: u32, col: u32, ch: char },
    #[error("line {line}, column {col}: bad number literal: {reason}")]
    BadNumber {
        line: u32,
        col: u32,
        reason: String,
    },
    #[error("line {line}, column {col}: expected {expected}, found `{found}`")]
    Unexpected {
        line: u32,
        col: u32,
        expected: String,
        found: String,
    },
    #[error("unexpected end of input (expected {expected})")]
    Eof { expected: String },
    #[error("line {line}, column {col}: bit-vector width {width} out of range (1..=64)")]
    BadWidth { line: u32, col: u32, width: u64 },
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Num(u64),
    Punct(&'static str),
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Ident(s) => s.clone(),
            Tok::Num(n) => n.to_string(),
            Tok::Punct(p) => (*p).to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: u32,
    col: u32,
}

const PUNCTS: &[&str] = &[
    // longest first so the scanner is maximal-munch
    "->", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", ";", ":", "(", ")", "[", "]", "=", "<",
    ">", "+", "-", "*", "!", "~", "&", "|", "^",
];

fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut toks = Vec::new();
    let mut line: u32 = 1;
    let mut col: u32 = 1;
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == '\n' {
            line += 1;
            col = 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            col += 1;
            i += 1;
            continue;
        }
        // line comments
        if c == '/' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
            {
                i += 1;
            }
            let s = &src[start..i];
            toks.push(Token {
                tok: Tok::Ident(s.to_string()),
                line,
                col,
            });
            col += (i - start) as u32;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            let radix = if c == '0' && i + 1 < bytes.len() && (bytes[i + 1] | 0x20) == b'x' {
                i += 2;
                16
            } else {
                10
            };
            while i < bytes.len() && (bytes[i] as char).is_ascii_alphanumeric() {
                i += 1;
            }
            let text = &src[start..i];
            let digits = if radix == 16 { &text[2..] } else { text };
            let value = u64::from_str_radix(digits, radix).map_err(|e| ParseError::BadNumber {
                line,
                col,
                reason: e.to_string(),
            })?;
            toks.push(Token {
                tok: Tok::Num(value),
                line,
                col,
            });
            col += (i - start) as u32;
            continue;
        }
        let rest = &src[i..];
        match PUNCTS.iter().find(|p| rest.starts_with(**p)) {
            Some(&p) => {
                toks.push(Token {
                    tok: Tok::Punct(p),
                    line,
                    col,
                });
                col += p.len() as u32;
                i += p.len();
            }
            None => return Err(ParseError::BadChar { line, col, ch: c }),
        }
    }
    Ok(toks)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    toks: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Parser, ParseError> {
        Ok(Parser {
            toks: tokenize(src)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|t| &t.tok)
    }

    fn peek2(&self) -> Option<&Tok> {
        self.toks.get(self.pos + 1).map(|t| &t.tok)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn error_here(&self, expected: &str) -> ParseError {
        match self.toks.get(self.pos) {
            Some(t) => ParseError::Unexpected {
                line: t.line,
                col: t.col,
                expected: expected.to_string(),
                found: t.tok.describe(),
            },
            None => ParseError::Eof {
                expected: expected.to_string(),
            },
        }
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if let Some(Tok::Punct(q)) = self.peek() {
            if *q == p {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ParseError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error_here(&format!("`{p}`")))
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if let Some(Tok::Ident(s)) = self.peek() {
            if s == kw {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), ParseError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error_here(&format!("keyword `{kw}`")))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(Tok::Ident(s)) if !is_keyword(s) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.error_here("identifier")),
        }
    }

    // -- sorts ---------------------------------------------------------------

    fn parse_sort(&mut self) -> Result<Sort, ParseError> {
        if self.eat_kw("bool") {
            return Ok(Sort::Bool);
        }
        let (line, col) = self
            .toks
            .get(self.pos)
            .map(|t| (t.line, t.col))
            .unwrap_or((0, 0));
        self.expect_kw("bv")?;
        self.expect_punct("[")?;
        let width = match self.bump() {
            Some(Token {
                tok: Tok::Num(n), ..
            }) => n,
            _ => return Err(self.error_here("width")),
        };
        self.expect_punct("]")?;
        if width == 0 || width > 64 {
            return Err(ParseError::BadWidth { line, col, width });
        }
        Ok(Sort::Bv(width as u32))
    }

    // -- expressions ---------------------------------------------------------

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek().cloned() {
            Some(Tok::Num(n)) => {
                self.pos += 1;
                // provisional width; the sort checker adapts literals to the
                // opposing operand
                let w = 64 - n.leading_zeros();
                Ok(Expr::Const {
                    value: n,
                    sort: Sort::Bv(w.max(1)),
                })
            }
            Some(Tok::Ident(s)) if s == "true" => {
                self.pos += 1;
                Ok(Expr::bool_const(true))
            }
            Some(Tok::Ident(s)) if s == "false" => {
                self.pos += 1;
                Ok(Expr::bool_const(false))
            }
            Some(Tok::Ident(s)) if s == "next" => {
                self.pos += 1;
                // `next(x)` → next-state reference; `next <expr>` → temporal
                if self.peek() == Some(&Tok::Punct("(")) {
                    if let (Some(Tok::Ident(name)), Some(Tok::Punct(")"))) =
                        (self.peek2(), self.toks.get(self.pos + 2).map(|t| &t.tok))
                    {
                        if !is_keyword(name) {
                            let name = name.clone();
                            self.pos += 3;
                            return Ok(Expr::Next(name));
                        }
                    }
                }
                let inner = self.parse_property_expr()?;
                Ok(Expr::Nexttime(Box::new(inner)))
            }
            Some(Tok::Ident(s)) if s == "always" => {
                self.pos += 1;
                let inner = self.parse_property_expr()?;
                Ok(Expr::Always(Box::new(inner)))
            }
            Some(Tok::Ident(s)) if !is_keyword(&s) => {
                self.pos += 1;
                Ok(Expr::Var(s))
            }
            Some(Tok::Punct("(")) => {
                self.pos += 1;
                let e = self.parse_property_expr()?;
                self.expect_punct(")")?;
                Ok(e)
            }
            _ => Err(self.error_here("expression")),
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat_punct("!") {
            Ok(Expr::Not(Box::new(self.parse_unary()?)))
        } else if self.eat_punct("-") {
            Ok(Expr::Neg(Box::new(self.parse_unary()?)))
        } else if self.eat_punct("~") {
            Ok(Expr::BvNot(Box::new(self.parse_unary()?)))
        } else {
            self.parse_primary()
        }
    }

    /// Left-associative binary levels, tightest first.
    fn parse_binary(&mut self, level: usize) -> Result<Expr, ParseError> {
        const LEVELS: &[&[(&str, BinOp)]] = &[
            &[("*", BinOp::Mul)],
            &[("+", BinOp::Add), ("-", BinOp::Sub)],
            &[("<<", BinOp::Shl), (">>", BinOp::Shr)],
            &[
                ("<=", BinOp::Le),
                (">=", BinOp::Ge),
                ("<", BinOp::Lt),
                (">", BinOp::Gt),
            ],
            &[("==", BinOp::Eq), ("!=", BinOp::Neq)],
            &[("&", BinOp::BvAnd)],
            &[("^", BinOp::BvXor)],
            &[("|", BinOp::BvOr)],
            &[("&&", BinOp::And)],
            &[("||", BinOp::Or)],
        ];
        if level == 0 {
            return self.parse_unary();
        }
        let ops = LEVELS[level - 1];
        let mut lhs = self.parse_binary(level - 1)?;
        'outer: loop {
            for (sym, op) in ops {
                if self.eat_punct(sym) {
                    let rhs = self.parse_binary(level - 1)?;
                    lhs = Expr::bin(*op, lhs, rhs);
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn parse_implies(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_binary(10)?;
        if self.eat_punct("->") {
            // right-associative
            let rhs = self.parse_implies()?;
            Ok(Expr::bin(BinOp::Implies, lhs, rhs))
        } else {
            Ok(lhs)
        }
    }

    fn parse_property_expr(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_implies()?;
        if self.eat_kw("until") {
            let rhs = self.parse_implies()?;
            Ok(Expr::Until(Box::new(lhs), Box::new(rhs)))
        } else {
            Ok(lhs)
        }
    }

    // -- modules -------------------------------------------------------------

    fn parse_module(&mut self) -> Result<Module, ParseError> {
        self.expect_kw("module")?;
        let name = self.expect_ident()?;
        self.expect_punct(";")?;
        let mut m = Module {
            name,
            mode: "rtl".to_string(),
            vars: Vec::new(),
            assigns: Vec::new(),
            init: Vec::new(),
            trans: Vec::new(),
            properties: Vec::new(),
        };
        loop {
            if self.eat_kw("endmodule") {
                break;
            }
            if let Some(kind) = self.peek_var_kind() {
                self.pos += 1;
                let name = self.expect_ident()?;
                self.expect_punct(":")?;
                let sort = self.parse_sort()?;
                self.expect_punct(";")?;
                m.vars.push(VarDecl { name, sort, kind });
            } else if self.eat_kw("assign") {
                let name = self.expect_ident()?;
                self.expect_punct("=")?;
                let e = self.parse_property_expr()?;
                self.expect_punct(";")?;
                m.assigns.push((name, e));
            } else if self.eat_kw("init") {
                let e = self.parse_property_expr()?;
                self.expect_punct(";")?;
                m.init.push(e);
            } else if self.eat_kw("trans") {
                let e = self.parse_property_expr()?;
                self.expect_punct(";")?;
                m.trans.push(e);
            } else if self.eat_kw("property") {
                let name = self.expect_ident()?;
                self.expect_punct(":")?;
                let e = self.parse_property_expr()?;
                self.expect_punct(";")?;
                m.properties.push(PropertyDecl { name, expr: e });
            } else {
                return Err(self.error_here("declaration or `endmodule`"));
            }
        }
        Ok(m)
    }

    fn peek_var_kind(&self) -> Option<VarKind> {
        match self.peek() {
            Some(Tok::Ident(s)) if s == "state" => Some(VarKind::State),
            Some(Tok::Ident(s)) if s == "input" => Some(VarKind::Input),
            Some(Tok::Ident(s)) if s == "wire" => Some(VarKind::Wire),
            _ => None,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }
}

fn is_keyword(s: &str) -> bool {
    matches!(
        s,
        "module"
            | "endmodule"
            | "state"
            | "input"
            | "wire"
            | "assign"
            | "init"
            | "trans"
            | "property"
            | "bool"
            | "bv"
            | "true"
            | "false"
            | "next"
            | "always"
            | "until"
    )
}

/// Parse a whole source file into its modules.
pub fn parse_modules(src: &str) -> Result<Vec<Module>, ParseError> {
    let mut p = Parser::new(src)?;
    let mut out = Vec::new();
    while !p.at_end() {
        out.push(p.parse_module()?);
    }
    Ok(out)
}

/// Parse a bare expression, as given on the command line.
pub fn parse_expr(src: &str) -> Result<Expr, ParseError> {
    let mut p = Parser::new(src)?;
    let e = p.parse_property_expr()?;
    if !p.at_end() {
        return Err(p.error_here("end of expression"));
    }
    Ok(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinOp, Expr};

    #[test]
    fn parses_counter_module() {
        let src = "
            module main;
              state q : bv[2];
              init q == 0;
              trans next(q) == q + 1;
              property p1: always q != 3;
            endmodule
        ";
        let mods = parse_modules(src).unwrap();
        assert_eq!(mods.len(), 1);
        let m = &mods[0];
        assert_eq!(m.name, "main");
        assert_eq!(m.vars.len(), 1);
        assert_eq!(m.init.len(), 1);
        assert_eq!(m.trans.len(), 1);
        assert_eq!(m.properties.len(), 1);
        assert!(matches!(m.properties[0].expr, Expr::Always(_)));
    }

    #[test]
    fn next_is_state_reference_on_bare_identifier() {
        let e = parse_expr("next(q) == q + 1").unwrap();
        match e {
            Expr::Bin(BinOp::Eq, lhs, _) => assert_eq!(*lhs, Expr::Next("q".into())),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn next_is_temporal_on_compound_operand() {
        let e = parse_expr("next (q == 0)").unwrap();
        assert!(matches!(e, Expr::Nexttime(_)));
    }

    #[test]
    fn precedence_matches_grammar() {
        let e = parse_expr("a + b * c == d").unwrap();
        assert_eq!(e.to_string(), "a + b * c == d");
        let e = parse_expr("a -> b -> c").unwrap();
        // right-associative
        assert_eq!(e.to_string(), "a -> b -> c");
        match e {
            Expr::Bin(BinOp::Implies, _, rhs) => {
                assert!(matches!(*rhs, Expr::Bin(BinOp::Implies, _, _)))
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn hex_literals_and_comments() {
        let e = parse_expr("q == 0x1f // trailing comment").unwrap();
        match e {
            Expr::Bin(BinOp::Eq, _, rhs) => match *rhs {
                Expr::Const { value, .. } => assert_eq!(value, 0x1f),
                other => panic!("unexpected rhs: {other:?}"),
            },
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn reports_position_on_error() {
        let err = parse_expr("q == ==").unwrap_err();
        match err {
            ParseError::Unexpected { line, col, .. } => {
                assert_eq!(line, 1);
                assert!(col > 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn until_binds_loosest() {
        let e = parse_expr("a == 1 until b == 2").unwrap();
        assert!(matches!(e, Expr::Until(_, _)));
    }
}
