//! Build constraints: `//go:build` expressions, legacy `// +build` lines and
//! GOOS/GOARCH file name suffixes.

use crate::config::{BuildContext, KNOWN_ARCH, KNOWN_OS};
use anyhow::bail;

/// Whether a Go file name is part of the build for ctx, judged by its name
/// alone.  Names starting with `_` or `.` are always ignored.
pub fn match_file(name: &str, ctx: &BuildContext) -> bool {
    if name.starts_with('_') || name.starts_with('.') {
        return false;
    }
    let stem = match name.find('.') {
        Some(dot) => &name[..dot],
        None => name,
    };
    // Everything before the first '_' is the free-form part of the name.
    let suffix = match stem.find('_') {
        Some(i) => &stem[i..],
        None => return true,
    };
    let mut parts: Vec<&str> = suffix.split('_').collect();
    if parts.last() == Some(&"test") {
        parts.pop();
    }
    let n = parts.len();
    if n >= 2 && KNOWN_OS.contains(&parts[n - 2]) && KNOWN_ARCH.contains(&parts[n - 1]) {
        return ctx.matches_tag(parts[n - 2]) && ctx.matches_tag(parts[n - 1]);
    }
    if n >= 1 && (KNOWN_OS.contains(&parts[n - 1]) || KNOWN_ARCH.contains(&parts[n - 1])) {
        return ctx.matches_tag(parts[n - 1]);
    }
    true
}

/// Evaluate the constraint comments of a file header.  `lines` are the line
/// comments eligible to carry constraints, without the package doc comment.
pub fn should_build(lines: &[String], ctx: &BuildContext) -> anyhow::Result<bool> {
    for line in lines {
        if let Some(expr) = go_build_expr(line) {
            return eval_expr(expr, ctx);
        }
    }
    for line in lines {
        if let Some(fields) = plus_build_fields(line) {
            if !eval_plus_build(fields, ctx) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

fn go_build_expr(line: &str) -> Option<&str> {
    let rest = line.trim_end().strip_prefix("//go:build")?;
    if rest.is_empty() || rest.starts_with(|c: char| c == ' ' || c == '\t') {
        Some(rest.trim())
    } else {
        None
    }
}

fn plus_build_fields(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("//")?.trim_start();
    let rest = rest.strip_prefix("+build")?;
    if rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace()) {
        Some(rest)
    } else {
        None
    }
}

/// A line is an OR of space separated terms; a term is an AND of comma
/// separated, optionally negated, tags.
fn eval_plus_build(fields: &str, ctx: &BuildContext) -> bool {
    fields.split_whitespace().any(|term| {
        term.split(',').all(|tag| match tag.strip_prefix('!') {
            Some(neg) => !neg.is_empty() && !neg.starts_with('!') && !ctx.matches_tag(neg),
            None => !tag.is_empty() && ctx.matches_tag(tag),
        })
    })
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Not,
    And,
    Or,
    LParen,
    RParen,
    Tag(&'a str),
}

fn tokenize(expr: &str) -> anyhow::Result<Vec<Token>> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' => i += 1,
            b'!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            b'&' if bytes.get(i + 1) == Some(&b'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            b'|' if bytes.get(i + 1) == Some(&b'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            _ if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.')
                {
                    i += 1;
                }
                tokens.push(Token::Tag(&expr[start..i]));
            }
            _ => bail!("invalid //go:build expression {:?}", expr),
        }
    }
    Ok(tokens)
}

struct ExprParser<'a, 'b> {
    tokens: &'b [Token<'a>],
    pos: usize,
    ctx: &'b BuildContext,
}

impl<'a, 'b> ExprParser<'a, 'b> {
    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn or(&mut self) -> anyhow::Result<bool> {
        let mut val = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.and()?;
            val = val || rhs;
        }
        Ok(val)
    }

    fn and(&mut self) -> anyhow::Result<bool> {
        let mut val = self.not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.not()?;
            val = val && rhs;
        }
        Ok(val)
    }

    fn not(&mut self) -> anyhow::Result<bool> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(!self.not()?);
        }
        self.atom()
    }

    fn atom(&mut self) -> anyhow::Result<bool> {
        match self.tokens.get(self.pos) {
            Some(Token::LParen) => {
                self.pos += 1;
                let val = self.or()?;
                if self.peek() != Some(&Token::RParen) {
                    bail!("missing ) in //go:build expression");
                }
                self.pos += 1;
                Ok(val)
            }
            Some(Token::Tag(tag)) => {
                self.pos += 1;
                Ok(self.ctx.matches_tag(tag))
            }
            Some(tok) => bail!("unexpected {:?} in //go:build expression", tok),
            None => bail!("unexpected end of //go:build expression"),
        }
    }
}

fn eval_expr(expr: &str, ctx: &BuildContext) -> anyhow::Result<bool> {
    let tokens = tokenize(expr)?;
    let mut parser = ExprParser {
        tokens: &tokens,
        pos: 0,
        ctx,
    };
    let val = parser.or()?;
    if parser.pos != tokens.len() {
        bail!("trailing tokens in //go:build expression {:?}", expr);
    }
    Ok(val)
}
