//! Scans a Go source file byte by byte.
//!
//! Reading past the end yields '\0', so callers can loop on peek() without
//! bounds checks.

use std::path::Path;

#[derive(Debug)]
pub struct ParseError {
    msg: String,
    ofs: usize,
}
pub type ParseResult<T> = Result<T, ParseError>;

pub struct Scanner<'a> {
    buf: &'a [u8],
    pub ofs: usize,
    pub line: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Scanner {
            buf,
            ofs: 0,
            line: 1,
        }
    }

    pub fn at_eof(&self) -> bool {
        self.ofs >= self.buf.len()
    }

    pub fn slice(&self, start: usize, end: usize) -> &'a [u8] {
        &self.buf[start..end]
    }

    pub fn peek(&self) -> char {
        self.peek_at(0)
    }

    pub fn peek_at(&self, n: usize) -> char {
        match self.buf.get(self.ofs + n) {
            Some(&c) => c as char,
            None => '\0',
        }
    }

    /// Whether the input at the cursor starts with `s`.
    pub fn looking_at(&self, s: &str) -> bool {
        self.buf[self.ofs.min(self.buf.len())..].starts_with(s.as_bytes())
    }

    pub fn next(&mut self) {
        if self.at_eof() {
            panic!("scanned past end")
        }
        if self.peek() == '\n' {
            self.line += 1;
        }
        self.ofs += 1;
    }

    pub fn read(&mut self) -> char {
        let c = self.peek();
        self.next();
        c
    }

    pub fn skip(&mut self, ch: char) -> bool {
        if !self.at_eof() && self.peek() == ch {
            self.next();
            return true;
        }
        false
    }

    pub fn skip_str(&mut self, s: &str) -> bool {
        if self.looking_at(s) {
            for _ in 0..s.len() {
                self.next();
            }
            return true;
        }
        false
    }

    /// Skip spaces, tabs and carriage returns, but not newlines.
    pub fn skip_spaces(&mut self) {
        while matches!(self.peek(), ' ' | '\t' | '\r') && !self.at_eof() {
            self.next();
        }
    }

    /// Advance to just past the next newline, returning the text before it.
    pub fn read_line(&mut self) -> &'a [u8] {
        let start = self.ofs;
        while !self.at_eof() && self.peek() != '\n' {
            self.next();
        }
        let end = self.ofs;
        self.skip('\n');
        self.slice(start, end)
    }

    pub fn expect(&mut self, ch: char) -> ParseResult<()> {
        if self.at_eof() {
            return self.parse_error(format!("expected {:?}, got end of file", ch));
        }
        let r = self.peek();
        if r != ch {
            return self.parse_error(format!("expected {:?}, got {:?}", ch, r));
        }
        self.next();
        Ok(())
    }

    pub fn parse_error<T, S: Into<String>>(&self, msg: S) -> ParseResult<T> {
        Err(ParseError {
            msg: msg.into(),
            ofs: self.ofs,
        })
    }

    pub fn format_parse_error(&self, filename: &Path, err: ParseError) -> String {
        let mut ofs = 0;
        let lines = self.buf.split(|&c| c == b'\n');
        for (line_number, line) in lines.enumerate() {
            if ofs + line.len() >= err.ofs {
                let mut msg = "parse error: ".to_string();
                msg.push_str(&err.msg);
                msg.push('\n');

                let prefix = format!("{}:{}: ", filename.display(), line_number + 1);
                msg.push_str(&prefix);

                let context = String::from_utf8_lossy(line);
                let mut context: &str = &context;
                let mut col = err.ofs - ofs;
                if col > 40 && context.is_char_boundary(col - 20) {
                    // Trim beginning of line to fit it on screen.
                    msg.push_str("...");
                    context = &context[col - 20..];
                    col = 3 + 20;
                }
                if context.len() > 40 && context.is_char_boundary(40) {
                    msg.push_str(&context[0..40]);
                    msg.push_str("...");
                } else {
                    msg.push_str(context);
                }
                msg.push('\n');

                msg.push_str(&" ".repeat(prefix.len() + col));
                msg.push_str("^\n");
                return msg;
            }
            ofs += line.len() + 1;
        }
        format!("parse error: {} (at end of {})", err.msg, filename.display())
    }
}
