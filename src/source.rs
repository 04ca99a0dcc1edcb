//! Reads the header of a Go source file: constraint comments, the package
//! clause and the import declarations.  Nothing after the imports is parsed.

use crate::scanner::{ParseResult, Scanner};
use anyhow::anyhow;
use std::path::Path;

#[derive(Debug, Default, PartialEq)]
pub struct Header {
    pub package: String,
    pub imports: Vec<String>,
    /// Line comments before the package clause that may carry build
    /// constraints; the package doc comment is excluded.
    pub constraints: Vec<String>,
}

impl Header {
    /// Whether the file uses cgo.
    pub fn imports_c(&self) -> bool {
        self.imports.iter().any(|i| i == "C")
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || (c as u32) >= 0x80
}

/// Skip whitespace and comments, including newlines.
fn skip_trivia(s: &mut Scanner) {
    loop {
        match s.peek() {
            ' ' | '\t' | '\r' | '\n' | ';' if !s.at_eof() => s.next(),
            '/' if s.peek_at(1) == '/' => {
                s.read_line();
            }
            '/' if s.peek_at(1) == '*' => {
                s.skip_str("/*");
                while !s.at_eof() && !s.skip_str("*/") {
                    s.next();
                }
            }
            _ => return,
        }
    }
}

fn read_ident(s: &mut Scanner) -> String {
    let start = s.ofs;
    while !s.at_eof() && is_ident_char(s.peek()) {
        s.next();
    }
    String::from_utf8_lossy(s.slice(start, s.ofs)).into_owned()
}

/// Read the keyword at the cursor if it is exactly `kw`.
fn skip_keyword(s: &mut Scanner, kw: &str) -> bool {
    s.looking_at(kw) && !is_ident_char(s.peek_at(kw.len())) && s.skip_str(kw)
}

fn read_string(s: &mut Scanner) -> ParseResult<String> {
    let mut out = Vec::new();
    match s.peek() {
        '`' => {
            s.next();
            while s.peek() != '`' {
                if s.at_eof() {
                    return s.parse_error("unterminated raw string");
                }
                out.push(s.read() as u8);
            }
            s.next();
        }
        '"' => {
            s.next();
            loop {
                match s.peek() {
                    '"' => break,
                    '\n' => return s.parse_error("newline in string"),
                    '\\' => {
                        s.next();
                        let c = s.read();
                        out.push(match c {
                            'n' => b'\n',
                            't' => b'\t',
                            _ => c as u8,
                        });
                    }
                    _ if s.at_eof() => return s.parse_error("unterminated string"),
                    c => {
                        s.next();
                        out.push(c as u8);
                    }
                }
            }
            s.next();
        }
        c => return s.parse_error(format!("expected import path, got {:?}", c)),
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn read_import_spec(s: &mut Scanner) -> ParseResult<String> {
    if s.peek() == '.' {
        s.next();
    } else if is_ident_char(s.peek()) {
        read_ident(s);
    }
    s.skip_spaces();
    read_string(s)
}

/// Collect the comments before the package clause.  Returns the constraint
/// candidates with the package doc comment removed.
fn read_leading_comments(s: &mut Scanner) -> Vec<String> {
    // (line number, text) of each line comment, while still eligible.
    let mut comments: Vec<(usize, String)> = Vec::new();
    let mut eligible = true;
    loop {
        s.skip_spaces();
        match s.peek() {
            '\n' if !s.at_eof() => s.next(),
            '/' if s.peek_at(1) == '/' => {
                let line = s.line;
                let text = String::from_utf8_lossy(s.read_line()).trim_end().to_string();
                if eligible {
                    comments.push((line, text));
                }
            }
            '/' if s.peek_at(1) == '*' => {
                eligible = false;
                s.skip_str("/*");
                while !s.at_eof() && !s.skip_str("*/") {
                    s.next();
                }
            }
            _ => break,
        }
    }
    // A group of comments on the lines right above the package clause is
    // the doc comment.
    let mut doc_line = s.line;
    while let Some((line, _)) = comments.last() {
        if *line + 1 != doc_line {
            break;
        }
        doc_line = *line;
        comments.pop();
    }
    comments.into_iter().map(|(_, text)| text).collect()
}

pub fn read_header(buf: &[u8]) -> ParseResult<Header> {
    let mut s = Scanner::new(buf);
    read_header_with(&mut s)
}

fn read_header_with(s: &mut Scanner) -> ParseResult<Header> {
    let constraints = read_leading_comments(s);
    if !skip_keyword(s, "package") {
        return s.parse_error("expected 'package'");
    }
    s.skip_spaces();
    let package = read_ident(s);
    if package.is_empty() {
        return s.parse_error("expected package name");
    }

    let mut imports = Vec::new();
    loop {
        skip_trivia(s);
        if !skip_keyword(s, "import") {
            break;
        }
        skip_trivia(s);
        if s.skip('(') {
            loop {
                skip_trivia(s);
                if s.skip(')') {
                    break;
                }
                if s.at_eof() {
                    return s.parse_error("unterminated import block");
                }
                imports.push(read_import_spec(s)?);
            }
        } else {
            imports.push(read_import_spec(s)?);
        }
    }

    Ok(Header {
        package,
        imports,
        constraints,
    })
}

/// Read and parse the header of the Go file at path.
pub fn read_file(path: &Path) -> anyhow::Result<Header> {
    let buf = std::fs::read(path).map_err(|err| anyhow!("read {}: {}", path.display(), err))?;
    let mut s = Scanner::new(&buf);
    read_header_with(&mut s).map_err(|err| anyhow!(s.format_parse_error(path, err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(text: &str) -> Header {
        match read_header(text.as_bytes()) {
            Ok(h) => h,
            Err(err) => panic!("{}", Scanner::new(text.as_bytes()).format_parse_error(Path::new("x.go"), err)),
        }
    }

    #[test]
    fn import_forms() {
        let h = header(
            "package a // trailing\n\
             \n\
             import \"fmt\"\n\
             import (\n\
             \t\"os\"\n\
             \tstr \"strings\" // comment\n\
             \t. \"math\"\n\
             \t_ `embed`\n\
             \t/* block */ \"C\"\n\
             )\n\
             import x \"p.com/x\"; import \"p.com/y\"\n\
             \n\
             func main() {}\n\
             import \"never\"\n",
        );
        assert_eq!(h.package, "a");
        assert_eq!(
            h.imports,
            vec!["fmt", "os", "strings", "math", "embed", "C", "p.com/x", "p.com/y"]
        );
        assert!(h.imports_c());
    }

    #[test]
    fn doc_comment_is_not_a_constraint() {
        let h = header(
            "// Copyright header\n\
             \n\
             //go:build linux\n\
             // +build linux\n\
             \n\
             // Package a does things.\n\
             // +build ignore\n\
             package a\n",
        );
        assert_eq!(
            h.constraints,
            vec!["// Copyright header", "//go:build linux", "// +build linux"]
        );
        assert!(h.imports.is_empty());
    }

    #[test]
    fn block_comment_ends_constraints() {
        let h = header("/* license */\n\n// +build ignore\n\npackage a\n");
        assert!(h.constraints.is_empty());
    }

    #[test]
    fn missing_package_clause() {
        assert!(read_header(b"// only a comment\n").is_err());
        assert!(read_header(b"package\n").is_err());
        assert!(read_header(b"package a\nimport (\n\"fmt\"\n").is_err());
    }
}
