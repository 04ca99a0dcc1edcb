//! Extraction and tokenisation of `//go:generate` directives.

use crate::config::BuildContext;
use crate::constraint;
use crate::graph::{Graph, NodeId};
use crate::hash::relative_to;
use crate::source;
use anyhow::{anyhow, bail};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

pub const GENERATE_PREFIX: &str = "//go:generate";
pub const OUTDIR_FLAG_PREFIX: &str = "-outdir:";

const BLANK: &[char] = &[' ', '\t'];

/// A directive as found in a source file, before its generator is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedDirective {
    /// 1-based.
    pub line: usize,
    /// Words before environment expansion; these are what gets hashed.
    pub raw: Vec<String>,
    /// Words after expansion; these are what gets run.
    pub args: Vec<String>,
}

/// A resolved directive of a package.
#[derive(Debug, Clone)]
pub struct Directive {
    /// Base name of the defining file.
    pub file: String,
    pub line: usize,
    pub package_name: String,
    pub raw_args: Vec<String>,
    pub args: Vec<String>,
    pub generator: NodeId,
    /// Sorted, symlink-resolved, never the package's own directory.
    pub out_dirs: Vec<PathBuf>,
}

impl Directive {
    /// The canonical text of the directive for the action hash.  Paths are
    /// relative to the package directory.
    pub fn hash_string(&self, graph: &Graph, pkg_dir: &Path) -> String {
        let out_dirs: Vec<String> = self
            .out_dirs
            .iter()
            .map(|d| relative_to(d, pkg_dir).display().to_string())
            .collect();
        format!(
            "{{pkgName: {}, pos: {}:{}, args: {:?}, gen: {}, outDirs: {:?}}}",
            self.package_name,
            self.file,
            self.line,
            self.raw_args,
            graph.hash_string(self.generator),
            out_dirs,
        )
    }

    pub fn env(&self, ctx: &BuildContext) -> Vec<(&'static str, String)> {
        generator_env(ctx, &self.file, self.line, &self.package_name)
    }
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.args.join(" "))
    }
}

/// The variables a generator sees on top of the host environment, and that
/// directive words may expand.
pub fn generator_env(
    ctx: &BuildContext,
    file: &str,
    line: usize,
    package: &str,
) -> Vec<(&'static str, String)> {
    vec![
        ("GOARCH", ctx.goarch.clone()),
        ("GOOS", ctx.goos.clone()),
        ("GOFILE", file.to_string()),
        ("GOLINE", line.to_string()),
        ("GOPACKAGE", package.to_string()),
        ("DOLLAR", "$".to_string()),
    ]
}

fn is_shell_special(c: u8) -> bool {
    matches!(c, b'*' | b'#' | b'$' | b'@' | b'!' | b'?' | b'-' | b'0'..=b'9')
}

/// Returns the variable name at the start of s (just past a '$') and the
/// number of bytes it spans.  An empty name with a nonzero width is invalid
/// syntax.
fn shell_name(s: &str) -> (&str, usize) {
    let b = s.as_bytes();
    if b[0] == b'{' {
        if b.len() > 2 && is_shell_special(b[1]) && b[2] == b'}' {
            return (&s[1..2], 3);
        }
        for i in 1..b.len() {
            if b[i] == b'}' {
                if i == 1 {
                    return ("", 2);
                }
                return (&s[1..i], i + 1);
            }
        }
        return ("", 1);
    }
    if is_shell_special(b[0]) {
        return (&s[0..1], 1);
    }
    let n = b
        .iter()
        .take_while(|c| c.is_ascii_alphanumeric() || **c == b'_')
        .count();
    (&s[..n], n)
}

/// Replace `$NAME` and `${NAME}` in word using lookup.  A '$' that starts no
/// name is kept.
pub fn expand(word: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let b = word.as_bytes();
    let mut out = String::with_capacity(word.len());
    let mut start = 0;
    let mut j = 0;
    while j < b.len() {
        if b[j] == b'$' && j + 1 < b.len() {
            out.push_str(&word[start..j]);
            let (name, w) = shell_name(&word[j + 1..]);
            if name.is_empty() && w == 0 {
                out.push('$');
            } else if !name.is_empty() {
                out.push_str(&lookup(name).unwrap_or_default());
            }
            j += w;
            start = j + 1;
        }
        j += 1;
    }
    out.push_str(&word[start.min(word.len())..]);
    out
}

fn take_digits(chars: &mut std::str::Chars<'_>, n: usize, radix: u32) -> Option<u32> {
    let s: String = chars.by_ref().take(n).collect();
    if s.len() != n {
        return None;
    }
    u32::from_str_radix(&s, radix).ok()
}

/// Undo Go double-quoted string escaping.  `quoted` includes the quotes.
fn unquote(quoted: &str) -> Option<String> {
    let inner = quoted.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' | '\n' => return None,
            '\\' => {}
            c => {
                out.push(c);
                continue;
            }
        }
        let esc = chars.next()?;
        let ch = match esc {
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0c',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\x0b',
            '\\' => '\\',
            '"' => '"',
            'x' => char::from_u32(take_digits(&mut chars, 2, 16)?)?,
            'u' => char::from_u32(take_digits(&mut chars, 4, 16)?)?,
            'U' => char::from_u32(take_digits(&mut chars, 8, 16)?)?,
            '0'..='7' => {
                let rest = take_digits(&mut chars, 2, 8)?;
                let val = esc.to_digit(8)? * 64 + rest;
                if val > 255 {
                    return None;
                }
                char::from_u32(val)?
            }
            _ => return None,
        };
        out.push(ch);
    }
    Some(out)
}

/// Split the text of a directive (after the prefix) into words.  Words are
/// separated by spaces and tabs; a word starting with '"' is a quoted Go
/// string.
pub fn split_words(line: &str) -> anyhow::Result<Vec<String>> {
    let mut words = Vec::new();
    let mut rest = line.trim_start_matches(BLANK);
    'words: while !rest.is_empty() {
        let b = rest.as_bytes();
        if b[0] == b'"' {
            let mut i = 1;
            while i < b.len() {
                match b[i] {
                    b'\\' => {
                        if i + 1 == b.len() {
                            break;
                        }
                        i += 1;
                    }
                    b'"' => {
                        let word = unquote(&rest[..i + 1])
                            .ok_or_else(|| anyhow!("bad quoted string {}", &rest[..i + 1]))?;
                        words.push(word);
                        rest = &rest[i + 1..];
                        if !rest.is_empty() && !rest.starts_with(BLANK) {
                            bail!("expected space after quoted argument");
                        }
                        rest = rest.trim_start_matches(BLANK);
                        continue 'words;
                    }
                    _ => {}
                }
                i += 1;
            }
            bail!("unterminated quoted string");
        }
        let end = rest.find(BLANK).unwrap_or(rest.len());
        words.push(rest[..end].to_string());
        rest = rest[end..].trim_start_matches(BLANK);
    }
    Ok(words)
}

/// Extract the directives from the text of one Go file.  `file` is the base
/// name of the file and `package` its package name; both feed expansion.
pub fn scan(
    buf: &[u8],
    file: &str,
    package: &str,
    ctx: &BuildContext,
) -> anyhow::Result<Vec<ScannedDirective>> {
    let mut directives = Vec::new();
    let mut aliases: FxHashMap<String, (Vec<String>, Vec<String>)> = FxHashMap::default();
    for (i, line) in buf.split(|&c| c == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let rest = match line.strip_prefix(GENERATE_PREFIX.as_bytes()) {
            Some(rest) if rest.starts_with(b" ") || rest.starts_with(b"\t") => rest,
            _ => continue,
        };
        let lineno = i + 1;
        let pos = || format!("{}:{}", file, lineno);
        let text = std::str::from_utf8(rest).map_err(|_| anyhow!("{}: invalid UTF-8", pos()))?;
        let mut raw = split_words(text).map_err(|err| anyhow!("{}: {}", pos(), err))?;
        if raw.is_empty() {
            bail!("{}: no arguments to directive", pos());
        }

        let env = generator_env(ctx, file, lineno, package);
        let lookup = |name: &str| -> Option<String> {
            match env.iter().find(|(k, _)| *k == name) {
                Some((_, v)) => Some(v.clone()),
                None => std::env::var(name).ok(),
            }
        };
        let mut args: Vec<String> = raw.iter().map(|w| expand(w, &lookup)).collect();

        if raw[0] == "-command" {
            if raw.len() < 2 {
                bail!("{}: no command specified for -command", pos());
            }
            let name = args[1].clone();
            if aliases.contains_key(&name) {
                bail!("{}: command {:?} multiply defined", pos(), name);
            }
            aliases.insert(name, (raw.split_off(2), args.split_off(2)));
            continue;
        }
        if let Some((alias_raw, alias_args)) = aliases.get(&args[0]) {
            let raw_rest = raw.split_off(1);
            raw = alias_raw.clone();
            raw.extend(raw_rest);
            let args_rest = args.split_off(1);
            args = alias_args.clone();
            args.extend(args_rest);
            if args.is_empty() {
                bail!("{}: empty -command alias", pos());
            }
        }

        directives.push(ScannedDirective {
            line: lineno,
            raw,
            args,
        });
    }
    Ok(directives)
}

/// Extract the directives of the Go file at path, or none when the file is
/// excluded from the build for ctx.
pub fn scan_file(
    path: &Path,
    package: &str,
    ctx: &BuildContext,
) -> anyhow::Result<Vec<ScannedDirective>> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("bad file name {}", path.display()))?;
    if !constraint::match_file(name, ctx) {
        return Ok(Vec::new());
    }
    let buf = std::fs::read(path).map_err(|err| anyhow!("read {}: {}", path.display(), err))?;
    if let Ok(header) = source::read_header(&buf) {
        if !constraint::should_build(&header.constraints, ctx)
            .map_err(|err| anyhow!("{}: {}", path.display(), err))?
        {
            return Ok(Vec::new());
        }
    }
    scan(&buf, name, package, ctx).map_err(|err| anyhow!("{}: {}", path.display(), err))
}

/// The out directory arguments of a directive, in order of appearance:
/// `-outdir:KEY=DIR` or `-outdir:KEY DIR`.  Parsing stops at `--`.
pub fn parse_out_dirs(args: &[String]) -> anyhow::Result<Vec<String>> {
    let mut dirs = Vec::new();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }
        let rest = match arg.strip_prefix(OUTDIR_FLAG_PREFIX) {
            Some(rest) => rest,
            None => continue,
        };
        match rest.split_once('=') {
            Some((_key, dir)) => dirs.push(dir.to_string()),
            None => match iter.next() {
                Some(dir) => dirs.push(dir.clone()),
                None => bail!("flag {} requires a directory argument", arg),
            },
        }
    }
    Ok(dirs)
}

/// Resolve out directory arguments against the package directory: join,
/// resolve symlinks, sort, dedup, and drop the package directory itself.
pub fn resolve_out_dirs(dirs: &[String], pkg_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let own = std::fs::canonicalize(pkg_dir).unwrap_or_else(|_| pkg_dir.to_path_buf());
    let mut resolved = Vec::new();
    for dir in dirs {
        let joined = pkg_dir.join(dir);
        let real = std::fs::canonicalize(&joined)
            .map_err(|err| anyhow!("failed to resolve out dir {}: {}", joined.display(), err))?;
        if real != own && real != pkg_dir {
            resolved.push(real);
        }
    }
    resolved.sort();
    resolved.dedup();
    Ok(resolved)
}

/// If name follows the generated file convention
/// `gen_<anything>_<tool>[_test].<ext>`, returns the tool.
pub fn file_generated_by(name: &str) -> Option<&str> {
    let rest = name.strip_prefix("gen_")?;
    let stem = match rest.rfind('.') {
        Some(dot) => &rest[..dot],
        None => rest,
    };
    let stem = stem.strip_suffix("_test").unwrap_or(stem);
    let (what, tool) = stem.rsplit_once('_')?;
    if what.is_empty() || tool.is_empty() {
        return None;
    }
    Some(tool)
}
