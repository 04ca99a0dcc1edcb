//! Resolves the generator a directive names to a node of the store.
//!
//! `gobin -m -run <path>` names a tool pinned by the main module, `gobin -run
//! <pattern>` one from the global gobin cache, and anything else is looked up
//! on PATH when it is hashed.

use crate::graph::{Graph, NodeId};
use crate::load::GoTool;
use anyhow::bail;
use std::path::{Path, PathBuf};

/// The flags of a gobin command line, as the gobin tool itself parses them.
#[derive(Debug, Default, PartialEq)]
pub struct GobinArgs {
    /// -m: resolve the tool through the main module.
    pub main_mod: bool,
    /// -mod: the module download mode passed to go.
    pub mod_mode: Option<String>,
    pub run: bool,
    pub print: bool,
    pub verbose: bool,
    pub download: bool,
    pub upgrade: bool,
    pub nonet: bool,
    pub debug: bool,
    /// The main package pattern.
    pub pattern: Option<String>,
    /// Arguments for the tool.
    pub args: Vec<String>,
}

fn parse_bool(flag: &str, value: &str) -> anyhow::Result<bool> {
    Ok(match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => true,
        "0" | "f" | "F" | "false" | "FALSE" | "False" => false,
        _ => bail!("invalid boolean value {:?} for -{}", value, flag),
    })
}

/// Parse gobin's flags the way Go's flag package does: flags come first,
/// `-name`, `--name` and `-name=value` are accepted, and the first non-flag
/// argument or a `--` ends them.
pub fn parse_gobin_flags(args: &[String]) -> anyhow::Result<GobinArgs> {
    let mut parsed = GobinArgs::default();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if arg.len() < 2 || !arg.starts_with('-') {
            break;
        }
        i += 1;
        if arg == "--" {
            break;
        }
        let name = arg.strip_prefix("--").unwrap_or(&arg[1..]);
        if name.is_empty() || name.starts_with('-') || name.starts_with('=') {
            bail!("bad flag syntax: {}", arg);
        }
        let (name, value) = match name.split_once('=') {
            Some((n, v)) => (n, Some(v)),
            None => (name, None),
        };
        if name == "mod" {
            let value = match value {
                Some(v) => v.to_string(),
                None => match args.get(i) {
                    Some(v) => {
                        i += 1;
                        v.clone()
                    }
                    None => bail!("flag needs an argument: -mod"),
                },
            };
            parsed.mod_mode = Some(value);
            continue;
        }
        let field = match name {
            "m" => &mut parsed.main_mod,
            "run" => &mut parsed.run,
            "p" => &mut parsed.print,
            "v" => &mut parsed.verbose,
            "d" => &mut parsed.download,
            "u" => &mut parsed.upgrade,
            "nonet" => &mut parsed.nonet,
            "debug" => &mut parsed.debug,
            _ => bail!("flag provided but not defined: -{}", name),
        };
        *field = match value {
            Some(v) => parse_bool(name, v)?,
            None => true,
        };
    }
    let mut rest = args[i..].iter();
    parsed.pattern = rest.next().cloned();
    parsed.args = rest.cloned().collect();
    Ok(parsed)
}

/// Find the generator node for a directive's expanded argv, creating it if
/// needed.  Global gobin tools are resolved through the go tool.
pub fn resolve(graph: &mut Graph, go: &dyn GoTool, args: &[String]) -> anyhow::Result<NodeId> {
    let (cmd, rest) = match args.split_first() {
        Some(split) => split,
        None => bail!("empty directive"),
    };
    match cmd.as_str() {
        "gobin" => resolve_gobin(graph, go, rest),
        "go" => bail!("do not yet know how to handle go command-based directives"),
        name => Ok(graph.command(name)),
    }
}

fn resolve_gobin(graph: &mut Graph, go: &dyn GoTool, args: &[String]) -> anyhow::Result<NodeId> {
    let flags = parse_gobin_flags(args)?;
    if !flags.run {
        bail!("gobin directives must use -run: gobin {}", args.join(" "));
    }
    let pattern = match &flags.pattern {
        Some(p) => p,
        None => bail!("gobin directive names no main package: gobin {}", args.join(" ")),
    };
    if pattern.contains('@') {
        bail!(
            "gobin directive may not specify a version; pin it in the main module instead: {}",
            pattern
        );
    }
    if flags.main_mod {
        return Ok(graph.mod_tool(pattern));
    }
    if let Some(id) = graph.lookup_global_pattern(pattern) {
        return Ok(id);
    }
    let target = go.gobin_path(pattern)?;
    Ok(graph.global_tool(pattern, target))
}

fn is_executable(path: &Path) -> bool {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(_) => return false,
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Find the executable a command name runs, as a shell would: names with a
/// slash are used as given, others are searched for in PATH.
pub fn look_path(name: &str) -> anyhow::Result<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        if is_executable(&path) {
            return Ok(path);
        }
        bail!("{} is not an executable file", name);
    }
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        let dir = if dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            dir
        };
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }
    bail!("executable file {:?} not found in $PATH", name)
}
