//! Content digests of packages, generators and generation actions.
//!
//! Every digest starts with a name line naming what is hashed, so digests of
//! different kinds of things never coincide.  Paths that go into a digest are
//! relative to the package directory, so a digest does not depend on where
//! the tree is checked out.

use crate::config::BuildContext;
use crate::directive::file_generated_by;
use crate::generator::look_path;
use crate::graph::{Graph, Kind, NodeId};
use crate::package::Package;
use anyhow::anyhow;
use rustc_hash::FxHashSet;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

/// A 32-byte BLAKE3 digest.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(pub [u8; 32]);

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Accumulates a digest.  When explaining, also keeps the text that went
/// into it, with file contents elided, for -debug output.
pub struct Hasher {
    inner: blake3::Hasher,
    explain: Option<String>,
}

impl Hasher {
    pub fn new(name: &str) -> Self {
        Self::with_explain(name, false)
    }

    pub fn with_explain(name: &str, explain: bool) -> Self {
        let mut h = Hasher {
            inner: blake3::Hasher::new(),
            explain: if explain { Some(String::new()) } else { None },
        };
        h.line(name);
        h
    }

    pub fn line(&mut self, text: &str) {
        self.inner.update(text.as_bytes());
        self.inner.update(b"\n");
        if let Some(explain) = &mut self.explain {
            explain.push_str(text);
            explain.push('\n');
        }
    }

    fn contents(&mut self, data: &[u8]) {
        self.inner.update(data);
        if let Some(explain) = &mut self.explain {
            explain.push_str(&format!("<{} bytes>\n", data.len()));
        }
    }

    pub fn finish(&self) -> Digest {
        Digest(*self.inner.finalize().as_bytes())
    }

    pub fn explanation(&self) -> Option<&str> {
        self.explain.as_deref()
    }
}

/// Hash a file, named `rel`, into each of the hashers.
pub fn hash_file_into(path: &Path, rel: &str, hashers: &mut [&mut Hasher]) -> anyhow::Result<()> {
    let data = std::fs::read(path).map_err(|err| anyhow!("read {}: {}", path.display(), err))?;
    for h in hashers.iter_mut() {
        h.line(&format!("file: {} {}", rel, data.len()));
        h.contents(&data);
    }
    Ok(())
}

/// Express path relative to base, with `..` where needed.  Both are expected
/// to be absolute.
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    if let Ok(rel) = path.strip_prefix(base) {
        if rel.as_os_str().is_empty() {
            return PathBuf::from(".");
        }
        return rel.to_path_buf();
    }
    let path_parts: Vec<Component> = path.components().collect();
    let base_parts: Vec<Component> = base.components().collect();
    let common = path_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();
    let mut rel = PathBuf::new();
    for _ in common..base_parts.len() {
        rel.push("..");
    }
    for part in &path_parts[common..] {
        rel.push(part.as_os_str());
    }
    rel
}

/// The digest of a package: the digests of its imports and the contents of
/// its input files.  Every import must be done.
pub fn hash_package(graph: &Graph, id: NodeId) -> anyhow::Result<Digest> {
    let pkg = graph.package(id);
    let mut h = Hasher::new(&format!("## pkg {}", pkg.import_path));
    let mut imports: Vec<&str> = pkg
        .imports
        .iter()
        .map(|s| s.as_str())
        .filter(|&ip| ip != "C")
        .collect();
    imports.sort_unstable();
    imports.dedup();
    for ip in imports {
        let dep = graph
            .lookup_package(ip)
            .ok_or_else(|| anyhow!("{}: import {} was never loaded", pkg.import_path, ip))?;
        let node = graph.node(dep);
        let digest = match node.digest {
            Some(d) if node.done() => d,
            _ => panic!("{}: import {} is not done", pkg.import_path, ip),
        };
        h.line(&format!("import {}: {}", ip, digest));
    }
    for name in pkg.input_files() {
        hash_file_into(&pkg.dir.join(name), name, &mut [&mut h])?;
    }
    Ok(h.finish())
}

/// The digest of a tool binary.
pub fn hash_binary(kind: &str, name: &str, path: &Path) -> anyhow::Result<Digest> {
    let mut h = Hasher::new(&format!("## {} {}", kind, name));
    hash_file_into(path, name, &mut [&mut h])?;
    Ok(h.finish())
}

/// The digest of a PATH tool, from the binary PATH currently resolves to.
pub fn hash_command(name: &str) -> anyhow::Result<Digest> {
    let path = look_path(name)?;
    hash_binary("commandDep", name, &path)
}

/// The digest of a node that is not being generated.  A module tool's
/// digest is its package's.
pub fn hash_node(graph: &Graph, id: NodeId) -> anyhow::Result<Digest> {
    let node = graph.node(id);
    match &node.kind {
        Kind::Package(_) => hash_package(graph, id),
        Kind::ModTool(m) => {
            let pkg = m
                .package
                .ok_or_else(|| anyhow!("{} has no package", node))?;
            graph
                .node(pkg)
                .digest
                .ok_or_else(|| anyhow!("{} is not hashed", graph.node(pkg)))
        }
        Kind::GlobalTool(t) => hash_binary(
            "gobinGlobalDep",
            node.directive_name().unwrap_or_default(),
            &t.target,
        ),
        Kind::Command(c) => hash_command(&c.name),
    }
}

/// The fixed part of the action digest for generating a package: target,
/// tags, deps and directives.  File contents are added by hash_out_dirs.
pub fn action_hasher(graph: &Graph, id: NodeId, ctx: &BuildContext, explain: bool) -> Hasher {
    let pkg = graph.package(id);
    let mut h = Hasher::with_explain(&format!("## generate {}", pkg.import_path), explain);
    h.line(&format!("goos {} goarch {}", ctx.goos, ctx.goarch));
    h.line(&format!("tags: {:?}", ctx.tags));
    h.line("Deps:");
    for dep in graph.sorted_deps(id) {
        h.line(&graph.hash_string(dep));
    }
    h.line("Directives:");
    for d in &pkg.directives {
        h.line(&d.hash_string(graph, &pkg.dir));
    }
    h
}

/// The names of the generators a package's directives use.
pub fn directive_names(graph: &Graph, pkg: &Package) -> BTreeSet<String> {
    pkg.directives
        .iter()
        .filter_map(|d| graph.node(d.generator).directive_name())
        .map(|s| s.to_string())
        .collect()
}

/// The generator (of `tools`) a file name says produced it, if any.
fn generated_by<'a>(name: &str, tools: &'a BTreeSet<String>) -> Option<&'a str> {
    let tool = file_generated_by(name)?;
    tools.get(tool).map(|s| s.as_str())
}

/// Digests of the generated files of a package, by absolute path.
pub type FileDigests = BTreeMap<PathBuf, Digest>;

fn read_dir_sorted(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    let entries =
        std::fs::read_dir(dir).map_err(|err| anyhow!("read dir {}: {}", dir.display(), err))?;
    for entry in entries {
        let entry = entry.map_err(|err| anyhow!("read dir {}: {}", dir.display(), err))?;
        let path = entry.path();
        if !std::fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Hash the state of a package's output directories.  `dirs` is the package
/// directory followed by the directives' out directories.
///
/// Returns the digest of each generated file, that is each file named
/// `gen_*_<tool>.*` for one of `tools`.  When `action` is given, the package's
/// input files and then the generated files are also written into it;
/// otherwise the directories are read afresh.
pub fn hash_out_dirs(
    pkg: &Package,
    dirs: &[PathBuf],
    tools: &BTreeSet<String>,
    mut action: Option<&mut Hasher>,
) -> anyhow::Result<FileDigests> {
    let mut digests = FileDigests::new();
    let mut seen: FxHashSet<&str> = FxHashSet::default();

    // Without an action the input file lists may be stale, so only what is
    // on disk counts.
    if let Some(h) = action.as_deref_mut() {
        h.line("Files:");
        for name in pkg.input_files() {
            seen.insert(name);
            let path = pkg.dir.join(name);
            if generated_by(name, tools).is_some() {
                let mut file_hash = Hasher::new("## file");
                hash_file_into(&path, name, &mut [&mut *h, &mut file_hash])?;
                digests.insert(path, file_hash.finish());
            } else {
                hash_file_into(&path, name, &mut [&mut *h])?;
            }
        }
    }

    if let Some(h) = action.as_deref_mut() {
        h.line("Generated Files:");
    }
    for dir in dirs {
        let own_dir = dir == &pkg.dir;
        for name in read_dir_sorted(dir)? {
            if own_dir && seen.contains(name.as_str()) {
                continue;
            }
            let tool = match generated_by(&name, tools) {
                Some(tool) => tool,
                None => continue,
            };
            let path = dir.join(&name);
            let rel = relative_to(&path, &pkg.dir);
            let rel = rel.to_string_lossy();
            let mut file_hash = Hasher::new("## file");
            match action.as_deref_mut() {
                Some(h) => {
                    h.line(&format!("generated by {}:", tool));
                    hash_file_into(&path, &rel, &mut [h, &mut file_hash])?;
                }
                None => hash_file_into(&path, &rel, &mut [&mut file_hash])?,
            }
            digests.insert(path, file_hash.finish());
        }
    }
    Ok(digests)
}
