//! The package store: packages and generators as nodes of a dependency graph.
//!
//! Nodes live in an arena and refer to each other by NodeId.  Every node
//! carries three edge sets: deps (what it needs), rdeps (what needs it) and
//! dirty (the deps that are not done yet).  These are kept in sync by
//! add_dep, drop_dep, done_dep and undo:
//!
//! - b in a.deps exactly when a in b.rdeps;
//! - b in a.dirty exactly when b in a.deps and b is not done;
//! - a node is ready when its dirty set is empty.

use crate::densemap::{self, DenseMap};
use crate::hash::Digest;
use crate::package::Package;
use anyhow::bail;
use rustc_hash::{FxHashMap, FxHashSet};
use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);
impl densemap::Index for NodeId {
    fn index(&self) -> usize {
        self.0 as usize
    }
}
impl From<usize> for NodeId {
    fn from(u: usize) -> NodeId {
        NodeId(u as u32)
    }
}

/// A generator pinned by the main module: `gobin -m -run <import path>`.
#[derive(Debug)]
pub struct ModTool {
    pub import_path: String,
    /// The package node of the tool, once loaded.
    pub package: Option<NodeId>,
}

/// A generator installed in the global gobin cache.
#[derive(Debug)]
pub struct GlobalTool {
    pub pattern: String,
    /// The tool binary.
    pub target: PathBuf,
}

/// A generator found on PATH.
#[derive(Debug)]
pub struct CommandTool {
    pub name: String,
}

#[derive(Debug)]
pub enum Kind {
    Package(Box<Package>),
    ModTool(ModTool),
    GlobalTool(GlobalTool),
    Command(CommandTool),
}

#[derive(Debug, Default)]
pub struct DepsMap {
    pub deps: FxHashSet<NodeId>,
    pub rdeps: FxHashSet<NodeId>,
    pub dirty: FxHashSet<NodeId>,
}

#[derive(Debug)]
pub struct Node {
    pub kind: Kind,
    pub edges: DepsMap,
    /// Unset until hashed, and again after an undo.
    pub digest: Option<Digest>,
}

impl Node {
    fn new(kind: Kind) -> Self {
        Node {
            kind,
            edges: DepsMap::default(),
            digest: None,
        }
    }

    pub fn ready(&self) -> bool {
        if !self.edges.dirty.is_empty() {
            return false;
        }
        match &self.kind {
            Kind::ModTool(m) => m.package.is_some(),
            _ => true,
        }
    }

    pub fn done(&self) -> bool {
        if !self.ready() {
            return false;
        }
        match &self.kind {
            Kind::Package(p) => (!p.generate || p.generated) && (p.is_xtest || self.digest.is_some()),
            _ => self.digest.is_some(),
        }
    }

    fn undo(&mut self) {
        self.digest = None;
        if let Kind::Package(p) = &mut self.kind {
            p.generated = false;
        }
    }

    pub fn as_package(&self) -> Option<&Package> {
        match &self.kind {
            Kind::Package(p) => Some(p),
            _ => None,
        }
    }

    /// Sort key: packages, then module tools, then global tools, then PATH
    /// tools; by identity within a kind.
    pub fn order_key(&self) -> (u8, Cow<str>) {
        match &self.kind {
            Kind::Package(p) => (0, Cow::Borrowed(p.import_path.as_str())),
            Kind::ModTool(m) => (1, Cow::Borrowed(m.import_path.as_str())),
            Kind::GlobalTool(g) => (2, g.target.to_string_lossy()),
            Kind::Command(c) => (3, Cow::Borrowed(c.name.as_str())),
        }
    }

    /// The name a directive uses for this generator, used to recognise the
    /// files it generates.
    pub fn directive_name(&self) -> Option<&str> {
        match &self.kind {
            Kind::Package(_) => None,
            Kind::ModTool(m) => Some(base_name(&m.import_path)),
            Kind::GlobalTool(g) => g.target.file_name().and_then(|n| n.to_str()),
            Kind::Command(c) => Some(base_name(&c.name)),
        }
    }

    fn standard(&self) -> bool {
        matches!(&self.kind, Kind::Package(p) if p.standard)
    }
}

fn base_name(s: &str) -> &str {
    s.rsplit('/').next().unwrap_or(s)
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.kind {
            Kind::Package(p) => write!(f, "{}", p.import_path),
            Kind::ModTool(m) => write!(f, "modtool:{}", m.import_path),
            Kind::GlobalTool(g) => write!(f, "global:{}", g.target.display()),
            Kind::Command(c) => write!(f, "command:{}", c.name),
        }
    }
}

#[derive(Default)]
pub struct Graph {
    nodes: DenseMap<NodeId, Node>,
    packages: FxHashMap<String, NodeId>,
    dirs: FxHashMap<PathBuf, NodeId>,
    mod_tools: FxHashMap<String, NodeId>,
    global_patterns: FxHashMap<String, NodeId>,
    global_targets: FxHashMap<PathBuf, NodeId>,
    commands: FxHashMap<String, NodeId>,
}

impl Graph {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn package(&self, id: NodeId) -> &Package {
        match &self.nodes[id].kind {
            Kind::Package(p) => p,
            _ => panic!("{} is not a package", self.nodes[id]),
        }
    }

    pub fn package_mut(&mut self, id: NodeId) -> &mut Package {
        match &mut self.nodes[id].kind {
            Kind::Package(p) => p,
            _ => panic!("node {:?} is not a package", id),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn all_ids(&self) -> impl Iterator<Item = NodeId> {
        self.nodes.all_ids()
    }

    pub fn lookup_package(&self, import_path: &str) -> Option<NodeId> {
        self.packages.get(import_path).copied()
    }

    pub fn package_by_dir(&self, dir: &Path) -> Option<NodeId> {
        self.dirs.get(dir).copied()
    }

    pub fn lookup_mod_tool(&self, import_path: &str) -> Option<NodeId> {
        self.mod_tools.get(import_path).copied()
    }

    pub fn lookup_global_pattern(&self, pattern: &str) -> Option<NodeId> {
        self.global_patterns.get(pattern).copied()
    }

    /// Register a package.  Two packages may not share an import path or a
    /// directory.
    pub fn add_package(&mut self, pkg: Package) -> anyhow::Result<NodeId> {
        if self.packages.contains_key(&pkg.import_path) {
            bail!("duplicate package {}", pkg.import_path);
        }
        if let Some(&other) = self.dirs.get(&pkg.dir) {
            bail!(
                "packages {} and {} share directory {}",
                self.package(other).import_path,
                pkg.import_path,
                pkg.dir.display()
            );
        }
        let import_path = pkg.import_path.clone();
        let dir = pkg.dir.clone();
        let id = self.nodes.push(Node::new(Kind::Package(Box::new(pkg))));
        self.packages.insert(import_path, id);
        self.dirs.insert(dir, id);
        Ok(id)
    }

    /// Create the external test twin of a package.  The twin is not indexed
    /// by import path or directory.
    pub fn add_xtest(&mut self, parent: NodeId) -> NodeId {
        let twin = self.package(parent).xtest_twin();
        let id = self.nodes.push(Node::new(Kind::Package(Box::new(twin))));
        self.package_mut(parent).xtest = Some(id);
        id
    }

    /// The module tool for an import path, created on first use.  Its package
    /// is linked if already loaded.
    pub fn mod_tool(&mut self, import_path: &str) -> NodeId {
        if let Some(id) = self.lookup_mod_tool(import_path) {
            return id;
        }
        let id = self.nodes.push(Node::new(Kind::ModTool(ModTool {
            import_path: import_path.to_string(),
            package: None,
        })));
        self.mod_tools.insert(import_path.to_string(), id);
        if let Some(pkg) = self.lookup_package(import_path) {
            self.resolve_mod_tool(id, pkg);
        }
        id
    }

    /// Link a module tool to its package.
    pub fn resolve_mod_tool(&mut self, tool: NodeId, pkg: NodeId) {
        match &mut self.nodes[tool].kind {
            Kind::ModTool(m) => m.package = Some(pkg),
            _ => panic!("node {:?} is not a module tool", tool),
        }
        self.add_dep(tool, pkg);
    }

    /// The global tool installed at target, created on first use.  Different
    /// patterns resolving to the same target share a node.
    pub fn global_tool(&mut self, pattern: &str, target: PathBuf) -> NodeId {
        let id = match self.global_targets.get(&target) {
            Some(&id) => id,
            None => {
                let id = self.nodes.push(Node::new(Kind::GlobalTool(GlobalTool {
                    pattern: pattern.to_string(),
                    target: target.clone(),
                })));
                self.global_targets.insert(target, id);
                id
            }
        };
        self.global_patterns.insert(pattern.to_string(), id);
        id
    }

    /// The PATH tool for a command name, created on first use.
    pub fn command(&mut self, name: &str) -> NodeId {
        if let Some(&id) = self.commands.get(name) {
            return id;
        }
        let id = self.nodes.push(Node::new(Kind::Command(CommandTool {
            name: name.to_string(),
        })));
        self.commands.insert(name.to_string(), id);
        id
    }

    /// Make parent depend on child.  Adding an existing edge is a no-op.
    pub fn add_dep(&mut self, parent: NodeId, child: NodeId) {
        let child_done = self.nodes[child].done();
        let (p, c) = self.nodes.pair_mut(parent, child);
        let has_dep = p.edges.deps.contains(&child);
        let has_rdep = c.edges.rdeps.contains(&parent);
        if has_dep != has_rdep || (p.edges.dirty.contains(&child) && !has_dep) {
            panic!(
                "inconsistent edge {} -> {}: dep {} dirty {} rdep {}",
                p,
                c,
                has_dep,
                p.edges.dirty.contains(&child),
                has_rdep
            );
        }
        p.edges.deps.insert(child);
        if !child_done {
            p.edges.dirty.insert(child);
        }
        c.edges.rdeps.insert(parent);
    }

    pub fn drop_dep(&mut self, parent: NodeId, child: NodeId) {
        let (p, c) = self.nodes.pair_mut(parent, child);
        if !p.edges.deps.remove(&child) {
            panic!("{} does not depend on {}", p, c);
        }
        p.edges.dirty.remove(&child);
        if !c.edges.rdeps.remove(&parent) {
            panic!("{} is missing reverse dep {}", c, p);
        }
    }

    /// Record that child is done.  Returns the parents that became ready.
    pub fn done_dep(&mut self, child: NodeId) -> Vec<NodeId> {
        if !self.nodes[child].done() {
            panic!("done_dep on {} which is not done", self.nodes[child]);
        }
        let mut rdeps: Vec<NodeId> = self.nodes[child].edges.rdeps.iter().copied().collect();
        rdeps.sort_unstable();
        let mut ready = Vec::new();
        for parent in rdeps {
            let (p, c) = self.nodes.pair_mut(parent, child);
            if !p.edges.deps.contains(&child) {
                panic!("{} has rdep {} that does not depend on it", c, p);
            }
            if !p.edges.dirty.remove(&child) {
                panic!("{} is not currently dirty in {}", c, p);
            }
            if p.ready() {
                ready.push(parent);
            }
        }
        ready
    }

    /// Mark a node as no longer done, and everything that transitively
    /// depended on it being done.
    pub fn undo(&mut self, id: NodeId) {
        // Find the affected nodes before touching any of them, as undoing one
        // node changes the doneness of its rdeps.
        let mut affected = vec![id];
        let mut seen = FxHashSet::default();
        seen.insert(id);
        let mut i = 0;
        while i < affected.len() {
            let n = affected[i];
            i += 1;
            if !self.nodes[n].done() {
                continue;
            }
            for &rd in &self.nodes[n].edges.rdeps {
                if seen.insert(rd) {
                    affected.push(rd);
                }
            }
        }
        for n in affected {
            self.nodes[n].undo();
            let rdeps: Vec<NodeId> = self.nodes[n].edges.rdeps.iter().copied().collect();
            for rd in rdeps {
                self.nodes[rd].edges.dirty.insert(n);
            }
        }
    }

    /// Whether `to` is reachable from `from` following deps.
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut seen = FxHashSet::default();
        let mut stack = vec![from];
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            if seen.insert(n) {
                stack.extend(self.nodes[n].edges.deps.iter().copied());
            }
        }
        false
    }

    pub fn sort_ids(&self, ids: &mut [NodeId]) {
        ids.sort_by(|&a, &b| self.nodes[a].order_key().cmp(&self.nodes[b].order_key()));
    }

    pub fn sorted_deps(&self, id: NodeId) -> Vec<NodeId> {
        let mut deps: Vec<NodeId> = self.nodes[id].edges.deps.iter().copied().collect();
        self.sort_ids(&mut deps);
        deps
    }

    /// The line a dep contributes to the action hash of a dependent.
    pub fn hash_string(&self, id: NodeId) -> String {
        let node = &self.nodes[id];
        let digest = match &node.digest {
            Some(d) => d.to_string(),
            None => "unhashed".to_string(),
        };
        match &node.kind {
            Kind::Package(p) => format!("pkg: {} [{}]", p.import_path, digest),
            Kind::ModTool(m) => format!("gobinModDep: {} [{}]", m.import_path, digest),
            Kind::GlobalTool(_) => format!(
                "gobinGlobalDep: {} [{}]",
                node.directive_name().unwrap_or_default(),
                digest
            ),
            Kind::Command(c) => format!("commandDep: {} [{}]", c.name, digest),
        }
    }

    /// Check the edge invariants over the whole graph, panicking on the
    /// first violation.
    pub fn verify(&self) {
        for (id, node) in self.nodes.iter() {
            for &d in &node.edges.deps {
                let dep = &self.nodes[d];
                if !dep.edges.rdeps.contains(&id) {
                    panic!("{} depends on {} without a reverse edge", node, dep);
                }
                if dep.done() == node.edges.dirty.contains(&d) {
                    panic!(
                        "{} has dep {} with done={} but dirty={}",
                        node,
                        dep,
                        dep.done(),
                        node.edges.dirty.contains(&d)
                    );
                }
            }
            for &d in &node.edges.dirty {
                if !node.edges.deps.contains(&d) {
                    panic!("{} has dirty entry {} that is not a dep", node, self.nodes[d]);
                }
            }
            for &r in &node.edges.rdeps {
                if !self.nodes[r].edges.deps.contains(&id) {
                    panic!("{} has rdep {} without a forward edge", node, self.nodes[r]);
                }
            }
            if let Kind::ModTool(ModTool {
                package: Some(p), ..
            }) = &node.kind
            {
                if !node.edges.deps.contains(p) {
                    panic!("{} does not depend on its package", node);
                }
            }
        }
    }

    /// Write the graph in dot format, dep -> rdep, without standard
    /// library packages.
    pub fn write_dot(&self, w: &mut impl Write) -> std::io::Result<()> {
        let mut edges = Vec::new();
        for (_, node) in self.nodes.iter() {
            if node.standard() {
                continue;
            }
            for &r in &node.edges.rdeps {
                let rdep = &self.nodes[r];
                if rdep.standard() {
                    continue;
                }
                edges.push((node.to_string(), rdep.to_string()));
            }
        }
        edges.sort();
        writeln!(w, "digraph {{")?;
        for (from, to) in edges {
            writeln!(w, "  {:?} -> {:?};", from, to)?;
        }
        writeln!(w, "}}")
    }
}
