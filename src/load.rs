//! Loading packages into the store, and keeping them in sync with the files
//! on disk as generators change them.

use crate::config::BuildContext;
use crate::constraint;
use crate::directive::{self, Directive};
use crate::generator;
use crate::graph::{Graph, Kind, NodeId};
use crate::package::{FileLists, Package, PackageInfo};
use crate::source;
use anyhow::{anyhow, bail};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Which packages a query reports besides the matched ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListMode {
    /// Also report dependencies.
    pub deps: bool,
    /// Also report test dependencies of matched packages.
    pub test: bool,
}

/// The go toolchain, as far as the driver needs it.
pub trait GoTool {
    /// `go list -json` over patterns.
    fn list(&self, patterns: &[String], mode: ListMode) -> anyhow::Result<Vec<PackageInfo>>;

    /// The go.mod of the main module, if one is in effect.
    fn main_module(&self) -> anyhow::Result<Option<String>>;

    /// The binary `gobin -p` resolves a pattern to.
    fn gobin_path(&self, pattern: &str) -> anyhow::Result<PathBuf>;
}

/// The real go and gobin commands, found on PATH.
pub struct GoCommand {
    tags: Option<String>,
}

impl GoCommand {
    pub fn new(ctx: &BuildContext) -> Self {
        GoCommand {
            tags: ctx.tags_flag(),
        }
    }
}

fn command_output(cmd: &mut Command) -> anyhow::Result<Vec<u8>> {
    debug!("running {:?}", cmd);
    let out = cmd
        .output()
        .map_err(|err| anyhow!("failed to run {:?}: {}", cmd, err))?;
    if !out.status.success() {
        bail!(
            "{:?} failed ({}):\n{}",
            cmd,
            out.status,
            String::from_utf8_lossy(&out.stderr).trim_end()
        );
    }
    Ok(out.stdout)
}

impl GoTool for GoCommand {
    fn list(&self, patterns: &[String], mode: ListMode) -> anyhow::Result<Vec<PackageInfo>> {
        let mut cmd = Command::new("go");
        cmd.arg("list").arg("-json");
        cmd.arg(if mode.deps { "-deps" } else { "-find" });
        if mode.test {
            cmd.arg("-test");
        }
        if let Some(tags) = &self.tags {
            cmd.arg(tags);
        }
        cmd.args(patterns);
        let stdout = command_output(&mut cmd)?;
        let mut infos = Vec::new();
        for info in serde_json::Deserializer::from_slice(&stdout).into_iter::<PackageInfo>() {
            infos.push(info.map_err(|err| anyhow!("decoding go list output: {}", err))?);
        }
        Ok(infos)
    }

    fn main_module(&self) -> anyhow::Result<Option<String>> {
        let stdout = command_output(Command::new("go").args(["env", "GOMOD"]))?;
        let gomod = String::from_utf8_lossy(&stdout).trim().to_string();
        if gomod.is_empty() || gomod == "/dev/null" || gomod == "NUL" {
            return Ok(None);
        }
        Ok(Some(gomod))
    }

    fn gobin_path(&self, pattern: &str) -> anyhow::Result<PathBuf> {
        let stdout = command_output(Command::new("gobin").args(["-p", pattern]))?;
        let target = String::from_utf8_lossy(&stdout).trim().to_string();
        if target.is_empty() {
            bail!("gobin -p {} printed no path", pattern);
        }
        Ok(PathBuf::from(target))
    }
}

/// Import paths that could not be resolved against the store, with the nodes
/// that want them.
pub type MissMap = BTreeMap<String, BTreeSet<NodeId>>;

fn add_miss(misses: &mut MissMap, import_path: &str, dependent: NodeId) {
    misses
        .entry(import_path.to_string())
        .or_default()
        .insert(dependent);
}

pub struct Loader<'a> {
    pub go: &'a dyn GoTool,
    pub ctx: &'a BuildContext,
}

impl<'a> Loader<'a> {
    /// Query packages, dropping the synthesized test variants.
    fn list(&self, patterns: &[String], mode: ListMode) -> anyhow::Result<Vec<PackageInfo>> {
        let mut infos = self.go.list(patterns, mode)?;
        infos.retain(|p| p.for_test.is_empty() && !p.import_path.ends_with(".test"));
        debug!("listed {} packages for {:?}", infos.len(), patterns);
        Ok(infos)
    }

    /// Add a package from its record, and its external test twin if it has
    /// external tests.  Returns the package and the twin.
    fn add_package(&self, graph: &mut Graph, info: PackageInfo) -> anyhow::Result<Vec<NodeId>> {
        let generate = !info.matches.is_empty();
        let mut pkg = Package::from_info(info);
        pkg.generate = generate;
        let has_xtest = !pkg.files.xtest_go.is_empty();
        let id = graph.add_package(pkg)?;
        let mut ids = vec![id];
        if has_xtest {
            ids.push(graph.add_xtest(id));
        }
        Ok(ids)
    }

    /// Add the edges for a freshly loaded package's imports.  Every import
    /// must already be in the store.
    fn add_import_deps(&self, graph: &mut Graph, id: NodeId) -> anyhow::Result<()> {
        let imports: Vec<String> = graph
            .package(id)
            .dep_imports()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        for ip in imports {
            let dep = graph.lookup_package(&ip).ok_or_else(|| {
                anyhow!(
                    "failed to resolve import {} of {}",
                    ip,
                    graph.package(id).import_path
                )
            })?;
            graph.add_dep(id, dep);
        }
        Ok(())
    }

    /// Load the packages matching the user's patterns, with their
    /// dependencies, directives and generators.
    pub fn load(&self, graph: &mut Graph, patterns: &[String]) -> anyhow::Result<()> {
        let main_module = self.go.main_module()?;
        let infos = self.list(
            patterns,
            ListMode {
                deps: true,
                test: true,
            },
        )?;

        if let Some(gomod) = &main_module {
            let outside: Vec<&str> = infos
                .iter()
                .filter(|p| !p.matches.is_empty())
                .filter(|p| p.module.as_ref().map(|m| &m.go_mod) != Some(gomod))
                .map(|p| p.import_path.as_str())
                .collect();
            if !outside.is_empty() {
                bail!(
                    "cannot generate packages outside the main module: {}",
                    outside.join(", ")
                );
            }
        }

        let mut ids = Vec::new();
        for info in infos {
            if graph.lookup_package(&info.import_path).is_some() {
                continue;
            }
            ids.extend(self.add_package(graph, info)?);
        }
        graph.sort_ids(&mut ids);
        for &id in &ids {
            self.add_import_deps(graph, id)?;
        }

        let mut mod_misses = MissMap::new();
        for &id in &ids {
            if graph.package(id).generate {
                self.refresh_directives(graph, id, &mut mod_misses)?;
            }
        }
        self.load_misses(graph, &MissMap::new(), &mod_misses)?;
        Ok(())
    }

    /// Re-extract the directives of a package being generated, resolve their
    /// generators and bring the generator edges up to date.  Module tools
    /// whose package is not loaded yet are recorded in mod_misses.
    pub fn refresh_directives(
        &self,
        graph: &mut Graph,
        id: NodeId,
        mod_misses: &mut MissMap,
    ) -> anyhow::Result<()> {
        let pkg = graph.package(id);
        if !pkg.generate {
            panic!("refresh_directives on {} which is not being generated", pkg.import_path);
        }
        let dir = pkg.dir.clone();
        let name = pkg.name.clone();
        let files: Vec<String> = pkg.directive_files().iter().map(|s| s.to_string()).collect();

        let mut directives = Vec::new();
        for file in files {
            let path = dir.join(&file);
            for sd in directive::scan_file(&path, &name, self.ctx)? {
                let pos = || format!("{}:{}", path.display(), sd.line);
                let generator = generator::resolve(graph, self.go, &sd.args)
                    .map_err(|err| anyhow!("{}: {}", pos(), err))?;
                let out_dirs = directive::parse_out_dirs(&sd.args)
                    .and_then(|dirs| directive::resolve_out_dirs(&dirs, &dir))
                    .map_err(|err| anyhow!("{}: {}", pos(), err))?;
                directives.push(Directive {
                    file: file.clone(),
                    line: sd.line,
                    package_name: name.clone(),
                    raw_args: sd.raw,
                    args: sd.args,
                    generator,
                    out_dirs,
                });
            }
        }

        let wanted: BTreeSet<NodeId> = directives.iter().map(|d| d.generator).collect();
        let stale: Vec<NodeId> = graph
            .node(id)
            .edges
            .deps
            .iter()
            .copied()
            .filter(|d| graph.node(*d).as_package().is_none() && !wanted.contains(d))
            .collect();
        for gen in stale {
            graph.drop_dep(id, gen);
        }
        for &gen in &wanted {
            if let Kind::ModTool(m) = &graph.node(gen).kind {
                if m.package.is_none() {
                    let import_path = m.import_path.clone();
                    match graph.lookup_package(&import_path) {
                        Some(tool_pkg) => graph.resolve_mod_tool(gen, tool_pkg),
                        None => add_miss(mod_misses, &import_path, id),
                    }
                }
            }
            if graph.reaches(gen, id) {
                bail!(
                    "{}: generator {} depends on the package it generates",
                    graph.package(id).import_path,
                    graph.node(gen)
                );
            }
            graph.add_dep(id, gen);
        }
        graph.package_mut(id).directives = directives;
        Ok(())
    }

    /// Rescan the Go files of a package's directory after generators changed
    /// it: regroup its files, recompute its imports and reconcile its edges.
    /// Imports not in the store are recorded in misses.  Returns the external
    /// test twin if this created one.
    pub fn refresh_imports(
        &self,
        graph: &mut Graph,
        id: NodeId,
        misses: &mut MissMap,
    ) -> anyhow::Result<Option<NodeId>> {
        let (dir, name) = {
            let p = graph.package(id);
            (p.dir.clone(), p.name.clone())
        };
        let scan = self.scan_dir(&dir, &name)?;

        let pkg = graph.package_mut(id);
        pkg.files = scan.files;
        pkg.imports = scan.imports;
        pkg.test_imports = scan.test_imports;
        pkg.xtest_imports = scan.xtest_imports;
        let twin = pkg.xtest;
        let has_xtest = !pkg.files.xtest_go.is_empty();
        self.reconcile_imports(graph, id, misses);

        let mut created = None;
        let twin = match twin {
            Some(twin) => Some(twin),
            None if has_xtest => {
                let twin = graph.add_xtest(id);
                created = Some(twin);
                Some(twin)
            }
            None => None,
        };
        if let Some(twin) = twin {
            let fresh = graph.package(id).xtest_twin();
            let t = graph.package_mut(twin);
            t.files = fresh.files;
            t.xtest_imports = fresh.xtest_imports;
            t.generate = fresh.generate;
            self.reconcile_imports(graph, twin, misses);
        }
        Ok(created)
    }

    /// Bring a package's edges to other packages in line with its import
    /// lists.
    fn reconcile_imports(&self, graph: &mut Graph, id: NodeId, misses: &mut MissMap) {
        let wanted: BTreeSet<String> = graph
            .package(id)
            .dep_imports()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        let stale: Vec<NodeId> = graph
            .node(id)
            .edges
            .deps
            .iter()
            .copied()
            .filter(|&d| match graph.node(d).as_package() {
                Some(p) => !wanted.contains(&p.import_path),
                None => false,
            })
            .collect();
        for dep in stale {
            graph.drop_dep(id, dep);
        }
        for ip in &wanted {
            match graph.lookup_package(ip) {
                Some(dep) => graph.add_dep(id, dep),
                None => add_miss(misses, ip, id),
            }
        }
    }

    fn scan_dir(&self, dir: &Path, pkg_name: &str) -> anyhow::Result<DirScan> {
        let mut names: Vec<String> = Vec::new();
        let entries =
            std::fs::read_dir(dir).map_err(|err| anyhow!("read dir {}: {}", dir.display(), err))?;
        for entry in entries {
            let entry = entry.map_err(|err| anyhow!("read dir {}: {}", dir.display(), err))?;
            if entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();

        let xtest_name = format!("{}_test", pkg_name);
        let mut scan = DirScan::default();
        let mut imports = BTreeSet::new();
        let mut test_imports = BTreeSet::new();
        let mut xtest_imports = BTreeSet::new();
        for name in names {
            if !constraint::match_file(&name, self.ctx) {
                continue;
            }
            let ext = match name.rsplit_once('.') {
                Some((_, ext)) => ext,
                None => continue,
            };
            if ext != "go" {
                if let Some(list) = scan.files.for_extension(ext) {
                    list.push(name.clone());
                }
                continue;
            }
            let path = dir.join(&name);
            let header = source::read_file(&path)?;
            if !constraint::should_build(&header.constraints, self.ctx)
                .map_err(|err| anyhow!("{}: {}", path.display(), err))?
            {
                continue;
            }
            let is_test = name.ends_with("_test.go");
            if header.package == pkg_name {
                if is_test {
                    scan.files.test_go.push(name);
                    test_imports.extend(header.imports);
                } else {
                    if header.imports_c() {
                        scan.files.cgo.push(name);
                    } else {
                        scan.files.go.push(name);
                    }
                    imports.extend(header.imports);
                }
            } else if is_test && header.package == xtest_name {
                scan.files.xtest_go.push(name);
                xtest_imports.extend(header.imports);
            } else {
                bail!(
                    "{}: found package {} in {}, expected {}",
                    dir.display(),
                    header.package,
                    name,
                    pkg_name
                );
            }
        }
        scan.imports = imports.into_iter().collect();
        scan.test_imports = test_imports.into_iter().collect();
        scan.xtest_imports = xtest_imports.into_iter().collect();
        Ok(scan)
    }

    /// Resolve missing packages in one query, then add the edges the misses
    /// stand for: dependent -> package for pkg_misses, and dependent -> tool
    /// (tool -> package) for mod_misses.  Returns the nodes this created.
    pub fn load_misses(
        &self,
        graph: &mut Graph,
        pkg_misses: &MissMap,
        mod_misses: &MissMap,
    ) -> anyhow::Result<Vec<NodeId>> {
        let mut remaining: BTreeSet<String> = pkg_misses.keys().cloned().collect();
        remaining.extend(mod_misses.keys().cloned());
        if remaining.is_empty() {
            return Ok(Vec::new());
        }
        let patterns: Vec<String> = remaining.iter().cloned().collect();
        let infos = self.list(
            &patterns,
            ListMode {
                deps: true,
                test: false,
            },
        )?;

        let mut new_ids = Vec::new();
        for mut info in infos {
            if !info.matches.is_empty() {
                if info.matches.len() != 1 || info.matches[0] != info.import_path {
                    bail!(
                        "package {} matched by {:?}; expected only its import path",
                        info.import_path,
                        info.matches
                    );
                }
                remaining.remove(&info.import_path);
            }
            if graph.lookup_package(&info.import_path).is_some() {
                continue;
            }
            // Packages loaded for a miss are dependencies, never generated.
            info.matches.clear();
            new_ids.extend(self.add_package(graph, info)?);
        }
        if !remaining.is_empty() {
            bail!(
                "failed to resolve: {}",
                remaining.into_iter().collect::<Vec<_>>().join(" ")
            );
        }
        graph.sort_ids(&mut new_ids);
        for &id in &new_ids {
            self.add_import_deps(graph, id)?;
        }

        for (ip, dependents) in pkg_misses {
            let pkg = graph
                .lookup_package(ip)
                .ok_or_else(|| anyhow!("failed to resolve {}", ip))?;
            for &d in dependents {
                graph.add_dep(d, pkg);
            }
        }
        for (ip, dependents) in mod_misses {
            let pkg = graph
                .lookup_package(ip)
                .ok_or_else(|| anyhow!("failed to resolve {}", ip))?;
            let tool = graph.mod_tool(ip);
            if !graph.node(tool).edges.deps.contains(&pkg) {
                graph.resolve_mod_tool(tool, pkg);
            }
            for &d in dependents {
                if graph.reaches(tool, d) {
                    bail!(
                        "{}: generator {} depends on the package it generates",
                        graph.package(d).import_path,
                        graph.node(tool)
                    );
                }
                graph.add_dep(d, tool);
            }
        }
        Ok(new_ids)
    }
}

#[derive(Default)]
struct DirScan {
    files: FileLists,
    imports: Vec<String>,
    test_imports: Vec<String>,
    xtest_imports: Vec<String>,
}
