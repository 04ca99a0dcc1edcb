//! Support code for e2e tests, which run the engine in-process against a
//! package tree in a temp directory.
//!
//! The tree is a single module, p.com, rooted at the temp directory.  A fake
//! go tool answers package queries by reading the tree, and generators are
//! shell scripts under bin/.

mod cache;
mod generate;
mod graph;

use gg::cache::Cache;
use gg::config::{BuildContext, Options};
use gg::hash::Digest;
use gg::load::{GoTool, ListMode};
use gg::package::{ModuleInfo, PackageInfo};
use gg::progress::Progress;
use gg::work::{Engine, Summary};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const MODULE: &str = "p.com";

/// Answers `go list` from the files of a TestSpace.
pub struct FakeGo {
    root: PathBuf,
    go_mod: String,
}

impl FakeGo {
    fn dir_of(&self, import_path: &str) -> Option<PathBuf> {
        let rel = import_path.strip_prefix(MODULE)?;
        Some(self.root.join(rel.trim_start_matches('/')))
    }

    fn describe(&self, import_path: &str) -> anyhow::Result<PackageInfo> {
        let dir = match self.dir_of(import_path) {
            Some(dir) if dir.is_dir() => dir,
            _ => anyhow::bail!("cannot find package {:?}", import_path),
        };
        let mut names: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
            .filter(|n| n.ends_with(".go"))
            .collect();
        names.sort();

        let mut info = PackageInfo {
            dir: dir.clone(),
            import_path: import_path.to_string(),
            module: Some(ModuleInfo {
                path: MODULE.to_string(),
                main: true,
                go_mod: self.go_mod.clone(),
            }),
            ..Default::default()
        };
        let mut imports = BTreeSet::new();
        let mut test_imports = BTreeSet::new();
        let mut xtest_imports = BTreeSet::new();
        for name in names {
            let header = gg::source::read_file(&dir.join(&name))?;
            if name.ends_with("_test.go") && header.package.ends_with("_test") {
                info.x_test_go_files.push(name);
                xtest_imports.extend(header.imports);
            } else if name.ends_with("_test.go") {
                info.test_go_files.push(name);
                test_imports.extend(header.imports);
            } else {
                info.name = header.package.clone();
                info.go_files.push(name);
                imports.extend(header.imports);
            }
        }
        info.imports = imports.into_iter().collect();
        info.test_imports = test_imports.into_iter().collect();
        info.x_test_imports = xtest_imports.into_iter().collect();
        Ok(info)
    }

    /// Import paths of every package under the module.
    fn all_packages(&self, dir: &Path, out: &mut Vec<String>) -> anyhow::Result<()> {
        let mut has_go = false;
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        entries.sort();
        for path in entries {
            if path.is_dir() {
                self.all_packages(&path, out)?;
            } else if path.extension().map_or(false, |e| e == "go") {
                has_go = true;
            }
        }
        if has_go {
            let rel = dir.strip_prefix(&self.root)?;
            out.push(format!("{}/{}", MODULE, rel.display()));
        }
        Ok(())
    }
}

impl GoTool for FakeGo {
    fn list(&self, patterns: &[String], mode: ListMode) -> anyhow::Result<Vec<PackageInfo>> {
        let mut matched: Vec<(String, String)> = Vec::new();
        for pattern in patterns {
            if pattern == &format!("{}/...", MODULE) {
                let mut all = Vec::new();
                self.all_packages(&self.root, &mut all)?;
                matched.extend(all.into_iter().map(|ip| (ip, pattern.clone())));
            } else {
                matched.push((pattern.clone(), pattern.clone()));
            }
        }

        let mut out: Vec<PackageInfo> = Vec::new();
        let mut stack: Vec<(String, Option<String>)> = matched
            .into_iter()
            .rev()
            .map(|(ip, pattern)| (ip, Some(pattern)))
            .collect();
        while let Some((ip, pattern)) = stack.pop() {
            if let Some(existing) = out.iter_mut().find(|p| p.import_path == ip) {
                if let Some(pattern) = pattern {
                    existing.matches.push(pattern);
                }
                continue;
            }
            let mut info = self.describe(&ip)?;
            if mode.deps {
                let mut deps: Vec<String> = info.imports.clone();
                if mode.test && pattern.is_some() {
                    deps.extend(info.test_imports.iter().cloned());
                    deps.extend(info.x_test_imports.iter().cloned());
                }
                stack.extend(deps.into_iter().filter(|d| d != &ip).map(|d| (d, None)));
            }
            if let Some(pattern) = pattern {
                info.matches.push(pattern);
            }
            out.push(info);
        }
        Ok(out)
    }

    fn main_module(&self) -> anyhow::Result<Option<String>> {
        Ok(Some(self.go_mod.clone()))
    }

    fn gobin_path(&self, pattern: &str) -> anyhow::Result<PathBuf> {
        anyhow::bail!("gobin is not available to resolve {}", pattern)
    }
}

/// Records what the engine reported.
#[derive(Default)]
pub struct RecordingProgress {
    running: AtomicUsize,
    max_running: AtomicUsize,
    started: Mutex<Vec<PathBuf>>,
}

impl Progress for RecordingProgress {
    fn hashing(&self, _node: &str) {}

    fn generating(&self, _pkg: &str) {}

    fn generator_started(&self, dir: &Path, _args: &[String]) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.started.lock().unwrap().push(dir.to_path_buf());
    }

    fn generator_finished(&self, _args: &[String], _output: &[u8]) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    fn timing(&self, _msg: &str) {}

    fn stream_output(&self) -> bool {
        false
    }
}

/// The outcome of one engine run.
pub struct Run {
    pub result: anyhow::Result<Summary>,
    /// Directories generators were started in, in order.
    pub started: Vec<PathBuf>,
    pub max_running: usize,
    /// Package digests by import path.
    pub digests: BTreeMap<String, Option<Digest>>,
}

impl Run {
    pub fn runs(&self) -> usize {
        self.started.len()
    }
}

/// Manages a temporary module tree and artefact cache.
pub struct TestSpace {
    dir: tempfile::TempDir,
}

impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("src"))?;
        std::fs::write(
            dir.path().join("src/go.mod"),
            format!("module {}\n", MODULE),
        )?;
        Ok(TestSpace { dir })
    }

    /// The module root.
    pub fn root(&self) -> PathBuf {
        self.dir.path().join("src")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    /// Write a file under the module root, creating directories.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        let path = self.root().join(path);
        std::fs::create_dir_all(path.parent().unwrap())?;
        std::fs::write(path, content)
    }

    pub fn read(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.root().join(path))
    }

    pub fn remove(&self, path: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.root().join(path))
    }

    /// Install a generator script under bin/ and return its absolute path.
    #[cfg(unix)]
    pub fn generator(&self, name: &str, script: &str) -> anyhow::Result<String> {
        use std::os::unix::fs::PermissionsExt;
        let bin = self.dir.path().join("bin");
        std::fs::create_dir_all(&bin)?;
        let path = bin.join(name);
        std::fs::write(&path, format!("#!/bin/sh\nset -e\n{}\n", script))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(path.to_string_lossy().into_owned())
    }

    pub fn go(&self) -> FakeGo {
        FakeGo {
            root: self.root(),
            go_mod: self.root().join("go.mod").to_string_lossy().into_owned(),
        }
    }

    pub fn options(&self, parallelism: usize, max_iterations: usize) -> Options {
        Options {
            parallelism,
            max_iterations,
            ..Options::default()
        }
    }

    /// Run the engine over patterns with the given go tool.
    pub fn run_with(&self, go: &dyn GoTool, opts: &Options, patterns: &[&str]) -> Run {
        let ctx = BuildContext::new("linux", "amd64", None);
        let progress = RecordingProgress::default();
        let patterns: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        let workdir = tempfile::tempdir().unwrap();
        let cache = Cache::open(&self.cache_dir()).unwrap();

        let mut engine = Engine::new(&ctx, opts, go, &cache, &progress, workdir.path());
        let result = engine.run(&patterns);
        let graph = engine.graph();
        let digests = graph
            .all_ids()
            .filter_map(|id| {
                let node = graph.node(id);
                node.as_package()
                    .filter(|p| !p.is_xtest)
                    .map(|p| (p.import_path.clone(), node.digest))
            })
            .collect();
        let started = progress.started.lock().unwrap().clone();
        Run {
            result,
            started,
            max_running: progress.max_running.load(Ordering::SeqCst),
            digests,
        }
    }

    pub fn run(&self, opts: &Options, patterns: &[&str]) -> Run {
        self.run_with(&self.go(), opts, patterns)
    }

    /// Like run, but fails the test if the run failed.
    pub fn run_expect(&self, opts: &Options, patterns: &[&str]) -> anyhow::Result<Run> {
        let run = self.run(opts, patterns);
        if let Err(err) = &run.result {
            anyhow::bail!("run failed: {:#}", err);
        }
        Ok(run)
    }

    /// Contents of every archive in the artefact cache.
    pub fn archives(&self) -> anyhow::Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        for sub in std::fs::read_dir(self.cache_dir())? {
            let sub = sub?.path();
            if !sub.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&sub)? {
                let path = entry?.path();
                if path.to_string_lossy().ends_with("-a") {
                    out.push(std::fs::read(&path)?);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Persist the temp dir locally and abort the test.  Debugging helper.
    #[allow(dead_code)]
    pub fn eject(self) -> ! {
        panic!("ejected at {:?}", self.dir.into_path());
    }
}

/// A generator writing one file per directive, named after the directive's
/// source file, from the environment the driver provides.
pub const MKGEN: &str = r#"out="gen_${GOFILE%.go}_mkgen.go"
printf 'package %s\n\n// line %s\nconst Generated = true\n' "$GOPACKAGE" "$GOLINE" > "$out""#;
