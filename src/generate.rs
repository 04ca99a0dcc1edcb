//! One generation iteration of a package, and applying its outcome to the
//! store.
//!
//! An iteration hashes the package's out directories into an action digest.
//! A cached archive for that digest is replayed; otherwise the directives run
//! and the files they changed are archived under it.  Either way the result
//! is the set of directories whose generated files changed.  An iteration
//! that changes nothing is the fixed point: the package is generated.

use crate::archive::{ArchiveReader, ArchiveWriter};
use crate::cache::Cache;
use crate::config::BuildContext;
use crate::directive::Directive;
use crate::generator::look_path;
use crate::graph::{Graph, NodeId};
use crate::hash::{self, Digest, FileDigests};
use crate::load::{Loader, MissMap};
use crate::package::Package;
use crate::process::{self, Termination};
use crate::progress::Progress;
use crate::signal;
use anyhow::{anyhow, bail};
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use std::io::{BufReader, BufWriter, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// What workers share.
pub struct WorkContext<'a> {
    pub ctx: &'a BuildContext,
    pub cache: &'a Cache,
    pub progress: &'a dyn Progress,
    /// Scratch space for archives in the making.
    pub workdir: &'a Path,
    /// Log action hash explanations.
    pub explain: bool,
    /// Set on the first error; work not yet started is skipped.
    pub stop: &'a AtomicBool,
}

impl WorkContext<'_> {
    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || signal::interrupted()
    }
}

#[derive(Debug, Default)]
pub struct GenerateResult {
    /// Directories whose generated files changed.
    pub delta_dirs: BTreeSet<PathBuf>,
    /// The package digest, when nothing changed and the package is not an
    /// external test twin.
    pub digest: Option<Digest>,
}

/// The package directory followed by the directives' out directories.
fn out_dirs(pkg: &Package) -> Vec<PathBuf> {
    let extra: BTreeSet<&PathBuf> = pkg.directives.iter().flat_map(|d| &d.out_dirs).collect();
    let mut dirs = vec![pkg.dir.clone()];
    dirs.extend(extra.into_iter().filter(|d| **d != pkg.dir).cloned());
    dirs
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// Run one generation iteration of a package.
pub fn generate(graph: &Graph, id: NodeId, cx: &WorkContext) -> anyhow::Result<GenerateResult> {
    let pkg = graph.package(id);
    cx.progress.generating(&pkg.import_path);

    let dirs = out_dirs(pkg);
    let tools = hash::directive_names(graph, pkg);
    let mut action = hash::action_hasher(graph, id, cx.ctx, cx.explain);
    let pre = hash::hash_out_dirs(pkg, &dirs, &tools, Some(&mut action))?;
    let action_id = action.finish();
    if let Some(text) = action.explanation() {
        debug!("action {} for {}:\n{}", action_id, pkg.import_path, text);
    }
    cx.progress
        .timing(&format!("hashed action {} for {}", action_id, pkg.import_path));

    if let Some(path) = cx.cache.get_file(&action_id)? {
        match replay(&path, &pkg.dir) {
            Ok(delta_dirs) => {
                debug!(
                    "{}: replayed {} ({} dirs changed)",
                    pkg.import_path,
                    action_id,
                    delta_dirs.len()
                );
                return finish(graph, id, delta_dirs);
            }
            Err(err) => warn!("{}: replaying {}: {:#}", pkg.import_path, path.display(), err),
        }
    }

    for d in &pkg.directives {
        if cx.stopped() {
            bail!("interrupted");
        }
        run_directive(pkg, d, cx)?;
    }
    cx.progress
        .timing(&format!("ran {} generators for {}", pkg.directives.len(), pkg.import_path));

    let post = hash::hash_out_dirs(pkg, &dirs, &tools, None)?;
    let (changed, delta_dirs) = delta(&pre, &post);

    let file = tempfile::tempfile_in(cx.workdir)
        .map_err(|err| anyhow!("create archive in {}: {}", cx.workdir.display(), err))?;
    let mut w = ArchiveWriter::new(BufWriter::new(file), &pkg.dir)?;
    for path in &changed {
        w.add_file(path)?;
    }
    debug!("{}: archived {} files as {}", pkg.import_path, w.count(), action_id);
    let mut file = w
        .finish()?
        .into_inner()
        .map_err(|err| anyhow!("write archive: {}", err.error()))?;
    file.seek(SeekFrom::Start(0))?;
    cx.cache.put(&action_id, &mut file)?;

    finish(graph, id, delta_dirs)
}

fn finish(graph: &Graph, id: NodeId, delta_dirs: BTreeSet<PathBuf>) -> anyhow::Result<GenerateResult> {
    let digest = if delta_dirs.is_empty() && !graph.package(id).is_xtest {
        Some(hash::hash_package(graph, id)?)
    } else {
        None
    };
    Ok(GenerateResult { delta_dirs, digest })
}

/// The generated files that changed or appeared, and the directories of
/// those plus of the files that disappeared.
fn delta(pre: &FileDigests, post: &FileDigests) -> (Vec<PathBuf>, BTreeSet<PathBuf>) {
    let mut changed = Vec::new();
    let mut dirs = BTreeSet::new();
    for (path, digest) in post {
        if pre.get(path) != Some(digest) {
            changed.push(path.clone());
            dirs.insert(parent_dir(path));
        }
    }
    for path in pre.keys() {
        if !post.contains_key(path) {
            dirs.insert(parent_dir(path));
        }
    }
    (changed, dirs)
}

fn replay(path: &Path, pkg_dir: &Path) -> anyhow::Result<BTreeSet<PathBuf>> {
    let f = std::fs::File::open(path).map_err(|err| anyhow!("open {}: {}", path.display(), err))?;
    let mut r = ArchiveReader::new(BufReader::new(f), pkg_dir);
    let mut dirs = BTreeSet::new();
    while let Some(written) = r.extract_file()? {
        dirs.insert(parent_dir(&written));
    }
    Ok(dirs)
}

fn run_directive(pkg: &Package, d: &Directive, cx: &WorkContext) -> anyhow::Result<()> {
    let pos = format!("{}:{}", pkg.dir.join(&d.file).display(), d.line);
    let (program, args) = d
        .args
        .split_first()
        .ok_or_else(|| anyhow!("{}: empty directive", pos))?;
    let mut exe = look_path(program).map_err(|err| anyhow!("{}: {}", pos, err))?;
    if exe.is_relative() {
        exe = std::env::current_dir()?.join(exe);
    }
    let mut cmd = Command::new(&exe);
    cmd.args(args).current_dir(&pkg.dir).envs(d.env(cx.ctx));

    cx.progress.generator_started(&pkg.dir, &d.args);
    let (termination, output) = process::run_command(&mut cmd, cx.progress.stream_output())
        .map_err(|err| anyhow!("{}: failed to run {}: {}", pos, program, err))?;
    cx.progress.generator_finished(&d.args, &output);
    match termination {
        Termination::Success => Ok(()),
        Termination::Interrupted => bail!("{}: {} interrupted", pos, program),
        Termination::Failure => bail!(
            "{}: running {:?} failed:\n{}",
            pos,
            d.args.join(" "),
            String::from_utf8_lossy(&output).trim_end()
        ),
    }
}

/// Apply an iteration's outcome to the store.  Returns the nodes that are
/// ready to be scheduled; the generated package comes first if it is ready
/// for another iteration.
///
/// With no changes the package is generated, and the caller reports it done.
/// Otherwise every package in a changed directory is undone and refreshed
/// from disk, directives are re-resolved and missing imports loaded.
pub fn apply(
    graph: &mut Graph,
    loader: &Loader,
    id: NodeId,
    result: GenerateResult,
) -> anyhow::Result<Vec<NodeId>> {
    if result.delta_dirs.is_empty() {
        graph.package_mut(id).generated = true;
        graph.node_mut(id).digest = result.digest;
        return Ok(Vec::new());
    }

    let mut touched = Vec::new();
    let mut misses = MissMap::new();
    for dir in &result.delta_dirs {
        let pkg = match graph.package_by_dir(dir) {
            Some(pkg) => pkg,
            None => {
                debug!("no package in changed dir {}", dir.display());
                continue;
            }
        };
        graph.undo(pkg);
        if let Some(twin) = loader.refresh_imports(graph, pkg, &mut misses)? {
            touched.push(twin);
        }
        touched.push(pkg);
        if let Some(twin) = graph.package(pkg).xtest {
            touched.push(twin);
        }
    }
    if !touched.contains(&id) {
        touched.push(id);
    }

    let mut mod_misses = MissMap::new();
    let mut refreshed = FxHashSet::default();
    for &pkg in &touched {
        if graph.package(pkg).generate && refreshed.insert(pkg) {
            loader.refresh_directives(graph, pkg, &mut mod_misses)?;
        }
    }
    touched.extend(loader.load_misses(graph, &misses, &mod_misses)?);

    // Everything not done below the touched packages needs scheduling once
    // ready.  The generated package leads if it is.
    let mut ready = Vec::new();
    if graph.node(id).ready() {
        ready.push(id);
    }
    let mut seen = FxHashSet::default();
    seen.insert(id);
    let mut stack: Vec<NodeId> = graph.sorted_deps(id);
    stack.extend(touched.iter().copied());
    while let Some(n) = stack.pop() {
        if !seen.insert(n) {
            continue;
        }
        let node = graph.node(n);
        if node.done() {
            continue;
        }
        if node.ready() {
            ready.push(n);
        } else {
            stack.extend(graph.sorted_deps(n));
        }
    }
    Ok(ready)
}
