//! Drives the store to a fixed point: hashes every node and generates every
//! package the user asked for.
//!
//! The orchestrator (Engine) alone mutates the store.  Each round it picks
//! ready units from the queue, runs them on a thread pool against a shared
//! immutable view of the store, then applies their results.  A generation
//! unit changes files on disk that other units read, so it runs in a round
//! of its own.

use crate::cache::Cache;
use crate::config::{BuildContext, Options};
use crate::generate::{self, GenerateResult, WorkContext};
use crate::graph::{Graph, NodeId};
use crate::hash::{self, Digest};
use crate::load::{GoTool, Loader};
use crate::progress::Progress;
use crate::signal;
use anyhow::bail;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Hash(NodeId),
    Generate(NodeId),
}

impl Unit {
    fn id(self) -> NodeId {
        match self {
            Unit::Hash(id) | Unit::Generate(id) => id,
        }
    }
}

enum Outcome {
    /// The unit did not start because the run is stopping.
    Skipped,
    Hashed(Digest),
    Generated(GenerateResult),
}

/// Counts of the work a run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub rounds: usize,
    pub hashed: usize,
    /// Generation iterations, whether replayed or run.
    pub iterations: usize,
}

pub struct Engine<'a> {
    graph: Graph,
    ctx: &'a BuildContext,
    opts: &'a Options,
    go: &'a dyn GoTool,
    cache: &'a Cache,
    progress: &'a dyn Progress,
    workdir: &'a Path,
}

fn run_unit(
    graph: &Graph,
    unit: Unit,
    cx: &WorkContext,
    first_err: &Mutex<Option<anyhow::Error>>,
) -> Outcome {
    if cx.stopped() {
        return Outcome::Skipped;
    }
    let result = match unit {
        Unit::Hash(id) => {
            cx.progress.hashing(&graph.node(id).to_string());
            hash::hash_node(graph, id).map(Outcome::Hashed)
        }
        Unit::Generate(id) => generate::generate(graph, id, cx).map(Outcome::Generated),
    };
    match result {
        Ok(outcome) => outcome,
        Err(err) => {
            cx.stop.store(true, Ordering::SeqCst);
            let mut slot = first_err.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(err);
            }
            Outcome::Skipped
        }
    }
}

impl<'a> Engine<'a> {
    pub fn new(
        ctx: &'a BuildContext,
        opts: &'a Options,
        go: &'a dyn GoTool,
        cache: &'a Cache,
        progress: &'a dyn Progress,
        workdir: &'a Path,
    ) -> Self {
        Engine {
            graph: Graph::default(),
            ctx,
            opts,
            go,
            cache,
            progress,
            workdir,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    fn loader(&self) -> Loader<'a> {
        Loader {
            go: self.go,
            ctx: self.ctx,
        }
    }

    /// Load the packages matching patterns, and everything they need.
    pub fn load(&mut self, patterns: &[String]) -> anyhow::Result<()> {
        self.loader().load(&mut self.graph, patterns)?;
        if self.opts.debug {
            self.graph.verify();
        }
        self.progress
            .timing(&format!("loaded {} nodes", self.graph.len()));
        Ok(())
    }

    pub fn run(&mut self, patterns: &[String]) -> anyhow::Result<Summary> {
        self.load(patterns)?;
        self.execute()
    }

    fn unit(&self, id: NodeId) -> Unit {
        match self.graph.node(id).as_package() {
            Some(p) if p.generate && !p.generated && !p.directives.is_empty() => {
                Unit::Generate(id)
            }
            _ => Unit::Hash(id),
        }
    }

    /// Pick the units of the next round.  Returns an error if a package
    /// would exceed its iteration limit.
    fn select(&mut self, queue: &mut VecDeque<NodeId>) -> anyhow::Result<Vec<Unit>> {
        if self.opts.parallelism == 1 {
            let graph = &self.graph;
            queue
                .make_contiguous()
                .sort_by(|&a, &b| graph.node(a).order_key().cmp(&graph.node(b).order_key()));
        }
        let mut batch = Vec::new();
        let mut picked = FxHashSet::default();
        while let Some(id) = queue.pop_front() {
            let node = self.graph.node(id);
            // Nodes that are not ready come back through done_dep.
            if node.done() || !node.ready() || picked.contains(&id) {
                continue;
            }
            let unit = self.unit(id);
            if let Unit::Generate(_) = unit {
                if !batch.is_empty() {
                    queue.push_front(id);
                    break;
                }
                let max = self.opts.max_iterations;
                let pkg = self.graph.package_mut(id);
                if pkg.gen_count >= max {
                    bail!(
                        "{}: still changing after {} generate iterations",
                        pkg.import_path,
                        max
                    );
                }
                pkg.gen_count += 1;
                batch.push(unit);
                break;
            }
            picked.insert(id);
            batch.push(unit);
            if batch.len() == self.opts.parallelism {
                break;
            }
        }
        Ok(batch)
    }

    /// Run until every node is done.
    pub fn execute(&mut self) -> anyhow::Result<Summary> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.opts.parallelism)
            .build()?;
        let stop = AtomicBool::new(false);
        let first_err = Mutex::new(None);
        let loader = self.loader();
        let mut summary = Summary::default();

        let mut initial: Vec<NodeId> = self
            .graph
            .all_ids()
            .filter(|&id| {
                let node = self.graph.node(id);
                node.ready() && !node.done()
            })
            .collect();
        self.graph.sort_ids(&mut initial);
        let mut queue: VecDeque<NodeId> = initial.into();

        while !queue.is_empty() {
            if signal::interrupted() {
                bail!("interrupted");
            }
            let batch = self.select(&mut queue)?;
            if batch.is_empty() {
                continue;
            }
            summary.rounds += 1;
            debug!("round {}: {:?}", summary.rounds, batch);

            let cx = WorkContext {
                ctx: self.ctx,
                cache: self.cache,
                progress: self.progress,
                workdir: self.workdir,
                explain: self.opts.debug,
                stop: &stop,
            };
            let graph = &self.graph;
            let results: Vec<(Unit, Outcome)> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|&unit| (unit, run_unit(graph, unit, &cx, &first_err)))
                    .collect()
            });
            if let Some(err) = first_err.lock().unwrap_or_else(|e| e.into_inner()).take() {
                return Err(err);
            }

            for (unit, outcome) in results {
                let id = unit.id();
                match outcome {
                    Outcome::Skipped => bail!("interrupted"),
                    Outcome::Hashed(digest) => {
                        summary.hashed += 1;
                        self.graph.node_mut(id).digest = Some(digest);
                        // Nothing to run: already at its fixed point.
                        if self.graph.node(id).as_package().map_or(false, |p| p.generate) {
                            self.graph.package_mut(id).generated = true;
                        }
                        queue.extend(self.graph.done_dep(id));
                    }
                    Outcome::Generated(result) => {
                        summary.iterations += 1;
                        let ready = generate::apply(&mut self.graph, &loader, id, result)?;
                        if self.graph.node(id).done() {
                            queue.extend(self.graph.done_dep(id));
                        }
                        for n in ready {
                            if n == id {
                                queue.push_front(n);
                            } else {
                                queue.push_back(n);
                            }
                        }
                    }
                }
            }
            if self.opts.debug {
                self.graph.verify();
            }
            self.progress
                .timing(&format!("round {} done", summary.rounds));
        }

        let stuck: Vec<String> = self
            .graph
            .all_ids()
            .filter_map(|id| self.graph.node(id).as_package())
            .filter(|p| p.generate && !p.generated)
            .map(|p| p.import_path.clone())
            .collect();
        if !stuck.is_empty() {
            bail!(
                "failed to generate {}: dependencies never became ready (cycle?)",
                stuck.join(", ")
            );
        }
        Ok(summary)
    }
}
