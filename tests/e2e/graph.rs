use crate::e2e::*;
use gg::config::BuildContext;
use gg::graph::{Graph, NodeId};
use gg::load::{GoTool, ListMode, Loader};
use gg::package::PackageInfo;
use std::path::PathBuf;

fn load(go: &dyn GoTool, patterns: &[&str]) -> anyhow::Result<Graph> {
    let ctx = BuildContext::new("linux", "amd64", None);
    let loader = Loader { go, ctx: &ctx };
    let patterns: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
    let mut graph = Graph::default();
    loader.load(&mut graph, &patterns)?;
    graph.verify();
    Ok(graph)
}

#[test]
fn module_tool_is_shared() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let directive = "//go:generate gobin -m -run p.com/tool -flag";
    space.write("x/x.go", &format!("package x\n\n{}\n", directive))?;
    space.write("y/y.go", &format!("package y\n\n{}\n", directive))?;
    space.write("tool/main.go", "package main\n\nimport \"p.com/lib\"\n")?;
    space.write("lib/lib.go", "package lib\n")?;

    let go = space.go();
    let g = load(&go, &["p.com/x", "p.com/y"])?;
    let tool = g.lookup_mod_tool("p.com/tool").expect("tool node");
    let tool_pkg = g.lookup_package("p.com/tool").expect("tool package");
    let x = g.lookup_package("p.com/x").unwrap();
    let y = g.lookup_package("p.com/y").unwrap();

    assert_eq!(g.sorted_deps(tool), vec![tool_pkg]);
    let mut rdeps: Vec<_> = g.node(tool).edges.rdeps.iter().copied().collect();
    g.sort_ids(&mut rdeps);
    assert_eq!(rdeps, vec![x, y]);
    assert!(!g.package(tool_pkg).generate);
    assert!(g.lookup_package("p.com/lib").is_some());
    assert!(!g.node(x).ready());

    let mut dot = Vec::new();
    g.write_dot(&mut dot)?;
    let dot = String::from_utf8(dot)?;
    assert!(dot.contains("\"modtool:p.com/tool\" -> \"p.com/x\";"), "{}", dot);
    assert!(dot.contains("\"p.com/tool\" -> \"modtool:p.com/tool\";"), "{}", dot);
    Ok(())
}

/// Hash every node that becomes ready, treating packages as already at their
/// fixed point.  Returns the nodes hashed, in order.
fn settle(g: &mut Graph) -> anyhow::Result<Vec<NodeId>> {
    let mut hashed = Vec::new();
    loop {
        let mut ready: Vec<NodeId> = g
            .all_ids()
            .filter(|&id| g.node(id).ready() && !g.node(id).done())
            .collect();
        if ready.is_empty() {
            return Ok(hashed);
        }
        g.sort_ids(&mut ready);
        for id in ready {
            let digest = gg::hash::hash_node(g, id)?;
            g.node_mut(id).digest = Some(digest);
            if g.node(id).as_package().map_or(false, |p| p.generate) {
                g.package_mut(id).generated = true;
            }
            g.done_dep(id);
            hashed.push(id);
        }
    }
}

#[test]
fn tool_change_redirties_its_users() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let directive = "//go:generate gobin -m -run p.com/tool";
    space.write("x/x.go", &format!("package x\n\n{}\n", directive))?;
    space.write("y/y.go", &format!("package y\n\n{}\n", directive))?;
    space.write("tool/main.go", "package main\n\nimport \"p.com/lib\"\n")?;
    space.write("lib/lib.go", "package lib\n")?;

    let go = space.go();
    let mut g = load(&go, &["p.com/x", "p.com/y"])?;
    let tool = g.lookup_mod_tool("p.com/tool").expect("tool node");
    let tool_pkg = g.lookup_package("p.com/tool").expect("tool package");
    let lib = g.lookup_package("p.com/lib").unwrap();
    let x = g.lookup_package("p.com/x").unwrap();
    let y = g.lookup_package("p.com/y").unwrap();

    assert_eq!(settle(&mut g)?.len(), 5);
    assert!(g.node(x).done() && g.node(y).done());
    let before = g.node(tool).digest;

    space.write("tool/main.go", "package main\n\nimport \"p.com/lib\"\n\n// v2\n")?;
    g.undo(tool_pkg);
    g.verify();
    assert!(g.node(tool).digest.is_none());
    assert!(!g.node(x).ready() && !g.node(y).ready());
    assert!(g.node(lib).done());

    let hashed = settle(&mut g)?;
    assert_eq!(hashed.iter().filter(|&&id| id == tool).count(), 1);
    assert!(!hashed.contains(&lib));
    assert!(hashed.contains(&x) && hashed.contains(&y));
    assert_eq!(hashed.len(), 4);
    assert_ne!(g.node(tool).digest, before);
    g.verify();
    Ok(())
}

#[test]
fn tool_depending_on_its_user_is_a_cycle() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "x/x.go",
        "package x\n\n//go:generate gobin -m -run p.com/tool\n",
    )?;
    space.write("tool/main.go", "package main\n\nimport \"p.com/x\"\n")?;
    let err = load(&space.go(), &["p.com/x"]).err().expect("cycle error");
    assert!(err.to_string().contains("depends on the package it generates"), "{}", err);
    Ok(())
}

/// A go tool whose main module is somewhere else.
struct ElsewhereGo(FakeGo);

impl GoTool for ElsewhereGo {
    fn list(&self, patterns: &[String], mode: ListMode) -> anyhow::Result<Vec<PackageInfo>> {
        self.0.list(patterns, mode)
    }

    fn main_module(&self) -> anyhow::Result<Option<String>> {
        Ok(Some("/elsewhere/go.mod".to_string()))
    }

    fn gobin_path(&self, pattern: &str) -> anyhow::Result<PathBuf> {
        self.0.gobin_path(pattern)
    }
}

#[test]
fn packages_outside_main_module_are_rejected() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("a/a.go", "package a\n")?;
    let go = ElsewhereGo(space.go());
    let run = space.run_with(&go, &space.options(1, 10), &["p.com/a"]);
    let err = run.result.as_ref().unwrap_err();
    assert!(err.to_string().contains("outside the main module"), "{}", err);
    assert_eq!(run.runs(), 0);
    Ok(())
}
