use crate::e2e::*;

#[cfg(unix)]
#[test]
fn fresh_run_then_cached_rerun() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mkgen = space.generator("mkgen", MKGEN)?;
    space.write("a/a.go", &format!("package a\n\n//go:generate {}\n", mkgen))?;
    let opts = space.options(1, 10);

    let run = space.run_expect(&opts, &["p.com/a"])?;
    // The second iteration confirms the output is stable.
    assert_eq!(run.runs(), 2);
    assert_eq!(
        space.read("a/gen_a_mkgen.go")?,
        "package a\n\n// line 3\nconst Generated = true\n"
    );
    let archives = space.archives()?;
    assert_eq!(archives.len(), 2);
    assert_eq!(archives[0], b"1");
    assert!(archives[1].starts_with(b"1gen_a_mkgen.go|"));
    assert_eq!(archives[1].iter().filter(|&&b| b == b'|').count(), 2);
    assert!(run.digests["p.com/a"].is_some());

    let rerun = space.run_expect(&opts, &["p.com/a"])?;
    assert_eq!(rerun.runs(), 0);
    assert_eq!(rerun.result?.iterations, 1);
    assert_eq!(rerun.digests["p.com/a"], run.digests["p.com/a"]);
    Ok(())
}

#[cfg(unix)]
#[test]
fn iteration_limit_names_the_package() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let grow = space.generator(
        "grow",
        r#"out=gen_a_grow.go
[ -f "$out" ] || printf 'package a\n' > "$out"
printf '// again\n' >> "$out""#,
    )?;
    space.write("a/a.go", &format!("package a\n\n//go:generate {}\n", grow))?;

    let run = space.run(&space.options(1, 3), &["p.com/a"]);
    let err = run.result.as_ref().unwrap_err();
    assert!(err.to_string().contains("p.com/a"), "{}", err);
    assert_eq!(run.runs(), 3);
    Ok(())
}

#[cfg(unix)]
#[test]
fn failing_generator_reports_output() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let bad = space.generator("bad", "echo 'cannot frob' >&2\nexit 2")?;
    space.write("a/a.go", &format!("package a\n\n//go:generate {} -x\n", bad))?;

    let run = space.run(&space.options(1, 10), &["p.com/a"]);
    let err = format!("{:#}", run.result.unwrap_err());
    assert!(err.contains("a.go:3"), "{}", err);
    assert!(err.contains("cannot frob"), "{}", err);
    Ok(())
}

#[cfg(unix)]
#[test]
fn dependent_digest_follows_dependency() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mkgen = space.generator("mkgen", MKGEN)?;
    space.write("a/a.go", &format!("package a\n\n//go:generate {}\n", mkgen))?;
    space.write("b/b.go", "package b\n\nimport \"p.com/a\"\n")?;
    let opts = space.options(2, 10);

    let first = space.run_expect(&opts, &["p.com/..."])?;
    let again = space.run_expect(&opts, &["p.com/..."])?;
    assert_eq!(again.runs(), 0);
    assert_eq!(first.digests, again.digests);

    // One more byte in a changes a, and through it b.
    space.write("a/a.go", &format!("package a\n\n//go:generate {}\n\n", mkgen))?;
    let changed = space.run_expect(&opts, &["p.com/..."])?;
    assert_eq!(changed.runs(), 1);
    assert_ne!(changed.digests["p.com/a"], first.digests["p.com/a"]);
    assert_ne!(changed.digests["p.com/b"], first.digests["p.com/b"]);
    assert!(changed.digests["p.com/b"].is_some());
    Ok(())
}

#[cfg(unix)]
#[test]
fn generation_runs_alone() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mkgen = space.generator("mkgen", &format!("sleep 0.05\n{}", MKGEN))?;
    for i in 0..10 {
        space.write(
            &format!("p{}/p.go", i),
            &format!("package p{}\n\n//go:generate {}\n", i, mkgen),
        )?;
    }
    let opts = space.options(4, 10);

    let run = space.run_expect(&opts, &["p.com/..."])?;
    assert_eq!(run.max_running, 1);
    assert_eq!(run.runs(), 20);
    for i in 0..10 {
        assert!(space.read(&format!("p{}/gen_p_mkgen.go", i)).is_ok());
    }

    space.write("p3/p.go", &format!("package p3\n\n//go:generate {}\n// edited\n", mkgen))?;
    let rerun = space.run_expect(&opts, &["p.com/..."])?;
    assert_eq!(rerun.started, vec![space.root().join("p3")]);
    Ok(())
}

#[test]
fn package_without_directives_is_only_hashed() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("a/a.go", "package a\n")?;
    space.write("b/b.go", "package b\n\nimport \"p.com/a\"\n")?;

    let run = space.run_expect(&space.options(4, 10), &["p.com/..."])?;
    assert_eq!(run.runs(), 0);
    assert!(run.digests["p.com/a"].is_some());
    assert!(run.digests["p.com/b"].is_some());
    let summary = run.result?;
    assert_eq!(summary.iterations, 0);
    assert_eq!(summary.hashed, 2);
    assert!(space.archives()?.is_empty());
    Ok(())
}

#[cfg(unix)]
#[test]
fn generator_removing_its_output() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let rmgen = space.generator("rmgen", "rm -f gen_old_rmgen.go")?;
    space.write("a/a.go", &format!("package a\n\n//go:generate {}\n", rmgen))?;
    space.write("a/gen_old_rmgen.go", "package a\n\nconst Old = 1\n")?;
    let opts = space.options(1, 10);

    let run = space.run_expect(&opts, &["p.com/a"])?;
    assert_eq!(run.runs(), 2);
    assert!(space.read("a/gen_old_rmgen.go").is_err());
    assert!(run.digests["p.com/a"].is_some());

    let rerun = space.run_expect(&opts, &["p.com/a"])?;
    assert_eq!(rerun.runs(), 0);
    assert_eq!(rerun.digests, run.digests);
    Ok(())
}

#[cfg(unix)]
#[test]
fn serial_runs_are_deterministic() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mkgen = space.generator("mkgen", MKGEN)?;
    space.write("a/a.go", &format!("package a\n\n//go:generate {}\n", mkgen))?;
    space.write(
        "b/b.go",
        &format!("package b\n\nimport \"p.com/a\"\n\n//go:generate {}\n", mkgen),
    )?;
    space.write("c/c.go", &format!("package c\n\n//go:generate {} -x\n", mkgen))?;
    let opts = space.options(1, 10);

    let first = space.run_expect(&opts, &["p.com/..."])?;
    let first_archives = space.archives()?;

    std::fs::remove_dir_all(space.cache_dir())?;
    for f in ["a/gen_a_mkgen.go", "b/gen_b_mkgen.go", "c/gen_c_mkgen.go"] {
        space.remove(f)?;
    }
    let second = space.run_expect(&opts, &["p.com/..."])?;
    assert_eq!(second.started, first.started);
    assert_eq!(space.archives()?, first_archives);
    assert_eq!(second.digests, first.digests);
    Ok(())
}
