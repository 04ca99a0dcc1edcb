use crate::e2e::*;

#[cfg(unix)]
#[test]
fn replay_into_empty_tree() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mkgen = space.generator("mkgen", MKGEN)?;
    space.write("a/a.go", &format!("package a\n\n//go:generate {}\n", mkgen))?;
    space.write("a/b.go", &format!("package a\n\n//go:generate {} second\n", mkgen))?;
    let opts = space.options(1, 10);

    let first = space.run_expect(&opts, &["p.com/a"])?;
    assert_eq!(first.runs(), 4);
    let a = space.read("a/gen_a_mkgen.go")?;
    let b = space.read("a/gen_b_mkgen.go")?;

    space.remove("a/gen_a_mkgen.go")?;
    space.remove("a/gen_b_mkgen.go")?;
    let replay = space.run_expect(&opts, &["p.com/a"])?;
    assert_eq!(replay.runs(), 0);
    assert_eq!(space.read("a/gen_a_mkgen.go")?, a);
    assert_eq!(space.read("a/gen_b_mkgen.go")?, b);
    assert_eq!(replay.digests, first.digests);
    Ok(())
}

#[cfg(unix)]
#[test]
fn corrupt_archive_falls_back_to_running() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mkgen = space.generator("mkgen", MKGEN)?;
    space.write("a/a.go", &format!("package a\n\n//go:generate {}\n", mkgen))?;
    let opts = space.options(1, 10);
    space.run_expect(&opts, &["p.com/a"])?;

    // Truncate every cached archive that has entries.
    for sub in std::fs::read_dir(space.cache_dir())? {
        let sub = sub?.path();
        if !sub.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&sub)? {
            let path = entry?.path();
            if std::fs::metadata(&path)?.len() > 1 {
                std::fs::write(&path, "1gen_a_mkgen.go|999|")?;
            }
        }
    }
    space.remove("a/gen_a_mkgen.go")?;
    let run = space.run_expect(&opts, &["p.com/a"])?;
    assert_eq!(run.runs(), 1);
    assert!(space.read("a/gen_a_mkgen.go")?.contains("Generated"));
    Ok(())
}
