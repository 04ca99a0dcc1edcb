use crate::cache::Cache;
use crate::config::{self, BuildContext, Options};
use crate::load::GoCommand;
use crate::progress::{ConsoleProgress, Progress};
use crate::signal;
use crate::work::Engine;
use anyhow::{anyhow, bail};
use std::io::Write;
use tracing::debug;
use tracing_subscriber::fmt;

const USAGE: &str = "usage: gg [flags] [packages]";

const BUG_BANNER: &str = "gg panicked; this is a bug, please report it along with the message below";

/// What the command line asks for.
struct Invocation {
    opts: Options,
    tags: Vec<String>,
    patterns: Vec<String>,
}

fn flags() -> getopts::Options {
    let defaults = Options::default();
    let mut opts = getopts::Options::new();
    // Go-style flags: a single dash for every name.
    opts.long_only(true);
    opts.optopt(
        "p",
        "",
        &format!("generation parallelism [default={}]", defaults.parallelism),
        "N",
    );
    opts.optopt(
        "r",
        "",
        &format!("maximum generate iterations per package [default={}]", defaults.max_iterations),
        "N",
    );
    opts.optmulti("", "tags", "build tags, space or comma separated; repeatable", "TAGS");
    opts.optflag("", "trace", "report each step and show generator output");
    opts.optflag("", "traceTime", "report elapsed times");
    opts.optflag("", "debug", "check internal invariants and log debug output");
    opts.optflag("", "graph", "print the dependency graph in dot format");
    opts.optflag("h", "", "print this help");
    opts
}

fn parse_count(flag: &str, value: Option<String>, default: usize) -> anyhow::Result<usize> {
    let n = match value {
        None => return Ok(default),
        Some(v) => v
            .parse::<usize>()
            .map_err(|err| anyhow!("invalid -{} {:?}: {}", flag, v, err))?,
    };
    if n == 0 {
        bail!("-{} must be at least 1", flag);
    }
    Ok(n)
}

/// Parse the arguments after the program name.  None means help was
/// printed.
fn parse_args(args: &[String]) -> anyhow::Result<Option<Invocation>> {
    let spec = flags();
    let matches = spec.parse(args)?;
    if matches.opt_present("h") {
        println!("{}", spec.usage(USAGE));
        return Ok(None);
    }
    let defaults = Options::default();
    let opts = Options {
        parallelism: parse_count("p", matches.opt_str("p"), defaults.parallelism)?,
        max_iterations: parse_count("r", matches.opt_str("r"), defaults.max_iterations)?,
        trace: matches.opt_present("trace"),
        trace_time: matches.opt_present("traceTime"),
        debug: matches.opt_present("debug"),
        graph: matches.opt_present("graph"),
    };
    let tags = matches
        .opt_strs("tags")
        .iter()
        .flat_map(|t| config::split_tags(t))
        .collect();
    let mut patterns = matches.free;
    if patterns.is_empty() {
        patterns.push(".".to_string());
    }
    Ok(Some(Invocation {
        opts,
        tags,
        patterns,
    }))
}

fn init_logging(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        std::env::var("GG_LOG")
            .ok()
            .and_then(|s| parse_level_str(&s))
            .unwrap_or(tracing::Level::WARN)
    };
    // Fails only if a subscriber is already installed.
    let _ = fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

fn generate(inv: &Invocation) -> anyhow::Result<()> {
    let ctx = BuildContext::from_env(inv.tags.iter().cloned());
    debug!("build context {:?}", ctx);
    let progress = ConsoleProgress::new(inv.opts.trace, inv.opts.trace_time);
    let go = GoCommand::new(&ctx);
    let cache = Cache::open(&config::user_cache_dir()?.join("gg-artefacts"))?;
    let workdir = tempfile::Builder::new().prefix("gg-work").tempdir()?;

    let mut engine = Engine::new(&ctx, &inv.opts, &go, &cache, &progress, workdir.path());
    engine.load(&inv.patterns)?;
    if inv.opts.graph {
        let mut out = std::io::stdout().lock();
        engine.graph().write_dot(&mut out)?;
        out.flush()?;
    }
    let summary = engine.execute()?;
    debug!("{:?}", summary);
    progress.timing("done");

    cache.trim()?;
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub fn run() -> anyhow::Result<i32> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let inv = match parse_args(&args)? {
        None => return Ok(0),
        Some(inv) => inv,
    };
    init_logging(inv.opts.debug);
    signal::register_sigint();

    if inv.opts.debug {
        generate(&inv)?;
        return Ok(0);
    }
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| generate(&inv))) {
        Ok(result) => result.map(|()| 0),
        Err(payload) => Err(anyhow!("{}\n\n{}", BUG_BANNER, panic_message(&*payload))),
    }
}
