//! Settings derived from flags and the environment.

use anyhow::anyhow;
use rustc_hash::FxHashSet;
use std::path::PathBuf;

/// Operating systems recognised by go/build, for file name suffixes.
pub const KNOWN_OS: &[&str] = &[
    "aix",
    "android",
    "darwin",
    "dragonfly",
    "freebsd",
    "hurd",
    "illumos",
    "ios",
    "js",
    "linux",
    "nacl",
    "netbsd",
    "openbsd",
    "plan9",
    "solaris",
    "wasip1",
    "windows",
    "zos",
];

pub const UNIX_OS: &[&str] = &[
    "aix",
    "android",
    "darwin",
    "dragonfly",
    "freebsd",
    "hurd",
    "illumos",
    "ios",
    "linux",
    "netbsd",
    "openbsd",
    "solaris",
];

pub const KNOWN_ARCH: &[&str] = &[
    "386",
    "amd64",
    "amd64p32",
    "arm",
    "armbe",
    "arm64",
    "arm64be",
    "loong64",
    "mips",
    "mipsle",
    "mips64",
    "mips64le",
    "mips64p32",
    "mips64p32le",
    "ppc",
    "ppc64",
    "ppc64le",
    "riscv",
    "riscv64",
    "s390",
    "s390x",
    "sparc",
    "sparc64",
    "wasm",
];

/// The target a run generates for: GOOS, GOARCH and the user's build tags.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub goos: String,
    pub goarch: String,
    /// Sorted and deduplicated.
    pub tags: Vec<String>,
    tag_set: FxHashSet<String>,
}

impl BuildContext {
    pub fn new(goos: &str, goarch: &str, tags: impl IntoIterator<Item = String>) -> Self {
        let mut tags: Vec<String> = tags.into_iter().filter(|t| !t.is_empty()).collect();
        tags.sort();
        tags.dedup();
        let tag_set = tags.iter().cloned().collect();
        BuildContext {
            goos: goos.to_string(),
            goarch: goarch.to_string(),
            tags,
            tag_set,
        }
    }

    /// GOOS and GOARCH from the environment, falling back to the host.
    pub fn from_env(tags: impl IntoIterator<Item = String>) -> Self {
        let goos = std::env::var("GOOS")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| host_goos().to_string());
        let goarch = std::env::var("GOARCH")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| host_goarch().to_string());
        Self::new(&goos, &goarch, tags)
    }

    /// Whether a build tag is satisfied for this target.
    pub fn matches_tag(&self, tag: &str) -> bool {
        if tag == self.goos || tag == self.goarch {
            return true;
        }
        match tag {
            "unix" => return UNIX_OS.contains(&self.goos.as_str()),
            "linux" if self.goos == "android" => return true,
            "solaris" if self.goos == "illumos" => return true,
            "darwin" if self.goos == "ios" => return true,
            "gc" => return true,
            _ => {}
        }
        if let Some(minor) = tag.strip_prefix("go1.") {
            if !minor.is_empty() && minor.bytes().all(|b| b.is_ascii_digit()) {
                return true;
            }
        }
        self.tag_set.contains(tag)
    }

    /// The value of the query tool's -tags flag, if any tags are set.
    pub fn tags_flag(&self) -> Option<String> {
        if self.tags.is_empty() {
            None
        } else {
            Some(format!("-tags={}", self.tags.join(",")))
        }
    }
}

/// Split a -tags flag value; both spaces and commas separate tags.
pub fn split_tags(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

pub fn host_goos() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        os => os,
    }
}

pub fn host_goarch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        "riscv64gc" => "riscv64",
        "loongarch64" => "loong64",
        "wasm32" => "wasm",
        arch => arch,
    }
}

/// Per-run knobs set on the command line.
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of units run concurrently in one round.
    pub parallelism: usize,
    /// Maximum number of generation iterations per package.
    pub max_iterations: usize,
    /// Stream generator output and report each unit.
    pub trace: bool,
    /// Report elapsed times instead of -trace output.
    pub trace_time: bool,
    /// Verify the whole graph after every round, and don't recover panics.
    pub debug: bool,
    /// Print the dependency graph after loading.
    pub graph: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            parallelism: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1),
            max_iterations: 10,
            trace: false,
            trace_time: false,
            debug: false,
            graph: false,
        }
    }
}

/// The per-user cache root, as Go's os.UserCacheDir computes it.
pub fn user_cache_dir() -> anyhow::Result<PathBuf> {
    let var = |name: &str| std::env::var_os(name).filter(|v| !v.is_empty());
    if cfg!(target_os = "macos") {
        let home = var("HOME").ok_or_else(|| anyhow!("$HOME is not defined"))?;
        return Ok(PathBuf::from(home).join("Library/Caches"));
    }
    if cfg!(windows) {
        let dir = var("LocalAppData").ok_or_else(|| anyhow!("%LocalAppData% is not defined"))?;
        return Ok(PathBuf::from(dir));
    }
    if let Some(dir) = var("XDG_CACHE_HOME") {
        let dir = PathBuf::from(dir);
        if !dir.is_absolute() {
            anyhow::bail!("path in $XDG_CACHE_HOME is relative");
        }
        return Ok(dir);
    }
    let home = var("HOME").ok_or_else(|| anyhow!("neither $XDG_CACHE_HOME nor $HOME are defined"))?;
    Ok(PathBuf::from(home).join(".cache"))
}
