pub mod archive;
pub mod cache;
pub mod config;
pub mod constraint;
pub mod densemap;
pub mod directive;
pub mod generate;
pub mod generator;
pub mod graph;
pub mod hash;
pub mod load;
pub mod package;
pub mod process;
pub mod progress;
pub mod run;
pub mod scanner;
pub mod signal;
pub mod source;
pub mod trace;
pub mod work;

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
