pub mod canon;
mod densemap;
pub mod env;
pub mod error;
pub mod eval;
pub mod fs;
pub mod generator;
pub mod graph;
pub mod manifest;
pub mod path;
pub mod process;
pub mod progress;
pub mod recheck;
pub mod register;
pub mod run;
pub mod schema;
mod signal;
mod smallmap;
pub mod target;
#[cfg(test)]
mod testing;
pub mod toolchain;
pub mod trace;
pub mod work;

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
