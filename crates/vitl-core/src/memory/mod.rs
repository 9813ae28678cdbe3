//! Memory subsystem: bump arenas, Robin-Hood maps and interning.
//!
//! Components:
//! - `arena`: Fixed-capacity bump arena with reset/destroy and debug poisoning
//! - `hashmap`: Open-addressing Robin-Hood map with tombstones and pluggable key ops
//! - `string_map`: String-keyed map that owns copies of its keys (FNV-1a)
//! - `string_interner`: Arena-backed interner mapping strings to dense symbols
//! - `debug`: Arena counters and table shape statistics

pub mod arena;
pub mod debug;
pub mod hashmap;
pub mod string_interner;
pub mod string_map;

pub use arena::*;
pub use debug::*;
pub use hashmap::*;
pub use string_interner::*;
pub use string_map::*;
