//! Runtime support for the Vitl interpreter: a bump arena for short-lived
//! allocations and an open-addressing Robin-Hood hash map, generic and
//! string-keyed.

pub mod config;
pub mod error;
pub mod logging;
pub mod memory;

pub use config::*;
pub use error::*;
pub use logging::init_tracing;
pub use memory::*;
