//! Shared value types for minimerge.
//!
//! Kept free of I/O so that both the engine and the command line can depend
//! on it without pulling in fetchers or makers.

pub mod name;
pub mod types;

pub use name::is_valid_minibuild_name;
pub use types::*;
