//! Core library for minimerge.
//!
//! Minibuilds are read from minilays, resolved into a build list, refined
//! by variant selection and handed to the [`engine::Engine`], which fetches
//! sources, drives makers and records install state under the prefix.

pub mod config;
pub mod engine;
pub mod fetchers;
pub mod ini;
pub mod io;
pub mod makers;
pub mod migrate;
pub mod minibuild;
pub mod minilay;
pub mod paths;
pub mod resolver;
pub mod state;
pub mod variants;

pub mod reporter;

pub use config::{Config, ConfigError};
pub use engine::{Engine, EngineError, FetchOrder, MergeOptions, Plan};
pub use minibuild::Minibuild;
pub use minilay::{Minilay, Minilays};
pub use reporter::{NullReporter, Reporter};
pub use state::StateStore;

/// User Agent string for downloads
pub const USER_AGENT: &str = concat!("minimerge/", env!("CARGO_PKG_VERSION"));
