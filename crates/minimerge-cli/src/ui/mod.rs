//! Terminal output for minimerge.
//!
//! - [`theme`] - colors and icons
//! - [`output`] - the [`TerminalReporter`] the engine reports through
//! - [`table`] - plan and catalog tables

pub mod output;
pub mod table;
pub mod theme;

pub use output::TerminalReporter;
pub use theme::Theme;
