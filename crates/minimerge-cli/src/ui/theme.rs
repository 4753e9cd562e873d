//! Colors and icons shared by every minimerge output.

use crossterm::style::Color;

/// Default theme for minimerge output
#[derive(Debug, Clone, Default)]
pub struct Theme {
    pub colors: ColorScheme,
    pub icons: Icons,
}

/// Color scheme for UI elements
#[derive(Debug, Clone)]
pub struct ColorScheme {
    /// Package names
    pub package_name: Color,
    /// Revisions, variants, uris
    pub secondary: Color,
    /// Section titles and table headers
    pub header: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    /// Plan flag letters
    pub flags: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            package_name: Color::Cyan,
            secondary: Color::DarkGrey,
            header: Color::DarkGrey,
            success: Color::Green,
            warning: Color::Yellow,
            error: Color::Red,
            flags: Color::Magenta,
        }
    }
}

/// Status icons
#[derive(Debug, Clone)]
pub struct Icons {
    /// Work started on a package (●)
    pub active: &'static str,
    /// Completed (✓)
    pub success: &'static str,
    /// Failed (✗)
    pub error: &'static str,
    /// Warning (⚠)
    pub warning: &'static str,
    /// Info (ℹ)
    pub info: &'static str,
}

impl Default for Icons {
    fn default() -> Self {
        Self {
            active: "●",
            success: "✓",
            error: "✗",
            warning: "⚠",
            info: "ℹ",
        }
    }
}

/// Width of section rules.
pub const RULE_WIDTH: usize = 40;

/// `1 package` / `3 packages`.
pub fn pluralize(count: usize, noun: &str) -> String {
    format!("{count} {noun}{}", if count == 1 { "" } else { "s" })
}
