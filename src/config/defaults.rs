//! Built-in default configuration values
//!
//! Every value the config file can set has a hardcoded default here, so a
//! missing or broken file still produces a runnable configuration.

use super::load::JobSpec;

/// Built-in default configuration values
#[derive(Debug, Clone)]
pub struct BuiltinDefaults {
    /// Target application name (default: "Cursor")
    pub target_app: String,

    /// Command for the fallback job (default: "hello")
    pub command: String,

    /// Interval for the fallback job in seconds (default: 10)
    pub interval_seconds: f64,

    /// Repeat count for the fallback job (default: 10)
    pub max_repeats: u32,

    /// Wait after activating the target application (default: 1.0)
    pub activation_delay: f64,

    /// Wait after injecting the command text (default: 1.0)
    pub keystroke_delay: f64,

    /// Wait between the two submit keypresses (default: 0.5)
    pub confirm_delay: f64,

    /// Wait for the application to settle after activation (default: 2.0)
    pub settle_delay: f64,

    /// Wait after the fallback focus click (default: 0.5)
    pub focus_click_delay: f64,

    /// Whether to search for a focusable input element (default: true)
    pub focus_assist: bool,

    /// Screen coordinates for the fallback focus click (default: 400, 700)
    pub fallback_click: (i32, i32),

    /// Keyboard shortcut that opens the input surface (default: "Cmd+L")
    pub fallback_shortcut: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            target_app: "Cursor".to_string(),
            command: "hello".to_string(),
            interval_seconds: 10.0,
            max_repeats: 10,
            activation_delay: 1.0,
            keystroke_delay: 1.0,
            confirm_delay: 0.5,
            settle_delay: 2.0,
            focus_click_delay: 0.5,
            focus_assist: true,
            fallback_click: (400, 700),
            fallback_shortcut: "Cmd+L".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// The single job a run falls back to when the file defines none
    pub fn default_job(&self) -> JobSpec {
        JobSpec {
            command: self.command.clone(),
            interval_seconds: self.interval_seconds,
            max_repeats: self.max_repeats,
        }
    }
}
