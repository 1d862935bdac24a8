//! Delivery backends
//!
//! Abstracts how a command line reaches the target application's input
//! surface. Provides:
//! - DeliveryBackend trait: the seam the run controller drives
//! - OsascriptBackend: AppleScript through `osascript -e` on macOS
//! - EnigoBackend: synthesized keyboard/mouse events everywhere else
//!
//! Backends report success as a plain bool and never let an error cross
//! this boundary; the controller treats `false` as "delivery failed,
//! continue the schedule".

pub mod desktop;
pub mod osascript;

use std::io;

use crate::config::RunConfiguration;

pub use desktop::EnigoBackend;
pub use osascript::OsascriptBackend;

/// Interface between the run controller and the host's input machinery
pub trait DeliveryBackend: Send {
    /// Short backend identifier for logs
    fn name(&self) -> &'static str;

    /// One-time warm-up before the first job: activate the target and
    /// issue the open-input action twice. Returns false on failure.
    fn prime(&mut self) -> bool;

    /// Deliver one command: activate the target, open the input surface
    /// twice, focus it, type the literal text, submit twice. Returns
    /// false on any failure.
    fn deliver(&mut self, command: &str) -> bool;
}

/// Delivery errors. Internal to the backends; the trait surface folds
/// them into a bool after reporting the cause.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to launch osascript: {0}")]
    Launch(#[from] io::Error),

    #[error("osascript failed: {0}")]
    Script(String),

    #[error("input synthesis unavailable: {0}")]
    Connection(String),

    #[error("input synthesis failed: {0}")]
    Input(String),
}

/// Keyboard modifier in a shortcut chord
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Command,
    Control,
    Option,
    Shift,
}

impl Modifier {
    fn parse(segment: &str) -> Option<Self> {
        match segment.to_ascii_lowercase().as_str() {
            "cmd" | "command" | "meta" | "super" => Some(Self::Command),
            "ctrl" | "control" => Some(Self::Control),
            "alt" | "option" | "opt" => Some(Self::Option),
            "shift" => Some(Self::Shift),
            _ => None,
        }
    }
}

/// Parsed keyboard shortcut, e.g. "Cmd+L" or "Ctrl+Shift+P"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortcut {
    pub modifiers: Vec<Modifier>,
    pub key: char,
}

impl Shortcut {
    /// The open-input chord used when the configured identifier does not
    /// parse
    pub fn open_input_default() -> Self {
        Self {
            modifiers: vec![Modifier::Command],
            key: 'l',
        }
    }

    /// Parse a `+`-separated identifier. Case-insensitive; the final
    /// segment must be a single letter or digit.
    pub fn parse(identifier: &str) -> Option<Self> {
        let segments: Vec<&str> = identifier.split('+').map(str::trim).collect();
        let (key_segment, modifier_segments) = segments.split_last()?;

        let mut key_chars = key_segment.chars();
        let key = key_chars.next()?.to_ascii_lowercase();
        if key_chars.next().is_some() || !key.is_ascii_alphanumeric() {
            return None;
        }

        let mut modifiers = Vec::with_capacity(modifier_segments.len());
        for segment in modifier_segments {
            modifiers.push(Modifier::parse(segment)?);
        }

        Some(Self { modifiers, key })
    }
}

/// Pick the backend for the current host. The run controller never
/// branches on host type after this point.
pub fn select_backend(config: &RunConfiguration) -> Box<dyn DeliveryBackend> {
    if cfg!(target_os = "macos") {
        Box::new(OsascriptBackend::new(config))
    } else {
        Box::new(EnigoBackend::new(config))
    }
}
