//! AppleScript delivery for macOS hosts
//!
//! Builds one script per call and hands it to `osascript -e`. The script
//! drives the target application through System Events: activate, open
//! the input surface twice, focus the input field, type, submit twice.
//! Script construction is pure so the generated text is unit-testable
//! without a GUI session.

use std::process::Command;

use crate::config::{DelayProfile, RunConfiguration};

use super::{DeliveryBackend, DeliveryError, Modifier, Shortcut};

/// Accessible-description fragments that identify the command input field
const INPUT_FIELD_HINTS: [&str; 4] = ["chat", "message", "input", "Ask"];

/// Fixed wait after `activate` returns, before System Events may drive
/// the process
const ACTIVATION_SETTLE: f64 = 2.0;

/// Fixed wait between the two open-input keystrokes
const OPEN_INPUT_GAP: f64 = 1.5;

pub struct OsascriptBackend {
    target_app: String,
    delays: DelayProfile,
    focus_assist: bool,
    fallback_click: (i32, i32),
    open_input: Shortcut,
}

impl OsascriptBackend {
    pub fn new(config: &RunConfiguration) -> Self {
        Self {
            target_app: config.target_app.clone(),
            delays: config.delays.clone(),
            focus_assist: config.focus_assist,
            fallback_click: config.fallback_click,
            open_input: Shortcut::parse(&config.fallback_shortcut)
                .unwrap_or_else(Shortcut::open_input_default),
        }
    }

    /// Script for the one-time warm-up: activate plus open-input twice
    fn prime_script(&self) -> String {
        let mut script = self.activation_block();
        script.push_str(&format!(
            "tell application \"System Events\"\n    tell process \"{app}\"\n",
            app = escape_text(&self.target_app)
        ));
        script.push_str(&self.open_input_block());
        script.push_str("    end tell\nend tell\n");
        script
    }

    /// Script for one full delivery
    fn delivery_script(&self, command: &str) -> String {
        let mut script = self.activation_block();
        script.push_str(&format!(
            "tell application \"System Events\"\n    tell process \"{app}\"\n",
            app = escape_text(&self.target_app)
        ));
        script.push_str(&self.open_input_block());
        if self.focus_assist {
            script.push_str(&self.focus_block());
        }
        script.push_str(&format!(
            "        keystroke \"{command}\"\n        delay {confirm}\n        key code 36\n        delay {confirm}\n        key code 36\n        delay {settle}\n",
            command = escape_text(command),
            confirm = self.delays.confirm_delay,
            settle = self.delays.settle_delay,
        ));
        script.push_str("    end tell\nend tell\n");
        script
    }

    fn activation_block(&self) -> String {
        format!(
            "tell application \"{app}\"\n    activate\n    delay {activation}\nend tell\n\n",
            app = escape_text(&self.target_app),
            activation = self.delays.activation_delay,
        )
    }

    fn open_input_block(&self) -> String {
        let open = keystroke_line(&self.open_input);
        format!(
            "        delay {settle}\n        {open}\n        delay {gap}\n        {open}\n        delay {keystroke}\n",
            settle = ACTIVATION_SETTLE,
            gap = OPEN_INPUT_GAP,
            keystroke = self.delays.keystroke_delay,
        )
    }

    /// Element search with a fixed-coordinate fallback. AppleScript's
    /// `try` keeps a missing element from failing the whole script.
    fn focus_block(&self) -> String {
        let hints = INPUT_FIELD_HINTS
            .iter()
            .map(|hint| format!("description contains \"{hint}\""))
            .collect::<Vec<_>>()
            .join(" or ");
        let (x, y) = self.fallback_click;
        format!(
            "        try\n            set inputField to first text field of first window whose {hints}\n            click inputField\n            delay {focus_click}\n        on error\n            click at {{{x}, {y}}}\n            delay {focus_click}\n        end try\n",
            focus_click = self.delays.focus_click_delay,
        )
    }

    fn run_script(&self, script: &str) -> Result<(), DeliveryError> {
        let output = Command::new("osascript").arg("-e").arg(script).output()?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(DeliveryError::Script(format!(
                "exit {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}

impl DeliveryBackend for OsascriptBackend {
    fn name(&self) -> &'static str {
        "osascript"
    }

    fn prime(&mut self) -> bool {
        match self.run_script(&self.prime_script()) {
            Ok(()) => true,
            Err(err) => {
                eprintln!("delivery prime failed ({}): {err}", self.name());
                false
            }
        }
    }

    fn deliver(&mut self, command: &str) -> bool {
        match self.run_script(&self.delivery_script(command)) {
            Ok(()) => true,
            Err(err) => {
                eprintln!("delivery failed ({}): {err}", self.name());
                false
            }
        }
    }
}

/// Render one keystroke with its modifier clause
fn keystroke_line(shortcut: &Shortcut) -> String {
    if shortcut.modifiers.is_empty() {
        return format!("keystroke \"{}\"", shortcut.key);
    }
    let clauses = shortcut
        .modifiers
        .iter()
        .map(|modifier| modifier_clause(*modifier))
        .collect::<Vec<_>>()
        .join(", ");
    format!("keystroke \"{}\" using {{{clauses}}}", shortcut.key)
}

fn modifier_clause(modifier: Modifier) -> &'static str {
    match modifier {
        Modifier::Command => "command down",
        Modifier::Control => "control down",
        Modifier::Option => "option down",
        Modifier::Shift => "shift down",
    }
}

/// Escape text for embedding in an AppleScript string literal
fn escape_text(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
