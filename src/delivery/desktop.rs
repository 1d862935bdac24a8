//! Synthesized-input delivery for non-macOS desktops
//!
//! Drives the target through raw keyboard and mouse events. Without an
//! accessibility tree or a by-name activation API, the configured
//! fallback coordinates double as activation: clicking them raises the
//! target window so the open-input shortcut lands in it. With focus
//! assist off the backend assumes the input surface already holds
//! keyboard focus.
//!
//! An `Enigo` handle is opened per call rather than held: construction
//! needs a live display session, and a fresh handle keeps a failed call
//! from poisoning later ones.

use std::thread;
use std::time::Duration;

use enigo::{Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};

use crate::config::{DelayProfile, RunConfiguration};

use super::{DeliveryBackend, DeliveryError, Modifier, Shortcut};

/// Wait between the two open-input chords
const OPEN_INPUT_GAP: Duration = Duration::from_millis(1500);

pub struct EnigoBackend {
    delays: DelayProfile,
    focus_assist: bool,
    fallback_click: (i32, i32),
    open_input: Shortcut,
}

impl From<enigo::NewConError> for DeliveryError {
    fn from(err: enigo::NewConError) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<enigo::InputError> for DeliveryError {
    fn from(err: enigo::InputError) -> Self {
        Self::Input(err.to_string())
    }
}

impl EnigoBackend {
    pub fn new(config: &RunConfiguration) -> Self {
        Self {
            delays: config.delays.clone(),
            focus_assist: config.focus_assist,
            fallback_click: config.fallback_click,
            open_input: Shortcut::parse(&config.fallback_shortcut)
                .unwrap_or_else(Shortcut::open_input_default),
        }
    }

    fn warm_up(&self) -> Result<(), DeliveryError> {
        let mut enigo = Enigo::new(&Settings::default())?;
        self.activate(&mut enigo)?;
        self.open_surface(&mut enigo)?;
        Ok(())
    }

    fn inject(&self, command: &str) -> Result<(), DeliveryError> {
        let mut enigo = Enigo::new(&Settings::default())?;
        self.activate(&mut enigo)?;
        self.open_surface(&mut enigo)?;
        if self.focus_assist {
            self.click_input_point(&mut enigo)?;
            sleep_if_positive(self.delays.focus_click());
        }
        enigo.text(command)?;
        sleep_if_positive(self.delays.confirm());
        enigo.key(Key::Return, Direction::Click)?;
        sleep_if_positive(self.delays.confirm());
        enigo.key(Key::Return, Direction::Click)?;
        sleep_if_positive(self.delays.settle());
        Ok(())
    }

    fn activate(&self, enigo: &mut Enigo) -> Result<(), DeliveryError> {
        if self.focus_assist {
            self.click_input_point(enigo)?;
        }
        sleep_if_positive(self.delays.activation());
        Ok(())
    }

    fn open_surface(&self, enigo: &mut Enigo) -> Result<(), DeliveryError> {
        press_chord(enigo, &self.open_input)?;
        thread::sleep(OPEN_INPUT_GAP);
        press_chord(enigo, &self.open_input)?;
        sleep_if_positive(self.delays.keystroke());
        Ok(())
    }

    fn click_input_point(&self, enigo: &mut Enigo) -> Result<(), DeliveryError> {
        let (x, y) = self.fallback_click;
        enigo.move_mouse(x, y, Coordinate::Abs)?;
        enigo.button(Button::Left, Direction::Click)?;
        Ok(())
    }
}

impl DeliveryBackend for EnigoBackend {
    fn name(&self) -> &'static str {
        "enigo"
    }

    fn prime(&mut self) -> bool {
        match self.warm_up() {
            Ok(()) => true,
            Err(err) => {
                eprintln!("delivery prime failed ({}): {err}", self.name());
                false
            }
        }
    }

    fn deliver(&mut self, command: &str) -> bool {
        match self.inject(command) {
            Ok(()) => true,
            Err(err) => {
                eprintln!("delivery failed ({}): {err}", self.name());
                false
            }
        }
    }
}

/// Press the modifiers, click the key, release the modifiers. Held
/// modifiers must come back up even when the chord fails partway.
fn press_chord(enigo: &mut Enigo, shortcut: &Shortcut) -> Result<(), DeliveryError> {
    let mut held: Vec<Key> = Vec::with_capacity(shortcut.modifiers.len());
    let mut outcome = Ok(());

    for modifier in &shortcut.modifiers {
        let key = modifier_key(*modifier);
        match enigo.key(key, Direction::Press) {
            Ok(()) => held.push(key),
            Err(err) => {
                outcome = Err(err.into());
                break;
            }
        }
    }
    if outcome.is_ok() {
        if let Err(err) = enigo.key(Key::Unicode(shortcut.key), Direction::Click) {
            outcome = Err(err.into());
        }
    }
    for key in held.into_iter().rev() {
        let _ = enigo.key(key, Direction::Release);
    }

    outcome
}

fn modifier_key(modifier: Modifier) -> Key {
    match modifier {
        Modifier::Command => Key::Meta,
        Modifier::Control => Key::Control,
        Modifier::Option => Key::Alt,
        Modifier::Shift => Key::Shift,
    }
}

fn sleep_if_positive(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}
