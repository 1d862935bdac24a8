//! Config file parsing and sanitization

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::defaults::BuiltinDefaults;

/// Config file searched for in the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "dripfeed.toml";

/// Singleton marker file name, placed under the OS temp directory
pub const DEFAULT_MARKER_FILE: &str = "dripfeed.pid";

/// Daemon log file name, placed under the OS temp directory
pub const DEFAULT_LOG_FILE: &str = "dripfeed.log";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),
}

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Loaded and parsed from this file
    File(PathBuf),
    /// Built-in defaults (file missing or unusable)
    Builtin,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Builtin => write!(f, "builtin defaults"),
        }
    }
}

/// One configured unit of work: a command string, a repeat count, and the
/// interval between repeats. Order in the job list is execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Text injected into the target application's input surface
    pub command: String,

    /// Seconds between two repeats of this job (0 = back to back)
    pub interval_seconds: f64,

    /// How many times the command is delivered (at least 1)
    pub max_repeats: u32,
}

impl JobSpec {
    /// Interval as a [`Duration`]
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_seconds)
    }
}

/// Delay tunables consumed by the delivery backend, in fractional seconds
#[derive(Debug, Clone, PartialEq)]
pub struct DelayProfile {
    /// Wait after activating the target application
    pub activation_delay: f64,

    /// Wait after the open-input keystrokes, before focusing
    pub keystroke_delay: f64,

    /// Wait after typing and between the two submit keypresses
    pub confirm_delay: f64,

    /// Wait after the final submit, before the call returns
    pub settle_delay: f64,

    /// Wait after clicking into the input field
    pub focus_click_delay: f64,
}

impl DelayProfile {
    pub fn activation(&self) -> Duration {
        Duration::from_secs_f64(self.activation_delay)
    }

    pub fn keystroke(&self) -> Duration {
        Duration::from_secs_f64(self.keystroke_delay)
    }

    pub fn confirm(&self) -> Duration {
        Duration::from_secs_f64(self.confirm_delay)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs_f64(self.settle_delay)
    }

    pub fn focus_click(&self) -> Duration {
        Duration::from_secs_f64(self.focus_click_delay)
    }
}

/// Fixed controller delays. Not part of the config file schema; tests
/// shrink them to milliseconds so loop-timing properties stay checkable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    /// Settle after the one-time input-surface prime
    pub settle_after_prime: Duration,

    /// Delay between two consecutive jobs
    pub between_jobs: Duration,

    /// Backoff after an unexpected error inside the job loop
    pub error_backoff: Duration,

    /// Settle after terminating conflicting instances
    pub post_terminate_settle: Duration,

    /// How long to wait for a graceful exit before force-killing
    pub terminate_wait: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            settle_after_prime: Duration::from_secs(3),
            between_jobs: Duration::from_secs(3),
            error_backoff: Duration::from_secs(5),
            post_terminate_settle: Duration::from_secs(2),
            terminate_wait: Duration::from_secs(5),
        }
    }
}

/// Everything one run needs, loaded once at startup and passed by
/// reference; never mutated afterward.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfiguration {
    /// Name of the application whose input surface receives the commands
    pub target_app: String,

    /// Ordered job list; never empty (sanitization guarantees a fallback)
    pub jobs: Vec<JobSpec>,

    /// Delay tunables for the delivery backend
    pub delays: DelayProfile,

    /// Whether the backend searches for a focusable input element before
    /// falling back to a coordinate click
    pub focus_assist: bool,

    /// Screen coordinates for the fallback focus click
    pub fallback_click: (i32, i32),

    /// Keyboard shortcut that opens the input surface, e.g. "Cmd+L"
    pub fallback_shortcut: String,

    /// Singleton marker location
    pub marker_path: PathBuf,

    /// Daemon log location (also read by `--status`)
    pub log_path: PathBuf,

    /// Fixed controller delays
    pub pacing: Pacing,
}

/// Raw deserialization target for the config file. All keys optional;
/// the legacy top-level single-job keys coexist with `[[jobs]]`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    target_app: Option<String>,
    activation_delay: Option<f64>,
    keystroke_delay: Option<f64>,
    confirm_delay: Option<f64>,
    settle_delay: Option<f64>,
    focus_click_delay: Option<f64>,
    focus_assist: Option<bool>,
    fallback_click: Option<[i32; 2]>,
    fallback_shortcut: Option<String>,
    jobs: Option<Vec<RawJob>>,
    // legacy single-job shape
    command: Option<String>,
    interval: Option<f64>,
    max_count: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawJob {
    command: Option<String>,
    interval: Option<f64>,
    max_count: Option<u32>,
}

impl RunConfiguration {
    /// Built-in defaults, including the single fallback job
    pub fn builtin() -> Self {
        let defaults = BuiltinDefaults::default();
        let job = defaults.default_job();
        Self::from_parts(defaults, vec![job])
    }

    /// Load the configuration, falling back to built-in defaults on any
    /// failure. Returns the configuration together with its source.
    pub fn load(explicit: Option<&Path>) -> (Self, ConfigSource) {
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) => {
                if explicit.is_some() {
                    eprintln!(
                        "warning: cannot read {} ({}), using builtin defaults",
                        path.display(),
                        err
                    );
                }
                return (Self::builtin(), ConfigSource::Builtin);
            }
        };

        match Self::from_toml_str(&contents) {
            Ok(config) => (config, ConfigSource::File(path)),
            Err(err) => {
                eprintln!(
                    "warning: {} is not a usable config ({}), using builtin defaults",
                    path.display(),
                    err
                );
                (Self::builtin(), ConfigSource::Builtin)
            }
        }
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawConfig) -> Self {
        let defaults = BuiltinDefaults::default();

        let raw_jobs = match raw.jobs {
            Some(jobs) if !jobs.is_empty() => jobs,
            _ => {
                // Legacy shape: top-level command/interval/max_count
                if raw.command.is_some() || raw.interval.is_some() || raw.max_count.is_some() {
                    vec![RawJob {
                        command: raw.command,
                        interval: raw.interval,
                        max_count: raw.max_count,
                    }]
                } else {
                    Vec::new()
                }
            }
        };

        let mut jobs = sanitize_jobs(raw_jobs, &defaults);
        if jobs.is_empty() {
            eprintln!("warning: no usable jobs configured, using the default job");
            jobs.push(defaults.default_job());
        }

        let mut config = Self::from_parts(defaults, jobs);
        let d = config.delays.clone();

        if let Some(app) = raw.target_app {
            if app.trim().is_empty() {
                eprintln!("warning: empty target_app, keeping {}", config.target_app);
            } else {
                config.target_app = app;
            }
        }
        config.delays = DelayProfile {
            activation_delay: clamp_delay(
                "activation_delay",
                raw.activation_delay,
                d.activation_delay,
            ),
            keystroke_delay: clamp_delay("keystroke_delay", raw.keystroke_delay, d.keystroke_delay),
            confirm_delay: clamp_delay("confirm_delay", raw.confirm_delay, d.confirm_delay),
            settle_delay: clamp_delay("settle_delay", raw.settle_delay, d.settle_delay),
            focus_click_delay: clamp_delay(
                "focus_click_delay",
                raw.focus_click_delay,
                d.focus_click_delay,
            ),
        };
        if let Some(assist) = raw.focus_assist {
            config.focus_assist = assist;
        }
        if let Some([x, y]) = raw.fallback_click {
            config.fallback_click = (x, y);
        }
        if let Some(shortcut) = raw.fallback_shortcut {
            config.fallback_shortcut = shortcut;
        }

        config
    }

    fn from_parts(defaults: BuiltinDefaults, jobs: Vec<JobSpec>) -> Self {
        Self {
            target_app: defaults.target_app,
            jobs,
            delays: DelayProfile {
                activation_delay: defaults.activation_delay,
                keystroke_delay: defaults.keystroke_delay,
                confirm_delay: defaults.confirm_delay,
                settle_delay: defaults.settle_delay,
                focus_click_delay: defaults.focus_click_delay,
            },
            focus_assist: defaults.focus_assist,
            fallback_click: defaults.fallback_click,
            fallback_shortcut: defaults.fallback_shortcut,
            marker_path: env::temp_dir().join(DEFAULT_MARKER_FILE),
            log_path: env::temp_dir().join(DEFAULT_LOG_FILE),
            pacing: Pacing::default(),
        }
    }
}

fn sanitize_jobs(raw_jobs: Vec<RawJob>, defaults: &BuiltinDefaults) -> Vec<JobSpec> {
    let mut jobs = Vec::new();
    for (index, raw) in raw_jobs.into_iter().enumerate() {
        let command = match raw.command {
            Some(command) if !command.trim().is_empty() => command,
            _ => {
                eprintln!("warning: job {} has no command, dropped", index + 1);
                continue;
            }
        };

        // Rejects negative, non-finite, and values past Duration's range
        let mut interval = raw.interval.unwrap_or(defaults.interval_seconds);
        if Duration::try_from_secs_f64(interval).is_err() {
            eprintln!(
                "warning: job {} interval {} clamped to 0",
                index + 1,
                interval
            );
            interval = 0.0;
        }

        let max_repeats = match raw.max_count {
            Some(0) => {
                eprintln!("warning: job {} max_count 0 raised to 1", index + 1);
                1
            }
            Some(count) => count,
            None => defaults.max_repeats,
        };

        jobs.push(JobSpec {
            command,
            interval_seconds: interval,
            max_repeats,
        });
    }
    jobs
}

fn clamp_delay(name: &str, value: Option<f64>, fallback: f64) -> f64 {
    match value {
        None => fallback,
        Some(v) if Duration::try_from_secs_f64(v).is_ok() => v,
        Some(v) => {
            eprintln!("warning: {name} {v} clamped to 0");
            0.0
        }
    }
}
