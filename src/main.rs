//! dripfeed CLI
//!
//! Entry point for the `dripfeed` command-line tool. A plain invocation
//! runs the job schedule in the foreground; `-d` detaches first and logs
//! to a file. `--stop` and `--status` act on a separately running
//! instance and return immediately.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use dripfeed::config::{ConfigSource, RunConfiguration};
use dripfeed::daemon::{self, Detached};
use dripfeed::delivery;
use dripfeed::logsink::{ConsoleSink, FileSink, LogSink, STATUS_TAIL_LINES};
use dripfeed::registry::{
    ProcessRegistry, StatusReport, StopOutcome, TerminateOutcome, DEFAULT_IDENTITY,
};
use dripfeed::run::RunController;
use dripfeed::signal::SignalHandler;

#[derive(Parser)]
#[command(name = "dripfeed")]
#[command(about = "Run a scheduled list of commands against a desktop app's chat input", version)]
struct Cli {
    /// Detach from the terminal and run in the background
    #[arg(short = 'd', long)]
    daemon: bool,

    /// Ask a running instance to stop, then return
    #[arg(long, conflicts_with = "status")]
    stop: bool,

    /// Report whether an instance is running, with process metrics
    #[arg(long)]
    status: bool,

    /// Path to the job configuration file
    #[arg(short = 'c', long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit --stop/--status results as JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    let (config, source) = RunConfiguration::load(cli.config.as_deref());
    let registry = ProcessRegistry::new(config.marker_path.clone(), DEFAULT_IDENTITY);

    if cli.stop {
        run_stop(&config, &registry, cli.json);
    } else if cli.status {
        run_status(&config, &registry, cli.json);
    } else {
        run_schedule(&config, &source, registry, cli.daemon);
    }
}

/// Handle `--stop`: signal the instance the marker points at.
///
/// Every outcome exits zero; "nothing to stop" is a report, not a
/// failure.
fn run_stop(config: &RunConfiguration, registry: &ProcessRegistry, json: bool) {
    let outcome = registry.stop_running_instance(config.pacing.terminate_wait);

    if json {
        match serde_json::to_string_pretty(&outcome) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                eprintln!("Error serializing stop outcome: {e}");
                process::exit(1);
            }
        }
        return;
    }

    match outcome {
        StopOutcome::NotRunning => println!("No running instance found."),
        StopOutcome::Stopped { pid, outcome } => match outcome {
            TerminateOutcome::Graceful => println!("Stopped instance (PID {pid})."),
            TerminateOutcome::Forced => {
                println!("Instance (PID {pid}) did not stop in time; killed.")
            }
            TerminateOutcome::AlreadyGone => {
                println!("Instance (PID {pid}) exited before it could be signaled.")
            }
        },
        StopOutcome::NotOurs { pid } => println!(
            "Marker points at PID {pid}, which is not a {DEFAULT_IDENTITY} process; leaving it."
        ),
        StopOutcome::StaleCleared { pid } => {
            println!("Instance (PID {pid}) already gone; cleared stale marker.")
        }
    }
}

/// Handle `--status`: report on the instance the marker points at.
fn run_status(config: &RunConfiguration, registry: &ProcessRegistry, json: bool) {
    let report = registry.query_status(&config.log_path, STATUS_TAIL_LINES);

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                eprintln!("Error serializing status report: {e}");
                process::exit(1);
            }
        }
        return;
    }

    match report {
        StatusReport::NotRunning => println!("Not running."),
        StatusReport::StaleCleared { pid } => {
            println!("Not running (cleared stale marker for PID {pid}).")
        }
        StatusReport::Running(instance) => {
            println!("Running (PID {}).", instance.pid);
            println!("  Process: {}", instance.name);
            if let Some(started) = &instance.started_at {
                println!("  Started: {started}");
            }
            println!("  CPU:     {:.1}%", instance.cpu_percent);
            println!(
                "  Memory:  {:.1} MB",
                instance.memory_bytes as f64 / (1024.0 * 1024.0)
            );
            if !instance.log_tail.is_empty() {
                println!("  Recent log:");
                for line in &instance.log_tail {
                    println!("    {line}");
                }
            }
        }
    }
}

/// Run the job schedule, optionally detached.
///
/// Detach happens before the signal handler goes in; the handler's
/// watcher thread would not survive the fork.
fn run_schedule(
    config: &RunConfiguration,
    source: &ConfigSource,
    registry: ProcessRegistry,
    daemon: bool,
) {
    if daemon {
        match daemon::detach(daemon::select_strategy(), &config.log_path) {
            Ok(Detached::Parent) => {
                println!("Started in background; logging to {}", config.log_path.display());
                return;
            }
            Ok(Detached::Child) => {}
            Err(e) => {
                eprintln!("Error detaching: {e}");
                process::exit(1);
            }
        }
    }

    let handler = SignalHandler::new();
    if let Err(e) = handler.install() {
        eprintln!("Error installing signal handler: {e}");
        process::exit(1);
    }

    let mut sink: Box<dyn LogSink> = if daemon {
        Box::new(FileSink::new(config.log_path.clone()))
    } else {
        Box::new(ConsoleSink)
    };
    let _ = sink.line(&format!("Configuration: {source}"));

    let backend = delivery::select_backend(config);
    let mut controller =
        RunController::new(config, registry, backend, handler.token(), sink, daemon);
    controller.execute();
}
