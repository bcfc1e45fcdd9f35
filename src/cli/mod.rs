use std::{env, path::PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand};
use procaudit_core::Pid;

#[derive(Parser, Debug, Clone)]
#[clap(name = "procaudit", version)]
#[clap(about = "Process lifecycle event monitor")]
#[clap(propagate_version = true)]
pub struct Opts {
    #[clap(subcommand)]
    pub command: Command,

    /// Pass many times for a more verbose output. Passing `-v` adds debug logs, `-vv` enables trace logging
    #[clap(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbosity: u8,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Monitor process starts and stops on this host
    Run(RunOpts),
}

#[derive(Args, Debug, Clone)]
pub struct RunOpts {
    /// Report only these processes
    #[clap(long = "pid", value_name = "PID")]
    pub pids: Vec<Pid>,

    /// Report only direct children of these processes
    #[clap(long = "ppid", value_name = "PID")]
    pub ppids: Vec<Pid>,

    /// Report only processes descending from these processes
    #[clap(long = "ancestor-pid", value_name = "PID")]
    pub ancestor_pids: Vec<Pid>,

    /// Report only processes that have these processes in their subtree
    #[clap(long = "descendant-pid", value_name = "PID")]
    pub descendant_pids: Vec<Pid>,

    /// Append events to this file, one JSON line per event
    #[clap(long, value_name = "PATH")]
    pub output_file: Option<PathBuf>,

    /// Write each event to `<PATH>/<event id>.json`
    #[clap(long, value_name = "PATH")]
    pub output_dir: Option<PathBuf>,

    /// Publish events to this AMQP broker
    #[clap(long, value_name = "URI", requires = "amqp_queue")]
    pub amqp_url: Option<String>,

    /// Durable queue to publish events to
    #[clap(long, value_name = "NAME", requires = "amqp_url")]
    pub amqp_queue: Option<String>,

    /// Snapshot interval of the polling fallback, in seconds
    #[clap(long, value_name = "SECS", default_value_t = 3)]
    pub poll_interval: u64,
}

impl Opts {
    pub fn override_log_level(&self) -> Option<log::LevelFilter> {
        match self.verbosity {
            0 => None,
            1 => Some(log::LevelFilter::Debug),
            2..=u8::MAX => Some(log::LevelFilter::Trace),
        }
    }
}

pub fn parse_from_args() -> Opts {
    Opts::parse()
}

fn show_backtrace() -> bool {
    if log::max_level() >= log::LevelFilter::Debug {
        return true;
    }

    if let Ok(true) = env::var("RUST_BACKTRACE").map(|s| s == "1") {
        return true;
    }

    false
}

pub fn report_error(e: &anyhow::Error) {
    // NB: This shows one error: even for multiple causes and backtraces etc,
    // rather than one per cause, and one for the backtrace. This seems like a
    // reasonable tradeoff, but if we want to do differently, this is the code
    // hunk to revisit, that and a similar build.rs auto-detect glue as anyhow
    // has to detect when backtrace is available.
    if show_backtrace() {
        log::error!("{:?}", e);
    } else {
        log::error!("{:#}", e);
    }
}
