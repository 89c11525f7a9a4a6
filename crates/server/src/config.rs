use std::{io, sync::Arc, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{forecast::SaxForecaster, runner::Isolation, scheduler::WaitPolicy};

#[derive(Parser, Debug)]
#[command(name = "gpu-forecast-server", version, about = "SAX forecasts on a single shared accelerator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeOpts,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run a single forecast read from stdin and print the outcome (used by process isolation)
    #[command(hide = true)]
    Compute,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsolationMode {
    /// run each forecast on a blocking thread with panic containment
    Thread,
    /// run each forecast in a child process of this binary
    Process,
}

#[derive(Args, Debug, Clone)]
pub struct ServeOpts {
    /// address to bind, e.g. 127.0.0.1:7777
    #[arg(long, default_value = "127.0.0.1:7777")]
    pub bind: String,

    /// how long a call may wait for the device before giving up
    #[arg(long, default_value_t = 3600)]
    pub max_wait_secs: u64,

    /// how often a waiting call logs who holds the device
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub diagnostic_interval_secs: u64,

    /// forecast calls handled at once; the rest wait before taking a ticket
    #[arg(long, default_value_t = 16, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_concurrent_calls: u32,

    #[arg(long, value_enum, default_value_t = IsolationMode::Thread)]
    pub isolation: IsolationMode,
}

impl ServeOpts {
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            max_wait: Duration::from_secs(self.max_wait_secs),
            diagnostic_interval: Duration::from_secs(self.diagnostic_interval_secs),
        }
    }

    /// Process isolation re-runs this binary with the hidden `compute` subcommand.
    pub fn isolation(&self) -> io::Result<Isolation> {
        Ok(match self.isolation {
            IsolationMode::Thread => Isolation::Thread(Arc::new(SaxForecaster)),
            IsolationMode::Process => Isolation::Process {
                program: std::env::current_exe()?,
                args: vec!["compute".to_string()],
            },
        })
    }
}
