use crate::sim_tracing;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    #[command(flatten)]
    pub hosted: HostedOptions,

    #[command(flatten)]
    pub tracing: sim_tracing::TracingOpts,
}

#[derive(Debug, clap::Args)]
pub struct HostedOptions {
    /// Exit once every mailbox is empty and the simulated interrupts have
    /// stopped, even if the config says to keep idling.
    #[arg(long)]
    pub exit_when_idle: bool,

    /// Stop after this many calls to the kernel's tick.
    #[arg(long)]
    pub max_ticks: Option<u64>,
}
