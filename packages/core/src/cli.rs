use clap::Parser;

/// Load probe service CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "load-probe",
    version,
    about = "Database load probes for job admission control"
)]
pub struct Cli {
    /// Database URL (postgres://... or sqlite://...)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Port for the HTTP API
    #[arg(long)]
    pub port: Option<u16>,

    /// Capacity assumed when the active probe cannot be evaluated
    #[arg(long)]
    pub default_capacity: Option<f64>,

    /// Seconds to wait between ticks when no probe is active
    #[arg(long)]
    pub idle_interval: Option<u64>,
}
