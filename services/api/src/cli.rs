use crate::demo::{run_demo, run_sweep, DemoArgs, SweepArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use coi_engine::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "COI Compliance Engine",
    about = "Track certificates of insurance for managed buildings from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service and background expiry jobs (default command)
    Serve(ServeArgs),
    /// Run one expiration sweep and reminder tick over seeded certificates
    Sweep(SweepArgs),
    /// Walk through submission, review, expiry, and audit export end to end
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Sweep(args) => run_sweep(args),
        Command::Demo(args) => run_demo(args),
    }
}
