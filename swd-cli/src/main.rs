//! SWD CLI - Command line tool for soil water deficit series and their
//! weekly and multi-scale aggregations.

use clap::{error::ErrorKind, Parser};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "swd",
    version,
    about = "Soil water deficit balance and multi-scale aggregation toolkit"
)]
struct Cli {
    /// JSON configuration file (flags override its values)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: swd_cmd::Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    swd_cmd::run(cli.command, cli.config.as_deref()).await
}
