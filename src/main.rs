//! # nxchat CLI

use clap::Parser;

use crate::cli::Commands;

mod cli;

#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    nxchat::init().await;

    let cli = Cli::parse();
    match &cli.command {
        Commands::Auth(cmd) => {
            cmd.exec().await;
        }
        Commands::Chat(cmd) => {
            cmd.exec().await;
        }
        Commands::Config(cmd) => {
            cmd.exec().await;
        }
        Commands::Info(cmd) => {
            cmd.exec().await;
        }
        Commands::Models(cmd) => {
            cmd.exec().await;
        }
        Commands::Usage(cmd) => {
            cmd.exec().await;
        }
    }
}
