use clap::Parser;

mod cli;
mod commands;

use cli::{Args, Commands};
use commands::SimulateOptions;

fn main() {
    match run() {
        Ok(code) => {
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> vfscache::Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("VFSCACHE_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Config { action } => {
            commands::handle_config_command(action)?;
            Ok(0)
        }
        Commands::Simulate {
            policy,
            capacity,
            filesystems,
            paths,
            threads,
            rounds,
            pin_every,
            json,
        } => {
            commands::run_simulation(SimulateOptions {
                policy,
                capacity,
                filesystems,
                paths,
                threads,
                rounds,
                pin_every,
                json,
            })?;
            Ok(0)
        }
    }
}
