use std::process;

use actpack_cli::commands::{self, Cli};
use clap::Parser;
use colored::Colorize;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = commands::run(cli) {
        eprintln!("{} {e:?}", "error:".red().bold());
        process::exit(1);
    }
}
