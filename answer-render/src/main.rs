use anyhow::Result;
use clap::Parser;
use colored::*;

use answer_render::cli::commands::{handle_combine_command, handle_render_command};
use answer_render::cli::{Cli, Commands};
use answer_render::config::Config;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("{} {:#}", "Error:".bright_red().bold(), err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Render(args) => {
            let config = Config::load(cli.config.as_deref())?;
            handle_render_command(args, &config)
        }
        Commands::Combine(args) => handle_combine_command(args),
    }
}

/// RUST_LOG wins; otherwise warnings, or debug with --verbose
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}
