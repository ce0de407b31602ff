//! Command-line interface

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::{CombineCommands, RenderCommands};

#[derive(Parser)]
#[command(name = "answer-render")]
#[command(about = "Render answer templates against tabular query results")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a template against a JSON dataset
    Render(RenderCommands),
    /// Combine named results with left-to-right arithmetic
    Combine(CombineCommands),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_render_args() {
        let cli = Cli::try_parse_from([
            "answer-render",
            "render",
            "--template",
            "{count(acct_no)}",
            "--data",
            "rows.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Render(args) => {
                assert_eq!(args.template.as_deref(), Some("{count(acct_no)}"));
                assert_eq!(args.data, PathBuf::from("rows.json"));
            }
            Commands::Combine(_) => panic!("expected render"),
        }
    }

    #[test]
    fn test_parse_combine_args() {
        let cli = Cli::try_parse_from([
            "answer-render",
            "-v",
            "combine",
            "A - B",
            "--operand",
            "A=1000000",
            "--operand",
            "B=500000",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Combine(args) => {
                assert_eq!(args.expression, "A - B");
                assert_eq!(args.operands.len(), 2);
            }
            Commands::Render(_) => panic!("expected combine"),
        }
    }

    #[test]
    fn test_template_sources_conflict() {
        let result = Cli::try_parse_from([
            "answer-render",
            "render",
            "--template",
            "x",
            "--template-file",
            "t.txt",
            "--data",
            "rows.json",
        ]);
        assert!(result.is_err());
    }
}
