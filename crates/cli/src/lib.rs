pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use crate::commands::tools::ServerChoice;

#[derive(Debug, Parser)]
#[command(
    name = "concierge",
    about = "Concierge multi-agent assistant",
    long_about = "Ask the assistant team, run the single research agent, and inspect tool servers and configuration.",
    after_help = "Examples:\n  concierge ask \"What is the latest price of QQQM?\"\n  concierge research \"What are some upcoming events in 27502?\"\n  concierge tools stock\n  concierge config"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Default, Args)]
pub struct GlobalOptions {
    #[arg(long, global = true, help = "Config file (defaults to ./concierge.toml or ./config/concierge.toml)")]
    pub config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override logging.level")]
    pub log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    #[command(about = "Ask the assistant team; prompts for the query when none is given")]
    Ask {
        query: Option<String>,
        #[arg(long, help = "Skip the mental health screening tool server")]
        no_health_check: bool,
    },
    #[command(about = "Run the research agent against a search tool server it launches over stdio")]
    Research { query: Option<String> },
    #[command(about = "Connect to a tool server and print its tool descriptors")]
    Tools {
        #[arg(value_enum)]
        server: ServerChoice,
        #[arg(long, help = "Launch the server over stdio instead of connecting to its SSE URL")]
        stdio: bool,
    },
    #[command(about = "Print the effective configuration with secrets redacted")]
    Config,
}

pub fn execute(cli: Cli) -> commands::CommandResult {
    match cli.command {
        Command::Ask { query, no_health_check } => commands::ask::run(&cli.global, query, !no_health_check),
        Command::Research { query } => commands::research::run(&cli.global, query),
        Command::Tools { server, stdio } => commands::tools::run(&cli.global, server, stdio),
        Command::Config => commands::config::run(&cli.global),
    }
}

pub fn run() -> ExitCode {
    let result = execute(Cli::parse());

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
