//! Gantry CLI entrypoint.

use clap::Parser;

mod commands;
mod config;
mod handlers;

use commands::{CacheCommands, Commands, ConfigCommands};
use config::CliConfig;
use gantry_trace::{LogFormat, TracingConfig};

#[derive(Parser)]
#[command(name = "gantry")]
#[command(author, version, about = "Gantry workflow engine", long_about = None)]
struct Cli {
    /// Log format: pretty, compact or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = CliConfig::load().unwrap_or_default();

    gantry_trace::init_tracer(&TracingConfig {
        format: cli.log_format.unwrap_or(config.log_format),
        default_filter: "warn".to_string(),
        ..TracingConfig::default()
    })?;

    let result = match cli.command {
        Commands::Validate { path } => handlers::validate(&path),
        Commands::Plan {
            path,
            trigger,
            json,
        } => handlers::plan(&config, &path, &trigger, json),
        Commands::Run {
            path,
            trigger,
            parallelism,
            engine_config,
        } => {
            handlers::run(
                &config,
                &path,
                &trigger,
                parallelism,
                engine_config.as_deref(),
            )
            .await
        }
        Commands::Match { dir, trigger } => handlers::match_definitions(&dir, &trigger),
        Commands::Schema => handlers::schema(),
        Commands::Cache { command } => match command {
            CacheCommands::List { prefix } => handlers::list_cache(&config, prefix.as_deref()).await,
            CacheCommands::Clear { prefix } => {
                handlers::clear_cache(&config, prefix.as_deref()).await
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config),
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value),
        },
    };

    gantry_trace::shutdown_tracer();
    result
}
