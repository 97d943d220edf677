//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow definition
    Validate {
        /// Path to the definition
        #[arg(default_value = "gantry.yaml")]
        path: PathBuf,
    },

    /// Print the concrete job DAG a trigger would run
    Plan {
        #[arg(default_value = "gantry.yaml")]
        path: PathBuf,

        #[command(flatten)]
        trigger: TriggerArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a workflow locally
    Run {
        #[arg(default_value = "gantry.yaml")]
        path: PathBuf,

        #[command(flatten)]
        trigger: TriggerArgs,

        /// Maximum concurrently running jobs
        #[arg(short, long)]
        parallelism: Option<usize>,

        /// Engine configuration file
        #[arg(long)]
        engine_config: Option<PathBuf>,
    },

    /// List the definitions in a directory that a trigger activates
    Match {
        /// Directory of definitions
        dir: PathBuf,

        #[command(flatten)]
        trigger: TriggerArgs,
    },

    /// Print the JSON schema of workflow definitions
    Schema,

    /// Manage the local cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct TriggerArgs {
    /// Event kind: push, pull_request, tag_push, manual, schedule, workflow_call
    #[arg(short, long, default_value = "push")]
    pub event: String,

    /// Branch or tag the event refers to
    #[arg(short = 'r', long = "ref", default_value = "main")]
    pub git_ref: String,

    /// The ref is a tag
    #[arg(short, long)]
    pub tag: bool,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// List cache entries
    List {
        /// Cache key prefix
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Clear cache
    Clear {
        /// Cache key prefix
        #[arg(short, long)]
        prefix: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
