use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chaser", about = "Due-task reminder chaser")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration file
    Validate,

    /// Run a single manual tick, then exit
    Tick,

    /// Reserve a new task row with its dimensional keys
    Reserve {
        #[arg(long)]
        list_key: String,
        #[arg(long)]
        customer_id: String,
        #[arg(long)]
        phase: String,
        #[arg(long)]
        task: String,
        #[arg(long)]
        workflow_id: String,
        #[arg(long)]
        correlation_id: Option<String>,
        #[arg(long, default_value = "UTC")]
        region: String,
        #[arg(long)]
        team_id: String,
        #[arg(long)]
        channel_id: String,
    },

    /// Link a reserved task to its system-of-record item
    Link {
        #[arg(long)]
        task_id: i64,
        #[arg(long)]
        sp_item_id: String,
    },
}
