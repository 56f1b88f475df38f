use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::model::Stage;

pub mod commands;

#[derive(Parser)]
#[command(name = "ballot-pipeline")]
#[command(about = "Stage advancement engine for elections and their polls")]
#[command(long_about = "Runs the validate, mix, decrypt and tally stages of an election across all of \
                       its polls using an at-least-once task queue. Start with 'ballot-pipeline simulate' \
                       to watch an election move through every stage in memory.")]
pub struct Cli {
    /// Configuration file (defaults to ./ballot-pipeline.toml when present)
    #[arg(long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, help = "Log JSON lines to stderr instead of plain text")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Seed an in-memory election and drive it through every stage
    Simulate {
        /// Number of polls in the election
        #[arg(long, default_value = "3", help = "Polls to create")]
        polls: usize,
        /// Voters registered for each poll
        #[arg(long, default_value = "4", help = "Voters per poll")]
        voters: usize,
        /// Trustees whose keys the server holds
        #[arg(long, default_value = "1", help = "Local trustees (decrypted server-side)")]
        local_trustees: usize,
        /// Trustees that submit their own partial decryptions
        #[arg(long, default_value = "1", help = "External trustees (notified by mail)")]
        trustees: usize,
        /// Override the configured worker count
        #[arg(long, help = "Concurrent workers")]
        workers: Option<usize>,
        /// Override the configured redelivery probability
        #[arg(long, help = "Probability (0-1) that a finished task is delivered again")]
        duplicate_rate: Option<f64>,
        /// Make the poll at this index fail at --fail-stage
        #[arg(long, help = "Index of a poll whose processing should fail")]
        fail_poll: Option<usize>,
        /// Stage at which the injected failure happens
        #[arg(long, default_value = "mixed", help = "Stage at which --fail-poll fails")]
        fail_stage: Stage,
        /// Send vote receipts and reminder mail to voters
        #[arg(long, help = "Also exercise voter notifications")]
        notify: bool,
    },
    /// Print the effective configuration as TOML
    Config,
    /// List the pipeline stages in order
    Stages,
}
