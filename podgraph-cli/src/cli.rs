use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "podgraph", about = "Run change requests through the podgraph pipeline", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output (also respects NO_COLOR env var)
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Pipeline config file (TOML, or JSON by extension)
    #[arg(long, global = true, env = "PODGRAPH_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply a change request against in-memory backends and print its report
    Apply {
        /// Change request JSON file, or '-' for stdin
        request: PathBuf,

        /// Query responses keyed by query text: {"<query>": {"data": ..., "errors": [...]}}
        #[arg(long)]
        query_fixtures: Option<PathBuf>,

        /// Directory that file:// references are confined to
        #[arg(long)]
        refs_root: Option<PathBuf>,

        /// Slice schema JSON file registered for the request's pod (repeatable)
        #[arg(long = "slice-schema")]
        slice_schemas: Vec<PathBuf>,

        /// Print the committed records of the default backend after the report
        #[arg(long)]
        show_records: bool,
    },

    /// Validate the pipeline config and print the resolved stage order
    Check,
}
