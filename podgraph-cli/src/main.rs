mod cli;
mod commands;
mod config;
mod error;
mod input;

use clap::Parser;
use cli::{Cli, Commands};
use commands::apply::ApplyArgs;
use error::exit_with_error;

fn color_enabled(cli: &Cli) -> bool {
    !cli.no_color && std::env::var_os("NO_COLOR").is_none()
}

/// Logs go to stderr and stay off unless `--verbose` is given.
///
/// `apply` prints the change report as JSON on stdout for piping into other
/// tools, so an inherited `RUST_LOG` only takes effect together with
/// `--verbose`.
fn init_tracing(cli: &Cli) {
    use tracing_subscriber::EnvFilter;

    let filter = match (cli.quiet, cli.verbose) {
        (false, true) => EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        _ => EnvFilter::new("off"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(color_enabled(cli))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !color_enabled(&cli) {
        colored::control::set_override(false);
    }

    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        exit_with_error(e);
    }
}

async fn run(cli: Cli) -> error::CliResult<()> {
    let config = config::load_pipeline_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Apply {
            request,
            query_fixtures,
            refs_root,
            slice_schemas,
            show_records,
        } => {
            let args = ApplyArgs {
                request: &request,
                query_fixtures: query_fixtures.as_deref(),
                refs_root: refs_root.as_deref(),
                slice_schemas: &slice_schemas,
                show_records,
            };
            commands::apply::run(config, args).await
        }
        Commands::Check => commands::check::run(config),
    }
}
