use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cli;
mod cmd;
mod errors;
mod print;
mod settings;
mod style;
mod tracing_init;
mod version;

use cli::{Cli, Commands};
use cmd::check::CheckArgs;
use cmd::compile::CompileArgs;

fn main() {
    let cli = Cli::parse();
    tracing_init::init_tracing(cli.verbose);
    info!(args = ?std::env::args().collect::<Vec<_>>(), "sandtool started");

    let verbose = cli.verbose;
    if let Err(err) = run(cli) {
        error!("{err:#}");
        errors::display_error(&err, verbose);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Compile {
            file,
            output,
            params,
            backend,
            hex,
            operations,
        } => cmd::compile::run(CompileArgs {
            file: &file,
            output: output.as_deref(),
            params: &params,
            backend,
            hex,
            operations: operations.as_deref(),
        }),
        Commands::Validate {
            file,
            json,
            params,
            operations,
        } => cmd::validate::run(&file, json, &params, operations.as_deref()),
        Commands::Inspect {
            file,
            json,
            operations,
        } => cmd::inspect::run(&file, json, operations.as_deref()),
        Commands::Hex { file, width } => cmd::hex::run(&file, width),
        Commands::Check {
            file,
            operation,
            argument,
            entitlements,
            profile,
            params,
            json,
            operations,
        } => cmd::check::run(
            CheckArgs {
                file: &file,
                operation: &operation,
                argument: argument.as_deref(),
                entitlements: &entitlements,
                profile: &profile,
                params: &params,
                json,
                operations: operations.as_deref(),
            },
            cli.verbose,
        ),
        Commands::Operations { json, operations } => {
            cmd::operations::run(json, operations.as_deref())
        }
    }
}
