use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sandstone::compile::Backend;
use sandstone::sbpl::Parameters;

use crate::version::version_long;

#[derive(Parser, Debug)]
#[command(name = "sandtool")]
#[command(version = version_long())]
#[command(about = "Compile, dissect and evaluate sandbox profiles")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile an SBPL profile to bytecode
    Compile {
        /// Profile source, or "-" for stdin
        file: PathBuf,
        /// Write the bytecode here instead of printing a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Parameter substituted for (param "NAME")
        #[arg(long = "param", value_name = "NAME=VALUE", value_parser = Parameters::parse_assignment)]
        params: Vec<(String, String)>,
        /// Compiler backend: builtin or native (macOS only)
        #[arg(long)]
        backend: Option<Backend>,
        /// Print a hex dump of the bytecode even when writing to a file
        #[arg(long)]
        hex: bool,
        /// Operation table file (one name per line)
        #[arg(long, value_name = "TABLE")]
        operations: Option<PathBuf>,
    },

    /// Check an SBPL profile without compiling it
    Validate {
        file: PathBuf,
        #[arg(long)]
        json: bool,
        #[arg(long = "param", value_name = "NAME=VALUE", value_parser = Parameters::parse_assignment)]
        params: Vec<(String, String)>,
        #[arg(long, value_name = "TABLE")]
        operations: Option<PathBuf>,
    },

    /// Dissect compiled bytecode into its sections
    Inspect {
        file: PathBuf,
        #[arg(long)]
        json: bool,
        #[arg(long, value_name = "TABLE")]
        operations: Option<PathBuf>,
    },

    /// Hex dump a file
    Hex {
        file: PathBuf,
        /// Bytes per line
        #[arg(long, default_value_t = 16)]
        width: usize,
    },

    /// Evaluate an access request against a profile (source or bytecode)
    Check {
        file: PathBuf,
        /// Operation name, e.g. file-read-data
        #[arg(long)]
        operation: String,
        /// Path, name or host:port the filters are tested against
        #[arg(long)]
        argument: Option<String>,
        /// Entitlement held by the caller
        #[arg(long = "entitlement", value_name = "KEY")]
        entitlements: Vec<String>,
        /// Profile index or name within a collection
        #[arg(long, default_value = "0")]
        profile: String,
        /// Compile parameter, also used to expand ${NAME} path prefixes
        #[arg(long = "param", value_name = "NAME=VALUE", value_parser = Parameters::parse_assignment)]
        params: Vec<(String, String)>,
        #[arg(long)]
        json: bool,
        #[arg(long, value_name = "TABLE")]
        operations: Option<PathBuf>,
    },

    /// List the operation table
    Operations {
        #[arg(long)]
        json: bool,
        #[arg(long, value_name = "TABLE")]
        operations: Option<PathBuf>,
    },
}
