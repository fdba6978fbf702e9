use std::path::Path;

use anyhow::{Context, Result};
use sandstone::compile::{Backend, CompiledProfile, PROFILE_TYPE_COLLECTION};
use sandstone::hex;
use sandstone::operations::OperationTable;
use sandstone::sbpl::Parameters;
use tracing::{Level, info, instrument};

use crate::settings::SandtoolSettings;
use crate::style;

/// Options for `sandtool compile`.
#[derive(Debug)]
pub struct CompileArgs<'a> {
    pub file: &'a Path,
    pub output: Option<&'a Path>,
    pub params: &'a [(String, String)],
    pub backend: Option<Backend>,
    pub hex: bool,
    pub operations: Option<&'a Path>,
}

#[instrument(level = Level::TRACE)]
pub fn run(args: CompileArgs<'_>) -> Result<()> {
    let settings = SandtoolSettings::load()?;
    let source = super::read_source(args.file)?;
    let out = execute(&settings, &source, &args)?;
    print!("{out}");
    Ok(())
}

/// Compile and write the result; returns what goes to stdout.
pub fn execute(settings: &SandtoolSettings, source: &str, args: &CompileArgs<'_>) -> Result<String> {
    let params = settings.parameters(args.params);
    let backend = settings.backend(args.backend);
    let table = settings.operation_table(args.operations)?;

    let profile = compile(source, &params, backend, table)
        .with_context(|| format!("failed to compile {}", args.file.display()))?;
    info!(file = %args.file.display(), %backend, len = profile.len(), "compiled profile");

    let mut stdout = String::new();
    match args.output {
        Some(path) => {
            std::fs::write(path, profile.bytecode())
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!(
                "{} {} ({} bytes, {})",
                style::err_green("wrote"),
                path.display(),
                profile.len(),
                kind_name(profile.kind()),
            );
            if args.hex {
                stdout.push_str(&hex::dump(profile.bytecode(), 16));
            }
        }
        None => stdout.push_str(&hex::dump(profile.bytecode(), 16)),
    }
    profile.release();
    Ok(stdout)
}

pub fn compile(
    source: &str,
    params: &Parameters,
    backend: Backend,
    table: OperationTable,
) -> Result<CompiledProfile> {
    let compiler = backend.compiler(table)?;
    Ok(compiler.compile(source, params)?)
}

fn kind_name(kind: u32) -> &'static str {
    if kind == PROFILE_TYPE_COLLECTION {
        "collection"
    } else {
        "single profile"
    }
}
