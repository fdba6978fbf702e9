use std::path::Path;

use anyhow::{Context, Result};
use sandstone::bytecode::Bytecode;
use sandstone::operations::OperationTable;
use serde_json::{Map, Value, json};
use tracing::{Level, instrument};

use crate::print::print_bytecode;
use crate::settings::SandtoolSettings;

#[instrument(level = Level::TRACE)]
pub fn run(file: &Path, json: bool, operations: Option<&Path>) -> Result<()> {
    let settings = SandtoolSettings::load()?;
    let table = settings.operation_table(operations)?;
    let bytes = super::read_bytes(file)?;
    let bytecode = dissect(&bytes, &table)
        .with_context(|| format!("failed to dissect {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&to_json(&bytecode)?)?);
    } else {
        print!("{}", print_bytecode(&bytecode));
    }
    Ok(())
}

/// The header plus one array per section, keyed by section title.
pub fn to_json(bytecode: &Bytecode) -> Result<Value> {
    let mut sections = Map::new();
    for (title, items) in bytecode.sections() {
        sections.insert(title.to_string(), serde_json::to_value(items)?);
    }
    Ok(json!({
        "header": bytecode.wrapper.header,
        "sections": sections,
    }))
}

pub fn dissect(bytes: &[u8], table: &OperationTable) -> Result<Bytecode> {
    Ok(Bytecode::new(bytes, table)?)
}
