use std::fmt::Write;
use std::path::Path;

use anyhow::Result;
use sandstone::operations::OperationTable;
use serde_json::json;
use tracing::{Level, instrument};

use crate::settings::SandtoolSettings;
use crate::style;

/// List the active operation table with slot numbers.
#[instrument(level = Level::TRACE)]
pub fn run(json: bool, operations: Option<&Path>) -> Result<()> {
    let settings = SandtoolSettings::load()?;
    let table = settings.operation_table(operations)?;
    if json {
        let names: Vec<_> = table
            .names()
            .iter()
            .enumerate()
            .map(|(id, name)| json!({ "id": id, "name": name }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&names)?);
    } else {
        print!("{}", render(&table));
    }
    Ok(())
}

fn render(table: &OperationTable) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", style::header(&format!("{} operations", table.len())));
    for (id, name) in table.names().iter().enumerate() {
        let _ = writeln!(out, "{} {}", style::dim(&format!("{id:>4}")), name);
    }
    out
}
