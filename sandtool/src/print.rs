//! Human-readable bytecode printer for `sandtool inspect`.

use std::fmt::Write;

use sandstone::bytecode::{Bytecode, BytecodeItem, NamedOperation};

/// Format dissected bytecode as a section-by-section summary.
pub fn print_bytecode(bytecode: &Bytecode) -> String {
    let header = &bytecode.wrapper.header;
    let mut out = String::new();
    let _ = writeln!(out, "Kind: {:?}", header.kind);
    let _ = writeln!(
        out,
        "Operations: {}  Nodes: {}  Blocks: {}",
        header.operation_count, header.node_count, header.block_count
    );

    for (title, items) in bytecode.sections() {
        if items.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{title} ({}):", items.len());
        for item in items {
            let _ = writeln!(out, "  {item}");
            if let BytecodeItem::Profile { operations, .. } = item {
                print_profile_operations(&mut out, operations);
            }
        }
    }
    out
}

/// List the operations whose entry differs from the `default` slot.
fn print_profile_operations(out: &mut String, operations: &[NamedOperation]) {
    let Some(default) = operations.first() else {
        return;
    };
    let _ = writeln!(out, "    {} -> node {}", default.name, default.entry);
    let mut inherited = 0;
    for op in &operations[1..] {
        if op.entry == default.entry {
            inherited += 1;
        } else {
            let _ = writeln!(out, "    {} -> node {}", op.name, op.entry);
        }
    }
    if inherited > 0 {
        let _ = writeln!(out, "    ({inherited} operations share the default entry)");
    }
}
