use std::path::Path;

use anyhow::{Result, ensure};
use sandstone::hex;
use tracing::{Level, instrument};

#[instrument(level = Level::TRACE)]
pub fn run(file: &Path, width: usize) -> Result<()> {
    ensure!(width > 0, "--width must be at least 1");
    let bytes = super::read_bytes(file)?;
    print!("{}", hex::dump(&bytes, width));
    Ok(())
}
