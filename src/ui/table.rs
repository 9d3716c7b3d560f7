use crate::Result;
use comfy_table::Table;
use miette::IntoDiagnostic;
use std::io::Write;

/// Prints a table without the padding comfy-table leaves at line ends.
pub fn print_table(table: Table) -> Result<()> {
    let mut out = std::io::stdout().lock();
    for line in table.to_string().lines() {
        writeln!(out, "{}", line.trim_end()).into_diagnostic()?;
    }
    Ok(())
}
