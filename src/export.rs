use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::pipeline::AnalysisReport;

/// Write the full report as pretty-printed JSON.
pub fn export_json(report: &AnalysisReport, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create file: {}", path.display()))?;
    let writer = BufWriter::new(file);

    serde_json::to_writer_pretty(writer, report).context("Failed to write JSON")?;

    Ok(())
}
