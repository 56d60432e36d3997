use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

use crate::models::{ExplorationRecord, RunMetadata};

/// Errors that can occur while persisting search results
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Structured document for one search run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    pub metadata: RunMetadata,
    pub records: Vec<ExplorationRecord>,
}

/// Write `value` as pretty JSON, creating parent directories
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ReportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn write_report<P: AsRef<Path>>(path: P, report: &JsonReport) -> Result<(), ReportError> {
    let path = path.as_ref();
    write_json(path, report)?;
    tracing::info!(
        "Wrote {} records to {}",
        report.records.len(),
        path.display()
    );
    Ok(())
}

pub fn read_report<P: AsRef<Path>>(path: P) -> Result<JsonReport, ReportError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Persist a single flagged case on its own
pub fn write_first_case<P: AsRef<Path>>(
    path: P,
    record: &ExplorationRecord,
) -> Result<(), ReportError> {
    let path = path.as_ref();
    write_json(path, record)?;
    tracing::info!("Wrote first beneficial case to {}", path.display());
    Ok(())
}
