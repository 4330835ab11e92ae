// src/io/mod.rs
//
// Record stream adapters. Inputs are Arrow IPC (feather) files, streaming
// format preferred with the file format as fallback, or CSV. Outputs are a
// batched CSV stream writer and an Arrow IPC stream writer; both sinks carry
// the same logical record.

pub mod csv_stream;
pub mod feather;

use crate::types::{Record, Value, ValueMap};
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tracing::warn;

pub use csv_stream::{CsvRecordReader, CsvStreamWriter};
pub use feather::{FeatherFileReader, FeatherStreamReader, FeatherStreamWriter};

pub trait RecordReader {
    /// Total row count across all input files, when known up front.
    fn total_rows(&self) -> Option<usize>;

    /// Next record, or `None` at end of stream. A malformed row is a
    /// terminal error for the input file.
    fn read_next(&mut self) -> Result<Option<Record>>;
}

pub trait RecordWriter {
    fn write(&mut self, values: &ValueMap) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Open the input set with the preferred reader for its format.
///
/// Feather inputs first try the streaming-format reader; when that cannot
/// open the files, fall back to the batch file-format reader. The fallback
/// is logged and processing continues.
pub fn open_reader(paths: &[PathBuf]) -> Result<Box<dyn RecordReader>> {
    let first = paths
        .first()
        .ok_or_else(|| anyhow!("Missing input files"))?;

    if is_csv(first) {
        return Ok(Box::new(CsvRecordReader::new(paths.to_vec())));
    }

    match FeatherStreamReader::new(paths.to_vec()) {
        Ok(reader) => Ok(Box::new(reader)),
        Err(e) => {
            warn!(
                "Streaming reader could not open {}: {}; falling back to batch file reader",
                first.display(),
                e
            );
            Ok(Box::new(FeatherFileReader::new(paths.to_vec())?))
        }
    }
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("txt"))
        .unwrap_or(false)
}

/// Every record must expose an integer frame index.
pub(crate) fn record_from_values(values: ValueMap) -> Result<Record> {
    let frame = values
        .get("frame")
        .and_then(Value::as_i64)
        .ok_or_else(|| anyhow!("Record is missing an integer 'frame' column"))?;
    Ok(Record { frame, values })
}
