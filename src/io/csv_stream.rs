// src/io/csv_stream.rs
//
// Row-oriented text adapters. The reader auto-types cells the way the
// columnar inputs are typed (int, float, bool, string, empty = null); the
// writer buffers rows and flushes in batches, deriving the header from the
// first record.

use crate::io::{record_from_values, RecordReader, RecordWriter};
use crate::types::{Record, Value, ValueMap};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

const WRITE_BATCH_SIZE: usize = 1000;

pub struct CsvRecordReader {
    files: Vec<PathBuf>,
    next_file: usize,
    reader: Option<csv::Reader<File>>,
    headers: Vec<String>,
}

impl CsvRecordReader {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            next_file: 0,
            reader: None,
            headers: Vec::new(),
        }
    }
}

impl RecordReader for CsvRecordReader {
    fn total_rows(&self) -> Option<usize> {
        None
    }

    fn read_next(&mut self) -> Result<Option<Record>> {
        loop {
            if self.reader.is_none() {
                if self.next_file >= self.files.len() {
                    return Ok(None);
                }
                let path = &self.files[self.next_file];
                self.next_file += 1;
                let mut reader = csv::Reader::from_path(path)
                    .with_context(|| format!("Failed to open CSV file {}", path.display()))?;
                self.headers = reader
                    .headers()
                    .with_context(|| format!("Failed to read CSV header {}", path.display()))?
                    .iter()
                    .map(|h| h.trim().to_string())
                    .collect();
                self.reader = Some(reader);
            }

            let reader = self.reader.as_mut().expect("reader opened above");
            let mut row = csv::StringRecord::new();
            if reader.read_record(&mut row)? {
                let mut values = ValueMap::with_capacity(self.headers.len());
                for (header, cell) in self.headers.iter().zip(row.iter()) {
                    values.insert(header.clone(), parse_scalar(cell));
                }
                return Ok(Some(record_from_values(values)?));
            }
            self.reader = None;
        }
    }
}

fn parse_scalar(cell: &str) -> Value {
    let cell = cell.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(v) = cell.parse::<i64>() {
        return Value::Int(v);
    }
    if let Ok(v) = cell.parse::<f64>() {
        return Value::Float(v);
    }
    match cell {
        "true" | "True" => Value::Bool(true),
        "false" | "False" => Value::Bool(false),
        _ => Value::Str(cell.to_string()),
    }
}

pub struct CsvStreamWriter<W: Write> {
    writer: csv::Writer<W>,
    columns: Option<Vec<String>>,
    buffer: Vec<ValueMap>,
    batch_size: usize,
}

impl<W: Write> CsvStreamWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
            columns: None,
            buffer: Vec::new(),
            batch_size: WRITE_BATCH_SIZE,
        }
    }

    fn write_batch(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if self.columns.is_none() {
            let columns: Vec<String> = self.buffer[0].keys().cloned().collect();
            self.writer.write_record(&columns)?;
            self.columns = Some(columns);
        }
        let columns = self.columns.as_ref().expect("header written above");
        for row in &self.buffer {
            let fields = columns
                .iter()
                .map(|name| row.get(name).map(Value::to_string).unwrap_or_default());
            self.writer.write_record(fields)?;
        }
        self.buffer.clear();
        Ok(())
    }
}

impl CsvStreamWriter<File> {
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self::new(file))
    }
}

impl<W: Write> RecordWriter for CsvStreamWriter<W> {
    fn write(&mut self, values: &ValueMap) -> Result<()> {
        self.buffer.push(values.clone());
        if self.buffer.len() >= self.batch_size {
            self.write_batch()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.write_batch()?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalar_types() {
        assert_eq!(parse_scalar("42"), Value::Int(42));
        assert_eq!(parse_scalar("4.25"), Value::Float(4.25));
        assert_eq!(parse_scalar("True"), Value::Bool(true));
        assert_eq!(parse_scalar(""), Value::Null);
        assert_eq!(parse_scalar("worm_1"), Value::Str("worm_1".to_string()));
    }

    #[test]
    fn test_writer_header_from_first_record() {
        let mut writer = CsvStreamWriter::new(Vec::new());
        let mut row = ValueMap::new();
        row.insert("track_id".to_string(), Value::Int(1));
        row.insert("frame".to_string(), Value::Int(0));
        row.insert("x".to_string(), Value::Float(1.5));
        writer.write(&row).unwrap();

        let mut second = ValueMap::new();
        second.insert("track_id".to_string(), Value::Int(2));
        second.insert("frame".to_string(), Value::Int(0));
        second.insert("x".to_string(), Value::Null);
        writer.write(&second).unwrap();
        writer.close().unwrap();

        let bytes = writer.writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "track_id,frame,x");
        assert_eq!(lines[1], "1,0,1.5");
        assert_eq!(lines[2], "2,0,");
    }

    #[test]
    fn test_writer_buffers_until_batch() {
        let mut writer = CsvStreamWriter::new(Vec::new());
        let mut row = ValueMap::new();
        row.insert("frame".to_string(), Value::Int(0));
        writer.write(&row).unwrap();
        // Below the batch size the row stays buffered.
        assert_eq!(writer.buffer.len(), 1);
        assert!(writer.columns.is_none());
        writer.close().unwrap();
        assert!(writer.buffer.is_empty());
    }
}
