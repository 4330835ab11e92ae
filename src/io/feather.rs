// src/io/feather.rs
//
// Arrow IPC (feather) record streams. The stream reader handles the
// streaming IPC format, the file reader the random-access file format;
// both present the same row-at-a-time interface and pre-scan their inputs
// for totals so the pipeline can report progress.

use crate::io::{record_from_values, RecordReader, RecordWriter};
use crate::types::{Record, Value, ValueMap};
use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    LargeStringArray, StringArray, UInt16Array, UInt32Array, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::ipc::reader::{FileReader, StreamReader};
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const WRITE_BATCH_SIZE: usize = 1000;

type BatchIter = Box<dyn Iterator<Item = arrow::error::Result<RecordBatch>>>;

fn open_stream_batches(path: &Path) -> Result<BatchIter> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = StreamReader::try_new(BufReader::new(file), None)
        .with_context(|| format!("Not an Arrow IPC stream: {}", path.display()))?;
    Ok(Box::new(reader))
}

fn open_file_batches(path: &Path) -> Result<BatchIter> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = FileReader::try_new(file, None)
        .with_context(|| format!("Not an Arrow IPC file: {}", path.display()))?;
    Ok(Box::new(reader))
}

/// Walks the record batches of a list of input files as one logical stream.
struct BatchCursor {
    files: Vec<PathBuf>,
    open: fn(&Path) -> Result<BatchIter>,
    next_file: usize,
    batches: Option<BatchIter>,
    current: Option<RecordBatch>,
    row: usize,
}

impl BatchCursor {
    fn new(files: Vec<PathBuf>, open: fn(&Path) -> Result<BatchIter>) -> Self {
        Self {
            files,
            open,
            next_file: 0,
            batches: None,
            current: None,
            row: 0,
        }
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            if let Some(batch) = &self.current {
                if self.row < batch.num_rows() {
                    let record = row_to_record(batch, self.row)?;
                    self.row += 1;
                    return Ok(Some(record));
                }
                self.current = None;
            }

            if let Some(batches) = &mut self.batches {
                match batches.next() {
                    Some(batch) => {
                        self.current = Some(batch?);
                        self.row = 0;
                        continue;
                    }
                    None => self.batches = None,
                }
            }

            if self.next_file >= self.files.len() {
                return Ok(None);
            }
            let path = self.files[self.next_file].clone();
            self.next_file += 1;
            self.batches = Some((self.open)(&path)?);
        }
    }
}

/// Pre-scan all inputs, validating they open and summing their rows.
fn query_stream(files: &[PathBuf], open: fn(&Path) -> Result<BatchIter>) -> Result<usize> {
    let mut total_rows = 0;
    for path in files {
        for batch in open(path)? {
            total_rows += batch?.num_rows();
        }
    }
    Ok(total_rows)
}

pub struct FeatherStreamReader {
    total_rows: usize,
    cursor: BatchCursor,
}

impl FeatherStreamReader {
    pub fn new(files: Vec<PathBuf>) -> Result<Self> {
        let total_rows = query_stream(&files, open_stream_batches)?;
        Ok(Self {
            total_rows,
            cursor: BatchCursor::new(files, open_stream_batches),
        })
    }
}

impl RecordReader for FeatherStreamReader {
    fn total_rows(&self) -> Option<usize> {
        Some(self.total_rows)
    }

    fn read_next(&mut self) -> Result<Option<Record>> {
        self.cursor.next_record()
    }
}

pub struct FeatherFileReader {
    total_rows: usize,
    cursor: BatchCursor,
}

impl FeatherFileReader {
    pub fn new(files: Vec<PathBuf>) -> Result<Self> {
        let total_rows = query_stream(&files, open_file_batches)?;
        Ok(Self {
            total_rows,
            cursor: BatchCursor::new(files, open_file_batches),
        })
    }
}

impl RecordReader for FeatherFileReader {
    fn total_rows(&self) -> Option<usize> {
        Some(self.total_rows)
    }

    fn read_next(&mut self) -> Result<Option<Record>> {
        self.cursor.next_record()
    }
}

fn row_to_record(batch: &RecordBatch, row: usize) -> Result<Record> {
    let schema = batch.schema();
    let mut values = ValueMap::with_capacity(batch.num_columns());
    for (i, field) in schema.fields().iter().enumerate() {
        let column = batch.column(i);
        let value = if column.is_null(row) {
            Value::Null
        } else {
            read_cell(column, field.data_type(), row)
                .with_context(|| format!("Unsupported column '{}'", field.name()))?
        };
        values.insert(field.name().clone(), value);
    }
    record_from_values(values)
}

fn read_cell(column: &ArrayRef, data_type: &DataType, row: usize) -> Result<Value> {
    let any = column.as_any();
    Ok(match data_type {
        DataType::Int16 => Value::Int(any.downcast_ref::<Int16Array>().unwrap().value(row) as i64),
        DataType::Int32 => Value::Int(any.downcast_ref::<Int32Array>().unwrap().value(row) as i64),
        DataType::Int64 => Value::Int(any.downcast_ref::<Int64Array>().unwrap().value(row)),
        DataType::UInt16 => {
            Value::Int(any.downcast_ref::<UInt16Array>().unwrap().value(row) as i64)
        }
        DataType::UInt32 => {
            Value::Int(any.downcast_ref::<UInt32Array>().unwrap().value(row) as i64)
        }
        DataType::UInt64 => {
            Value::Int(any.downcast_ref::<UInt64Array>().unwrap().value(row) as i64)
        }
        DataType::Float32 => {
            Value::Float(any.downcast_ref::<Float32Array>().unwrap().value(row) as f64)
        }
        DataType::Float64 => Value::Float(any.downcast_ref::<Float64Array>().unwrap().value(row)),
        DataType::Boolean => Value::Bool(any.downcast_ref::<BooleanArray>().unwrap().value(row)),
        DataType::Utf8 => Value::Str(any.downcast_ref::<StringArray>().unwrap().value(row).into()),
        DataType::LargeUtf8 => Value::Str(
            any.downcast_ref::<LargeStringArray>()
                .unwrap()
                .value(row)
                .into(),
        ),
        other => bail!("column type {:?}", other),
    })
}

/// Streaming columnar sink. The schema is inferred from the first batch of
/// buffered records; later records are coerced to it, with unrepresentable
/// cells written as null.
pub struct FeatherStreamWriter<W: Write> {
    sink: Option<W>,
    writer: Option<StreamWriter<W>>,
    schema: Option<SchemaRef>,
    buffer: Vec<ValueMap>,
    batch_size: usize,
}

impl<W: Write> FeatherStreamWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Some(sink),
            writer: None,
            schema: None,
            buffer: Vec::new(),
            batch_size: WRITE_BATCH_SIZE,
        }
    }

    fn write_batch(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        if self.schema.is_none() {
            self.schema = Some(infer_schema(&self.buffer));
        }
        let schema = self.schema.clone().unwrap();

        if self.writer.is_none() {
            let sink = self.sink.take().expect("sink consumed once");
            self.writer = Some(StreamWriter::try_new(sink, &schema)?);
        }

        let arrays: Vec<ArrayRef> = schema
            .fields()
            .iter()
            .map(|field| build_column(field, &self.buffer))
            .collect();
        let batch = RecordBatch::try_new(schema, arrays)?;
        self.writer
            .as_mut()
            .expect("writer constructed above")
            .write(&batch)?;
        self.buffer.clear();
        Ok(())
    }
}

impl FeatherStreamWriter<File> {
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self::new(file))
    }
}

impl<W: Write> RecordWriter for FeatherStreamWriter<W> {
    fn write(&mut self, values: &ValueMap) -> Result<()> {
        self.buffer.push(values.clone());
        if self.buffer.len() >= self.batch_size {
            self.write_batch()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.write_batch()?;
        if let Some(writer) = &mut self.writer {
            writer.finish()?;
        }
        Ok(())
    }
}

fn infer_schema(rows: &[ValueMap]) -> SchemaRef {
    let columns: Vec<&String> = rows[0].keys().collect();
    let fields: Vec<Field> = columns
        .iter()
        .map(|name| {
            // First non-null value in the batch decides the column type.
            let data_type = rows
                .iter()
                .find_map(|row| match row.get(*name) {
                    Some(Value::Int(_)) => Some(DataType::Int64),
                    Some(Value::Float(_)) => Some(DataType::Float64),
                    Some(Value::Bool(_)) => Some(DataType::Boolean),
                    Some(Value::Str(_)) => Some(DataType::Utf8),
                    _ => None,
                })
                .unwrap_or(DataType::Utf8);
            Field::new(name.as_str(), data_type, true)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

fn build_column(field: &Field, rows: &[ValueMap]) -> ArrayRef {
    let cells = rows.iter().map(|row| row.get(field.name()));
    match field.data_type() {
        DataType::Int64 => {
            Arc::new(cells.map(|v| v.and_then(Value::as_i64)).collect::<Int64Array>())
        }
        DataType::Float64 => Arc::new(
            cells
                .map(|v| v.and_then(Value::as_f64))
                .collect::<Float64Array>(),
        ),
        DataType::Boolean => Arc::new(
            cells
                .map(|v| match v {
                    Some(Value::Bool(b)) => Some(*b),
                    _ => None,
                })
                .collect::<BooleanArray>(),
        ),
        _ => Arc::new(
            cells
                .map(|v| match v {
                    Some(Value::Null) | None => None,
                    Some(value) => Some(value.to_string()),
                })
                .collect::<StringArray>(),
        ),
    }
}
