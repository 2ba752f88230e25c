//! CSV-backed stream. First row is a header; `_i` is an ordinary column.
//! Reading and writing go through the `csv` crate (`Trim::All`, flexible
//! field counts) so embedded newlines and quoting behave like any other
//! CSV consumer in the pack.
//!
//! The `csv` crate is synchronous; each operation runs inside
//! `spawn_blocking` so it never stalls the executor.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rde_core::{Record, RdeError};
use serde_json::{Map, Value};

use crate::stream::{seal_marker_bytes, Stream, StreamReader, StreamState, StreamWriter};

pub struct CsvStream {
    path: PathBuf,
}

impl CsvStream {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn done_path(&self) -> PathBuf {
        let mut p = self.path.clone().into_os_string();
        p.push(".done");
        PathBuf::from(p)
    }

    fn io_err(&self, source: std::io::Error) -> RdeError {
        RdeError::IoFailure {
            uri: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl Stream for CsvStream {
    async fn record_count(&self) -> rde_core::Result<i64> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || count_rows(&path))
            .await
            .map_err(|e| RdeError::Other(anyhow::anyhow!(e)))?
    }

    async fn is_sealed(&self) -> rde_core::Result<bool> {
        Ok(self.done_path().exists())
    }

    async fn unseal(&self) -> rde_core::Result<()> {
        let done = self.done_path();
        if done.exists() {
            tokio::fs::remove_file(&done).await.map_err(|e| self.io_err(e))?;
        }
        Ok(())
    }

    async fn clear(&self) -> rde_core::Result<()> {
        if self.path.exists() {
            tokio::fs::remove_file(&self.path).await.map_err(|e| self.io_err(e))?;
        }
        self.unseal().await
    }

    async fn state(&self) -> rde_core::Result<StreamState> {
        if self.is_sealed().await? {
            Ok(StreamState::Sealed)
        } else if self.path.exists() {
            Ok(StreamState::Open)
        } else {
            Ok(StreamState::Unopened)
        }
    }

    async fn get_reader(&self, offset: i64) -> rde_core::Result<Box<dyn StreamReader>> {
        Ok(Box::new(CsvReader {
            path: self.path.clone(),
            next_offset: offset,
        }))
    }

    async fn get_writer(&self) -> rde_core::Result<Box<dyn StreamWriter>> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await.map_err(|e| self.io_err(e))?;
            }
        }
        let written = self.record_count().await?;
        Ok(Box::new(CsvWriter {
            path: self.path.clone(),
            done_path: self.done_path(),
            header_written: self.path.exists() && self.path.metadata().map(|m| m.len() > 0).unwrap_or(false),
            written,
        }))
    }
}

fn count_rows(path: &Path) -> rde_core::Result<i64> {
    if !path.exists() {
        return Ok(0);
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| RdeError::Other(anyhow::anyhow!(e)))?;
    Ok(reader.records().count() as i64)
}

struct CsvReader {
    path: PathBuf,
    next_offset: i64,
}

#[async_trait]
impl StreamReader for CsvReader {
    async fn read(
        &mut self,
        batch_size: usize,
        _timeout: Option<Duration>,
    ) -> rde_core::Result<Vec<Record>> {
        let path = self.path.clone();
        let skip = self.next_offset;
        let (records, next) = tokio::task::spawn_blocking(move || read_rows(&path, skip, batch_size))
            .await
            .map_err(|e| RdeError::Other(anyhow::anyhow!(e)))??;
        self.next_offset = next;
        Ok(records)
    }
}

fn read_rows(
    path: &Path,
    offset: i64,
    batch_size: usize,
) -> rde_core::Result<(Vec<Record>, i64)> {
    if !path.exists() {
        return Ok((Vec::new(), offset));
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| RdeError::Other(anyhow::anyhow!(e)))?;
    let headers = reader.headers().map_err(|e| RdeError::Other(anyhow::anyhow!(e)))?.clone();

    let mut out = Vec::with_capacity(batch_size);
    let mut first = true;
    for (row_idx, result) in reader.records().enumerate() {
        if (row_idx as i64) < offset {
            continue;
        }
        let row = result.map_err(|e| RdeError::Other(anyhow::anyhow!(e)))?;
        let mut fields = Map::new();
        for (key, value) in headers.iter().zip(row.iter()) {
            fields.insert(key.to_string(), csv_value(value));
        }
        let record = Record::from_boxed(fields)
            .ok_or_else(|| RdeError::Other(anyhow::anyhow!("CSV row missing _i column")))?;
        if first {
            if record.index() != offset {
                return Err(RdeError::CheckpointMismatch {
                    node_id: path.display().to_string(),
                    expected: offset,
                    found: record.index(),
                });
            }
            first = false;
        }
        out.push(record);
        if out.len() >= batch_size {
            let next = out.last().unwrap().index() + 1;
            return Ok((out, next));
        }
    }
    let next = out.last().map(|r| r.index() + 1).unwrap_or(offset);
    Ok((out, next))
}

fn csv_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        Value::from(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::from(f)
    } else if raw == "true" || raw == "false" {
        Value::from(raw == "true")
    } else {
        Value::from(raw)
    }
}

struct CsvWriter {
    path: PathBuf,
    done_path: PathBuf,
    header_written: bool,
    written: i64,
}

#[async_trait]
impl StreamWriter for CsvWriter {
    async fn write(&mut self, records: Vec<Record>) -> rde_core::Result<()> {
        let path = self.path.clone();
        let header_written = self.header_written;
        self.written += records.len() as i64;
        let written = tokio::task::spawn_blocking(move || write_rows(&path, header_written, records))
            .await
            .map_err(|e| RdeError::Other(anyhow::anyhow!(e)))??;
        self.header_written = written;
        Ok(())
    }

    async fn flush(&mut self) -> rde_core::Result<()> {
        // Each `write` call already opens, appends, and flushes the
        // underlying file synchronously; nothing buffered to sync here.
        Ok(())
    }

    async fn close(&mut self) -> rde_core::Result<()> {
        let marker = seal_marker_bytes(self.written)?;
        tokio::fs::write(&self.done_path, marker).await.map_err(|e| RdeError::IoFailure {
            uri: self.done_path.display().to_string(),
            source: e,
        })
    }
}

fn write_rows(path: &Path, header_written: bool, records: Vec<Record>) -> rde_core::Result<bool> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(|e| RdeError::IoFailure {
                uri: path.display().to_string(),
                source: e,
            })?;
        }
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| RdeError::IoFailure { uri: path.display().to_string(), source: e })?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    let mut header_written = header_written;
    for record in &records {
        let fields = record.as_boxed();
        if !header_written {
            let header: Vec<&str> = fields.keys().map(String::as_str).collect();
            writer.write_record(&header).map_err(|e| RdeError::Other(anyhow::anyhow!(e)))?;
            header_written = true;
        }
        let row: Vec<String> = fields.values().map(value_to_csv).collect();
        writer.write_record(&row).map_err(|e| RdeError::Other(anyhow::anyhow!(e)))?;
    }
    writer.flush().map_err(|e| RdeError::IoFailure { uri: path.display().to_string(), source: e })?;
    Ok(header_written)
}

fn value_to_csv(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
