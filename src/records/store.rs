//! Flat CSV table of manufacturing records, keyed by `hw_id`.
//!
//! One row per distinct device identifier. An upsert is a full
//! read-modify-write of the table with an atomic replace at the end; the
//! store assumes single-writer usage and takes no file lock.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::ManufacturingRecord;
use crate::error::{EspvError, Result};

/// Idempotent key-based upsert store backed by a CSV file.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or update one record; returns the resulting row count.
    ///
    /// A row with a matching `hw_id` is merged field-wise (incoming fields
    /// win, untouched columns survive); otherwise a row is appended. Field
    /// names not yet in the header extend it, so later records with extra
    /// fields never lose data. An absent table file is an empty table.
    pub fn upsert(&self, record: &ManufacturingRecord) -> Result<usize> {
        let hw_id = record.hw_id().ok_or(EspvError::MissingKey)?;

        let (mut header, mut rows) = self.load()?;

        if header.is_empty() {
            header = record.field_names().map(ToString::to_string).collect();
        } else {
            for name in record.field_names() {
                if !header.iter().any(|h| h == name) {
                    header.push(name.to_string());
                }
            }
        }
        for row in &mut rows {
            row.resize(header.len(), String::new());
        }

        // hw_id is always present: the header was just extended from a
        // record that carries it.
        let key_idx = header
            .iter()
            .position(|h| h == super::KEY_FIELD)
            .ok_or(EspvError::MissingKey)?;

        match rows.iter_mut().find(|row| row[key_idx] == hw_id) {
            Some(row) => {
                debug!(hw_id = %hw_id, "Updating existing record row");
                for (idx, name) in header.iter().enumerate() {
                    if let Some(value) = record.get(name) {
                        row[idx] = value;
                    }
                }
            }
            None => {
                debug!(hw_id = %hw_id, "Appending new record row");
                rows.push(
                    header
                        .iter()
                        .map(|name| record.get(name).unwrap_or_default())
                        .collect(),
                );
            }
        }

        self.write_atomic(&header, &rows)?;
        info!(hw_id = %hw_id, rows = rows.len(), table = %self.path.display(), "Record stored");
        Ok(rows.len())
    }

    /// Current row count without modifying the table.
    pub fn row_count(&self) -> Result<usize> {
        Ok(self.load()?.1.len())
    }

    fn load(&self) -> Result<(Vec<String>, Vec<Vec<String>>)> {
        if !self.path.exists() {
            return Ok((Vec::new(), Vec::new()));
        }

        let file = File::open(&self.path).map_err(|e| EspvError::from_io(e, &self.path))?;
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| self.map_csv(e))?
            .iter()
            .map(ToString::to_string)
            .collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let row = result.map_err(|e| self.map_csv(e))?;
            rows.push(row.iter().map(ToString::to_string).collect());
        }
        Ok((header, rows))
    }

    fn write_atomic(&self, header: &[String], rows: &[Vec<String>]) -> Result<()> {
        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut temp = tempfile::NamedTempFile::new_in(parent.unwrap_or_else(|| Path::new(".")))
            .map_err(|e| EspvError::from_io(e, &self.path))?;

        {
            let mut writer = csv::Writer::from_writer(temp.as_file_mut());
            writer
                .write_record(header)
                .map_err(|e| self.map_csv(e))?;
            for row in rows {
                writer.write_record(row).map_err(|e| self.map_csv(e))?;
            }
            writer.flush()?;
        }

        temp.persist(&self.path)
            .map_err(|e| EspvError::from_io(e.error, &self.path))?;
        Ok(())
    }

    fn map_csv(&self, err: csv::Error) -> EspvError {
        match err.into_kind() {
            csv::ErrorKind::Io(io) => EspvError::from_io(io, &self.path),
            other => EspvError::Other(format!("{}: {other:?}", self.path.display())),
        }
    }
}
