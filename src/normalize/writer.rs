use crate::normalize::types::NormalizedRow;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Destination for normalized rows
pub trait RowSink {
    fn write_rows(&mut self, rows: Vec<NormalizedRow>) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// Writes rows to one JSON Lines file per table, `<table>.jsonl`
pub struct TableWriter {
    output_dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl TableWriter {
    /// Create a writer for `output_dir`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

        Ok(TableWriter {
            output_dir,
            writers: HashMap::new(),
        })
    }

    /// Tables written so far
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.writers.keys().map(String::as_str)
    }
}

impl RowSink for TableWriter {
    fn write_rows(&mut self, rows: Vec<NormalizedRow>) -> Result<()> {
        for row in rows {
            let writer = match self.writers.entry(row.table.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let path = self.output_dir.join(format!("{}.jsonl", row.table));
                    let file = std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)
                        .with_context(|| format!("Failed to open file: {}", path.display()))?;
                    entry.insert(BufWriter::new(file))
                }
            };

            let json = serde_json::to_string(&row.data)
                .context("Failed to serialize row")?;
            writeln!(writer, "{}", json)
                .context("Failed to write row")?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush().context("Failed to flush writer")?;
        }
        Ok(())
    }
}

/// Writes all rows to a single stream, tagged with their table
pub struct StreamWriter<W: Write> {
    writer: W,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(writer: W) -> Self {
        StreamWriter { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RowSink for StreamWriter<W> {
    fn write_rows(&mut self, rows: Vec<NormalizedRow>) -> Result<()> {
        for row in rows {
            let parent_table = row.parent_table().map(str::to_string);
            let mut data = row.data;

            data.insert("_table".to_string(), Value::String(row.table));
            if let Some(parent_table) = parent_table {
                data.insert("_parent_table".to_string(), Value::String(parent_table));
            }

            let json = serde_json::to_string(&data)
                .context("Failed to serialize row")?;
            writeln!(self.writer, "{}", json)
                .context("Failed to write row")?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush writer")
    }
}
