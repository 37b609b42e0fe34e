//! JSON-lines structured-log writer.
//!
//! The core only ever hands this collaborator a `Record`; this module
//! owns the file handle and serialization.

use anyhow::Result;
use procwatch_core::Record;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

pub struct LogWriter {
    file: BufWriter<File>,
}

impl LogWriter {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: BufWriter::new(file),
        })
    }

    pub async fn write(&mut self, record: &Record) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        Ok(())
    }
}
