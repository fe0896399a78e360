//! Append-only JSON Lines file.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::PersistenceResult;

/// One JSON object per line, opened in append mode.
///
/// Each `append` is flushed before returning so a crash loses at most the
/// line being written.
pub struct JsonLinesFile<T> {
    path: PathBuf,
    writer: BufWriter<File>,
    records_written: usize,
    _record: PhantomData<fn(T)>,
}

impl<T> JsonLinesFile<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Open (creating if needed) `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Append mode: never truncates existing data
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "Opened JSON Lines file (append mode)");

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            records_written: 0,
            _record: PhantomData,
        })
    }

    /// Every parseable record in file order.
    ///
    /// Lines that fail to parse are skipped with a warning.
    pub fn read_all(&self) -> PersistenceResult<Vec<T>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = idx + 1,
                    error = %e,
                    "Skipping unreadable JSON Lines record"
                ),
            }
        }

        debug!(path = %self.path.display(), records = records.len(), "Replayed JSON Lines file");
        Ok(records)
    }

    /// Append one record and flush it.
    pub fn append(&mut self, record: &T) -> PersistenceResult<()> {
        let json = serde_json::to_string(record)?;
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;
        self.records_written += 1;
        Ok(())
    }

    /// Replace the file's contents with `records`.
    ///
    /// Writes a sibling temp file, syncs it and renames it over the
    /// original, then reopens the append handle. A crash mid-rewrite leaves
    /// the original file intact.
    pub fn rewrite<'a, I>(&mut self, records: I) -> PersistenceResult<usize>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        self.writer.flush()?;

        let tmp_path = self.path.with_extension("jsonl.tmp");
        let mut written = 0;
        {
            let mut out = BufWriter::new(File::create(&tmp_path)?);
            for record in records {
                let json = serde_json::to_string(record)?;
                writeln!(out, "{json}")?;
                written += 1;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        info!(path = %self.path.display(), records = written, "Compacted JSON Lines file");
        Ok(written)
    }

    /// Records appended through this handle.
    pub fn records_written(&self) -> usize {
        self.records_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> Drop for JsonLinesFile<T> {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(?e, "Failed to flush JSON Lines file on drop");
        }
    }
}
