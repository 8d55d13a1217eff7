// Append-only JSON-lines store, one file per query.
//
// The file is the only record of what has been collected. Every append is
// flushed to disk before it returns; readers tolerate a torn final line.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use harvest_common::{HarvestError, Record, Result};

pub struct OutputStore {
    path: PathBuf,
    file: File,
}

impl OutputStore {
    /// Open a store for appending, creating the file if absent. Existing
    /// content is never truncated or reordered; a torn final line is closed
    /// off with a newline so the next record starts on a line of its own.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let existed = path.exists();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        if existed {
            repair_torn_tail(&mut file, &path)?;
        } else {
            file.sync_all()?;
            sync_parent_dir(&path);
            debug!(path = %path.display(), "Created store");
        }

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one record as a single line and flush it to disk.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        let mut line = serde_json::to_string(record).map_err(|e| self.write_error(e.into()))?;
        line.push('\n');

        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.sync_data())
            .map_err(|e| self.write_error(e))
    }

    /// Read every persisted record from the start of the file. Each call
    /// opens a fresh handle, so iteration is restartable.
    pub fn iter(&self) -> Result<StoreIter> {
        let file = File::open(&self.path)?;
        Ok(StoreIter {
            reader: Some(BufReader::new(file)),
            line_no: 0,
            buf: Vec::new(),
        })
    }

    /// Wrap an already-open handle without the open-time checks.
    #[cfg(test)]
    pub(crate) fn from_parts(path: PathBuf, file: File) -> Self {
        Self { path, file }
    }

    fn write_error(&self, source: io::Error) -> HarvestError {
        HarvestError::StoreWrite {
            path: self.path.clone(),
            source,
        }
    }
}

/// Lazy iterator over a store's lines.
///
/// Lines that are not valid UTF-8, not valid JSON, or lack an identity yield
/// `HarvestError::CorruptLine` and iteration continues. Blank lines are skipped.
/// An I/O error ends iteration after being yielded.
pub struct StoreIter {
    reader: Option<BufReader<File>>,
    line_no: usize,
    buf: Vec<u8>,
}

impl Iterator for StoreIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reader = self.reader.as_mut()?;
            self.buf.clear();
            match reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.reader = None;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.reader = None;
                    return Some(Err(e.into()));
                }
            }
            self.line_no += 1;

            let bytes = trim_line_ending(&self.buf);
            if bytes.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(parse_line(bytes, self.line_no));
        }
    }
}

fn parse_line(bytes: &[u8], line: usize) -> Result<Record> {
    let corrupt = |reason: String| HarvestError::CorruptLine { line, reason };

    let text = std::str::from_utf8(bytes).map_err(|e| corrupt(e.to_string()))?;
    let record: Record = serde_json::from_str(text).map_err(|e| corrupt(e.to_string()))?;
    if !record.identity.is_complete() {
        return Err(corrupt("blank username or timestamp".into()));
    }
    Ok(record)
}

fn trim_line_ending(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

/// Terminate a final line that lacks its newline so the next append starts
/// on a line of its own. Existing bytes are never rewritten. A final line
/// that is a complete record (the crash hit between its bytes and the
/// newline) is kept and reads back as valid; anything shorter reads back as
/// a corrupt line.
fn repair_torn_tail(file: &mut File, path: &Path) -> io::Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        warn!(path = %path.display(), "Store ends with a torn line, closing it off");
        file.write_all(b"\n")?;
        file.sync_data()?;
    }
    Ok(())
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return;
    };
    if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
        debug!(dir = %parent.display(), error = %e, "Could not sync store directory");
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
