use crate::archivist::record::{Record, is_blank, probe_record_id};
use crate::remote::media::record_media_files;
use crate::remote::{Entity, FileDescriptor};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const TAIL_BLOCK_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSource {
    Message,
    Story,
}

impl MediaSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Story => "story",
        }
    }
}

/// Called once per attachment before the line that references it is written.
pub trait MediaRequester {
    fn request_file(
        &mut self,
        entity: &Entity,
        file: &FileDescriptor,
        record_id: i64,
        source: MediaSource,
    ) -> Result<()>;
}

/// Requester that ignores every attachment.
#[derive(Debug, Default)]
pub struct NoMedia;

impl MediaRequester for NoMedia {
    fn request_file(&mut self, _: &Entity, _: &FileDescriptor, _: i64, _: MediaSource) -> Result<()> {
        Ok(())
    }
}

/// Append-only handle on one JSON-lines log.
#[derive(Debug)]
pub struct AppendLogWriter {
    path: PathBuf,
    file: File,
}

impl AppendLogWriter {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {} for append", path.display()))?;
        drop_torn_tail(&mut file, path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encode `value` as one compact line and write it with a single call.
    pub fn append<S: Serialize + ?Sized>(&mut self, value: &S) -> Result<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .with_context(|| format!("failed to append to {}", self.path.display()))
    }
}

/// A crashed writer may leave a line without `\n`. Readers never saw it,
/// so it is cut before new lines are appended after it.
fn drop_torn_tail(file: &mut File, path: &Path) -> Result<()> {
    let len = file
        .metadata()
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let keep = last_newline_end(file, len)?;
    warn!(
        path = %path.display(),
        dropped_bytes = len - keep,
        "dropping incomplete trailing line"
    );
    file.set_len(keep)
        .with_context(|| format!("failed to truncate {}", path.display()))?;
    Ok(())
}

/// Offset just past the last `\n` before `len`, or 0 when there is none.
fn last_newline_end(file: &mut File, len: u64) -> Result<u64> {
    let mut buf = vec![0u8; TAIL_BLOCK_BYTES];
    let mut pos = len;
    while pos > 0 {
        let start = pos.saturating_sub(TAIL_BLOCK_BYTES as u64);
        let n = (pos - start) as usize;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf[..n])?;
        if let Some(i) = buf[..n].iter().rposition(|b| *b == b'\n') {
            return Ok(start + i as u64 + 1);
        }
        pos = start;
    }
    Ok(0)
}

/// Last complete, non-blank line and its starting offset.
fn last_complete_line(file: &mut File, len: u64) -> Result<Option<(u64, Vec<u8>)>> {
    let mut buf = vec![0u8; TAIL_BLOCK_BYTES];
    let mut pos = len;
    let mut terminated = false;
    // Bytes of the candidate line, collected back to front.
    let mut reversed = Vec::new();

    while pos > 0 {
        let start = pos.saturating_sub(TAIL_BLOCK_BYTES as u64);
        let n = (pos - start) as usize;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf[..n])?;

        for i in (0..n).rev() {
            let byte = buf[i];
            if byte != b'\n' {
                if terminated {
                    reversed.push(byte);
                }
                continue;
            }
            if terminated && !is_blank(&reversed) {
                reversed.reverse();
                return Ok(Some((start + i as u64 + 1, reversed)));
            }
            terminated = true;
            reversed.clear();
        }
        pos = start;
    }

    if terminated && !is_blank(&reversed) {
        reversed.reverse();
        return Ok(Some((0, reversed)));
    }
    Ok(None)
}

/// ID of the last complete line, or 0 when the log is missing or has none.
pub fn last_record_id(path: &Path) -> Result<i64> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to open {}", path.display()));
        }
    };
    let len = file
        .metadata()
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();

    match last_complete_line(&mut file, len)? {
        Some((offset, line)) => probe_record_id(&line, path, offset),
        None => Ok(0),
    }
}

/// Append `records` (oldest first), requesting each attachment before its line.
pub fn append_records<R: MediaRequester + ?Sized>(
    path: &Path,
    entity: &Entity,
    records: &[Record],
    source: MediaSource,
    requester: &mut R,
) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut writer = AppendLogWriter::open(path)?;
    for record in records {
        let record_id = record.require_id()?;
        for file in record_media_files(record)? {
            requester.request_file(entity, &file, record_id, source)?;
        }
        writer.append(record)?;
    }
    Ok(records.len())
}
