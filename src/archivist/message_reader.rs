use crate::archivist::record::{Record, is_blank};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Serves line windows of one ordered log, remembering where each line ends.
#[derive(Debug)]
pub struct WindowedMessageReader {
    path: PathBuf,
    /// `line_ends[i]` is the byte offset just past line `i`'s `\n`.
    line_ends: Vec<u64>,
}

impl WindowedMessageReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            line_ends: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn known_lines(&self) -> usize {
        self.line_ends.len()
    }

    /// Lines `[offset, offset + limit)`, or to the end when `limit` is 0,
    /// plus whether a complete line exists past the window.
    pub fn read(&mut self, offset: usize, limit: usize) -> Result<(Vec<Record>, bool)> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok((Vec::new(), false)),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to open {}", self.path.display()));
            }
        };

        let mut line_no = offset.min(self.line_ends.len());
        let mut pos = match line_no {
            0 => 0,
            n => self.line_ends[n - 1],
        };
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(pos))
            .with_context(|| format!("failed to seek in {}", self.path.display()))?;

        let window_end = if limit == 0 {
            usize::MAX
        } else {
            offset.saturating_add(limit)
        };
        let mut records = Vec::new();
        let mut has_more = false;
        let mut line = Vec::new();

        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .with_context(|| format!("failed to read {}", self.path.display()))?;
            if n == 0 || line.last() != Some(&b'\n') {
                break;
            }
            let end = pos + n as u64;
            // Blank lines are not records and take no window slot.
            if is_blank(&line) {
                pos = end;
                continue;
            }
            if line_no == self.line_ends.len() {
                self.line_ends.push(end);
            }

            if line_no >= window_end {
                has_more = true;
                break;
            }
            if line_no >= offset {
                let value = serde_json::from_slice(&line).with_context(|| {
                    format!(
                        "failed to decode line {line_no} at byte {pos} of {}",
                        self.path.display()
                    )
                })?;
                records.push(Record::from_value(value)?);
            }

            line_no += 1;
            pos = end;
        }

        Ok((records, has_more))
    }

    /// Extrapolated line count from the bytes-per-line seen so far.
    /// `None` until at least one line has been read.
    pub fn estimate_count(&self) -> Result<Option<u64>> {
        let Some(&scanned_bytes) = self.line_ends.last() else {
            return Ok(None);
        };
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to stat {}", self.path.display()));
            }
        };
        let count = self.line_ends.len() as u64;
        let remaining = size.saturating_sub(scanned_bytes);
        Ok(Some(count + remaining * count / scanned_bytes))
    }
}

/// One reader per log path, shared by concurrent requests.
#[derive(Debug, Default)]
pub struct MessageReaderPool {
    readers: Mutex<HashMap<PathBuf, WindowedMessageReader>>,
}

impl MessageReaderPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, path: &Path, offset: usize, limit: usize) -> Result<(Vec<Record>, bool)> {
        let mut readers = self.readers.lock();
        readers
            .entry(path.to_path_buf())
            .or_insert_with(|| WindowedMessageReader::new(path))
            .read(offset, limit)
    }

    pub fn estimate_count(&self, path: &Path) -> Result<Option<u64>> {
        let readers = self.readers.lock();
        match readers.get(path) {
            Some(reader) => reader.estimate_count(),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_lines(path: &Path, ids: impl IntoIterator<Item = i64>) {
        let raw: String = ids
            .into_iter()
            .map(|id| format!("{{\"ID\":{id}}}\n"))
            .collect();
        fs::write(path, raw).expect("write");
    }

    fn ids(records: &[Record]) -> Vec<i64> {
        records.iter().filter_map(Record::id).collect()
    }

    #[test]
    fn empty_and_missing_logs_read_as_empty() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("log");

        let mut reader = WindowedMessageReader::new(&path);
        assert_eq!(reader.read(0, 0).expect("missing"), (Vec::new(), false));

        fs::write(&path, "").expect("empty");
        assert_eq!(reader.read(0, 0).expect("empty"), (Vec::new(), false));
        assert_eq!(reader.estimate_count().expect("estimate"), None);
    }

    #[test]
    fn windows_match_slices_with_has_more() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("log");
        write_lines(&path, 1..=10);
        let mut reader = WindowedMessageReader::new(&path);

        let (records, more) = reader.read(0, 3).expect("head");
        assert_eq!((ids(&records), more), (vec![1, 2, 3], true));

        let (records, more) = reader.read(7, 3).expect("tail exact");
        assert_eq!((ids(&records), more), (vec![8, 9, 10], false));

        let (records, more) = reader.read(8, 5).expect("tail short");
        assert_eq!((ids(&records), more), (vec![9, 10], false));

        let (records, more) = reader.read(4, 0).expect("to end");
        assert_eq!((ids(&records), more), (vec![5, 6, 7, 8, 9, 10], false));

        let (records, more) = reader.read(2, 2).expect("cached middle");
        assert_eq!((ids(&records), more), (vec![3, 4], true));

        let (records, more) = reader.read(50, 2).expect("past end");
        assert_eq!((records.len(), more), (0, false));
        assert_eq!(reader.known_lines(), 10);
    }

    #[test]
    fn offset_beyond_cache_scans_forward() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("log");
        write_lines(&path, 1..=6);
        let mut reader = WindowedMessageReader::new(&path);

        let (records, more) = reader.read(4, 1).expect("jump ahead");
        assert_eq!((ids(&records), more), (vec![5], true));
        assert_eq!(reader.known_lines(), 6);
    }

    #[test]
    fn incomplete_tail_is_hidden_until_completed() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("log");
        fs::write(&path, "{\"ID\":1}\n{\"ID\":2}\n{\"ID\":3").expect("write");
        let mut reader = WindowedMessageReader::new(&path);

        let (records, more) = reader.read(0, 2).expect("before");
        assert_eq!((ids(&records), more), (vec![1, 2], false));
        assert_eq!(reader.known_lines(), 2);

        let mut file = OpenOptions::new().append(true).open(&path).expect("open");
        file.write_all(b"}\n{\"ID\":4}\n").expect("complete");

        let (records, more) = reader.read(1, 2).expect("after");
        assert_eq!((ids(&records), more), (vec![2, 3], true));
        let (records, more) = reader.read(0, 0).expect("all");
        assert_eq!((ids(&records), more), (vec![1, 2, 3, 4], false));
    }

    #[test]
    fn blank_lines_are_skipped_and_take_no_slot() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("log");
        fs::write(&path, "{\"ID\":1}\n\n{\"ID\":2}\n  \n{\"ID\":3}\n\n").expect("write");
        let mut reader = WindowedMessageReader::new(&path);

        let (records, more) = reader.read(0, 2).expect("head");
        assert_eq!((ids(&records), more), (vec![1, 2], true));
        let (records, more) = reader.read(1, 0).expect("resume after cached line");
        assert_eq!((ids(&records), more), (vec![2, 3], false));
        assert_eq!(reader.known_lines(), 3);
    }

    #[test]
    fn estimate_extrapolates_from_scanned_prefix() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("log");
        write_lines(&path, 1..=9);
        let mut reader = WindowedMessageReader::new(&path);

        reader.read(0, 2).expect("partial scan");
        // Three lines were scanned (two plus the look-ahead), all 9 bytes wide.
        assert_eq!(reader.known_lines(), 3);
        assert_eq!(reader.estimate_count().expect("estimate"), Some(9));
    }

    #[test]
    fn pool_reuses_reader_per_path() {
        let tmp = tempdir().expect("tempdir");
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        write_lines(&a, 1..=4);
        write_lines(&b, 10..=11);

        let pool = MessageReaderPool::new();
        assert_eq!(pool.estimate_count(&a).expect("unknown"), None);
        let (records, more) = pool.read(&a, 0, 2).expect("a");
        assert_eq!((ids(&records), more), (vec![1, 2], true));
        let (records, _) = pool.read(&b, 1, 0).expect("b");
        assert_eq!(ids(&records), vec![11]);
        assert_eq!(pool.estimate_count(&a).expect("known"), Some(4));
    }
}
