use crate::archivist::record::{is_blank, probe_record_id};
use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPos {
    pub offset: u64,
    pub len: u64,
}

/// Anything that can look up a decoded record by ID.
pub trait RecordSource<T> {
    fn read_record(&mut self, id: i64) -> Result<Option<T>>;
}

/// `ID -> (offset, len)` over one append log, extended incrementally.
#[derive(Debug)]
pub struct RecordIndex<T> {
    path: PathBuf,
    read_offset: u64,
    positions: HashMap<i64, RecordPos>,
    _record: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> RecordIndex<T> {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            read_offset: 0,
            positions: HashMap::new(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn position(&self, id: i64) -> Option<RecordPos> {
        self.positions.get(&id).copied()
    }

    /// Index lines appended since the last call. A missing file is empty;
    /// a trailing line without `\n` is left for a later call.
    pub fn update_offsets(&mut self) -> Result<()> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to open {}", self.path.display()));
            }
        };
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(self.read_offset))
            .with_context(|| format!("failed to seek in {}", self.path.display()))?;

        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .with_context(|| format!("failed to read {}", self.path.display()))?;
            if n == 0 || line.last() != Some(&b'\n') {
                break;
            }
            let offset = self.read_offset;
            if !is_blank(&line) {
                let id = probe_record_id(&line, &self.path, offset)?;
                self.positions.insert(
                    id,
                    RecordPos {
                        offset,
                        len: n as u64,
                    },
                );
            }
            self.read_offset += n as u64;
        }
        Ok(())
    }

    /// Decode the last indexed line carrying `id`.
    pub fn read(&self, id: i64) -> Result<Option<T>> {
        let Some(pos) = self.position(id) else {
            return Ok(None);
        };
        let mut file = File::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.seek(SeekFrom::Start(pos.offset))?;
        let mut buf = vec![0u8; pos.len as usize];
        file.read_exact(&mut buf).with_context(|| {
            format!(
                "failed to read record {id} at byte {} of {}",
                pos.offset,
                self.path.display()
            )
        })?;
        let record = serde_json::from_slice(&buf).with_context(|| {
            format!(
                "failed to decode record {id} at byte {} of {}",
                pos.offset,
                self.path.display()
            )
        })?;
        Ok(Some(record))
    }
}

impl<T: DeserializeOwned> RecordSource<T> for RecordIndex<T> {
    fn read_record(&mut self, id: i64) -> Result<Option<T>> {
        self.read(id)
    }
}

/// Index shared between concurrent readers; updates take the write lock.
#[derive(Debug)]
pub struct SharedRecordIndex<T> {
    inner: RwLock<RecordIndex<T>>,
}

impl<T: DeserializeOwned> SharedRecordIndex<T> {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            inner: RwLock::new(RecordIndex::new(path)),
        }
    }

    pub fn update_offsets(&self) -> Result<()> {
        self.inner.write().update_offsets()
    }

    pub fn read(&self, id: i64) -> Result<Option<T>> {
        self.inner.read().read(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Per-request memo over a shared index. Not meant to outlive one request.
pub struct CachedRecordReader<'a, T> {
    shared: &'a SharedRecordIndex<T>,
    cache: HashMap<i64, Option<T>>,
}

impl<'a, T: DeserializeOwned + Clone> CachedRecordReader<'a, T> {
    pub fn new(shared: &'a SharedRecordIndex<T>) -> Self {
        Self {
            shared,
            cache: HashMap::new(),
        }
    }

    pub fn read(&mut self, id: i64) -> Result<Option<T>> {
        if let Some(hit) = self.cache.get(&id) {
            return Ok(hit.clone());
        }
        let value = self.shared.read(id)?;
        self.cache.insert(id, value.clone());
        Ok(value)
    }
}

impl<T: DeserializeOwned + Clone> RecordSource<T> for CachedRecordReader<'_, T> {
    fn read_record(&mut self, id: i64) -> Result<Option<T>> {
        self.read(id)
    }
}
