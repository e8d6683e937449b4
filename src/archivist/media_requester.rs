use crate::archivist::append_log::{MediaRequester, MediaSource};
use crate::archivist::filter::FilterSpec;
use crate::archivist::paths::StoreLayout;
use crate::error::RemoteError;
use crate::remote::{Entity, FileDescriptor, ProgressSink, RemoteClient};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(2);

/// Logs download progress at most every two seconds and on completion.
#[derive(Debug)]
pub struct FileProgressLogger {
    prev_percent: u64,
    prev_at: Instant,
}

impl FileProgressLogger {
    pub fn new() -> Self {
        Self {
            prev_percent: 0,
            prev_at: Instant::now(),
        }
    }
}

impl Default for FileProgressLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for FileProgressLogger {
    fn on_progress(&mut self, downloaded: u64, total: u64) {
        let percent = if total == 0 {
            100
        } else {
            downloaded.saturating_mul(100) / total
        };
        // Fetched in one step; nothing worth reporting.
        if percent >= 100 && self.prev_percent == 0 {
            return;
        }
        if percent >= 100 || self.prev_at.elapsed() > PROGRESS_LOG_INTERVAL {
            info!(percent, "download progress");
            self.prev_percent = percent;
            self.prev_at = Instant::now();
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStats {
    pub downloaded: usize,
    pub skipped_existing: usize,
    pub skipped_filtered: usize,
    pub broken: usize,
}

/// Downloads attachments selected by the media filter into the store.
pub struct DownloadingMediaRequester<'a, C: RemoteClient + ?Sized> {
    remote: &'a C,
    layout: StoreLayout,
    filter: &'a FilterSpec,
    stats: DownloadStats,
}

impl<'a, C: RemoteClient + ?Sized> DownloadingMediaRequester<'a, C> {
    pub fn new(remote: &'a C, layout: StoreLayout, filter: &'a FilterSpec) -> Self {
        Self {
            remote,
            layout,
            filter,
            stats: DownloadStats::default(),
        }
    }

    pub fn stats(&self) -> DownloadStats {
        self.stats
    }
}

impl<C: RemoteClient + ?Sized> MediaRequester for DownloadingMediaRequester<'_, C> {
    fn request_file(
        &mut self,
        entity: &Entity,
        file: &FileDescriptor,
        record_id: i64,
        source: MediaSource,
    ) -> Result<()> {
        if !self.filter.is_true(entity, Some(file)) {
            debug!(
                file = %file.file_name,
                record_id,
                source = source.as_str(),
                "skipping file"
            );
            self.stats.skipped_filtered += 1;
            return Ok(());
        }

        let path = self
            .layout
            .media_file_path(entity, record_id, &file.file_name, file.index, source)?;
        match fs::metadata(&path) {
            Ok(_) => {
                self.stats.skipped_existing += 1;
                return Ok(());
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("failed to stat {}", path.display()));
            }
        }

        info!(path = %path.display(), size = file.size, "downloading file");
        let mut progress = FileProgressLogger::new();
        match self.remote.download_to_path(&path, file, &mut progress) {
            Ok(()) => {
                self.stats.downloaded += 1;
                Ok(())
            }
            Err(err) if RemoteError::is_broken_file_location(&err) => {
                error!(
                    entity = entity.id,
                    title = %entity.title,
                    username = %entity.username,
                    path = %path.display(),
                    "remote reports a broken file location, skipping"
                );
                self.stats.broken += 1;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
