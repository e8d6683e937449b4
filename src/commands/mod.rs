pub mod files;
pub mod list_chats;
pub mod read;
pub mod saved;
pub mod status;
pub mod sync;

use crate::archivist::config::{ArchivistConfig, load_config};
use crate::archivist::store::ArchiveStore;
use anyhow::Result;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

/// Config plus an optional `--out` override, validated.
pub fn config_with_out_dir(out_dir: Option<&Path>) -> Result<ArchivistConfig> {
    let mut cfg = load_config()?;
    if let Some(out) = out_dir {
        cfg.sync.out_dir = out.to_path_buf();
    }
    cfg.validate()?;
    Ok(cfg)
}

pub fn open_store(out_dir: Option<&Path>) -> Result<ArchiveStore> {
    let cfg = config_with_out_dir(out_dir)?;
    Ok(ArchiveStore::new(&cfg.sync.out_dir))
}
