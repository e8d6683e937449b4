use crate::archivist::append_log::MediaSource;
use crate::archivist::fsname;
use crate::remote::Entity;
use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArchivistPaths {
    pub archivist_home: PathBuf,
    pub logs_dir: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => None,
    }
}

pub fn resolve_paths() -> Result<ArchivistPaths> {
    let archivist_home = match env_path("ARCHIVIST_HOME") {
        Some(path) => path,
        None => required_home_dir()?.join(".history-archivist"),
    };
    let logs_dir = env_or_default_path("ARCHIVIST_LOGS_DIR", archivist_home.join("logs"));

    Ok(ArchivistPaths {
        archivist_home,
        logs_dir,
    })
}

/// Fixed layout of one archive directory.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    pub root: PathBuf,
    pub users_path: PathBuf,
    pub chats_path: PathBuf,
    pub files_dir: PathBuf,
    pub story_files_dir: PathBuf,
    pub stories_dir: PathBuf,
    pub account_path: PathBuf,
    pub contacts_path: PathBuf,
    pub sessions_path: PathBuf,
    pub lock_path: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let files_dir = root.join("files");
        Self {
            users_path: root.join("users"),
            chats_path: root.join("chats"),
            story_files_dir: files_dir.join("stories"),
            files_dir,
            stories_dir: root.join("stories"),
            account_path: root.join("account"),
            contacts_path: root.join("contacts"),
            sessions_path: root.join("auths"),
            lock_path: root.join(".archivist.lock"),
            root,
        }
    }

    /// Attachment directory of `entity`, renamed to its current title.
    pub fn chat_files_dir(&self, entity: &Entity, source: MediaSource) -> Result<PathBuf> {
        let base = match source {
            MediaSource::Message => &self.files_dir,
            MediaSource::Story => &self.story_files_dir,
        };
        fsname::resolve_path(base, entity.id, &entity.title, true)
    }

    pub fn media_file_path(
        &self,
        entity: &Entity,
        record_id: i64,
        file_name: &str,
        index: u32,
        source: MediaSource,
    ) -> Result<PathBuf> {
        Ok(self
            .chat_files_dir(entity, source)?
            .join(fsname::media_file_name(record_id, index, file_name)))
    }

    /// Names directly under the root that are not per-chat message logs.
    pub fn is_reserved_name(name: &str) -> bool {
        matches!(
            name,
            "users" | "chats" | "files" | "stories" | "account" | "contacts" | "auths"
        ) || name.starts_with('.')
    }
}
