use crate::archivist::append_log::{MediaRequester, MediaSource, append_records, last_record_id};
use crate::archivist::fsname::{self, find_existing, parse_id_prefix, parse_media_file_name};
use crate::archivist::paths::StoreLayout;
use crate::archivist::record::{LAYER_FIELD, Record};
use crate::archivist::record_index::{CachedRecordReader, SharedRecordIndex};
use crate::archivist::side_entity::{
    ChatData, SideEntityLog, Sighting, UserData, resolve_entity_title,
};
use crate::remote::{Entity, SideSighting};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// A per-entity message log found in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatArchiveEntry {
    pub id: i64,
    /// Title as it appears on disk, possibly escaped or clamped.
    pub fs_title: String,
    pub file_name: String,
    pub path: PathBuf,
}

/// A downloaded attachment of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAttachment {
    pub record_id: i64,
    pub index: u32,
    pub fs_original_name: String,
    pub file_name: String,
    pub path: PathBuf,
}

/// The on-disk archive: per-entity logs, side logs, attachments and snapshots.
pub struct ArchiveStore {
    layout: StoreLayout,
    users: SideEntityLog<UserData>,
    chats: SideEntityLog<ChatData>,
    schema_layer: Option<u32>,
}

impl ArchiveStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let layout = StoreLayout::new(root);
        Self {
            users: SideEntityLog::new(&layout.users_path),
            chats: SideEntityLog::new(&layout.chats_path),
            layout,
            schema_layer: None,
        }
    }

    /// Tag every stored message, story and snapshot object with `layer`.
    pub fn with_schema_layer(mut self, layer: Option<u32>) -> Self {
        self.schema_layer = layer;
        self
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn chat_messages_path(&self, entity: &Entity) -> Result<PathBuf> {
        fsname::resolve_path(&self.layout.root, entity.id, &entity.title, true)
    }

    pub fn chat_stories_path(&self, entity: &Entity) -> Result<PathBuf> {
        fsname::resolve_path(&self.layout.stories_dir, entity.id, &entity.title, true)
    }

    pub fn media_file_path(
        &self,
        entity: &Entity,
        record_id: i64,
        file_name: &str,
        index: u32,
        source: MediaSource,
    ) -> Result<PathBuf> {
        self.layout
            .media_file_path(entity, record_id, file_name, index, source)
    }

    pub fn last_message_id(&self, entity: &Entity) -> Result<i64> {
        last_record_id(&self.chat_messages_path(entity)?)
    }

    pub fn last_story_id(&self, entity: &Entity) -> Result<i64> {
        last_record_id(&self.chat_stories_path(entity)?)
    }

    /// Dedup-persist side entities referenced by a page.
    pub fn save_related(
        &mut self,
        users: Vec<Sighting<UserData>>,
        chats: Vec<Sighting<ChatData>>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let written = self.users.observe_all(users, now)?;
        Ok(written + self.chats.observe_all(chats, now)?)
    }

    pub fn save_entities_as_related(&mut self, entities: &[Entity], now: DateTime<Utc>) -> Result<usize> {
        let mut users = Vec::new();
        let mut chats = Vec::new();
        for entity in entities {
            match &entity.side {
                SideSighting::User(sighting) => users.push(sighting.clone()),
                SideSighting::Chat(sighting) => chats.push(sighting.clone()),
            }
        }
        self.save_related(users, chats, now)
    }

    /// Append a page of messages given newest first, as the remote returns them.
    pub fn save_messages<R: MediaRequester + ?Sized>(
        &self,
        entity: &Entity,
        newest_first: &[Record],
        requester: &mut R,
    ) -> Result<usize> {
        let oldest_first = self.stamped_oldest_first(newest_first);
        append_records(
            &self.chat_messages_path(entity)?,
            entity,
            &oldest_first,
            MediaSource::Message,
            requester,
        )
    }

    pub fn save_stories<R: MediaRequester + ?Sized>(
        &self,
        entity: &Entity,
        newest_first: &[Record],
        requester: &mut R,
    ) -> Result<usize> {
        let oldest_first = self.stamped_oldest_first(newest_first);
        append_records(
            &self.chat_stories_path(entity)?,
            entity,
            &oldest_first,
            MediaSource::Story,
            requester,
        )
    }

    fn stamped_oldest_first(&self, newest_first: &[Record]) -> Vec<Record> {
        newest_first
            .iter()
            .rev()
            .map(|record| {
                let mut record = record.clone();
                if let Some(layer) = self.schema_layer {
                    record.stamp_layer(layer);
                }
                record
            })
            .collect()
    }

    /// Snapshot objects are tagged one level deep: the object itself or each array item.
    fn stamped_snapshot(&self, value: &Value) -> Value {
        let mut value = value.clone();
        let Some(layer) = self.schema_layer else {
            return value;
        };
        let stamp = |item: &mut Value| {
            if let Value::Object(map) = item {
                map.insert(LAYER_FIELD.to_string(), Value::from(layer));
            }
        };
        match &mut value {
            Value::Array(items) => items.iter_mut().for_each(stamp),
            other => stamp(other),
        }
        value
    }

    pub fn save_account(&self, account: &Value) -> Result<()> {
        write_snapshot(&self.layout.account_path, &self.stamped_snapshot(account))
    }

    pub fn save_contacts(&self, contacts: &Value) -> Result<()> {
        write_snapshot(&self.layout.contacts_path, &self.stamped_snapshot(contacts))
    }

    pub fn save_sessions(&self, sessions: &Value) -> Result<()> {
        write_snapshot(&self.layout.sessions_path, &self.stamped_snapshot(sessions))
    }

    /// Message logs present in the store, sorted by ID.
    pub fn read_saved_entity_list(&self) -> Result<Vec<ChatArchiveEntry>> {
        let root = &self.layout.root;
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("failed to list {}", root.display())),
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to list {}", root.display()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if StoreLayout::is_reserved_name(&name) || !entry.path().is_file() {
                continue;
            }
            let Some((id, fs_title)) = parse_id_prefix(&name) else {
                continue;
            };
            out.push(ChatArchiveEntry {
                id,
                fs_title: fs_title.to_string(),
                path: entry.path(),
                file_name: name,
            });
        }
        out.sort_by_key(|entry| entry.id);
        Ok(out)
    }

    /// Downloaded message attachments of `entity_id`. Never renames anything.
    pub fn read_saved_files_list(&self, entity_id: i64) -> Result<Vec<FileAttachment>> {
        let Some(dir) = find_existing(&self.layout.files_dir, entity_id)? else {
            return Ok(Vec::new());
        };
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("failed to list {}", dir.display())),
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(parsed) = parse_media_file_name(&name) else {
                continue;
            };
            out.push(FileAttachment {
                record_id: parsed.record_id,
                index: parsed.index,
                fs_original_name: parsed.fs_name,
                path: entry.path(),
                file_name: name,
            });
        }
        out.sort_by(|a, b| (a.record_id, a.index).cmp(&(b.record_id, b.index)));
        Ok(out)
    }

    /// Current display title of an archived entity, from the side logs when known.
    pub fn resolve_title(&self, id: i64, fallback: &str) -> Result<String> {
        self.title_index()?.resolve(id, fallback)
    }

    /// Side-log indexes for resolving many titles in one pass.
    pub fn title_index(&self) -> Result<TitleIndex> {
        let users = SharedRecordIndex::new(&self.layout.users_path);
        users.update_offsets()?;
        let chats = SharedRecordIndex::new(&self.layout.chats_path);
        chats.update_offsets()?;
        Ok(TitleIndex { users, chats })
    }
}

pub struct TitleIndex {
    users: SharedRecordIndex<UserData>,
    chats: SharedRecordIndex<ChatData>,
}

impl TitleIndex {
    pub fn resolve(&self, id: i64, fallback: &str) -> Result<String> {
        let mut users = CachedRecordReader::new(&self.users);
        let mut chats = CachedRecordReader::new(&self.chats);
        resolve_entity_title(&mut users, &mut chats, id, fallback)
    }
}

/// Replace `path` with `value` without exposing a half-written file.
fn write_snapshot(path: &Path, value: &Value) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("snapshot path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    let data = serde_json::to_string(value)?;
    tmp.write_all(format!("{data}\n").as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
