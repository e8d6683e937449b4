//! In-memory `RemoteClient` for walker and driver tests.

use crate::archivist::record::Record;
use crate::archivist::side_entity::{ChatData, Sighting, UserData};
use crate::error::RemoteError;
use crate::remote::{
    Entity, EntityKind, FileDescriptor, HistoryCursor, Page, PeerRef, ProgressSink, RemoteClient,
    SideSighting, StorySource,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub fn chat_sighting(id: i64, title: &str, is_channel: bool) -> Sighting<ChatData> {
    Sighting::full(ChatData {
        id,
        username: None,
        title: title.to_string(),
        is_channel,
        updated_at: DateTime::<Utc>::UNIX_EPOCH,
    })
}

fn chat_side(id: i64, title: &str, is_channel: bool) -> SideSighting {
    SideSighting::Chat(chat_sighting(id, title, is_channel))
}

pub fn user_entity(id: i64, title: &str) -> Entity {
    Entity {
        id,
        title: title.to_string(),
        username: String::new(),
        kind: EntityKind::User,
        last_message_id: 0,
        peer: PeerRef::User { id, access_hash: 0 },
        side: SideSighting::User(Sighting::full(UserData {
            id,
            username: None,
            first_name: Some(title.to_string()),
            last_name: None,
            phone_number: None,
            is_bot: false,
            is_fake: false,
            is_scam: false,
            is_verified: false,
            is_premium: false,
            is_deleted: false,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        })),
    }
}

pub fn channel_entity(id: i64, title: &str) -> Entity {
    Entity {
        id,
        title: title.to_string(),
        username: String::new(),
        kind: EntityKind::Channel,
        last_message_id: 0,
        peer: PeerRef::Channel { id, access_hash: 0 },
        side: chat_side(id, title, true),
    }
}

pub fn group_entity(id: i64, title: &str) -> Entity {
    Entity {
        id,
        title: title.to_string(),
        username: String::new(),
        kind: EntityKind::Group,
        last_message_id: 0,
        peer: PeerRef::Chat { id },
        side: chat_side(id, title, false),
    }
}

pub fn message(id: i64) -> Record {
    Record::from_value(json!({"_": "TL_message", "ID": id, "Message": format!("m{id}")}))
        .expect("message")
}

pub fn photo_message(id: i64) -> Record {
    Record::from_value(json!({
        "_": "TL_message",
        "ID": id,
        "Media": {"_": "TL_messageMediaPhoto", "Photo": {
            "_": "TL_photo", "ID": 500 + id, "AccessHash": 1, "FileReference": "AA==", "DcID": 2,
            "Sizes": [{"_": "TL_photoSize", "Type": "x", "Size": 4}]
        }}
    }))
    .expect("photo message")
}

pub fn story(id: i64) -> Record {
    Record::from_value(json!({"_": "TL_storyItem", "ID": id})).expect("story")
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    History { entity_id: i64, cursor: HistoryCursor },
    Stories { entity_id: i64, source: StorySource, offset_id: i64 },
    Download { path: PathBuf },
}

/// Scripted remote. Histories and stories are stored oldest first.
#[derive(Default)]
pub struct FakeRemote {
    pub me: Option<Entity>,
    pub entities: Vec<Entity>,
    pub history: HashMap<i64, Vec<Record>>,
    pub stories: HashMap<i64, Vec<Record>>,
    /// Related users attached to every history page.
    pub page_users: Vec<Sighting<UserData>>,
    /// Entities whose archived story source is refused.
    pub archived_denied: HashSet<i64>,
    /// Limited first fetches return nothing.
    pub empty_recent: bool,
    /// Forward fetches ignore the cursor and return the oldest chunk.
    pub stale_history: bool,
    /// Download locations the remote reports as broken.
    pub broken_files: bool,
    pub contacts: Value,
    pub sessions: Value,
    calls: Mutex<Vec<Call>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, entity_id: i64, ids: impl IntoIterator<Item = i64>) -> Self {
        self.history
            .insert(entity_id, ids.into_iter().map(message).collect());
        self
    }

    pub fn with_stories(mut self, entity_id: i64, ids: impl IntoIterator<Item = i64>) -> Self {
        self.stories
            .insert(entity_id, ids.into_iter().map(story).collect());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn history_calls(&self) -> Vec<HistoryCursor> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::History { cursor, .. } => Some(*cursor),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

fn newest_first(records: &[Record]) -> Vec<Record> {
    records.iter().rev().cloned().collect()
}

impl RemoteClient for FakeRemote {
    fn get_self(&self) -> Result<Entity> {
        match &self.me {
            Some(me) => Ok(me.clone()),
            None => anyhow::bail!("fake remote has no self entity"),
        }
    }

    fn get_entity_list(&self) -> Result<Vec<Entity>> {
        Ok(self.entities.clone())
    }

    fn fetch_history(&self, entity: &Entity, chunk_size: usize, cursor: HistoryCursor) -> Result<Page> {
        self.record(Call::History {
            entity_id: entity.id,
            cursor,
        });
        let all = self.history.get(&entity.id).map(Vec::as_slice).unwrap_or(&[]);
        let records = match cursor {
            HistoryCursor::After(last_id) => {
                let newer: Vec<Record> = all
                    .iter()
                    .filter(|r| self.stale_history || r.id().unwrap_or_default() > last_id)
                    .take(chunk_size)
                    .cloned()
                    .collect();
                newest_first(&newer)
            }
            HistoryCursor::Recent { .. } if self.empty_recent => Vec::new(),
            HistoryCursor::Recent { window } => {
                let desc = newest_first(all);
                let window = usize::try_from(window).unwrap_or(0);
                let start = window.saturating_sub(chunk_size).min(desc.len());
                let end = window.min(desc.len());
                desc[start..end].to_vec()
            }
        };
        Ok(Page {
            records,
            users: self.page_users.clone(),
            chats: Vec::new(),
        })
    }

    fn fetch_stories(
        &self,
        entity: &Entity,
        source: StorySource,
        limit: usize,
        offset_id: i64,
    ) -> Result<Page> {
        self.record(Call::Stories {
            entity_id: entity.id,
            source,
            offset_id,
        });
        if source == StorySource::Archived && self.archived_denied.contains(&entity.id) {
            return Err(RemoteError::PermissionDenied("CHAT_ADMIN_REQUIRED".to_string()).into());
        }
        let all = self.stories.get(&entity.id).map(Vec::as_slice).unwrap_or(&[]);
        let records = newest_first(all)
            .into_iter()
            .filter(|r| offset_id == 0 || r.id().unwrap_or_default() < offset_id)
            .take(limit)
            .collect();
        Ok(Page {
            records,
            ..Page::default()
        })
    }

    fn download_to_path(
        &self,
        path: &Path,
        file: &FileDescriptor,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        self.record(Call::Download {
            path: path.to_path_buf(),
        });
        if self.broken_files {
            return Err(RemoteError::BrokenFileLocation("LOCATION_INVALID".to_string()).into());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let size = u64::try_from(file.size).unwrap_or(0);
        fs::write(path, vec![b'x'; size as usize])?;
        progress.on_progress(size, size);
        Ok(())
    }

    fn get_account(&self) -> Result<Value> {
        Ok(json!({"_": "TL_user", "ID": self.me.as_ref().map(|m| m.id).unwrap_or_default()}))
    }

    fn get_contacts(&self) -> Result<Value> {
        Ok(self.contacts.clone())
    }

    fn get_sessions(&self) -> Result<Value> {
        Ok(self.sessions.clone())
    }
}
