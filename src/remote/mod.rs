pub mod gateway;
pub mod media;
#[cfg(test)]
pub mod test_support;
pub mod wire;

use crate::archivist::record::Record;
use crate::archivist::side_entity::{ChatData, Sighting, UserData};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Group,
    Channel,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Channel => "channel",
        })
    }
}

/// How the remote addresses an entity in requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRef {
    User { id: i64, access_hash: i64 },
    Chat { id: i64 },
    Channel { id: i64, access_hash: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SideSighting {
    User(Sighting<UserData>),
    Chat(Sighting<ChatData>),
}

/// A primary entity (dialog) that owns a message log.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: i64,
    pub title: String,
    pub username: String,
    pub kind: EntityKind,
    /// Highest message ID the remote reported for this entity.
    pub last_message_id: i64,
    pub peer: PeerRef,
    pub side: SideSighting,
}

impl Entity {
    pub fn may_have_stories(&self) -> bool {
        matches!(self.kind, EntityKind::User | EntityKind::Channel)
    }
}

/// Attachment as described by the remote; `location` is passed back verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct FileDescriptor {
    pub location: Value,
    pub dc_id: i32,
    pub size: i64,
    pub file_name: String,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryCursor {
    /// The `chunk` records immediately newer than this ID.
    After(i64),
    /// First fetch of a new entity: the chunk ending roughly `window` records before the newest.
    Recent { window: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorySource {
    Archived,
    Pinned,
}

impl StorySource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Archived => "archived",
            Self::Pinned => "pinned",
        }
    }
}

/// One response page. `records` are newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    pub users: Vec<Sighting<UserData>>,
    pub chats: Vec<Sighting<ChatData>>,
}

pub trait ProgressSink {
    fn on_progress(&mut self, downloaded: u64, total: u64);
}

/// Remote account access. Implementations own timeouts and retries.
pub trait RemoteClient {
    fn get_self(&self) -> Result<Entity>;
    fn get_entity_list(&self) -> Result<Vec<Entity>>;
    fn fetch_history(&self, entity: &Entity, chunk_size: usize, cursor: HistoryCursor)
    -> Result<Page>;
    fn fetch_stories(
        &self,
        entity: &Entity,
        source: StorySource,
        limit: usize,
        offset_id: i64,
    ) -> Result<Page>;
    fn download_to_path(
        &self,
        path: &Path,
        file: &FileDescriptor,
        progress: &mut dyn ProgressSink,
    ) -> Result<()>;
    fn get_account(&self) -> Result<Value>;
    fn get_contacts(&self) -> Result<Value>;
    fn get_sessions(&self) -> Result<Value>;
}
