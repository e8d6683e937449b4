//! Decoding of the gateway's `"_"`-tagged objects into archive types.

use crate::archivist::side_entity::{ChatData, Sighting, UserData};
use crate::error::RemoteError;
use crate::remote::{Entity, EntityKind, PeerRef, SideSighting};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireUser {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(default)]
    pub access_hash: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub fake: bool,
    #[serde(default)]
    pub scam: bool,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub premium: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub min: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireChat {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireChannel {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(default)]
    pub access_hash: i64,
    #[serde(default)]
    pub title: String,
    pub username: Option<String>,
    #[serde(default)]
    pub megagroup: bool,
    #[serde(default)]
    pub min: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "_")]
pub enum WirePeer {
    #[serde(rename = "TL_user")]
    User(WireUser),
    #[serde(rename = "TL_chat")]
    Chat(WireChat),
    #[serde(rename = "TL_chatForbidden")]
    ChatForbidden(WireChat),
    #[serde(rename = "TL_channel")]
    Channel(WireChannel),
    #[serde(rename = "TL_channelForbidden")]
    ChannelForbidden(WireChannel),
}

impl WireUser {
    pub fn to_sighting(&self, now: DateTime<Utc>) -> Sighting<UserData> {
        Sighting {
            entity: UserData {
                id: self.id,
                username: self.username.clone(),
                first_name: self.first_name.clone(),
                last_name: self.last_name.clone(),
                phone_number: self.phone.clone(),
                is_bot: self.bot,
                is_fake: self.fake,
                is_scam: self.scam,
                is_verified: self.verified,
                is_premium: self.premium,
                is_deleted: self.deleted,
                updated_at: now,
            },
            minimal: self.min,
        }
    }
}

fn chat_sighting(
    id: i64,
    title: &str,
    username: Option<&str>,
    is_channel: bool,
    minimal: bool,
    now: DateTime<Utc>,
) -> Sighting<ChatData> {
    Sighting {
        entity: ChatData {
            id,
            username: username.map(ToOwned::to_owned),
            title: title.to_string(),
            is_channel,
            updated_at: now,
        },
        minimal,
    }
}

impl WirePeer {
    pub fn into_entity(self, last_message_id: i64, now: DateTime<Utc>) -> Entity {
        match self {
            Self::User(user) => {
                let sighting = user.to_sighting(now);
                Entity {
                    id: user.id,
                    title: sighting.entity.display_name(),
                    username: user.username.clone().unwrap_or_default(),
                    kind: EntityKind::User,
                    last_message_id,
                    peer: PeerRef::User {
                        id: user.id,
                        access_hash: user.access_hash,
                    },
                    side: SideSighting::User(sighting),
                }
            }
            Self::Chat(chat) | Self::ChatForbidden(chat) => Entity {
                id: chat.id,
                title: chat.title.clone(),
                username: String::new(),
                kind: EntityKind::Group,
                last_message_id,
                peer: PeerRef::Chat { id: chat.id },
                side: SideSighting::Chat(chat_sighting(chat.id, &chat.title, None, false, false, now)),
            },
            Self::Channel(channel) | Self::ChannelForbidden(channel) => {
                let is_channel = !channel.megagroup;
                Entity {
                    id: channel.id,
                    title: channel.title.clone(),
                    username: channel.username.clone().unwrap_or_default(),
                    kind: if is_channel {
                        EntityKind::Channel
                    } else {
                        EntityKind::Group
                    },
                    last_message_id,
                    peer: PeerRef::Channel {
                        id: channel.id,
                        access_hash: channel.access_hash,
                    },
                    side: SideSighting::Chat(chat_sighting(
                        channel.id,
                        &channel.title,
                        channel.username.as_deref(),
                        is_channel,
                        channel.min,
                        now,
                    )),
                }
            }
        }
    }
}

pub fn parse_peer(value: Value) -> Result<WirePeer> {
    let kind = value
        .get("_")
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string();
    serde_json::from_value(value).map_err(|err| {
        RemoteError::UnexpectedResponse {
            method: "peer".to_string(),
            detail: format!("cannot decode {kind}: {err}"),
        }
        .into()
    })
}

pub fn parse_users(values: Vec<Value>, now: DateTime<Utc>) -> Result<Vec<Sighting<UserData>>> {
    values
        .into_iter()
        .map(|value| match parse_peer(value)? {
            WirePeer::User(user) => Ok(user.to_sighting(now)),
            other => Err(RemoteError::UnexpectedResponse {
                method: "users".to_string(),
                detail: format!("expected TL_user, got {other:?}"),
            }
            .into()),
        })
        .collect()
}

pub fn parse_chats(values: Vec<Value>, now: DateTime<Utc>) -> Result<Vec<Sighting<ChatData>>> {
    values
        .into_iter()
        .map(|value| {
            let entity = parse_peer(value)?.into_entity(0, now);
            match entity.side {
                SideSighting::Chat(sighting) => Ok(sighting),
                SideSighting::User(_) => Err(RemoteError::UnexpectedResponse {
                    method: "chats".to_string(),
                    detail: format!("user {} in chats list", entity.id),
                }
                .into()),
            }
        })
        .collect()
}

pub fn input_peer(peer: &PeerRef) -> Value {
    match *peer {
        PeerRef::User { id, access_hash } => {
            json!({"_": "TL_inputPeerUser", "UserID": id, "AccessHash": access_hash})
        }
        PeerRef::Chat { id } => json!({"_": "TL_inputPeerChat", "ChatID": id}),
        PeerRef::Channel { id, access_hash } => {
            json!({"_": "TL_inputPeerChannel", "ChannelID": id, "AccessHash": access_hash})
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WireDialog {
    pub peer: Value,
    #[serde(default)]
    pub last_message_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct WireDialogs {
    #[serde(default)]
    pub dialogs: Vec<WireDialog>,
}

/// Body shared by history and story responses.
#[derive(Debug, Deserialize)]
pub struct WirePage {
    #[serde(default, alias = "messages", alias = "stories")]
    pub records: Vec<Value>,
    #[serde(default)]
    pub users: Vec<Value>,
    #[serde(default)]
    pub chats: Vec<Value>,
}

pub fn parse_dialogs(value: Value, now: DateTime<Utc>) -> Result<Vec<Entity>> {
    let dialogs: WireDialogs =
        serde_json::from_value(value).context("failed to decode dialogs response")?;
    dialogs
        .dialogs
        .into_iter()
        .map(|dialog| Ok(parse_peer(dialog.peer)?.into_entity(dialog.last_message_id, now)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archivist::side_entity::DELETED_ACCOUNT_TITLE;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn users_become_user_entities_with_display_titles() {
        let peer = parse_peer(json!({
            "_": "TL_user", "ID": 7, "AccessHash": 99,
            "FirstName": "Ann", "LastName": "Lee", "Username": "ann", "Min": false
        }))
        .expect("user");
        let entity = peer.into_entity(120, now());
        assert_eq!(entity.kind, EntityKind::User);
        assert_eq!(entity.title, "Ann Lee");
        assert_eq!(entity.username, "ann");
        assert_eq!(entity.last_message_id, 120);
        assert_eq!(entity.peer, PeerRef::User { id: 7, access_hash: 99 });
        assert!(entity.may_have_stories());
    }

    #[test]
    fn deleted_user_gets_placeholder_title() {
        let entity = parse_peer(json!({"_": "TL_user", "ID": 8, "Deleted": true}))
            .expect("user")
            .into_entity(0, now());
        assert_eq!(entity.title, DELETED_ACCOUNT_TITLE);
    }

    #[test]
    fn megagroups_are_groups_and_broadcasts_are_channels() {
        let group = parse_peer(json!({"_": "TL_channel", "ID": 1, "Title": "G", "Megagroup": true}))
            .expect("megagroup")
            .into_entity(0, now());
        assert_eq!(group.kind, EntityKind::Group);
        assert!(!group.may_have_stories());
        match group.side {
            SideSighting::Chat(s) => assert!(!s.entity.is_channel),
            other => panic!("unexpected side {other:?}"),
        }

        let channel = parse_peer(json!({"_": "TL_channel", "ID": 2, "Title": "C", "Min": true}))
            .expect("channel")
            .into_entity(0, now());
        assert_eq!(channel.kind, EntityKind::Channel);
        match channel.side {
            SideSighting::Chat(s) => assert!(s.entity.is_channel && s.minimal),
            other => panic!("unexpected side {other:?}"),
        }
    }

    #[test]
    fn unknown_peer_kinds_are_rejected() {
        let err = parse_peer(json!({"_": "TL_userEmpty", "ID": 1})).expect_err("unknown");
        assert!(matches!(
            err.downcast_ref::<RemoteError>(),
            Some(RemoteError::UnexpectedResponse { .. })
        ));
    }

    #[test]
    fn related_lists_are_split_by_kind() {
        let users = parse_users(vec![json!({"_": "TL_user", "ID": 1, "Min": true})], now())
            .expect("users");
        assert!(users[0].minimal);
        assert!(parse_users(vec![json!({"_": "TL_chat", "ID": 1})], now()).is_err());

        let chats = parse_chats(
            vec![
                json!({"_": "TL_chatForbidden", "ID": 3, "Title": "Old"}),
                json!({"_": "TL_channelForbidden", "ID": 4, "Title": "Gone"}),
            ],
            now(),
        )
        .expect("chats");
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].entity.title, "Old");
        assert!(chats[1].entity.is_channel);
    }

    #[test]
    fn dialogs_and_pages_decode() {
        let entities = parse_dialogs(
            json!({"dialogs": [
                {"peer": {"_": "TL_chat", "ID": 5, "Title": "Team"}, "last_message_id": 40}
            ]}),
            now(),
        )
        .expect("dialogs");
        assert_eq!(entities[0].last_message_id, 40);
        assert_eq!(input_peer(&entities[0].peer), json!({"_": "TL_inputPeerChat", "ChatID": 5}));

        let page: WirePage = serde_json::from_value(json!({"messages": [{"ID": 1}]})).expect("page");
        assert_eq!(page.records.len(), 1);
        let page: WirePage = serde_json::from_value(json!({"stories": [{"ID": 2}], "users": []}))
            .expect("stories page");
        assert_eq!(page.records.len(), 1);
    }
}
