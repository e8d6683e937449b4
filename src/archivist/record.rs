use crate::error::ArchiveError;
use anyhow::{Context, Result, anyhow};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;

pub const ID_FIELD: &str = "ID";
/// Schema layer the remote objects were decoded with.
pub const LAYER_FIELD: &str = "_TL_LAYER";

/// One stored line: an ordered JSON object carrying an integer `ID`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(anyhow!("record must be a JSON object, got {other}")),
        }
    }

    pub fn id(&self) -> Option<i64> {
        match self.0.get(ID_FIELD)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn require_id(&self) -> Result<i64> {
        self.id()
            .ok_or_else(|| anyhow!("record is missing an integer {ID_FIELD} field"))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn stamp_layer(&mut self, layer: u32) {
        self.0.insert(LAYER_FIELD.to_string(), Value::from(layer));
    }
}

enum RawId {
    Int(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for RawId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RawIdVisitor;

        impl Visitor<'_> for RawIdVisitor {
            type Value = RawId;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an integer record ID")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<RawId, E> {
                Ok(RawId::Int(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<RawId, E> {
                Ok(i64::try_from(v).map_or_else(|_| RawId::Text(v.to_string()), RawId::Int))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<RawId, E> {
                Ok(RawId::Text(v.to_string()))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<RawId, E> {
                Ok(match v.trim().parse::<i64>() {
                    Ok(id) => RawId::Int(id),
                    Err(_) => RawId::Text(v.to_string()),
                })
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<RawId, E> {
                Ok(RawId::Text(v.to_string()))
            }
        }

        deserializer.deserialize_any(RawIdVisitor)
    }
}

/// Only `ID` is decoded; every other field is skipped by serde without being built.
#[derive(Deserialize)]
struct IdProbe {
    #[serde(rename = "ID", default)]
    id: Option<RawId>,
}

/// Extract `ID` from one encoded line without decoding the whole record.
pub fn probe_record_id(line: &[u8], path: &Path, offset: u64) -> Result<i64> {
    let probe: IdProbe = serde_json::from_slice(line)
        .with_context(|| format!("failed to parse record in {} at byte {offset}", path.display()))?;
    match probe.id {
        Some(RawId::Int(id)) => Ok(id),
        Some(RawId::Text(raw)) => Err(ArchiveError::MalformedRecordId {
            path: path.to_path_buf(),
            offset,
            raw,
        }
        .into()),
        None => Err(ArchiveError::MissingRecordId {
            path: path.to_path_buf(),
            offset,
        }
        .into()),
    }
}

pub fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}
