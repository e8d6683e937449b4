use crate::error::ArchiveError;
use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

pub const MAX_NAME_BYTES: usize = 255;
const ELLIPSIS: &str = "…";

fn is_unsafe_char(c: char) -> bool {
    if c == '/' || c == ':' {
        return true;
    }
    cfg!(windows) && matches!(c, '\\' | '<' | '>' | '"' | '|' | '*' | '?')
}

pub fn escape_name(name: &str) -> String {
    name.chars()
        .map(|c| if is_unsafe_char(c) { '_' } else { c })
        .collect()
}

/// Clamp to `MAX_NAME_BYTES`, cutting on a char boundary and marking the cut.
pub fn clamp_name(name: &str) -> String {
    if name.len() <= MAX_NAME_BYTES {
        return name.to_string();
    }
    let mut end = MAX_NAME_BYTES - ELLIPSIS.len();
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{ELLIPSIS}", &name[..end])
}

pub fn id_prefix(id: i64) -> String {
    format!("{id}_")
}

pub fn entity_file_name(id: i64, title: &str) -> String {
    clamp_name(&format!("{}{}", id_prefix(id), escape_name(title)))
}

/// Split `{id}_{rest}` into its parts.
pub fn parse_id_prefix(name: &str) -> Option<(i64, &str)> {
    let digits_end = name
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && *c == '-')))
        .map(|(i, _)| i)?;
    if digits_end == 0 || name.as_bytes()[digits_end] != b'_' {
        return None;
    }
    let id = name[..digits_end].parse::<i64>().ok()?;
    Some((id, &name[digits_end + 1..]))
}

pub fn media_file_name(record_id: i64, index: u32, original_name: &str) -> String {
    let mut name = format!("{record_id}_Media");
    if index != 0 {
        name.push_str(&index.to_string());
    }
    if !original_name.is_empty() {
        name.push('_');
        name.push_str(&escape_name(original_name));
    }
    clamp_name(&name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFileName {
    pub record_id: i64,
    pub index: u32,
    pub fs_name: String,
}

/// Inverse of [`media_file_name`]. Also accepts the legacy `{id}_{name}` form.
pub fn parse_media_file_name(name: &str) -> Option<MediaFileName> {
    let (record_id, rest) = parse_id_prefix(name)?;

    if let Some(after_tag) = rest.strip_prefix("Media") {
        let digits = after_tag
            .bytes()
            .take_while(|b| b.is_ascii_digit())
            .count();
        let tail = &after_tag[digits..];
        let index = if digits == 0 {
            Some(0)
        } else {
            after_tag[..digits].parse::<u32>().ok()
        };
        if let Some(index) = index {
            if tail.is_empty() {
                return Some(MediaFileName {
                    record_id,
                    index,
                    fs_name: String::new(),
                });
            }
            if let Some(fs_name) = tail.strip_prefix('_') {
                return Some(MediaFileName {
                    record_id,
                    index,
                    fs_name: fs_name.to_string(),
                });
            }
        }
    }

    Some(MediaFileName {
        record_id,
        index: 0,
        fs_name: rest.to_string(),
    })
}

/// Existing entry in `dir` owned by `id`, without touching the filesystem.
pub fn find_existing(dir: &Path, id: i64) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to list {}", dir.display()));
        }
    };

    let prefix = id_prefix(id);
    let mut matches = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&prefix) {
            matches.push(name);
        }
    }

    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(dir.join(&matches[0]))),
        _ => {
            matches.sort();
            Err(ArchiveError::AmbiguousIdPrefix {
                dir: dir.to_path_buf(),
                prefix,
                matches,
            }
            .into())
        }
    }
}

/// Path for `id` inside `dir`, renaming a stale-titled entry when allowed.
pub fn resolve_path(dir: &Path, id: i64, default_suffix: &str, can_rename: bool) -> Result<PathBuf> {
    let correct_path = dir.join(entity_file_name(id, default_suffix));
    let Some(existing) = find_existing(dir, id)? else {
        return Ok(correct_path);
    };

    if existing == correct_path || !can_rename {
        return Ok(existing);
    }

    fs::rename(&existing, &correct_path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            existing.display(),
            correct_path.display()
        )
    })?;
    info!(
        from = %existing.display(),
        to = %correct_path.display(),
        "renamed archive entry after title change"
    );
    Ok(correct_path)
}
