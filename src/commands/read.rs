use anyhow::Result;
use serde_json::Value;
use std::path::PathBuf;

use crate::archivist::message_reader::WindowedMessageReader;
use crate::archivist::record::Record;
use crate::archivist::util::truncate_with_ellipsis;
use crate::commands::{CommandReport, open_store};

const TEXT_PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub entity_id: i64,
    pub offset: usize,
    pub limit: usize,
    pub out_dir: Option<PathBuf>,
}

fn preview(record: &Record) -> String {
    match record.get("Message") {
        Some(Value::String(text)) if !text.is_empty() => truncate_with_ellipsis(text, TEXT_PREVIEW_CHARS),
        _ => match record.get("Media").and_then(|m| m.get("_")).and_then(Value::as_str) {
            Some(kind) => format!("[{kind}]"),
            None => String::new(),
        },
    }
}

pub fn run(opts: &ReadOptions) -> Result<CommandReport> {
    let store = open_store(opts.out_dir.as_deref())?;
    let mut report = CommandReport::new("read");

    let entries = store.read_saved_entity_list()?;
    let Some(entry) = entries.into_iter().find(|e| e.id == opts.entity_id) else {
        report.issue(format!("no archived chat with id {}", opts.entity_id));
        return Ok(report);
    };
    let title = store.resolve_title(entry.id, &entry.fs_title)?;
    report.detail(format!("chat={} {}", entry.id, title));

    let mut reader = WindowedMessageReader::new(&entry.path);
    let (records, has_more) = reader.read(opts.offset, opts.limit)?;
    for record in &records {
        let id = record.require_id()?;
        report.detail(format!("#{id} {}", preview(record)));
    }
    report.detail(format!(
        "offset={} returned={} has_more={has_more}",
        opts.offset,
        records.len()
    ));
    Ok(report)
}
