use anyhow::Result;
use std::path::PathBuf;

use crate::archivist::message_reader::MessageReaderPool;
use crate::commands::{CommandReport, open_store};

#[derive(Debug, Clone, Default)]
pub struct SavedOptions {
    pub out_dir: Option<PathBuf>,
}

pub fn run(opts: &SavedOptions) -> Result<CommandReport> {
    let store = open_store(opts.out_dir.as_deref())?;
    let mut report = CommandReport::new("saved");
    report.detail(format!("out_dir={}", store.layout().root.display()));

    let entries = store.read_saved_entity_list()?;
    if entries.is_empty() {
        report.detail("no archived chats");
        return Ok(report);
    }

    let titles = store.title_index()?;
    let readers = MessageReaderPool::new();
    for entry in entries {
        let title = titles.resolve(entry.id, &entry.fs_title)?;
        // One line is enough for a size estimate.
        readers.read(&entry.path, 0, 1)?;
        let count = match readers.estimate_count(&entry.path)? {
            Some(n) => format!("~{n}"),
            None => "0".to_string(),
        };
        report.detail(format!("{} {} messages={count}", entry.id, title));
    }
    Ok(report)
}
