use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, open_store};

#[derive(Debug, Clone)]
pub struct FilesOptions {
    pub entity_id: i64,
    pub out_dir: Option<PathBuf>,
}

pub fn run(opts: &FilesOptions) -> Result<CommandReport> {
    let store = open_store(opts.out_dir.as_deref())?;
    let mut report = CommandReport::new("files");

    let files = store.read_saved_files_list(opts.entity_id)?;
    report.detail(format!("chat={} files={}", opts.entity_id, files.len()));
    for file in files {
        report.detail(format!(
            "#{} [{}] {} {}",
            file.record_id,
            file.index,
            file.fs_original_name,
            file.path.display()
        ));
    }
    Ok(report)
}
