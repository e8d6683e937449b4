use std::env;
use std::path::{Path, PathBuf};

/// `.env` files in load order: the working directory, then the archivist
/// home (`$ARCHIVIST_HOME` or `~/.history-archivist`). Earlier files win
/// because loading never overrides a variable that is already set.
fn dotenv_candidates(
    cwd: Option<&Path>,
    archivist_home: Option<&Path>,
    home_dir: Option<&Path>,
) -> Vec<PathBuf> {
    let home = archivist_home
        .map(Path::to_path_buf)
        .or_else(|| home_dir.map(|dir| dir.join(".history-archivist")));
    let mut candidates: Vec<PathBuf> = Vec::with_capacity(2);
    for dir in [cwd.map(Path::to_path_buf), home].into_iter().flatten() {
        let file = dir.join(".env");
        if !candidates.contains(&file) {
            candidates.push(file);
        }
    }
    candidates
}

/// Existing `.env` files for this process, in load order.
pub fn dotenv_files() -> Vec<PathBuf> {
    let cwd = env::current_dir().ok();
    let archivist_home = env::var_os("ARCHIVIST_HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);
    let home_dir = dirs::home_dir();
    dotenv_candidates(cwd.as_deref(), archivist_home.as_deref(), home_dir.as_deref())
        .into_iter()
        .filter(|path| path.is_file())
        .collect()
}

/// Load every existing `.env` file. Returns the files that failed to parse;
/// this runs before logging is set up, so the caller decides how to report them.
pub fn load_dotenv() -> Vec<(PathBuf, dotenvy::Error)> {
    let mut failed = Vec::new();
    for path in dotenv_files() {
        if let Err(err) = dotenvy::from_path(&path) {
            failed.push((path, err));
        }
    }
    failed
}
