mod archivist;
mod cli;
mod commands;
mod env_loader;
mod error;
mod logging;
mod remote;

fn main() {
    for (path, err) in env_loader::load_dotenv() {
        eprintln!("warning: ignoring {}: {err}", path.display());
    }

    if let Err(err) = cli::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
