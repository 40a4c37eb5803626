#![deny(warnings)]

use clap::Parser;
use persistence::{default_sqlite_url, SqliteStore, Store};

#[derive(Parser, Debug)]
#[command(name = "migrate", about = "Create or upgrade the session database")]
struct Args {
    /// Database URL; defaults to the local saves file.
    #[arg(long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let url = args.url.as_deref().unwrap_or(default_sqlite_url());
    // Ensure directory exists
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .filter(|p| !p.contains(":memory:"));
    if let Some(path) = path {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = SqliteStore::connect(url).await?;
    let sessions = store.list_sessions().await?;
    println!("DB migrated at {} ({} saved sessions)", url, sessions.len());
    for s in sessions {
        println!("  #{} {} turn={} status={:?}", s.id, s.name, s.current_turn, s.status);
    }
    Ok(())
}
