mod config;
mod errors;
mod files;
mod logging;
mod render;
mod security;
mod server;

use crate::config::Config;
use crate::files::{AllowedRoots, FileManager};
use anyhow::Context;
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("porter.toml");
    let mut explicit = false;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() { eprintln!("--config requires a path"); std::process::exit(2); }
                config_path = PathBuf::from(&args[i]);
                explicit = true;
            }
            _ => {}
        }
        i += 1;
    }

    let mut cfg = if explicit || config_path.exists() {
        Config::load(&config_path).with_context(|| format!("loading config {}", config_path.display()))?
    } else {
        Config::default()
    };
    cfg.apply_env();
    cfg.validate().context("validating config")?;

    logging::init(&cfg.logging);

    let roots = AllowedRoots::new(&cfg.roots.allowed, cfg.roots.symlinks).context("building allowed roots")?;
    let files = FileManager::new(roots).with_archive_limit(cfg.max_archive_bytes());

    let addr = format!("{}:{}", cfg.server.bind_addr, cfg.server.port);
    let root_list: Vec<String> = files.roots().paths().map(|p| p.display().to_string()).collect();
    info!(addr = %addr, roots = ?root_list, symlinks = ?files.roots().policy(), "porter ready");

    server::serve(cfg, files).await
}
