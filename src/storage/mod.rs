use std::path::PathBuf;

use anyhow::anyhow;

pub mod config;
pub mod state;

pub fn app_data_dir() -> anyhow::Result<PathBuf> {
    dirs::data_dir()
        .map(|d| d.join("sharegrab"))
        .ok_or_else(|| anyhow!("could not determine data directory"))
}
