mod capture;
mod coordinator;
mod mirror;
mod retry;
mod table;

pub use coordinator::{acquire, fragment_path};

use tracing::info;

use crate::config::FetchConfig;
use crate::error::Result;
use crate::paster;
use crate::png::ImageHeader;

/// Download every fragment, then stack them into `config.output`.
pub async fn fetch(config: FetchConfig) -> Result<ImageHeader> {
    let summary = acquire(&config).await?;
    info!(
        fragments = summary.fragments,
        requests = summary.requests,
        duplicates = summary.duplicates,
        rejected = summary.rejected,
        failed = summary.failed,
        "all fragments obtained"
    );

    let dir = config.work_dir.clone();
    let output = config.output.clone();
    let total = config.fragments;
    tokio::task::spawn_blocking(move || paster::paste_fragments(&dir, total, &output)).await?
}
