//! Checkpoint references and local atomic publish.

use std::path::{Path, PathBuf};

use sigma_core::SlotId;
use tracing::debug;

use crate::error::{DistributionError, DistributionResult};

/// A checkpoint file staged locally, tagged with the trainer that made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCheckpoint {
    pub path: PathBuf,
    /// Per-trainer version: how many checkpoints that trainer has signalled.
    pub version: u64,
    pub trainer: SlotId,
}

/// Hidden temp file in the same directory as `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.sigma-tmp"))
}

/// Copy `source` over `canonical` so readers see all of one or the other.
///
/// The copy goes to a temp sibling first and is renamed into place.
pub async fn publish_atomic(source: &Path, canonical: &Path) -> DistributionResult<()> {
    if let Some(dir) = canonical.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(DistributionError::io("create", dir))?;
    }
    let tmp = temp_path(canonical);
    tokio::fs::copy(source, &tmp)
        .await
        .map_err(DistributionError::io("copy", &tmp))?;
    if let Err(e) = tokio::fs::rename(&tmp, canonical).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(DistributionError::io("rename", canonical)(e));
    }
    debug!(from = %source.display(), to = %canonical.display(), "published");
    Ok(())
}
