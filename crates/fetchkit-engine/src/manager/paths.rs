//! Cache destination planning and the atomic commit step.

use std::path::{Path, PathBuf};

use tokio::fs;

use fetchkit_core::resource::{DownloadError, DownloadResult};
use fetchkit_core::utils::cache_file_name;

/// Final cache path for a resource.
///
/// The namespace is partitioned by resource id so concurrent commits for
/// different resources can never collide.
pub(crate) fn cache_path(cache_dir: &Path, resource_id: &str) -> PathBuf {
    cache_dir.join(cache_file_name(resource_id))
}

/// Move a spooled file onto its final cache path.
///
/// Rename is atomic within one filesystem; across filesystems it degrades to
/// copy-then-unlink. Failures surface as cache-write errors which the
/// manager reclassifies as local download failures.
pub(crate) async fn commit_file(temp_file: &Path, final_path: &Path) -> DownloadResult<()> {
    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::cache_write(format!("create cache dir: {e}")))?;
    }

    match fs::rename(temp_file, final_path).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            fs::copy(temp_file, final_path).await.map_err(|copy_err| {
                DownloadError::cache_write(format!(
                    "rename failed ({rename_err}); copy fallback failed: {copy_err}"
                ))
            })?;
            if let Err(e) = fs::remove_file(temp_file).await {
                tracing::debug!(
                    target: "fetchkit.engine",
                    path = %temp_file.display(),
                    error = %e,
                    "Spool file left behind after copy fallback"
                );
            }
            Ok(())
        }
    }
}
