// File relocation with a never-overwrite collision policy

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::SUBTITLE_EXTENSIONS;
use crate::config::TransferMode;

/// What happened to one source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Relocated in this run (or would have been, in dry-run)
    Moved,
    /// Source already is the destination
    AlreadyInPlace,
    SourceMissing,
    /// Destination taken by another file; never overwritten
    DestinationExists,
}

impl MoveOutcome {
    /// True when the video sits at its destination after this step
    pub fn at_destination(&self) -> bool {
        matches!(self, MoveOutcome::Moved | MoveOutcome::AlreadyInPlace)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FileMover {
    mode: TransferMode,
    dry_run: bool,
}

impl FileMover {
    pub fn new(mode: TransferMode, dry_run: bool) -> Self {
        Self { mode, dry_run }
    }

    /// Relocate `src` to `dst` unless it is already there, missing, or would collide
    pub async fn relocate(&self, src: &Path, dst: &Path) -> Result<MoveOutcome> {
        if src == dst {
            tracing::info!(
                "Source and destination are the same, skipping: {} (dry_run={})",
                src.display(),
                self.dry_run
            );
            return Ok(MoveOutcome::AlreadyInPlace);
        }

        if !path_exists(src).await {
            tracing::warn!(
                "Source file does not exist, skipping: {} (dry_run={})",
                src.display(),
                self.dry_run
            );
            return Ok(MoveOutcome::SourceMissing);
        }

        if path_exists(dst).await {
            tracing::warn!(
                "Destination already exists, skipping: {} (dry_run={})",
                dst.display(),
                self.dry_run
            );
            return Ok(MoveOutcome::DestinationExists);
        }

        if !self.dry_run {
            if let Some(parent) = dst.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
            transfer(self.mode, src, dst).await?;
        }

        tracing::info!(
            "{} file: '{}' -> '{}' (dry_run={})",
            verb(self.mode),
            src.display(),
            dst.display(),
            self.dry_run
        );
        Ok(MoveOutcome::Moved)
    }

    /// Relocate subtitle siblings of `src` next to `dst`, renamed to the new stem.
    /// Returns how many were relocated.
    pub async fn relocate_subtitles(&self, src: &Path, dst: &Path) -> Result<usize> {
        let (Some(src_dir), Some(dst_dir)) = (src.parent(), dst.parent()) else {
            return Ok(0);
        };
        let src_stem = file_stem(src);
        let dst_stem = file_stem(dst);
        if src_stem.is_empty() {
            return Ok(0);
        }

        let mut relocated = 0;
        for sibling in subtitle_siblings(src_dir, src_stem).await? {
            let Some(name) = sibling.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(new_name) = substitute_stem(name, src_stem, dst_stem) else {
                continue;
            };

            let target = dst_dir.join(new_name);
            match self.relocate(&sibling, &target).await {
                Ok(MoveOutcome::Moved) => relocated += 1,
                Ok(_) => {}
                Err(e) => tracing::error!(
                    "Failed to move subtitle '{}' -> '{}': {:#}",
                    sibling.display(),
                    target.display(),
                    e
                ),
            }
        }

        Ok(relocated)
    }
}

fn verb(mode: TransferMode) -> &'static str {
    match mode {
        TransferMode::Move => "Moved",
        TransferMode::Copy => "Copied",
        TransferMode::Hardlink => "Hardlinked",
    }
}

fn file_stem(path: &Path) -> &str {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or_default()
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Rename `src` over to `dst`, falling back to copy+delete across devices
async fn transfer(mode: TransferMode, src: &Path, dst: &Path) -> Result<()> {
    match mode {
        TransferMode::Move => {
            if let Err(rename_err) = tokio::fs::rename(src, dst).await {
                tracing::debug!(
                    "rename {} failed ({}), falling back to copy+delete",
                    src.display(),
                    rename_err
                );
                if let Err(e) = tokio::fs::copy(src, dst).await {
                    // Partial copies must not look like a finished destination
                    let _ = tokio::fs::remove_file(dst).await;
                    return Err(e).with_context(|| {
                        format!("Failed to copy {} to {}", src.display(), dst.display())
                    });
                }
                if let Err(e) = tokio::fs::remove_file(src).await {
                    tracing::warn!("Copied {} but could not remove source: {}", src.display(), e);
                }
            }
        }
        TransferMode::Copy => {
            tokio::fs::copy(src, dst)
                .await
                .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
        }
        TransferMode::Hardlink => {
            tokio::fs::hard_link(src, dst)
                .await
                .with_context(|| format!("Failed to hardlink {} to {}", src.display(), dst.display()))?;
        }
    }
    Ok(())
}

/// Files in `dir` whose stem starts with `stem` and whose extension is a subtitle type
async fn subtitle_siblings(dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?;

    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if is_subtitle_sibling(&path, stem) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

fn is_subtitle_sibling(path: &Path, stem: &str) -> bool {
    let is_subtitle = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| SUBTITLE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);

    is_subtitle && file_stem(path).starts_with(stem)
}

/// Swap the leading `src_stem` of `file_name` for `dst_stem`.
///
/// `Movie.en.srt` with `Movie` -> `Film` gives `Film.en.srt`. Returns `None`
/// when `file_name` does not start with `src_stem`.
pub fn substitute_stem(file_name: &str, src_stem: &str, dst_stem: &str) -> Option<String> {
    file_name
        .strip_prefix(src_stem)
        .map(|rest| format!("{}{}", dst_stem, rest))
}
