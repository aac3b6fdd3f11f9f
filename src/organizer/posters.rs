// Rename `<x>-poster.<ext>` images that no longer match their directory's video

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::template::split_filename;

const POSTER_SUFFIX: &str = "-poster";

const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
const DEFAULT_VIDEO_EXTENSIONS: &[&str] = &[
    "m4v", "mp4", "mov", "wmv", "avi", "mpg", "mpeg", "rmvb", "rm", "flv", "asf", "mkv", "webm",
    "f4v",
];

/// Image and video extension sets, lowercase without the dot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionSets {
    pub image: BTreeSet<String>,
    pub video: BTreeSet<String>,
}

impl Default for ExtensionSets {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            video: DEFAULT_VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl ExtensionSets {
    /// Read `general.imageExtensions` / `general.videoExtensions` from the
    /// media server's configuration export. Falls back to the built-in lists.
    pub fn from_stash_config(path: &Path) -> Self {
        match Self::read(path) {
            Ok(sets) => {
                tracing::info!("Loaded extensions from {}", path.display());
                sets
            }
            Err(e) => {
                tracing::warn!("{:#}. Using built-in extensions.", e);
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Value = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Self::from_json(&config))
    }

    fn from_json(config: &Value) -> Self {
        let list = |key: &str| -> BTreeSet<String> {
            config
                .pointer(&format!("/general/{}", key))
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                        .filter(|e| !e.is_empty())
                        .collect()
                })
                .unwrap_or_default()
        };

        let defaults = Self::default();
        let image = list("imageExtensions");
        let video = list("videoExtensions");
        Self {
            image: if image.is_empty() { defaults.image } else { image },
            video: if video.is_empty() { defaults.video } else { video },
        }
    }

    fn classify(&self, file_name: &str) -> Option<FileKind> {
        let (_, ext) = split_filename(file_name);
        if ext.is_empty() {
            return None;
        }
        let ext = ext.to_ascii_lowercase();
        if self.image.contains(&ext) {
            Some(FileKind::Image)
        } else if self.video.contains(&ext) {
            Some(FileKind::Video)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Image,
    Video,
}

/// Counts for one run of the tool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixReport {
    pub renamed: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Renames for one directory's file names as `(from, to)` pairs.
///
/// Only directories holding exactly one video and at least one image qualify.
pub fn planned_renames(file_names: &[String], exts: &ExtensionSets) -> Vec<(String, String)> {
    let mut images = Vec::new();
    let mut videos = Vec::new();
    for name in file_names {
        match exts.classify(name) {
            Some(FileKind::Image) => images.push(name),
            Some(FileKind::Video) => videos.push(name),
            None => {}
        }
    }

    let [video] = videos.as_slice() else {
        return Vec::new();
    };
    let (video_stem, _) = split_filename(video);

    images
        .into_iter()
        .filter_map(|image| {
            let (stem, ext) = split_filename(image);
            let prefix = stem.strip_suffix(POSTER_SUFFIX)?;
            if prefix == video_stem {
                return None;
            }
            let target = format!("{}{}.{}", video_stem, POSTER_SUFFIX, ext.to_ascii_lowercase());
            Some((image.clone(), target))
        })
        .collect()
}

/// Walk `root` and fix mismatched poster names in place
pub fn fix_posters(root: &Path, exts: &ExtensionSets, dry_run: bool) -> Result<FixReport> {
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }

    let mut dirs: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(parent) = entry.path().parent() else {
            continue;
        };
        dirs.entry(parent.to_path_buf())
            .or_default()
            .push(entry.file_name().to_string_lossy().into_owned());
    }

    let mut report = FixReport::default();
    for (dir, mut names) in dirs {
        names.sort();
        // Targets renamed earlier in this directory, including dry-run ones
        let mut claimed: HashSet<PathBuf> = HashSet::new();
        for (from, to) in planned_renames(&names, exts) {
            let src = dir.join(&from);
            let dst = dir.join(&to);

            if claimed.contains(&dst) || dst.exists() {
                tracing::warn!("SKIP {} -> {} (target exists)", src.display(), to);
                report.skipped += 1;
                continue;
            }

            if dry_run {
                tracing::info!("RENAME {} -> {} (dry_run=true)", src.display(), to);
                report.renamed += 1;
                claimed.insert(dst);
                continue;
            }

            match std::fs::rename(&src, &dst) {
                Ok(()) => {
                    tracing::info!("RENAME {} -> {}", src.display(), to);
                    report.renamed += 1;
                    claimed.insert(dst);
                }
                Err(e) => {
                    tracing::error!("ERROR rename failed: {} -> {}: {}", src.display(), to, e);
                    report.errors += 1;
                }
            }
        }
    }

    tracing::info!(
        "Poster fix done: {} renamed, {} skipped, {} errors",
        report.renamed,
        report.skipped,
        report.errors
    );
    Ok(report)
}
