// Path sanitizing for templated destinations

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::template::{self, TemplateError};
use super::VIDEO_EXTENSIONS;
use crate::models::Scene;

static RE_ILLEGAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[<>:"|?*]"#).unwrap());
static RE_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\\/]+").unwrap());

/// Clean a single path segment; never returns an empty string
pub fn safe_segment(segment: &str) -> String {
    let segment = segment.trim().replace(['\\', '/'], "_");
    let segment = RE_ILLEGAL.replace_all(&segment, "_");
    if segment.is_empty() || segment == "." || segment == ".." {
        "_".to_string()
    } else {
        segment.into_owned()
    }
}

/// Sanitize an expanded relative path and join it onto `target_root`.
///
/// `original_basename` is used when the expansion is empty, and its extension
/// is appended when the final segment does not already end in a video extension.
pub fn sanitize_relative(target_root: &Path, rel_path: &str, original_basename: &str) -> PathBuf {
    let segments: Vec<String> = RE_SEPARATORS
        .split(rel_path)
        .filter(|s| !s.is_empty())
        .map(safe_segment)
        .collect();

    let (_, ext) = template::split_filename(original_basename);

    let mut rel = PathBuf::new();
    if segments.is_empty() {
        rel.push(safe_segment(original_basename));
    } else {
        rel.extend(&segments);
    }

    if !ext.is_empty() && !has_media_extension(&rel, ext) {
        let mut name = rel.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(ext);
        rel.set_file_name(name);
    }

    target_root.join(rel)
}

/// `2024-05-01.Demo` has no media extension even though a dot is present
fn has_media_extension(path: &Path, original_ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            e.eq_ignore_ascii_case(original_ext)
                || VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str())
        })
        .unwrap_or(false)
}

/// Full destination for one file of a scene
pub fn build_target_path(
    scene: &Scene,
    file_path: &str,
    target_root: &str,
    filename_template: &str,
) -> Result<PathBuf, TemplateError> {
    let vars = template::build_vars(scene, file_path);
    let rel_path = template::expand(filename_template.trim(), &vars)?;
    Ok(sanitize_relative(
        Path::new(target_root.trim()),
        &rel_path,
        vars.text("original_basename"),
    ))
}
