// Studio logo compositing onto posters (top-right corner)

use reqwest::Client;
use std::path::{Path, PathBuf};

use crate::models::Studio;
use crate::services::http::RetryPolicy;

/// Logo height cap relative to the poster height
pub const MAX_HEIGHT_RATIO: f64 = 0.15;
/// Logo width cap relative to the poster width
pub const MAX_WIDTH_RATIO: f64 = 0.5;
/// Padding from the top/right edges relative to the poster width
pub const PADDING_RATIO: f64 = 0.02;

/// The server hands out a generated placeholder for studios without a logo
pub fn is_placeholder_logo(url: &str) -> bool {
    url.contains("default=true")
}

/// Placement of the scaled logo on the poster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub width: u32,
    pub height: u32,
    pub x: i64,
    pub y: i64,
}

/// Target logo height for a poster, before the width cap is applied
pub fn target_logo_height(poster_height: u32) -> u32 {
    (poster_height as f64 * MAX_HEIGHT_RATIO).round() as u32
}

/// Scale `logo` into the caps and anchor it top-right. `None` if any size degenerates.
pub fn placement(poster: (u32, u32), logo: (u32, u32)) -> Option<Placement> {
    let (pw, ph) = (poster.0 as f64, poster.1 as f64);
    let (lw, lh) = (logo.0 as f64, logo.1 as f64);
    if pw <= 0.0 || ph <= 0.0 || lw <= 0.0 || lh <= 0.0 {
        return None;
    }

    let mut scale = (ph * MAX_HEIGHT_RATIO) / lh;
    if lw * scale > pw * MAX_WIDTH_RATIO {
        scale = (pw * MAX_WIDTH_RATIO) / lw;
    }

    let width = (lw * scale).round() as i64;
    let height = (lh * scale).round() as i64;
    if width <= 0 || height <= 0 {
        return None;
    }

    let padding = (pw * PADDING_RATIO).round() as i64;
    Some(Placement {
        width: width as u32,
        height: height as u32,
        x: poster.0 as i64 - width - padding,
        y: padding,
    })
}

/// Cached logo path next to the poster, named after the studio
fn logo_cache_path(poster: &Path, studio_name: &str, ext: &str) -> PathBuf {
    let name = super::sanitize::safe_segment(studio_name);
    poster.with_file_name(format!(".{}-logo.{}", name, ext))
}

fn logo_extension(content_type: Option<&str>, url: &str) -> &'static str {
    let is_svg = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("svg"))
        || url.to_ascii_lowercase().split('?').next().unwrap_or_default().ends_with(".svg");
    if is_svg {
        "svg"
    } else {
        super::artwork::poster_extension(content_type, url).unwrap_or("png")
    }
}

/// Download the studio logo and composite it onto `poster`.
///
/// Returns whether the poster was modified. Every failure is logged and
/// swallowed.
pub async fn stamp_studio_logo(
    client: &Client,
    retry: RetryPolicy,
    poster: &Path,
    studio: &Studio,
    rsvg_convert: Option<&Path>,
) -> bool {
    let Some(url) = studio.image_path.as_deref().filter(|u| !u.trim().is_empty()) else {
        tracing::debug!("Studio has no logo, skipping overlay");
        return false;
    };
    if is_placeholder_logo(url) {
        tracing::debug!("Studio logo is the default placeholder, skipping overlay");
        return false;
    }
    if !tokio::fs::try_exists(poster).await.unwrap_or(false) {
        tracing::debug!("Poster {} not found, skipping overlay", poster.display());
        return false;
    }

    let downloaded = match crate::services::http::download(client, url, retry).await {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!("Studio logo download failed: {:#}", e);
            return false;
        }
    };

    let studio_name = studio.name.as_deref().unwrap_or("studio");
    let ext = logo_extension(downloaded.content_type.as_deref(), url);
    let cached = logo_cache_path(poster, studio_name, ext);
    if let Err(e) = tokio::fs::write(&cached, &downloaded.bytes).await {
        tracing::warn!("Failed to cache studio logo {}: {}", cached.display(), e);
        return false;
    }

    let poster_buf = poster.to_path_buf();
    let rsvg = rsvg_convert.map(Path::to_path_buf);
    let cached_logo = cached.clone();
    let result =
        tokio::task::spawn_blocking(move || composite::apply(&poster_buf, &cached_logo, rsvg.as_deref()))
            .await;

    let mut cleanup = vec![cached.clone()];
    if ext == "svg" {
        cleanup.push(cached.with_extension("png"));
    }
    let stamped = match result {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::warn!("Logo overlay skipped: {:#}", e);
            false
        }
        Err(e) => {
            tracing::warn!("Logo overlay task failed: {}", e);
            false
        }
    };

    for path in cleanup {
        let _ = tokio::fs::remove_file(&path).await;
    }

    if stamped {
        tracing::info!("Stamped studio logo onto {}", poster.display());
    }
    stamped
}

#[cfg(feature = "logo-overlay")]
mod composite {
    use anyhow::{Context, Result};
    use image::{imageops, DynamicImage, GenericImageView, ImageFormat, ImageReader};
    use std::path::{Path, PathBuf};
    use std::process::Command;

    use super::{placement, target_logo_height};

    fn find_rsvg_convert(configured: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = configured {
            return path.exists().then(|| path.to_path_buf());
        }
        ["/usr/bin/rsvg-convert", "/usr/local/bin/rsvg-convert", "/opt/homebrew/bin/rsvg-convert"]
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
    }

    /// Rasterise an SVG straight to the target height
    fn rasterise_svg(svg: &Path, height: u32, rsvg: Option<&Path>) -> Result<PathBuf> {
        let tool = find_rsvg_convert(rsvg).context("rsvg-convert not available")?;
        let png = svg.with_extension("png");

        let output = Command::new(&tool)
            .args(["-h", &height.to_string(), "-o"])
            .arg(&png)
            .arg(svg)
            .output()
            .with_context(|| format!("Failed to run rsvg-convert at '{}'", tool.display()))?;

        if !output.status.success() {
            anyhow::bail!(
                "rsvg-convert failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(png)
    }

    /// Composite `logo` onto `poster` in place. Returns any intermediate raster file.
    pub fn apply(poster: &Path, logo: &Path, rsvg: Option<&Path>) -> Result<Option<PathBuf>> {
        let reader = ImageReader::open(poster)?.with_guessed_format()?;
        let format = reader.format().context("Unknown poster format")?;
        let base = reader.decode().context("Failed to decode poster")?;
        let (pw, ph) = base.dimensions();

        let is_svg = logo
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("svg"));
        let (logo_img, raster) = if is_svg {
            let png = rasterise_svg(logo, target_logo_height(ph).max(1), rsvg)?;
            (image::open(&png).context("Failed to decode rasterised logo")?, Some(png))
        } else {
            (image::open(logo).context("Failed to decode logo")?, None)
        };

        let Some(place) = placement((pw, ph), logo_img.dimensions()) else {
            anyhow::bail!("Degenerate logo or poster dimensions");
        };

        let logo_scaled = logo_img.resize_exact(place.width, place.height, imageops::FilterType::Lanczos3);
        let mut canvas = base.to_rgba8();
        imageops::overlay(&mut canvas, &logo_scaled.to_rgba8(), place.x, place.y);

        let out = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8()),
            _ => DynamicImage::ImageRgba8(canvas),
        };
        out.save_with_format(poster, format)
            .with_context(|| format!("Failed to save {}", poster.display()))?;

        Ok(raster)
    }
}

#[cfg(not(feature = "logo-overlay"))]
mod composite {
    use anyhow::Result;
    use std::path::{Path, PathBuf};

    pub fn apply(_poster: &Path, _logo: &Path, _rsvg: Option<&Path>) -> Result<Option<PathBuf>> {
        anyhow::bail!("built without the logo-overlay feature")
    }
}
