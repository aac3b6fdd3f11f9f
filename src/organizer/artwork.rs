// Artwork: scene poster and per-performer assets

use anyhow::{Context, Result};
use reqwest::Client;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::nfo;
use super::overlay;
use super::sanitize::safe_segment;
use super::IMAGE_EXTENSIONS;
use crate::models::Scene;
use crate::services::http::{self, RetryPolicy};

pub const ACTORS_DIR: &str = "actors";
pub const ACTOR_IMAGE: &str = "folder.jpg";
pub const ACTOR_NFO: &str = "actor.nfo";

/// Map a declared content type to a known image extension
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

/// Known image extension from the URL path, ignoring query strings
pub fn extension_for_url(url: &str) -> Option<&'static str> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let ext = Path::new(parsed.path())
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    let ext = if ext == "jpeg" { "jpg".to_string() } else { ext };
    IMAGE_EXTENSIONS.iter().copied().find(|known| *known == ext)
}

/// Content type first, then URL path; `None` means "no extension"
pub fn poster_extension(content_type: Option<&str>, url: &str) -> Option<&'static str> {
    content_type
        .and_then(extension_for_content_type)
        .or_else(|| extension_for_url(url))
}

/// `<dir>/<video stem>-poster` without extension
pub fn poster_base(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    video.with_file_name(format!("{}-poster", stem))
}

fn with_suffix(base: &Path, ext: Option<&str>) -> PathBuf {
    match ext {
        Some(ext) => {
            let mut name = base.as_os_str().to_os_string();
            name.push(".");
            name.push(ext);
            PathBuf::from(name)
        }
        None => base.to_path_buf(),
    }
}

/// Existing poster for `base` under any known image extension, in any case (or none)
pub async fn existing_poster(base: &Path) -> Option<PathBuf> {
    if tokio::fs::try_exists(base).await.unwrap_or(false) {
        return Some(base.to_path_buf());
    }

    let stem = base.file_name()?.to_str()?;
    let mut entries = tokio::fs::read_dir(base.parent()?).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(ext) = name
            .to_str()
            .and_then(|n| n.strip_prefix(stem))
            .and_then(|rest| rest.strip_prefix('.'))
        else {
            continue;
        };
        if IMAGE_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)) {
            return Some(entry.path());
        }
    }
    None
}

/// Downloads artwork through the authenticated media-server session
pub struct ArtworkFetcher {
    client: Client,
    retry: RetryPolicy,
    dry_run: bool,
    rsvg_convert: Option<PathBuf>,
}

impl ArtworkFetcher {
    pub fn new(client: Client, retry: RetryPolicy, dry_run: bool) -> Self {
        Self {
            client,
            retry,
            dry_run,
            rsvg_convert: None,
        }
    }

    pub fn with_rsvg_convert(mut self, path: Option<PathBuf>) -> Self {
        self.rsvg_convert = path;
        self
    }

    /// Download the scene screenshot as `<stem>-poster.<ext>` next to `video`.
    /// Returns the new poster path; `None` when nothing was downloaded.
    pub async fn fetch_poster(&self, scene: &Scene, video: &Path) -> Result<Option<PathBuf>> {
        let Some(url) = scene
            .paths
            .screenshot
            .as_deref()
            .filter(|u| !u.trim().is_empty())
        else {
            tracing::debug!("Scene {} has no screenshot, skipping poster", scene.id);
            return Ok(None);
        };

        let base = poster_base(video);
        if let Some(existing) = existing_poster(&base).await {
            tracing::info!(
                "Poster already exists, skipping: {} (dry_run={})",
                existing.display(),
                self.dry_run
            );
            return Ok(None);
        }

        if self.dry_run {
            tracing::info!(
                "Downloaded poster: '{}' -> '{}.*' (dry_run=true)",
                url,
                base.display()
            );
            return Ok(None);
        }

        let downloaded = http::download(&self.client, url, self.retry).await?;
        let ext = poster_extension(downloaded.content_type.as_deref(), url);
        let path = with_suffix(&base, ext);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &downloaded.bytes)
            .await
            .with_context(|| format!("Failed to write poster {}", path.display()))?;

        tracing::info!(
            "Downloaded poster: '{}' -> '{}' (dry_run=false)",
            url,
            path.display()
        );
        Ok(Some(path))
    }

    /// Stamp the studio logo onto a freshly downloaded poster; never fails the run
    pub async fn overlay_logo(&self, scene: &Scene, poster: &Path) -> bool {
        let Some(studio) = scene.studio.as_ref() else {
            return false;
        };
        overlay::stamp_studio_logo(
            &self.client,
            self.retry,
            poster,
            studio,
            self.rsvg_convert.as_deref(),
        )
        .await
    }

    /// Per-performer `actors/<name>/` folders with profile image and sidecar.
    /// Returns the number of performer folders handled.
    pub async fn fetch_performer_assets(
        &self,
        scene: &Scene,
        target_root: &Path,
        download_images: bool,
        write_nfo: bool,
    ) -> usize {
        if !download_images && !write_nfo {
            return 0;
        }

        let mut seen = HashSet::new();
        let mut handled = 0;

        for performer in &scene.performers {
            let Some(name) = performer
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
            else {
                continue;
            };
            let folder_name = safe_segment(name);
            if !seen.insert(folder_name.clone()) {
                continue;
            }

            let dir = target_root.join(ACTORS_DIR).join(&folder_name);
            if !self.dry_run {
                if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                    tracing::error!("Failed to create {}: {}", dir.display(), e);
                    continue;
                }
            }

            if download_images {
                if let Some(url) = performer
                    .image_path
                    .as_deref()
                    .filter(|u| !u.trim().is_empty())
                {
                    if let Err(e) = self.fetch_performer_image(url, &dir.join(ACTOR_IMAGE)).await {
                        tracing::error!("Performer image for '{}' failed: {:#}", name, e);
                    }
                }
            }

            if write_nfo {
                let path = dir.join(ACTOR_NFO);
                let result = match nfo::performer_nfo(performer) {
                    Ok(xml) => nfo::write_document(&path, &xml, self.dry_run).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    tracing::error!("Performer sidecar for '{}' failed: {:#}", name, e);
                }
            }

            handled += 1;
        }

        handled
    }

    async fn fetch_performer_image(&self, url: &str, path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::debug!("Performer image already exists: {}", path.display());
            return Ok(());
        }
        if self.dry_run {
            tracing::info!(
                "Downloaded performer image: '{}' -> '{}' (dry_run=true)",
                url,
                path.display()
            );
            return Ok(());
        }

        let downloaded = http::download(&self.client, url, self.retry).await?;
        tokio::fs::write(path, &downloaded.bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(
            "Downloaded performer image: '{}' -> '{}' (dry_run=false)",
            url,
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fetcher(dry_run: bool) -> ArtworkFetcher {
        ArtworkFetcher::new(Client::new(), RetryPolicy::linear(3, Duration::ZERO), dry_run)
    }

    fn scene_with(screenshot: &str, performers: serde_json::Value) -> Scene {
        serde_json::from_value(json!({
            "id": "1",
            "paths": {"screenshot": screenshot},
            "performers": performers,
        }))
        .unwrap()
    }

    #[test]
    fn test_extension_inference() {
        assert_eq!(extension_for_content_type("image/webp"), Some("webp"));
        assert_eq!(extension_for_content_type("image/JPEG; charset=binary"), Some("jpg"));
        assert_eq!(extension_for_content_type("application/octet-stream"), None);
        assert_eq!(extension_for_url("http://h/scene/1/screenshot.png?t=1"), Some("png"));
        assert_eq!(extension_for_url("http://h/img.JPEG"), Some("jpg"));
        assert_eq!(extension_for_url("http://h/scene/1/screenshot"), None);
        assert_eq!(poster_extension(None, "http://h/a"), None);
        assert_eq!(poster_extension(Some("image/gif"), "http://h/a.png"), Some("gif"));
    }

    #[test]
    fn test_poster_base() {
        assert_eq!(
            poster_base(Path::new("/lib/Acme/2024-05-01.Demo.mp4")),
            PathBuf::from("/lib/Acme/2024-05-01.Demo-poster")
        );
    }

    #[tokio::test]
    async fn test_webp_poster_gets_webp_suffix() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/scene/1/screenshot");
            then.status(200)
                .header("content-type", "image/webp")
                .body("webp-bytes");
        });

        let tmp = TempDir::new().unwrap();
        let video = tmp.path().join("Demo.mp4");
        let scene = scene_with(&server.url("/scene/1/screenshot"), json!([]));

        let poster = fetcher(false).fetch_poster(&scene, &video).await.unwrap();

        mock.assert();
        assert_eq!(poster, Some(tmp.path().join("Demo-poster.webp")));
        assert_eq!(std::fs::read(tmp.path().join("Demo-poster.webp")).unwrap(), b"webp-bytes");
    }

    #[tokio::test]
    async fn test_existing_poster_is_kept() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/shot");
            then.status(200).header("content-type", "image/jpeg").body("new");
        });

        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Demo-poster.png"), "old").unwrap();
        let scene = scene_with(&server.url("/shot"), json!([]));

        let poster = fetcher(false)
            .fetch_poster(&scene, &tmp.path().join("Demo.mp4"))
            .await
            .unwrap();

        assert_eq!(poster, None);
        mock.assert_calls(0);
    }

    #[tokio::test]
    async fn test_existing_uppercase_poster_is_kept() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/shot");
            then.status(200).header("content-type", "image/jpeg").body("new");
        });

        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Demo-poster.JPG"), "old").unwrap();
        std::fs::write(tmp.path().join("Demo-poster2.jpg"), "other").unwrap();
        let scene = scene_with(&server.url("/shot"), json!([]));

        let poster = fetcher(false)
            .fetch_poster(&scene, &tmp.path().join("Demo.mp4"))
            .await
            .unwrap();

        assert_eq!(poster, None);
        mock.assert_calls(0);
        assert_eq!(
            existing_poster(&tmp.path().join("Demo-poster")).await,
            Some(tmp.path().join("Demo-poster.JPG"))
        );
    }

    #[tokio::test]
    async fn test_failed_download_retries_then_errors() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/shot");
            then.status(500);
        });

        let tmp = TempDir::new().unwrap();
        let scene = scene_with(&server.url("/shot"), json!([]));
        let result = fetcher(false)
            .fetch_poster(&scene, &tmp.path().join("Demo.mp4"))
            .await;

        assert!(result.is_err());
        mock.assert_calls(3);
        assert!(existing_poster(&tmp.path().join("Demo-poster")).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_performers_share_one_folder() {
        let server = MockServer::start_async().await;
        let image = server.mock(|when, then| {
            when.method(GET).path("/performer/1/image");
            then.status(200).header("content-type", "image/jpeg").body("jpg");
        });

        let tmp = TempDir::new().unwrap();
        let url = server.url("/performer/1/image");
        let scene = scene_with(
            "",
            json!([
                {"name": "Jane Doe", "image_path": url, "gender": "FEMALE"},
                {"name": "Jane Doe", "image_path": url},
                {"name": "A:B"}
            ]),
        );

        let handled = fetcher(false)
            .fetch_performer_assets(&scene, tmp.path(), true, true)
            .await;

        assert_eq!(handled, 2);
        image.assert_calls(1);
        let jane = tmp.path().join("actors/Jane Doe");
        assert_eq!(std::fs::read(jane.join(ACTOR_IMAGE)).unwrap(), b"jpg");
        let xml = std::fs::read_to_string(jane.join(ACTOR_NFO)).unwrap();
        assert!(xml.contains("<gender>FEMALE</gender>"));
        assert!(tmp.path().join("actors/A_B/actor.nfo").exists());
        assert_eq!(std::fs::read_dir(tmp.path().join("actors")).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_creates_nothing() {
        let tmp = TempDir::new().unwrap();
        let scene = scene_with(
            "http://127.0.0.1:1/never",
            json!([{"name": "Jane Doe", "image_path": "http://127.0.0.1:1/img"}]),
        );
        let f = fetcher(true);

        assert_eq!(f.fetch_poster(&scene, &tmp.path().join("v.mp4")).await.unwrap(), None);
        assert_eq!(f.fetch_performer_assets(&scene, tmp.path(), true, true).await, 1);
        assert!(!tmp.path().join("actors").exists());
    }
}
