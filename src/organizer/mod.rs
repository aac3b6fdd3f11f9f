// Scene organize pipeline: template -> sanitize -> move -> sidecars/artwork

pub mod artwork;
pub mod mover;
pub mod nfo;
pub mod overlay;
pub mod posters;
pub mod sanitize;
pub mod template;

use anyhow::Result;
use reqwest::Client;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::Settings;
use crate::logging;
use crate::models::{Scene, VideoFile};
use crate::services::http::RetryPolicy;
use crate::services::stash::StashClient;
use crate::services::translate::{TranslateClient, Translation};
use artwork::ArtworkFetcher;
use mover::{FileMover, MoveOutcome};
use template::TemplateError;

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "ts",
];
pub const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass", "ssa", "sub", "idx", "vtt", "sup", "smi"];
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// Configuration errors: abort the affected unit of work, never the process
#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("target_root is not configured")]
    MissingTargetRoot,

    #[error("filename template failed: {0}")]
    Template(#[from] TemplateError),
}

/// Totals for one bulk run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub scanned: usize,
    pub organized: usize,
    pub moved: usize,
}

/// Per-scene state shared by its files
#[derive(Default)]
struct SceneState {
    translation: Option<Translation>,
    performers_done: bool,
}

pub struct Organizer {
    settings: Settings,
    mover: FileMover,
    artwork: ArtworkFetcher,
    translator: TranslateClient,
}

impl Organizer {
    /// Fails before any mutation when the settings lack a destination root
    pub fn new(settings: Settings, client: Client, retry: RetryPolicy) -> Result<Self, OrganizeError> {
        settings.validate()?;
        Ok(Self {
            mover: FileMover::new(settings.transfer_mode, settings.dry_run),
            artwork: ArtworkFetcher::new(client, retry, settings.dry_run),
            translator: TranslateClient::new(settings.translate.clone()),
            settings,
        })
    }

    pub fn with_rsvg_convert(mut self, path: Option<PathBuf>) -> Self {
        self.artwork = self.artwork.with_rsvg_convert(path);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn target_root(&self) -> &Path {
        Path::new(self.settings.target_root.trim())
    }

    /// Whether the organized filter lets this scene through
    pub fn accepts(&self, scene: &Scene) -> bool {
        !self.settings.move_only_organized || scene.organized
    }

    /// Run the pipeline for every file of `scene` regardless of the organized flag.
    /// Returns the number of files moved; per-file failures are logged and skipped.
    pub async fn process_files(&self, scene: &Scene) -> usize {
        if scene.files.is_empty() {
            tracing::info!("Scene {} has no files, skip", scene.id);
            return 0;
        }

        let mut state = SceneState::default();
        let mut moved = 0;
        for file in &scene.files {
            match self.process_file(scene, file, &mut state).await {
                Ok(true) => moved += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(
                    "Scene {} file {}: {:#}",
                    scene.id,
                    file.path.as_deref().unwrap_or(&file.id),
                    e
                ),
            }
        }

        tracing::info!("Scene {}: moved {} files", scene.id, moved);
        moved
    }

    /// Organized-filtered entry point used by task mode
    pub async fn process_scene(&self, scene: &Scene) -> usize {
        if !self.accepts(scene) {
            tracing::debug!("Scene {} is not organized, skip", scene.id);
            return 0;
        }
        self.process_files(scene).await
    }

    async fn process_file(&self, scene: &Scene, file: &VideoFile, state: &mut SceneState) -> Result<bool> {
        let Some(src) = file.path.as_deref().filter(|p| !p.is_empty()) else {
            tracing::warn!("File with id={} has no path, skip", file.id);
            return Ok(false);
        };

        let dst = sanitize::build_target_path(
            scene,
            src,
            &self.settings.target_root,
            &self.settings.filename_template,
        )
        .map_err(OrganizeError::from)?;

        let src = Path::new(src);
        let outcome = self.mover.relocate(src, &dst).await?;

        if outcome == MoveOutcome::Moved {
            match self.mover.relocate_subtitles(src, &dst).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Moved {} subtitle file(s) with {}", n, dst.display()),
                Err(e) => tracing::error!("Subtitle relocation failed for {}: {:#}", src.display(), e),
            }
        }

        if outcome.at_destination() {
            self.write_sidecars(scene, &dst, state).await;
        }

        Ok(outcome == MoveOutcome::Moved)
    }

    /// NFO, poster (+ logo) and performer assets for a video now at `video`
    async fn write_sidecars(&self, scene: &Scene, video: &Path, state: &mut SceneState) {
        if self.settings.write_nfo {
            if state.translation.is_none() {
                let translation = self
                    .translator
                    .translate_scene(scene.title(), scene.details())
                    .await;
                state.translation = Some(translation);
            }
            let translation = state.translation.clone().unwrap_or_default();

            let path = nfo::nfo_path(video);
            let result = match nfo::scene_nfo(scene, &translation) {
                Ok(xml) => nfo::write_document(&path, &xml, self.settings.dry_run).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::error!("Failed to write NFO {}: {:#}", path.display(), e);
            }
        }

        if self.settings.download_poster {
            match self.artwork.fetch_poster(scene, video).await {
                Ok(Some(poster)) if self.settings.overlay_studio_logo => {
                    self.artwork.overlay_logo(scene, &poster).await;
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Poster download failed for scene {}: {:#}", scene.id, e),
            }
        }

        if !state.performers_done {
            state.performers_done = true;
            self.artwork
                .fetch_performer_assets(
                    scene,
                    self.target_root(),
                    self.settings.download_actor_images,
                    self.settings.export_actor_nfo,
                )
                .await;
        }
    }

    /// Single-scene hook: returns the status message for the plugin output
    pub async fn run_hook(&self, stash: &StashClient, scene_id: &str) -> Result<String> {
        tracing::info!("Hook mode, processing single scene id={}", scene_id);

        let Some(scene) = stash.find_scene(scene_id).await? else {
            return Ok(format!("Scene {} not found", scene_id));
        };

        // Hook mode ignores `move_only_organized`
        if !scene.organized {
            tracing::info!("Scene {} is not organized=true, skip", scene_id);
            return Ok(format!("Scene {} not organized, skipped", scene_id));
        }

        let moved = self.process_files(&scene).await;
        Ok(format!(
            "Processed scene {}, moved {} file(s), dry_run={}",
            scene_id, moved, self.settings.dry_run
        ))
    }

    /// Bulk task: page through every scene and organize the accepted ones
    pub async fn run_task(&self, stash: &StashClient) -> Result<(RunSummary, String)> {
        tracing::info!("Task mode: scanning all scenes and moving organized ones");

        let scenes = fetch_all_scenes(stash, self.settings.per_page).await?;
        let total = scenes.len();
        let mut summary = RunSummary::default();

        for (i, scene) in scenes.iter().enumerate() {
            summary.scanned += 1;
            if self.accepts(scene) {
                summary.organized += 1;
                tracing::info!(
                    "Processing organized scene id={} title={:?}",
                    scene.id,
                    scene.title()
                );
                summary.moved += self.process_files(scene).await;
            }
            logging::progress((i + 1) as f64 / total as f64);
        }

        let message = format!(
            "Scanned {} scenes, organized=true: {}, moved files: {}, dry_run={}",
            summary.scanned, summary.organized, summary.moved, self.settings.dry_run
        );
        tracing::info!("{}", message);
        Ok((summary, message))
    }
}

/// All scenes, one page at a time until an empty page comes back
pub async fn fetch_all_scenes(stash: &StashClient, per_page: u32) -> Result<Vec<Scene>> {
    let mut all = Vec::new();
    let mut page = 1;
    loop {
        tracing::info!("Fetching scenes page={}, per_page={}", page, per_page);
        let scenes = stash.find_scenes_page(page, per_page).await?;
        if scenes.is_empty() {
            tracing::debug!("No more scenes at page={}, stop paging", page);
            break;
        }
        tracing::debug!("Got {} scenes in page={}", scenes.len(), page);
        all.extend(scenes);
        page += 1;
    }
    tracing::info!("Total scenes fetched: {}", all.len());
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslateSettings;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn settings(root: &Path) -> Settings {
        Settings {
            target_root: root.to_string_lossy().into_owned(),
            filename_template: "{studio}/{scene_date}.{scene_title}".to_string(),
            download_poster: false,
            download_actor_images: false,
            ..Settings::default()
        }
    }

    fn organizer(settings: Settings) -> Organizer {
        Organizer::new(settings, Client::new(), RetryPolicy::linear(1, Duration::ZERO)).unwrap()
    }

    fn scene_for(src: &Path, organized: bool) -> Scene {
        serde_json::from_value(json!({
            "id": "7",
            "title": "Demo",
            "date": "2024-05-01",
            "organized": organized,
            "details": "A plot",
            "studio": {"id": "1", "name": "Acme"},
            "performers": [{"name": "Jane Doe"}],
            "files": [{"id": "70", "path": src.to_string_lossy(), "duration": 120.0}],
        }))
        .unwrap()
    }

    #[test]
    fn test_missing_target_root_is_rejected_up_front() {
        let result = Organizer::new(Settings::default(), Client::new(), RetryPolicy::once());
        assert!(matches!(result, Err(OrganizeError::MissingTargetRoot)));
    }

    #[tokio::test]
    async fn test_organized_scene_moves_with_sidecars() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("in/video.mp4");
        std::fs::create_dir_all(src.parent().unwrap()).unwrap();
        std::fs::write(&src, "v").unwrap();
        std::fs::write(tmp.path().join("in/video.srt"), "s").unwrap();
        let root = tmp.path().join("lib");

        let org = organizer(settings(&root));
        let moved = org.process_scene(&scene_for(&src, true)).await;

        assert_eq!(moved, 1);
        let dst = root.join("Acme/2024-05-01.Demo.mp4");
        assert!(dst.exists());
        assert!(root.join("Acme/2024-05-01.Demo.srt").exists());
        let xml = std::fs::read_to_string(root.join("Acme/2024-05-01.Demo.nfo")).unwrap();
        assert!(xml.contains("<title>Demo</title>"));
        assert!(root.join("actors/Jane Doe/actor.nfo").exists());

        // Second run: already in place, nothing moved, sidecar regenerated
        let moved_again = org.process_files(&scene_for(&dst, true)).await;
        assert_eq!(moved_again, 0);
        assert!(root.join("Acme/2024-05-01.Demo.nfo").exists());
    }

    #[tokio::test]
    async fn test_unorganized_scene_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("video.mp4");
        std::fs::write(&src, "v").unwrap();

        let org = organizer(settings(&tmp.path().join("lib")));
        assert_eq!(org.process_scene(&scene_for(&src, false)).await, 0);
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_bad_template_only_skips_the_file() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("video.mp4");
        std::fs::write(&src, "v").unwrap();

        let mut s = settings(&tmp.path().join("lib"));
        s.filename_template = "{studio}/{missing_field}".to_string();
        let org = organizer(s);

        assert_eq!(org.process_scene(&scene_for(&src, true)).await, 0);
        assert!(src.exists());
        assert!(!tmp.path().join("lib").exists());
    }

    #[tokio::test]
    async fn test_dry_run_is_mutation_free() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("video.mp4");
        std::fs::write(&src, "v").unwrap();
        let root = tmp.path().join("lib");

        let mut s = settings(&root);
        s.dry_run = true;
        s.download_actor_images = true;
        let org = organizer(s);

        assert_eq!(org.process_scene(&scene_for(&src, true)).await, 1);
        assert!(src.exists());
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_translation_failure_falls_back_to_original() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(503);
        });

        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("video.mp4");
        std::fs::write(&src, "v").unwrap();
        let root = tmp.path().join("lib");

        let mut s = settings(&root);
        s.translate = TranslateSettings {
            enabled: true,
            translate_title: true,
            translate_plot: true,
            api_base: server.url("/v1"),
            api_key: "k".to_string(),
            model: "m".to_string(),
            ..TranslateSettings::default()
        };
        let org = organizer(s);

        assert_eq!(org.process_scene(&scene_for(&src, true)).await, 1);
        mock.assert_calls(2);
        let xml = std::fs::read_to_string(root.join("Acme/2024-05-01.Demo.nfo")).unwrap();
        assert!(xml.contains("<title>Demo</title>"));
        assert!(xml.contains("<plot>A plot</plot>"));
    }

    #[tokio::test]
    async fn test_hook_skips_unorganized_even_when_filter_off() {
        let server = MockServer::start_async().await;
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("video.mp4");
        std::fs::write(&src, "v").unwrap();

        server.mock(|when, then| {
            when.method(POST).path("/graphql").body_includes("findScene(id");
            then.status(200).json_body(json!({"data": {"findScene": {
                "id": "3",
                "organized": false,
                "files": [{"id": "30", "path": src.to_string_lossy(), "duration": 60.0}]
            }}}));
        });

        let stash = StashClient::new(Client::new(), server.url("/graphql"));
        let mut s = settings(&tmp.path().join("lib"));
        s.move_only_organized = false;
        let org = organizer(s);

        assert_eq!(
            org.run_hook(&stash, "3").await.unwrap(),
            "Scene 3 not organized, skipped"
        );
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_hook_and_task_messages() {
        let server = MockServer::start_async().await;
        let tmp = TempDir::new().unwrap();

        server.mock(|when, then| {
            when.method(POST).path("/graphql").body_includes("findScene(id");
            then.status(200).json_body(json!({
                "data": {"findScene": {"id": "3", "organized": false, "files": []}}
            }));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_includes("FindScenes")
                .body_includes(r#""page":1"#);
            then.status(200).json_body(json!({
                "data": {"findScenes": {"scenes": [
                    {"id": "1", "organized": true, "files": []},
                    {"id": "2", "organized": false, "files": []}
                ]}}
            }));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_includes("FindScenes")
                .body_includes(r#""page":2"#);
            then.status(200)
                .json_body(json!({"data": {"findScenes": {"scenes": []}}}));
        });

        let stash = StashClient::new(Client::new(), server.url("/graphql"));
        let org = organizer(settings(tmp.path()));

        assert_eq!(
            org.run_hook(&stash, "3").await.unwrap(),
            "Scene 3 not organized, skipped"
        );

        let (summary, message) = org.run_task(&stash).await.unwrap();
        assert_eq!(
            summary,
            RunSummary {
                scanned: 2,
                organized: 1,
                moved: 0
            }
        );
        assert_eq!(
            message,
            "Scanned 2 scenes, organized=true: 1, moved files: 0, dry_run=false"
        );
    }
}
