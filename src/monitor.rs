// Polling monitor: scan the download folder, identify new scenes, move scraped ones

use anyhow::Result;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::logging;
use crate::models::Scene;
use crate::organizer::Organizer;
use crate::services::stash::StashClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MonitorMode {
    /// Trigger a library scan only
    #[value(name = "scan_only")]
    ScanOnly,
    /// Move scraped scenes under the download path
    #[value(name = "move_only")]
    MoveOnly,
    /// Scan, identify, then move
    #[default]
    #[value(name = "check_and_move")]
    CheckAndMove,
    /// Repeat check_and_move on an interval until interrupted
    #[value(name = "auto_monitor")]
    AutoMonitor,
}

impl MonitorMode {
    fn needs_download_path(self) -> bool {
        !matches!(self, MonitorMode::ScanOnly)
    }
}

impl fmt::Display for MonitorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorMode::ScanOnly => "scan_only",
            MonitorMode::MoveOnly => "move_only",
            MonitorMode::CheckAndMove => "check_and_move",
            MonitorMode::AutoMonitor => "auto_monitor",
        };
        f.write_str(name)
    }
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

pub struct AutoMover {
    stash: StashClient,
    organizer: Organizer,
    config: MonitorConfig,
}

impl AutoMover {
    pub fn new(stash: StashClient, organizer: Organizer, config: MonitorConfig) -> Self {
        Self {
            stash,
            organizer,
            config,
        }
    }

    /// Whether the scene's metadata is complete enough to move
    pub fn is_scraped(&self, scene: &Scene) -> bool {
        if self.config.use_organized_flag {
            return scene.organized;
        }

        let has_studio = scene.studio.is_some();
        let has_performers = !scene.performers.is_empty();
        let has_details = !scene.details().trim().is_empty() || !scene.title().trim().is_empty();

        if self.config.require_studio && !has_studio {
            return false;
        }
        if self.config.require_performers && !has_performers {
            return false;
        }
        has_details || has_studio || has_performers
    }

    fn download_path(&self) -> &str {
        self.config.download_path.trim()
    }

    /// Run one mode to completion and return a status message
    pub async fn run(&self, mode: MonitorMode, cancel: CancellationToken) -> Result<String> {
        if mode.needs_download_path() && self.download_path().is_empty() {
            anyhow::bail!("monitor.download_path is required for {}", mode);
        }
        tracing::info!("Monitor mode: {}", mode);

        match mode {
            MonitorMode::ScanOnly => {
                self.scan_only().await?;
                Ok("Scan triggered".to_string())
            }
            MonitorMode::MoveOnly => {
                let moved = self.move_only().await?;
                Ok(format!("Moved {} file(s)", moved))
            }
            MonitorMode::CheckAndMove => {
                let moved = self.check_and_move().await?;
                Ok(format!("Moved {} file(s)", moved))
            }
            MonitorMode::AutoMonitor => {
                let cycles = self.auto_monitor(cancel).await;
                Ok(format!("Monitor stopped after {} cycle(s)", cycles))
            }
        }
    }

    pub async fn scan_only(&self) -> Result<()> {
        if self.config.auto_scan {
            self.stash.metadata_scan().await?;
        } else {
            tracing::info!("auto_scan is disabled, nothing to do");
        }
        Ok(())
    }

    /// Scenes under the download path ready to move
    async fn scraped_scenes(&self) -> Result<Vec<Scene>> {
        let scenes = if self.config.use_organized_flag {
            self.stash
                .find_scenes_in_path(self.download_path(), Some(true))
                .await?
        } else {
            self.stash
                .find_scenes_in_path(self.download_path(), Some(false))
                .await?
                .into_iter()
                .filter(|s| self.is_scraped(s))
                .collect()
        };
        tracing::debug!("{} scraped scene(s) under {}", scenes.len(), self.download_path());
        Ok(scenes)
    }

    /// Organize one scene; without the organized flag, mark it so it is not picked up again
    async fn move_scene(&self, scene: &Scene) -> usize {
        let moved = self.organizer.process_files(scene).await;
        if moved > 0 && !self.config.use_organized_flag && !self.organizer.settings().dry_run {
            if let Err(e) = self.stash.update_scene_organized(&scene.id, true).await {
                tracing::error!("Failed to mark scene {} organized: {:#}", scene.id, e);
            }
        }
        moved
    }

    pub async fn move_only(&self) -> Result<usize> {
        let scenes = self.scraped_scenes().await?;
        let mut moved = 0;
        for scene in &scenes {
            moved += self.move_scene(scene).await;
        }
        tracing::info!("Moved {} file(s) in total", moved);
        Ok(moved)
    }

    pub async fn check_and_move(&self) -> Result<usize> {
        logging::progress(0.1);
        if self.config.auto_scan {
            self.stash.metadata_scan().await?;
            tokio::time::sleep(secs(self.config.scan_settle_secs)).await;
        }

        logging::progress(0.3);
        let pending = self
            .stash
            .find_scenes_in_path(self.download_path(), Some(false))
            .await?;
        if pending.is_empty() {
            tracing::info!("No new scenes under {}", self.download_path());
            logging::progress(1.0);
            return Ok(0);
        }
        tracing::info!("Found {} unorganized scene(s)", pending.len());

        if self.config.auto_identify {
            logging::progress(0.4);
            let total = pending.len();
            for (i, scene) in pending.iter().enumerate() {
                if self.config.use_organized_flag || !self.is_scraped(scene) {
                    if let Err(e) = self.stash.identify_scene(&scene.id).await {
                        tracing::warn!("Identify failed for scene {}: {:#}", scene.id, e);
                    }
                    tokio::time::sleep(secs(self.config.identify_delay_secs)).await;
                }
                logging::progress(0.4 + 0.3 * (i + 1) as f64 / total as f64);
            }
            tokio::time::sleep(secs(self.config.identify_settle_secs)).await;
        }

        let scenes = self.scraped_scenes().await?;
        logging::progress(0.7);

        let total = scenes.len();
        let mut moved = 0;
        for (i, scene) in scenes.iter().enumerate() {
            moved += self.move_scene(scene).await;
            logging::progress(0.7 + 0.3 * (i + 1) as f64 / total as f64);
        }

        logging::progress(1.0);
        tracing::info!("Moved {} file(s) in total", moved);
        Ok(moved)
    }

    /// Loop check_and_move until `cancel` fires. Returns the number of cycles started.
    pub async fn auto_monitor(&self, cancel: CancellationToken) -> u64 {
        let interval = secs(self.config.check_interval_secs);
        let backoff = secs(self.config.error_backoff_secs);
        tracing::info!("Auto monitor started, interval {}s", interval.as_secs());

        let mut cycle = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            cycle += 1;
            tracing::info!("Check cycle {}", cycle);

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.check_and_move() => result,
            };

            let wait = match result {
                Ok(moved) => {
                    tracing::info!(
                        "Cycle {} moved {} file(s), next check in {}s",
                        cycle,
                        moved,
                        interval.as_secs()
                    );
                    interval
                }
                Err(e) => {
                    tracing::error!("Cycle {} failed: {:#}", cycle, e);
                    backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::info!("Auto monitor stopped");
        cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::services::http::RetryPolicy;
    use httpmock::prelude::*;
    use reqwest::Client;
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    fn quick_config(download_path: &str) -> MonitorConfig {
        MonitorConfig {
            download_path: download_path.to_string(),
            check_interval_secs: 0,
            error_backoff_secs: 0,
            scan_settle_secs: 0,
            identify_delay_secs: 0,
            identify_settle_secs: 0,
            ..MonitorConfig::default()
        }
    }

    fn mover(server_url: String, root: &Path, config: MonitorConfig) -> AutoMover {
        let settings = Settings {
            target_root: root.to_string_lossy().into_owned(),
            filename_template: "{studio}/{original_basename}".to_string(),
            download_poster: false,
            download_actor_images: false,
            export_actor_nfo: false,
            write_nfo: false,
            ..Settings::default()
        };
        let organizer = Organizer::new(settings, Client::new(), RetryPolicy::once()).unwrap();
        AutoMover::new(StashClient::new(Client::new(), server_url), organizer, config)
    }

    fn scene(json: serde_json::Value) -> Scene {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_is_scraped_heuristic() {
        let tmp = TempDir::new().unwrap();
        let mut config = quick_config("/downloads");
        config.use_organized_flag = false;
        let m = mover("http://127.0.0.1:1/graphql".into(), tmp.path(), config);

        assert!(m.is_scraped(&scene(json!({"id": "1", "studio": {"name": "Acme"}}))));
        assert!(!m.is_scraped(&scene(json!({"id": "2", "title": "Only a title"}))));

        let mut lenient = quick_config("/downloads");
        lenient.use_organized_flag = false;
        lenient.require_studio = false;
        let m = mover("http://127.0.0.1:1/graphql".into(), tmp.path(), lenient);
        assert!(m.is_scraped(&scene(json!({"id": "2", "title": "Only a title"}))));
        assert!(!m.is_scraped(&scene(json!({"id": "3"}))));
    }

    #[test]
    fn test_organized_flag_decides_when_enabled() {
        let tmp = TempDir::new().unwrap();
        let m = mover("http://127.0.0.1:1/graphql".into(), tmp.path(), quick_config("/d"));
        assert!(m.is_scraped(&scene(json!({"id": "1", "organized": true}))));
        assert!(!m.is_scraped(&scene(json!({"id": "2", "studio": {"name": "Acme"}}))));
    }

    #[tokio::test]
    async fn test_move_modes_require_download_path() {
        let tmp = TempDir::new().unwrap();
        let m = mover("http://127.0.0.1:1/graphql".into(), tmp.path(), quick_config(""));
        let err = m
            .run(MonitorMode::MoveOnly, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("download_path"));
    }

    #[tokio::test]
    async fn test_move_only_marks_scene_organized() {
        let server = MockServer::start_async().await;
        let tmp = TempDir::new().unwrap();
        let downloads = tmp.path().join("downloads");
        std::fs::create_dir_all(&downloads).unwrap();
        let src = downloads.join("clip.mp4");
        std::fs::write(&src, "v").unwrap();

        server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_includes("FindScenesInPath");
            then.status(200).json_body(json!({"data": {"findScenes": {"scenes": [
                {"id": "5", "title": "Clip", "studio": {"name": "Acme"},
                 "files": [{"id": "50", "path": src.to_string_lossy()}]},
                {"id": "6", "title": "Bare"}
            ]}}}));
        });
        let update = server.mock(|when, then| {
            when.method(POST).path("/graphql").body_includes("SceneUpdate");
            then.status(200)
                .json_body(json!({"data": {"sceneUpdate": {"id": "5"}}}));
        });

        let mut config = quick_config(&downloads.to_string_lossy());
        config.use_organized_flag = false;
        let lib = tmp.path().join("lib");
        let m = mover(server.url("/graphql"), &lib, config);

        assert_eq!(m.move_only().await.unwrap(), 1);
        assert!(lib.join("Acme/clip.mp4").exists());
        update.assert_calls(1);
    }

    #[tokio::test]
    async fn test_check_and_move_identifies_then_moves() {
        let server = MockServer::start_async().await;
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("clip.mp4");
        std::fs::write(&src, "v").unwrap();

        let scan = server.mock(|when, then| {
            when.method(POST).path("/graphql").body_includes("MetadataScan");
            then.status(200)
                .json_body(json!({"data": {"metadataScan": "11"}}));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_includes("FindScenesInPath")
                .body_includes(r#""organized":false"#);
            then.status(200).json_body(json!({"data": {"findScenes": {"scenes": [
                {"id": "5", "organized": false}
            ]}}}));
        });
        let identify = server.mock(|when, then| {
            when.method(POST).path("/graphql").body_includes("metadataIdentify");
            then.status(200)
                .json_body(json!({"data": {"metadataIdentify": "12"}}));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_includes("FindScenesInPath")
                .body_includes(r#""organized":true"#);
            then.status(200).json_body(json!({"data": {"findScenes": {"scenes": [
                {"id": "5", "organized": true, "studio": {"name": "Acme"},
                 "files": [{"id": "50", "path": src.to_string_lossy()}]}
            ]}}}));
        });

        let lib = tmp.path().join("lib");
        let m = mover(server.url("/graphql"), &lib, quick_config(&tmp.path().to_string_lossy()));

        assert_eq!(m.check_and_move().await.unwrap(), 1);
        scan.assert_calls(1);
        identify.assert_calls(1);
        assert!(lib.join("Acme/clip.mp4").exists());
    }

    #[tokio::test]
    async fn test_auto_monitor_stops_when_cancelled() {
        let tmp = TempDir::new().unwrap();
        let m = mover("http://127.0.0.1:1/graphql".into(), tmp.path(), quick_config("/d"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(m.auto_monitor(cancel).await, 0);
    }

    #[tokio::test]
    async fn test_auto_monitor_survives_failed_cycles() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/graphql");
            then.status(500);
        });

        let tmp = TempDir::new().unwrap();
        let m = mover(server.url("/graphql"), tmp.path(), quick_config("/d"));
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            stopper.cancel();
        });

        let cycles = m.auto_monitor(cancel).await;
        assert!(cycles >= 2, "cycles = {}", cycles);
    }
}
