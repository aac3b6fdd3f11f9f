// Configuration module for stash-organizer
// Layers: environment > server-side plugin settings > config.toml > defaults

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::services::http::RetryPolicy;

const APP_NAME: &str = "stash-organizer";
const CONFIG_FILENAME: &str = "config.toml";

/// Key of this plugin inside the media server's `configuration.plugins` map
pub const PLUGIN_ID: &str = "auto_move_organized";

pub const DEFAULT_TEMPLATE: &str = "{original_basename}";

pub const DEFAULT_TRANSLATE_PROMPT: &str = "You are a professional translator for video metadata. \
Translate the given text into natural, fluent Simplified Chinese suitable for use as a media \
title or description. Return ONLY the translated text, without explanations or surrounding quotes.";

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Media server connection used by the monitor tool
    pub stash: StashConfig,

    /// Defaults for the organize pipeline (server-side plugin settings win)
    pub organize: Settings,

    /// Artwork download behaviour
    pub download: DownloadConfig,

    /// Polling monitor configuration
    pub monitor: MonitorConfig,

    /// External tools configuration
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    /// Base URL of the media server (default: http://localhost:9999)
    pub url: String,

    /// API key sent as the `ApiKey` header
    pub api_key: Option<String>,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9999".to_string(),
            api_key: None,
        }
    }
}

/// How files are relocated to their destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Move,
    Copy,
    Hardlink,
}

impl TransferMode {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "move" => Some(Self::Move),
            "copy" => Some(Self::Copy),
            "hardlink" | "link" => Some(Self::Hardlink),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferMode::Move => write!(f, "move"),
            TransferMode::Copy => write!(f, "copy"),
            TransferMode::Hardlink => write!(f, "hardlink"),
        }
    }
}

/// Resolved pipeline settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Destination root for relocated files (required)
    pub target_root: String,

    /// Relative path template, e.g. "{studio}/{scene_date}.{scene_title}"
    pub filename_template: String,

    /// Only move files of scenes flagged organized (default: true)
    pub move_only_organized: bool,

    /// Log every decision without touching the filesystem
    pub dry_run: bool,

    pub transfer_mode: TransferMode,

    /// Page size for bulk scene listing (default: 1000)
    pub per_page: u32,

    /// Write `<stem>.nfo` next to the video (default: true)
    pub write_nfo: bool,

    /// Download `<stem>-poster.<ext>` from the scene screenshot (default: true)
    pub download_poster: bool,

    /// Download performer profile images into `actors/<name>/` (default: true)
    pub download_actor_images: bool,

    /// Write `actors/<name>/actor.nfo` (default: true)
    pub export_actor_nfo: bool,

    /// Stamp the studio logo onto freshly downloaded posters (default: false)
    pub overlay_studio_logo: bool,

    pub translate: TranslateSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_root: String::new(),
            filename_template: DEFAULT_TEMPLATE.to_string(),
            move_only_organized: true,
            dry_run: false,
            transfer_mode: TransferMode::Move,
            per_page: 1000,
            write_nfo: true,
            download_poster: true,
            download_actor_images: true,
            export_actor_nfo: true,
            overlay_studio_logo: false,
            translate: TranslateSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranslateSettings {
    pub enabled: bool,
    pub translate_title: bool,
    pub translate_plot: bool,

    /// OpenAI-compatible base URL, e.g. https://api.openai.com/v1
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub prompt: String,
}

impl Default for TranslateSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            translate_title: false,
            translate_plot: false,
            api_base: String::new(),
            api_key: String::new(),
            model: String::new(),
            temperature: 0.3,
            prompt: DEFAULT_TRANSLATE_PROMPT.to_string(),
        }
    }
}

impl TranslateSettings {
    /// Whether any translation call should be attempted at all
    pub fn is_active(&self) -> bool {
        self.enabled && (self.translate_title || self.translate_plot)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Total attempts per download (default: 3)
    pub retries: u32,

    /// Linear backoff step in seconds: 2s, 4s, ... (default: 2)
    pub backoff_secs: u64,

    /// Per-request timeout in seconds (default: 30)
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_secs: 2,
            timeout_secs: 30,
        }
    }
}

impl DownloadConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.retries, Duration::from_secs(self.backoff_secs))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Polling monitor configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Directory where new downloads land (required for move modes)
    pub download_path: String,

    /// Seconds between auto_monitor cycles (default: 300)
    pub check_interval_secs: u64,

    /// Sleep after a failed cycle (default: 60)
    pub error_backoff_secs: u64,

    /// Treat the organized flag as "scraped" (default: true)
    pub use_organized_flag: bool,

    /// Without the organized flag, require a studio (default: true)
    pub require_studio: bool,

    /// Without the organized flag, require performers (default: false)
    pub require_performers: bool,

    /// Trigger a library scan before each cycle (default: true)
    pub auto_scan: bool,

    /// Trigger identification of unorganized scenes (default: true)
    pub auto_identify: bool,

    /// Wait after triggering a scan (default: 10)
    pub scan_settle_secs: u64,

    /// Pause between identify requests (default: 2)
    pub identify_delay_secs: u64,

    /// Wait after all identify requests (default: 5)
    pub identify_settle_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            download_path: String::new(),
            check_interval_secs: 300,
            error_backoff_secs: 60,
            use_organized_flag: true,
            require_studio: true,
            require_performers: false,
            auto_scan: true,
            auto_identify: true,
            scan_settle_secs: 10,
            identify_delay_secs: 2,
            identify_settle_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Path to rsvg-convert binary (SVG studio logos)
    pub rsvg_convert_path: Option<PathBuf>,
}

// =============================================================================
// Server-side plugin settings
// =============================================================================

/// Plugin values may be wrapped as `{"value": ...}`
fn unwrap_value(v: Value) -> Value {
    match v {
        Value::Object(mut map) if map.contains_key("value") => {
            map.remove("value").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(match unwrap_value(Value::deserialize(d)?) {
        Value::Bool(b) => Some(b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match unwrap_value(Value::deserialize(d)?) {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match unwrap_value(Value::deserialize(d)?) {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    Ok(match unwrap_value(Value::deserialize(d)?) {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Settings as stored by the media server; every field is optional and
/// malformed values are dropped in favour of the lower layer
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PluginSettingsPatch {
    #[serde(deserialize_with = "lenient_string")]
    target_root: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    filename_template: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    move_only_organized: Option<bool>,
    #[serde(deserialize_with = "lenient_bool")]
    dry_run: Option<bool>,
    #[serde(deserialize_with = "lenient_string")]
    transfer_mode: Option<String>,
    #[serde(deserialize_with = "lenient_u32")]
    per_page: Option<u32>,
    #[serde(deserialize_with = "lenient_bool")]
    write_nfo: Option<bool>,
    #[serde(deserialize_with = "lenient_bool")]
    download_poster: Option<bool>,
    #[serde(deserialize_with = "lenient_bool")]
    download_actor_images: Option<bool>,
    #[serde(deserialize_with = "lenient_bool")]
    export_actor_nfo: Option<bool>,
    #[serde(deserialize_with = "lenient_bool")]
    overlay_studio_logo: Option<bool>,
    #[serde(deserialize_with = "lenient_bool")]
    translate_enable: Option<bool>,
    #[serde(deserialize_with = "lenient_bool")]
    translate_title: Option<bool>,
    #[serde(deserialize_with = "lenient_bool")]
    translate_plot: Option<bool>,
    #[serde(deserialize_with = "lenient_string")]
    translate_api_base: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    translate_api_key: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    translate_model: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    translate_temperature: Option<f64>,
    #[serde(deserialize_with = "lenient_string")]
    translate_prompt: Option<String>,
}

impl Settings {
    /// Overlay the plugin settings map fetched from the media server
    pub fn apply_plugin_settings(&mut self, plugin_settings: &Value) {
        let patch: PluginSettingsPatch = match serde_json::from_value(plugin_settings.clone()) {
            Ok(patch) => patch,
            Err(e) => {
                tracing::warn!("Ignoring malformed plugin settings: {}", e);
                return;
            }
        };

        if let Some(v) = patch.target_root {
            self.target_root = v;
        }
        if let Some(v) = patch.filename_template.filter(|v| !v.is_empty()) {
            self.filename_template = v;
        }
        if let Some(v) = patch.move_only_organized {
            self.move_only_organized = v;
        }
        if let Some(v) = patch.dry_run {
            self.dry_run = v;
        }
        if let Some(mode) = patch.transfer_mode.as_deref().and_then(TransferMode::parse) {
            self.transfer_mode = mode;
        }
        if let Some(v) = patch.per_page.filter(|v| *v > 0) {
            self.per_page = v;
        }
        if let Some(v) = patch.write_nfo {
            self.write_nfo = v;
        }
        if let Some(v) = patch.download_poster {
            self.download_poster = v;
        }
        if let Some(v) = patch.download_actor_images {
            self.download_actor_images = v;
        }
        if let Some(v) = patch.export_actor_nfo {
            self.export_actor_nfo = v;
        }
        if let Some(v) = patch.overlay_studio_logo {
            self.overlay_studio_logo = v;
        }

        let t = &mut self.translate;
        if let Some(v) = patch.translate_enable {
            t.enabled = v;
        }
        if let Some(v) = patch.translate_title {
            t.translate_title = v;
        }
        if let Some(v) = patch.translate_plot {
            t.translate_plot = v;
        }
        if let Some(v) = patch.translate_api_base {
            t.api_base = v;
        }
        if let Some(v) = patch.translate_api_key {
            t.api_key = v;
        }
        if let Some(v) = patch.translate_model {
            t.model = v;
        }
        if let Some(v) = patch.translate_temperature {
            t.temperature = v;
        }
        if let Some(v) = patch.translate_prompt.filter(|v| !v.is_empty()) {
            t.prompt = v;
        }
    }

    /// Environment variables have the final word
    fn apply_env(&mut self) {
        if let Ok(root) = std::env::var("STASH_ORGANIZER_TARGET_ROOT") {
            self.target_root = root;
        }
        if let Ok(v) = std::env::var("STASH_ORGANIZER_DRY_RUN") {
            self.dry_run = v.eq_ignore_ascii_case("true") || v == "1";
        }
        if let Ok(key) = std::env::var("TRANSLATE_API_KEY") {
            self.translate.api_key = key;
        }
    }

    /// Fail fast before any mutation when the destination root is missing
    pub fn validate(&self) -> Result<(), crate::organizer::OrganizeError> {
        if self.target_root.trim().is_empty() {
            return Err(crate::organizer::OrganizeError::MissingTargetRoot);
        }
        Ok(())
    }

    pub fn log_settings(&self) {
        tracing::info!(
            "Loaded settings: target_root='{}', template='{}', move_only_organized={}, dry_run={}, mode={}",
            self.target_root,
            self.filename_template,
            self.move_only_organized,
            self.dry_run,
            self.transfer_mode
        );
        tracing::debug!(
            "Sidecars: nfo={}, poster={}, actor_images={}, actor_nfo={}, logo_overlay={}",
            self.write_nfo,
            self.download_poster,
            self.download_actor_images,
            self.export_actor_nfo,
            self.overlay_studio_logo
        );
        if self.translate.is_active() {
            tracing::info!(
                "Translation: ENABLED (model={}, title={}, plot={})",
                self.translate.model,
                self.translate.translate_title,
                self.translate.translate_plot
            );
        } else {
            tracing::debug!("Translation: disabled");
        }
    }
}

// =============================================================================
// Application configuration
// =============================================================================

/// Application configuration - combines TOML file with environment overrides
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding config.toml
    pub config_dir: PathBuf,

    pub stash: StashConfig,

    /// Local defaults for the pipeline, before server-side settings are applied
    pub organize: Settings,

    pub download: DownloadConfig,

    pub monitor: MonitorConfig,

    /// Path to rsvg-convert binary
    pub rsvg_convert_path: Option<PathBuf>,
}

impl AppConfig {
    /// Organizer defaults, overlaid by `config.toml`, overlaid by `STASH_*` env vars.
    /// Plugin settings from the server are merged later by [`Self::resolve_settings`].
    pub fn load() -> Self {
        let config_dir = Self::config_dir();
        let config_file = Self::read_config_file(&config_dir.join(CONFIG_FILENAME));
        Self::build(config_dir, config_file)
    }

    /// `STASH_ORGANIZER_CONFIG_DIR`, else `<user config>/stash-organizer`, else the cwd
    fn config_dir() -> PathBuf {
        std::env::var_os("STASH_ORGANIZER_CONFIG_DIR")
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|dir| dir.join(APP_NAME)))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// A missing file is normal for plugin installs; a broken one is reported and ignored
    fn read_config_file(path: &Path) -> ConfigFile {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No organizer config at {}", path.display());
                return ConfigFile::default();
            }
            Err(e) => {
                tracing::warn!("Cannot read organizer config {}: {}", path.display(), e);
                return ConfigFile::default();
            }
        };

        match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Organizer config loaded from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!(
                    "Ignoring organizer config {} (invalid TOML: {}); built-in defaults apply",
                    path.display(),
                    e.message()
                );
                ConfigFile::default()
            }
        }
    }

    /// Build configuration from config file with environment overrides
    fn build(config_dir: PathBuf, config_file: ConfigFile) -> Self {
        let mut stash = config_file.stash;
        if let Ok(key) = std::env::var("STASH_API_KEY") {
            stash.api_key = Some(key);
        }

        // rsvg-convert path: env > config
        let rsvg_convert_path = std::env::var("RSVG_CONVERT_PATH")
            .ok()
            .map(PathBuf::from)
            .or(config_file.tools.rsvg_convert_path);

        Self {
            config_dir,
            stash,
            organize: config_file.organize,
            download: config_file.download,
            monitor: config_file.monitor,
            rsvg_convert_path,
        }
    }

    /// Final pipeline settings: local defaults, then the server's plugin map, then env
    pub fn resolve_settings(&self, plugin_settings: Option<&Value>) -> Settings {
        let mut settings = self.organize.clone();
        if let Some(map) = plugin_settings {
            settings.apply_plugin_settings(map);
        }
        settings.apply_env();
        settings
    }

    /// Log configuration status
    pub fn log_config(&self) {
        tracing::debug!("Configuration directory: {}", self.config_dir.display());
        tracing::debug!(
            "Downloads: {} attempts, {}s backoff step, {}s timeout",
            self.download.retries,
            self.download.backoff_secs,
            self.download.timeout_secs
        );
        if let Some(ref path) = self.rsvg_convert_path {
            tracing::debug!("rsvg-convert: {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_file_missing_or_invalid_falls_back() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);
        assert_eq!(
            AppConfig::read_config_file(&path).organize.filename_template,
            DEFAULT_TEMPLATE
        );

        std::fs::write(&path, "[organize\ntarget_root = ").unwrap();
        assert_eq!(AppConfig::read_config_file(&path).download.retries, 3);

        std::fs::write(&path, "[organize]\ntarget_root = \"/library\"\n").unwrap();
        assert_eq!(AppConfig::read_config_file(&path).organize.target_root, "/library");
    }

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();
        assert_eq!(config.stash.url, "http://localhost:9999");
        assert_eq!(config.organize.filename_template, DEFAULT_TEMPLATE);
        assert!(config.organize.move_only_organized);
        assert!(!config.organize.dry_run);
        assert_eq!(config.download.retries, 3);
        assert_eq!(config.monitor.check_interval_secs, 300);
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[stash]
url = "http://nas:9999"
api_key = "secret"

[organize]
target_root = "/library"
filename_template = "{studio}/{scene_title}"
transfer_mode = "hardlink"

[organize.translate]
enabled = true
translate_title = true
model = "gpt-4o-mini"

[monitor]
download_path = "/downloads"
use_organized_flag = false

[tools]
rsvg_convert_path = "/usr/bin/rsvg-convert"
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(config.stash.api_key.as_deref(), Some("secret"));
        assert_eq!(config.organize.target_root, "/library");
        assert_eq!(config.organize.transfer_mode, TransferMode::Hardlink);
        assert!(config.organize.translate.is_active());
        assert_eq!(config.organize.translate.temperature, 0.3);
        assert!(!config.monitor.use_organized_flag);
        assert!(config.monitor.require_studio);
        assert_eq!(
            config.tools.rsvg_convert_path,
            Some(PathBuf::from("/usr/bin/rsvg-convert"))
        );
    }

    #[test]
    fn test_partial_config_toml() {
        let toml_str = r#"
[organize]
dry_run = true
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert!(config.organize.dry_run);
        assert!(config.organize.write_nfo); // default
        assert_eq!(config.organize.per_page, 1000); // default
    }

    #[test]
    fn test_plugin_settings_unwrap_value_wrappers() {
        let mut settings = Settings::default();
        settings.apply_plugin_settings(&json!({
            "target_root": {"value": " /media/sorted "},
            "filename_template": "{studio}/{scene_title}",
            "dry_run": {"value": "true"},
            "move_only_organized": false,
            "translate_enable": 1,
            "translate_title": true,
            "translate_temperature": {"value": "0.7"},
            "per_page": "250",
        }));

        assert_eq!(settings.target_root, "/media/sorted");
        assert_eq!(settings.filename_template, "{studio}/{scene_title}");
        assert!(settings.dry_run);
        assert!(!settings.move_only_organized);
        assert!(settings.translate.is_active());
        assert_eq!(settings.translate.temperature, 0.7);
        assert_eq!(settings.per_page, 250);
    }

    #[test]
    fn test_plugin_settings_malformed_values_keep_defaults() {
        let mut settings = Settings::default();
        settings.apply_plugin_settings(&json!({
            "translate_temperature": "warm",
            "dry_run": {"value": null},
            "transfer_mode": "teleport",
            "filename_template": "",
            "translate_prompt": "",
        }));

        assert_eq!(settings.translate.temperature, 0.3);
        assert!(!settings.dry_run);
        assert_eq!(settings.transfer_mode, TransferMode::Move);
        assert_eq!(settings.filename_template, DEFAULT_TEMPLATE);
        assert_eq!(settings.translate.prompt, DEFAULT_TRANSLATE_PROMPT);
    }

    #[test]
    fn test_validate_requires_target_root() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_err());
        settings.target_root = "   ".to_string();
        assert!(settings.validate().is_err());
        settings.target_root = "/library".to_string();
        assert!(settings.validate().is_ok());
    }
}
