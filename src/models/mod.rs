use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Treat an explicit JSON `null` the same as a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Ids arrive as strings from GraphQL but as numbers from hook payloads
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

// =============================================================================
// Scene record
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scene {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub title: Option<String>,
    pub code: Option<String>,
    pub details: Option<String>,
    pub director: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub urls: Vec<String>,
    pub date: Option<String>,
    pub rating100: Option<i64>,
    pub organized: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub files: Vec<VideoFile>,
    #[serde(deserialize_with = "null_as_default")]
    pub paths: ScenePaths,
    pub studio: Option<Studio>,
    #[serde(deserialize_with = "null_as_default")]
    pub groups: Vec<SceneGroup>,
    #[serde(deserialize_with = "null_as_default")]
    pub tags: Vec<Tag>,
    #[serde(deserialize_with = "null_as_default")]
    pub performers: Vec<Performer>,
    #[serde(deserialize_with = "null_as_default")]
    pub stash_ids: Vec<StashId>,
}

impl Scene {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }

    pub fn details(&self) -> &str {
        self.details.as_deref().unwrap_or_default()
    }

    pub fn studio_name(&self) -> &str {
        self.studio
            .as_ref()
            .and_then(|s| s.name.as_deref())
            .unwrap_or_default()
    }

    /// Performer names in scene order, skipping unnamed entries
    pub fn performer_names(&self) -> Vec<&str> {
        self.performers
            .iter()
            .filter_map(|p| p.name.as_deref())
            .filter(|n| !n.is_empty())
            .collect()
    }

    pub fn tag_names(&self) -> Vec<&str> {
        self.tags
            .iter()
            .filter_map(|t| t.name.as_deref())
            .filter(|n| !n.is_empty())
            .collect()
    }

    pub fn first_group_name(&self) -> &str {
        self.groups
            .first()
            .and_then(|g| g.group.as_ref())
            .and_then(|g| g.name.as_deref())
            .unwrap_or_default()
    }

    /// First external (stash-box) identifier, if any
    pub fn external_id(&self) -> Option<&str> {
        self.stash_ids
            .iter()
            .filter_map(|s| s.stash_id.as_deref())
            .find(|s| !s.is_empty())
    }

    /// First file record that exposes a duration; technical info comes from here
    pub fn primary_media_file(&self) -> Option<&VideoFile> {
        self.files.iter().find(|f| f.duration.is_some())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoFile {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub path: Option<String>,
    pub size: Option<u64>,
    pub duration: Option<f64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub bit_rate: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenePaths {
    pub screenshot: Option<String>,
    pub preview: Option<String>,
    pub stream: Option<String>,
    pub webp: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Studio {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: Option<String>,
    pub image_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneGroup {
    pub group: Option<Group>,
    pub scene_index: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Group {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tag {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Performer {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: Option<String>,
    pub disambiguation: Option<String>,
    pub gender: Option<String>,
    pub favorite: Option<bool>,
    pub image_path: Option<String>,
    pub birthdate: Option<String>,
    pub country: Option<String>,
    pub height_cm: Option<i64>,
    pub measurements: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StashId {
    pub endpoint: Option<String>,
    pub stash_id: Option<String>,
}

// =============================================================================
// Plugin envelope
// =============================================================================

/// JSON document the media server writes to the plugin's stdin
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PluginInput {
    pub server_connection: Option<Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub args: PluginArgs,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PluginArgs {
    pub mode: Option<String>,
    #[serde(rename = "hookContext")]
    pub hook_context: Option<HookContext>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HookContext {
    pub id: Option<Value>,
    pub scene_id: Option<Value>,
}

impl HookContext {
    /// Scene id carried by the hook, accepting numeric or string ids
    pub fn scene_id(&self) -> Option<String> {
        [self.id.as_ref(), self.scene_id.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|v| match v {
                Value::Number(n) => Some(n.to_string()),
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionCookie {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: String,
}

/// Connection descriptor for the media server
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConnection {
    #[serde(rename = "Scheme", default = "default_scheme")]
    pub scheme: String,
    #[serde(rename = "Host", default = "default_host")]
    pub host: String,
    #[serde(rename = "Port", default = "default_port")]
    pub port: u16,
    #[serde(rename = "SessionCookie", default)]
    pub session_cookie: Option<SessionCookie>,
    #[serde(rename = "ApiKey", default)]
    pub api_key: Option<String>,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    9999
}

impl ServerConnection {
    /// Parse a connection descriptor given either as a JSON object or as an
    /// ad-hoc string (JSON, or Python-literal style with single quotes)
    pub fn parse(raw: &Value) -> anyhow::Result<Self> {
        let value = match raw {
            Value::String(s) => Self::parse_loose(s)?,
            other => other.clone(),
        };
        if !value.is_object() {
            anyhow::bail!("server_connection is not an object: {}", value);
        }

        let mut conn: ServerConnection = serde_json::from_value(value)?;
        if conn.host.is_empty() || conn.host == "0.0.0.0" {
            conn.host = "localhost".to_string();
        }
        Ok(conn)
    }

    fn parse_loose(raw: &str) -> anyhow::Result<Value> {
        if let Ok(v) = serde_json::from_str(raw) {
            return Ok(v);
        }

        serde_json::from_str(&python_literal_to_json(raw))
            .map_err(|e| anyhow::anyhow!("Unable to parse server_connection {:?}: {}", raw, e))
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub fn graphql_url(&self) -> String {
        format!("{}/graphql", self.base_url())
    }
}

/// Rewrite a Python dict literal as JSON. Strings are re-quoted whatever
/// their delimiter; `True`/`False`/`None` are only mapped as bare tokens.
fn python_literal_to_json(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            quote @ ('\'' | '"') => {
                let mut text = String::new();
                while let Some(ch) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some('r') => text.push('\r'),
                            Some(e @ ('\\' | '\'' | '"')) => text.push(e),
                            Some(e) => {
                                text.push('\\');
                                text.push(e);
                            }
                            None => text.push('\\'),
                        },
                        ch if ch == quote => break,
                        other => text.push(other),
                    }
                }
                out.push_str(&Value::String(text).to_string());
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !(next.is_alphanumeric() || next == '_') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            other => out.push(other),
        }
    }

    out
}

/// Single-line JSON result printed to stdout
#[derive(Debug, Clone, Serialize)]
pub struct PluginOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PluginOutput {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            output: Some(message.into()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: None,
            error: Some(message.into()),
        }
    }
}
