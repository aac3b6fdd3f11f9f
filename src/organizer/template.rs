// Filename template resolution against a flattened scene variable map

use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

use crate::models::Scene;

static RE_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})").unwrap());
static RE_PAD_SPEC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^0(\d{1,2})d?$").unwrap());

const PERFORMER_SEPARATOR: &str = "- ";
const TAG_SEPARATOR: &str = ", ";

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("template references unknown placeholder {{{name}}}")]
    UnknownPlaceholder { name: String },

    #[error("unbalanced brace at position {position} in template")]
    UnbalancedBrace { position: usize },

    #[error("unsupported format spec '{spec}' for {{{name}}}")]
    UnsupportedFormat { name: String, spec: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Text(String),
    Number(i64),
}

impl TemplateValue {
    fn render(&self, name: &str, spec: Option<&str>) -> Result<String, TemplateError> {
        let Some(spec) = spec.filter(|s| !s.is_empty()) else {
            return Ok(match self {
                TemplateValue::Text(s) => s.clone(),
                TemplateValue::Number(n) => n.to_string(),
            });
        };

        match (self, RE_PAD_SPEC.captures(spec)) {
            (TemplateValue::Number(n), Some(caps)) => {
                let width: usize = caps[1].parse().unwrap_or(0);
                Ok(format!("{:0width$}", n, width = width))
            }
            _ => Err(TemplateError::UnsupportedFormat {
                name: name.to_string(),
                spec: spec.to_string(),
            }),
        }
    }
}

impl From<&str> for TemplateValue {
    fn from(s: &str) -> Self {
        TemplateValue::Text(s.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(s: String) -> Self {
        TemplateValue::Text(s)
    }
}

/// Placeholder name -> value, built fresh per file
#[derive(Debug, Clone, Default)]
pub struct TemplateVars(BTreeMap<&'static str, TemplateValue>);

impl TemplateVars {
    pub fn get(&self, name: &str) -> Option<&TemplateValue> {
        self.0.get(name)
    }

    pub fn text(&self, name: &str) -> &str {
        match self.0.get(name) {
            Some(TemplateValue::Text(s)) => s,
            _ => "",
        }
    }

    fn set(&mut self, name: &'static str, value: impl Into<TemplateValue>) {
        self.0.insert(name, value.into());
    }
}

/// Split a date string on the fixed `YYYY-MM-DD` prefix; anything else yields empties
pub fn split_date(date: &str) -> (String, String, String) {
    RE_DATE
        .captures(date.trim())
        .map(|c| (c[1].to_string(), c[2].to_string(), c[3].to_string()))
        .unwrap_or_default()
}

/// Split a filename into (stem, extension without dot)
pub fn split_filename(basename: &str) -> (&str, &str) {
    let path = Path::new(basename);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(basename);
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or_default();
    (stem, ext)
}

/// Derive the variable map for one file of a scene
pub fn build_vars(scene: &Scene, file_path: &str) -> TemplateVars {
    let mut vars = TemplateVars::default();

    let basename = Path::new(file_path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(file_path);
    let (stem, ext) = split_filename(basename);

    let date = scene.date.as_deref().unwrap_or_default();
    let (year, month, day) = split_date(date);

    let studio_id = scene
        .studio
        .as_ref()
        .map(|s| s.id.clone())
        .unwrap_or_default();

    let performers = scene.performer_names();
    let tags = scene.tag_names().join(TAG_SEPARATOR);

    vars.set("id", scene.id.as_str());
    vars.set("scene_title", scene.title());
    vars.set("scene_date", date);
    vars.set("date_year", year);
    vars.set("date_month", month);
    vars.set("date_day", day);
    vars.set("studio", scene.studio_name());
    vars.set("studio_name", scene.studio_name());
    vars.set("studio_id", studio_id);
    vars.set("code", scene.code.as_deref().unwrap_or_default());
    vars.set("director", scene.director.as_deref().unwrap_or_default());
    vars.set("performers", performers.join(PERFORMER_SEPARATOR));
    vars.set(
        "first_performer",
        performers.first().copied().unwrap_or_default(),
    );
    vars.set(
        "performer_count",
        TemplateValue::Number(performers.len() as i64),
    );
    vars.set("tag_names", tags.as_str());
    vars.set("tags", tags);
    vars.set("group_name", scene.first_group_name());
    match scene.rating100 {
        Some(r) => {
            vars.set("rating100", TemplateValue::Number(r));
            vars.set("rating", r.to_string());
        }
        None => {
            vars.set("rating100", "");
            vars.set("rating", "");
        }
    }
    vars.set("stash_id", scene.external_id().unwrap_or_default());
    vars.set("original_basename", basename);
    vars.set("original_name", stem);
    vars.set("ext", ext);

    vars
}

/// Expand `{name}` / `{name:0Nd}` placeholders; `{{` and `}}` are literal braces
pub fn expand(template: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                out.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(TemplateError::UnbalancedBrace { position: pos }),
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    match c {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => return Err(TemplateError::UnbalancedBrace { position: pos }),
                        c => field.push(c),
                    }
                }
                if !closed {
                    return Err(TemplateError::UnbalancedBrace { position: pos });
                }

                let (name, spec) = match field.split_once(':') {
                    Some((name, spec)) => (name.trim(), Some(spec)),
                    None => (field.trim(), None),
                };
                let value = vars
                    .get(name)
                    .ok_or_else(|| TemplateError::UnknownPlaceholder {
                        name: name.to_string(),
                    })?;
                out.push_str(&value.render(name, spec)?);
            }
            c => out.push(c),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn demo_scene() -> Scene {
        serde_json::from_value(json!({
            "id": "17",
            "title": "Demo",
            "date": "2024-05-01",
            "code": "ABC-123",
            "rating100": 80,
            "studio": {"id": "3", "name": "Acme"},
            "performers": [{"name": "Jane Doe"}, {"name": "John Roe"}],
            "tags": [{"name": "Outdoor"}, {"name": "HD"}],
            "groups": [{"group": {"id": "1", "name": "Series One"}}],
            "stash_ids": [{"endpoint": "https://stashdb.org/graphql", "stash_id": "uuid-1"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_build_vars_covers_scene_fields() {
        let vars = build_vars(&demo_scene(), "/in/video.file.mp4");

        assert_eq!(vars.text("scene_title"), "Demo");
        assert_eq!(vars.text("date_year"), "2024");
        assert_eq!(vars.text("date_month"), "05");
        assert_eq!(vars.text("date_day"), "01");
        assert_eq!(vars.text("studio"), "Acme");
        assert_eq!(vars.text("studio_id"), "3");
        assert_eq!(vars.text("performers"), "Jane Doe- John Roe");
        assert_eq!(vars.text("first_performer"), "Jane Doe");
        assert_eq!(vars.get("performer_count"), Some(&TemplateValue::Number(2)));
        assert_eq!(vars.text("tags"), "Outdoor, HD");
        assert_eq!(vars.text("group_name"), "Series One");
        assert_eq!(vars.text("rating"), "80");
        assert_eq!(vars.text("stash_id"), "uuid-1");
        assert_eq!(vars.text("original_basename"), "video.file.mp4");
        assert_eq!(vars.text("original_name"), "video.file");
        assert_eq!(vars.text("ext"), "mp4");
    }

    #[test]
    fn test_missing_fields_degrade_to_empty() {
        let scene: Scene = serde_json::from_value(json!({"id": "1", "date": "05/01/2024"})).unwrap();
        let vars = build_vars(&scene, "clip");

        for key in ["scene_title", "date_year", "studio", "group_name", "rating", "ext"] {
            assert_eq!(vars.text(key), "", "{} should be empty", key);
        }
        assert_eq!(vars.get("performer_count"), Some(&TemplateValue::Number(0)));
    }

    #[test]
    fn test_expand_example_template() {
        let vars = build_vars(&demo_scene(), "/in/video.mp4");
        let out = expand("{studio}/{scene_date}.{scene_title}", &vars).unwrap();
        assert_eq!(out, "Acme/2024-05-01.Demo");
    }

    #[test]
    fn test_expand_is_deterministic() {
        let scene = demo_scene();
        let a = expand("{date_year}/{performers} - {id}", &build_vars(&scene, "/x/a.mkv"));
        let b = expand("{date_year}/{performers} - {id}", &build_vars(&scene, "/x/a.mkv"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_placeholder_is_config_error() {
        let vars = build_vars(&demo_scene(), "/in/video.mp4");
        assert_eq!(
            expand("{studio}/{missing_field}", &vars),
            Err(TemplateError::UnknownPlaceholder {
                name: "missing_field".to_string()
            })
        );
    }

    #[test]
    fn test_escapes_and_padding() {
        let vars = build_vars(&demo_scene(), "/in/video.mp4");
        assert_eq!(
            expand("{{{performer_count:03d}}}", &vars).unwrap(),
            "{002}"
        );
        assert!(matches!(
            expand("{studio:03d}", &vars),
            Err(TemplateError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_unbalanced_braces() {
        let vars = TemplateVars::default();
        assert!(matches!(
            expand("{open", &vars),
            Err(TemplateError::UnbalancedBrace { position: 0 })
        ));
        assert!(matches!(
            expand("close}", &vars),
            Err(TemplateError::UnbalancedBrace { position: 5 })
        ));
    }
}
