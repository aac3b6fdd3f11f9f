// NFO sidecar rendering (movie-style document per scene, person document per performer)

use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use super::template::split_date;
use crate::models::{Performer, Scene};
use crate::services::translate::Translation;

pub const NFO_EXTENSION: &str = "nfo";

/// `<dir>/<stem>.nfo` for a video path
pub fn nfo_path(video: &Path) -> PathBuf {
    video.with_extension(NFO_EXTENSION)
}

/// Thin wrapper over the quick-xml writer that drops empty elements
struct NfoWriter {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl NfoWriter {
    fn new() -> Result<Self> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        Ok(Self { writer })
    }

    fn start(&mut self, tag: &str) -> Result<()> {
        self.writer.write_event(Event::Start(BytesStart::new(tag)))?;
        Ok(())
    }

    fn end(&mut self, tag: &str) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(tag)))?;
        Ok(())
    }

    /// `<tag>value</tag>`, skipped entirely when the trimmed value is empty
    fn field(&mut self, tag: &str, value: &str) -> Result<()> {
        self.field_with_attrs(tag, &[], value)
    }

    fn field_with_attrs(&mut self, tag: &str, attrs: &[(&str, &str)], value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(());
        }

        let mut start = BytesStart::new(tag);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.writer.write_event(Event::Start(start))?;
        self.writer.write_event(Event::Text(BytesText::new(value)))?;
        self.end(tag)
    }

    /// A wrapper element around `fields`, omitted when every field is empty
    fn group(&mut self, tag: &str, fields: &[(&str, String)]) -> Result<()> {
        if fields.iter().all(|(_, v)| v.trim().is_empty()) {
            return Ok(());
        }
        self.start(tag)?;
        for (name, value) in fields {
            self.field(name, value)?;
        }
        self.end(tag)
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner().into_inner()).context("NFO is not valid UTF-8")
    }
}

/// `<original>.<translated>` when a distinct translation exists
pub fn display_title(original: &str, translated: Option<&str>) -> String {
    let original = original.trim();
    match translated.map(str::trim).filter(|t| !t.is_empty() && *t != original) {
        Some(t) if original.is_empty() => t.to_string(),
        Some(t) => format!("{}.{}", original, t),
        None => original.to_string(),
    }
}

fn opt_num<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

/// Render the movie-style sidecar for a scene
pub fn scene_nfo(scene: &Scene, translation: &Translation) -> Result<String> {
    let mut doc = NfoWriter::new()?;
    doc.start("movie")?;

    let original_title = scene.title().trim();
    let title = display_title(original_title, translation.title.as_deref());
    let code = scene.code.as_deref().unwrap_or_default().trim();
    let date = scene.date.as_deref().unwrap_or_default().trim();
    let (year, _, _) = split_date(date);

    doc.field("title", &title)?;
    let original = if code.is_empty() {
        original_title.to_string()
    } else {
        format!("{} {}", code, original_title)
    };
    doc.field("originaltitle", &original)?;
    doc.field("sorttitle", &title)?;
    doc.field("year", &year)?;
    doc.field("premiered", date)?;
    doc.field("releasedate", date)?;

    let media = scene.primary_media_file();
    if let Some(minutes) = media
        .and_then(|f| f.duration)
        .map(|d| (d / 60.0).round() as i64)
        .filter(|m| *m > 0)
    {
        doc.field("runtime", &minutes.to_string())?;
    }

    let details = scene.details().trim();
    let plot = translation
        .plot
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(details);
    doc.field("plot", plot)?;
    doc.field("originalplot", details)?;

    doc.field("studio", scene.studio_name())?;
    doc.field("director", scene.director.as_deref().unwrap_or_default())?;

    match scene.external_id() {
        Some(external) => {
            doc.field_with_attrs("uniqueid", &[("type", "stashdb"), ("default", "true")], external)?;
            doc.field_with_attrs("uniqueid", &[("type", "stash")], &scene.id)?;
        }
        None => {
            doc.field_with_attrs("uniqueid", &[("type", "stash"), ("default", "true")], &scene.id)?;
        }
    }

    doc.field("code", code)?;
    if let Some(rating) = scene.rating100 {
        doc.field("rating", &format!("{:.1}", rating as f64 / 10.0))?;
    }
    if let Some(url) = scene.urls.iter().find(|u| !u.trim().is_empty()) {
        doc.field("website", url)?;
    }

    if let Some(file) = media {
        let aspect = match (file.width, file.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => format!("{:.3}", w as f64 / h as f64),
            _ => String::new(),
        };
        let video = [
            ("codec", file.video_codec.clone().unwrap_or_default()),
            ("width", opt_num(file.width.filter(|w| *w > 0))),
            ("height", opt_num(file.height.filter(|h| *h > 0))),
            ("aspect", aspect),
            ("durationinseconds", opt_num(file.duration.map(|d| d as i64))),
            ("bitrate", opt_num(file.bit_rate.map(|b| (b as f64 / 1000.0).round() as u64))),
            ("filesize", opt_num(file.size)),
        ];
        let audio = [("codec", file.audio_codec.clone().unwrap_or_default())];

        let has_video = video.iter().any(|(_, v)| !v.trim().is_empty());
        let has_audio = audio.iter().any(|(_, v)| !v.trim().is_empty());
        if has_video || has_audio {
            doc.start("fileinfo")?;
            doc.start("streamdetails")?;
            doc.group("video", &video)?;
            doc.group("audio", &audio)?;
            doc.end("streamdetails")?;
            doc.end("fileinfo")?;
        }
    }

    for tag in scene.tag_names() {
        doc.field("genre", tag)?;
    }

    let group = scene.first_group_name();
    if !group.trim().is_empty() {
        doc.start("set")?;
        doc.field("name", group)?;
        doc.end("set")?;
    }

    for performer in &scene.performers {
        let Some(name) = performer.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
            continue;
        };
        doc.start("actor")?;
        doc.field("name", name)?;
        doc.field("thumb", performer.image_path.as_deref().unwrap_or_default())?;
        doc.end("actor")?;
    }

    doc.end("movie")?;
    doc.finish()
}

/// Render `actor.nfo` for one performer
pub fn performer_nfo(performer: &Performer) -> Result<String> {
    let mut doc = NfoWriter::new()?;
    doc.start("person")?;
    doc.field("name", performer.name.as_deref().unwrap_or_default())?;
    doc.field("gender", performer.gender.as_deref().unwrap_or_default())?;
    doc.field("country", performer.country.as_deref().unwrap_or_default())?;
    doc.field("birthdate", performer.birthdate.as_deref().unwrap_or_default())?;
    doc.field("height", &opt_num(performer.height_cm.filter(|h| *h > 0)))?;
    doc.field("measurements", performer.measurements.as_deref().unwrap_or_default())?;
    doc.field("favorite", &opt_num(performer.favorite))?;
    doc.field("disambiguation", performer.disambiguation.as_deref().unwrap_or_default())?;
    doc.end("person")?;
    doc.finish()
}

/// Write a rendered document, or log it in full when `dry_run`
pub async fn write_document(path: &Path, xml: &str, dry_run: bool) -> Result<()> {
    if dry_run {
        tracing::info!("Would write {} (dry_run=true):\n{}", path.display(), xml);
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, xml)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Wrote {} (dry_run=false)", path.display());
    Ok(())
}
