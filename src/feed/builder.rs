use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use url::Url;

use crate::storage::{Channel, Episode};
use crate::util::{format_duration, strip_control_chars};

const ITUNES_NS: &str = "http://www.itunes.com/dtds/podcast-1.0.dtd";
const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// MIME type announced in the enclosure for a media file extension.
pub fn mime_type(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/avi",
        _ => "video/mp4",
    }
}

/// Append path segments to `base`, percent-encoding each one.
fn join_url(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("Base URL cannot carry a path: {base}"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Public URL of an episode's media file.
pub fn enclosure_url(base: &Url, episode: &Episode) -> Result<Url> {
    let file_name = format!("{}.{}", episode.external_id, episode.extension);
    join_url(base, &["podcasts", &episode.channel, &file_name])
}

/// Public URL of a channel's feed document.
pub fn feed_url(base: &Url, channel: &str) -> Result<Url> {
    join_url(base, &["feeds", channel])
}

fn thumbnail_url(base: &Url, episode: &Episode) -> Result<Option<Url>> {
    let Some(path) = episode.thumbnail_path.as_deref() else {
        return Ok(None);
    };
    let is_image = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"));
    match path.file_name().and_then(|n| n.to_str()) {
        Some(file_name) if is_image => {
            join_url(base, &["podcasts", &episode.channel, "thumbnails", file_name]).map(Some)
        }
        _ => Ok(None),
    }
}

fn rfc2822(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .to_rfc2822()
}

fn write_text<W: std::io::Write>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    writer
        .create_element(name)
        .write_text_content(BytesText::new(&strip_control_chars(text)))
        .with_context(|| format!("Failed to write {name} element"))?;
    Ok(())
}

/// Render the podcast feed for a channel.
///
/// Pure: the output depends only on the arguments, so repeated calls with
/// the same state produce byte-identical documents. Items are ordered by
/// `published_at` descending, ties broken by external id.
pub fn build_feed(channel: &Channel, episodes: &[Episode], base_url: &Url) -> Result<String> {
    let mut ordered: Vec<&Episode> = episodes.iter().collect();
    ordered.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.external_id.cmp(&b.external_id))
    });

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:itunes", ITUNES_NS));
    rss.push_attribute(("xmlns:atom", ATOM_NS));
    writer
        .write_event(Event::Start(rss))
        .context("Failed to write rss element")?;
    writer
        .write_event(Event::Start(BytesStart::new("channel")))
        .context("Failed to write channel element")?;

    let display_name = strip_control_chars(&channel.display_name);
    let self_link = feed_url(base_url, &channel.name)?;

    write_text(&mut writer, "title", &display_name)?;
    write_text(&mut writer, "link", &channel.url)?;
    write_text(
        &mut writer,
        "description",
        &format!("YouTube videos from {display_name}"),
    )?;
    write_text(&mut writer, "language", "en-us")?;
    writer
        .create_element("atom:link")
        .with_attribute(("href", self_link.as_str()))
        .with_attribute(("rel", "self"))
        .with_attribute(("type", "application/rss+xml"))
        .write_empty()
        .context("Failed to write atom:link element")?;
    write_text(&mut writer, "itunes:author", &display_name)?;
    write_text(
        &mut writer,
        "itunes:summary",
        &format!("YouTube videos from {display_name}"),
    )?;
    write_text(&mut writer, "itunes:explicit", "false")?;

    for episode in ordered {
        write_item(&mut writer, &display_name, episode, base_url)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("channel")))
        .context("Failed to write channel end")?;
    writer
        .write_event(Event::End(BytesEnd::new("rss")))
        .context("Failed to write rss end")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).context("Generated feed contains invalid UTF-8")
}

fn write_item<W: std::io::Write>(
    writer: &mut Writer<W>,
    author: &str,
    episode: &Episode,
    base_url: &Url,
) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new("item")))
        .context("Failed to write item element")?;

    write_text(writer, "title", &episode.title)?;
    write_text(writer, "description", &episode.description)?;
    write_text(
        writer,
        "link",
        &format!("https://www.youtube.com/watch?v={}", episode.external_id),
    )?;
    writer
        .create_element("guid")
        .with_attribute(("isPermaLink", "false"))
        .write_text_content(BytesText::new(&episode.external_id))
        .context("Failed to write guid element")?;
    write_text(writer, "pubDate", &rfc2822(episode.published_at))?;

    let enclosure = enclosure_url(base_url, episode)?;
    let length = episode.file_size.to_string();
    writer
        .create_element("enclosure")
        .with_attribute(("url", enclosure.as_str()))
        .with_attribute(("length", length.as_str()))
        .with_attribute(("type", mime_type(&episode.extension)))
        .write_empty()
        .context("Failed to write enclosure element")?;

    if let Some(duration) = episode.duration_seconds {
        write_text(writer, "itunes:duration", &format_duration(duration))?;
    }
    write_text(writer, "itunes:author", author)?;
    if let Some(image) = thumbnail_url(base_url, episode)? {
        writer
            .create_element("itunes:image")
            .with_attribute(("href", image.as_str()))
            .write_empty()
            .context("Failed to write itunes:image element")?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("item")))
        .context("Failed to write item end")?;
    Ok(())
}
