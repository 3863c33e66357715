//! Atom 1.0 rendering.

use anyhow::Result;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

use super::{FeedItem, FeedMeta};

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

pub fn render(channel_id: &str, meta: &FeedMeta, items: &[FeedItem]) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut feed = BytesStart::new("feed");
    feed.push_attribute(("xmlns", ATOM_NS));
    writer.write_event(Event::Start(feed))?;

    text_element(&mut writer, "title", &meta.title)?;
    text_element(&mut writer, "id", &format!("urn:tubefeed:channel:{channel_id}"))?;
    text_element(&mut writer, "updated", &feed_updated(items).to_rfc3339())?;

    let mut link = BytesStart::new("link");
    link.push_attribute(("rel", "alternate"));
    link.push_attribute(("href", meta.link.as_str()));
    writer.write_event(Event::Empty(link))?;

    if let Some(description) = &meta.description {
        text_element(&mut writer, "subtitle", description)?;
    }

    for item in items {
        write_entry(&mut writer, item)?;
    }

    writer.write_event(Event::End(BytesEnd::new("feed")))?;

    Ok(writer.into_inner().into_inner())
}

fn write_entry(writer: &mut Writer<Cursor<Vec<u8>>>, item: &FeedItem) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("entry")))?;

    text_element(writer, "title", &item.title)?;
    text_element(writer, "id", &format!("urn:{}", item.guid))?;

    let updated = item
        .downloaded_at
        .or(item.published_at)
        .unwrap_or_else(Utc::now);
    text_element(writer, "updated", &updated.to_rfc3339())?;
    if let Some(published) = item.published_at {
        text_element(writer, "published", &published.to_rfc3339())?;
    }

    let mut enclosure = BytesStart::new("link");
    enclosure.push_attribute(("rel", "enclosure"));
    enclosure.push_attribute(("href", item.enclosure_url.as_str()));
    enclosure.push_attribute(("length", item.enclosure_length.to_string().as_str()));
    enclosure.push_attribute(("type", item.enclosure_type));
    writer.write_event(Event::Empty(enclosure))?;

    if let Some(description) = &item.description {
        text_element(writer, "summary", description)?;
    }

    writer.write_event(Event::End(BytesEnd::new("entry")))?;
    Ok(())
}

/// Feed-level `updated`: the newest item timestamp, or the epoch for an
/// empty feed so rendering stays deterministic.
fn feed_updated(items: &[FeedItem]) -> DateTime<Utc> {
    items
        .iter()
        .filter_map(|i| i.downloaded_at.or(i.published_at))
        .max()
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is representable"))
}

fn text_element(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, value: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}
