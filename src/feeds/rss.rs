//! RSS 2.0 rendering with the iTunes podcast namespace extension.

use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

use super::{FeedItem, FeedMeta};

const ITUNES_NS: &str = "http://www.itunes.com/dtds/podcast-1.0.dtd";

pub fn render(meta: &FeedMeta, items: &[FeedItem]) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:itunes", ITUNES_NS));
    writer.write_event(Event::Start(rss))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;

    text_element(&mut writer, "title", &meta.title)?;
    text_element(&mut writer, "link", &meta.link)?;
    text_element(
        &mut writer,
        "description",
        meta.description.as_deref().unwrap_or(""),
    )?;

    if let Some(image) = &meta.image_url {
        let mut itunes_image = BytesStart::new("itunes:image");
        itunes_image.push_attribute(("href", image.as_str()));
        writer.write_event(Event::Empty(itunes_image))?;

        writer.write_event(Event::Start(BytesStart::new("image")))?;
        text_element(&mut writer, "url", image)?;
        text_element(&mut writer, "title", &meta.title)?;
        text_element(&mut writer, "link", &meta.link)?;
        writer.write_event(Event::End(BytesEnd::new("image")))?;
    }

    for item in items {
        write_item(&mut writer, item)?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    Ok(writer.into_inner().into_inner())
}

fn write_item(writer: &mut Writer<Cursor<Vec<u8>>>, item: &FeedItem) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("item")))?;

    text_element(writer, "title", &item.title)?;

    let mut guid = BytesStart::new("guid");
    guid.push_attribute(("isPermaLink", "false"));
    writer.write_event(Event::Start(guid))?;
    writer.write_event(Event::Text(BytesText::new(&item.guid)))?;
    writer.write_event(Event::End(BytesEnd::new("guid")))?;

    if let Some(published) = item.published_at {
        text_element(writer, "pubDate", &published.to_rfc2822())?;
    }
    if let Some(description) = &item.description {
        text_element(writer, "description", description)?;
    }

    let mut enclosure = BytesStart::new("enclosure");
    enclosure.push_attribute(("url", item.enclosure_url.as_str()));
    enclosure.push_attribute(("length", item.enclosure_length.to_string().as_str()));
    enclosure.push_attribute(("type", item.enclosure_type));
    writer.write_event(Event::Empty(enclosure))?;

    if let Some(duration) = &item.duration {
        text_element(writer, "itunes:duration", duration)?;
    }
    if let Some(thumbnail) = &item.thumbnail_url {
        let mut image = BytesStart::new("itunes:image");
        image.push_attribute(("href", thumbnail.as_str()));
        writer.write_event(Event::Empty(image))?;
    }

    writer.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(())
}

fn text_element(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, value: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}
