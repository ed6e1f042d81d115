use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

use super::{EncodeError, ListEntry, ParseError, SubscriptionList};
use crate::util::{clean_label, clean_text, normalize_url};

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack overflow attacks from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

/// Parses an OPML document into a subscription list.
///
/// Every `<outline>` carrying a feed URL (`xmlUrl`, or `url` as written by
/// some podcast clients) becomes one entry, at any nesting depth. Folder
/// outlines without a URL are traversed but not returned. Outlines whose URL
/// does not normalize are skipped with a warning.
///
/// Malformed XML, unbalanced elements, or a document without an `<opml>`
/// element fail with [`ParseError::Xml`]; no partial list is returned.
pub fn parse_opml(content: &str) -> Result<SubscriptionList, ParseError> {
    // SEC-002: quick-xml (0.37) never expands <!ENTITY> declarations; only the
    // five XML builtins are resolved by `decode_and_unescape_value()`.
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();
    let mut outline_depth: usize = 0;
    let mut open_elements: usize = 0;
    let mut saw_opml = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                open_elements += 1;
                match e.name().as_ref() {
                    b"opml" => saw_opml = true,
                    b"outline" => {
                        outline_depth += 1;
                        // SEC-003: Reject excessively nested OPMLs
                        if outline_depth > MAX_OPML_DEPTH {
                            return Err(ParseError::MaxDepthExceeded(MAX_OPML_DEPTH));
                        }
                        if let Some(entry) = parse_outline(&e, &reader)? {
                            entries.push(entry);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"opml" => saw_opml = true,
                b"outline" => {
                    if let Some(entry) = parse_outline(&e, &reader)? {
                        entries.push(entry);
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) => {
                open_elements = open_elements.saturating_sub(1);
                if e.name().as_ref() == b"outline" {
                    outline_depth = outline_depth.saturating_sub(1);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if open_elements != 0 {
        return Err(ParseError::Xml(
            "unexpected end of document: unclosed elements".to_string(),
        ));
    }
    if !saw_opml {
        return Err(ParseError::Xml("missing <opml> root element".to_string()));
    }

    Ok(SubscriptionList::from_entries(entries))
}

/// Extracts an entry from an outline element.
///
/// Returns `Ok(None)` for folder outlines and for URLs that do not normalize.
fn parse_outline(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<Option<ListEntry>, ParseError> {
    let mut xml_url = None;
    let mut plain_url = None;
    let mut title = None;
    let mut text = None;
    let mut description = None;

    let decoder = reader.decoder();
    for attr_result in e.attributes() {
        let attr = attr_result.map_err(|e| ParseError::Xml(e.to_string()))?;
        let value = attr
            .decode_and_unescape_value(decoder)
            .map_err(|e| ParseError::Xml(e.to_string()))?;
        match attr.key.as_ref() {
            b"xmlUrl" => xml_url = Some(value.into_owned()),
            b"url" => plain_url = Some(value.into_owned()),
            b"title" => title = Some(value.into_owned()),
            b"text" => text = Some(value.into_owned()),
            b"description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    let Some(raw_url) = xml_url.or(plain_url) else {
        return Ok(None);
    };

    let url = normalize_url(&raw_url);
    if url.is_empty() {
        tracing::warn!(url = %raw_url, "Skipping unusable feed URL in OPML");
        return Ok(None);
    }

    Ok(Some(ListEntry {
        url,
        title: title.or(text).as_deref().and_then(clean_label),
        description: description.as_deref().and_then(clean_text),
    }))
}

fn write_event(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> Result<(), EncodeError> {
    writer
        .write_event(event)
        .map_err(|e| EncodeError::Xml(e.to_string()))
}

/// Renders an OPML 2.0 document with one `<outline>` per entry.
///
/// The list title goes into `<head><title>`. Each outline carries
/// `type="rss"`, `text`/`title` (the podcast title, or its URL when
/// untitled), `xmlUrl`, and `description` when known.
pub fn encode_opml(title: &str, entries: &[ListEntry]) -> Result<String, EncodeError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    write_event(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    write_event(&mut writer, Event::Start(opml))?;

    write_event(&mut writer, Event::Start(BytesStart::new("head")))?;
    write_event(&mut writer, Event::Start(BytesStart::new("title")))?;
    write_event(&mut writer, Event::Text(BytesText::new(title)))?;
    write_event(&mut writer, Event::End(BytesEnd::new("title")))?;
    let created = chrono::Utc::now().to_rfc2822();
    write_event(&mut writer, Event::Start(BytesStart::new("dateCreated")))?;
    write_event(&mut writer, Event::Text(BytesText::new(&created)))?;
    write_event(&mut writer, Event::End(BytesEnd::new("dateCreated")))?;
    write_event(&mut writer, Event::End(BytesEnd::new("head")))?;

    write_event(&mut writer, Event::Start(BytesStart::new("body")))?;
    for entry in entries {
        let label = entry.title.as_deref().unwrap_or(&entry.url);
        let mut outline = BytesStart::new("outline");
        outline.push_attribute(("type", "rss"));
        outline.push_attribute(("text", label));
        outline.push_attribute(("title", label));
        outline.push_attribute(("xmlUrl", entry.url.as_str()));
        if let Some(ref description) = entry.description {
            outline.push_attribute(("description", description.as_str()));
        }
        write_event(&mut writer, Event::Empty(outline))?;
    }
    write_event(&mut writer, Event::End(BytesEnd::new("body")))?;
    write_event(&mut writer, Event::End(BytesEnd::new("opml")))?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| EncodeError::Xml(e.to_string()))
}
