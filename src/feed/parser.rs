// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, FixedOffset};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use url::Url;

use crate::error::ParseError;

use super::item::FeedItem;

/// Parse RSS feed XML bytes into an ordered list of feed items.
///
/// The parse is streaming: items are accumulated from reader events without
/// ever materializing a document tree. Items lacking a usable link are dropped
/// with a warning and parsing continues; structural problems (bad root,
/// ill-formed markup, truncated document) fail the whole parse and discard
/// anything accumulated so far.
pub fn parse_feed(xml_bytes: &[u8]) -> Result<Vec<FeedItem>, ParseError> {
    let mut reader = Reader::from_reader(xml_bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut items = Vec::new();

    let mut root_seen = false;
    let mut depth: usize = 0;
    let mut in_item = false;
    let mut field: Option<TextField> = None;
    let mut current = ItemBuilder::default();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                if !root_seen {
                    root_seen = true;
                    check_root(&e)?;
                }
                depth += 1;

                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                field = None;

                if name == "item" {
                    in_item = true;
                    current = ItemBuilder::default();
                } else if in_item {
                    match name.as_str() {
                        "title" => field = Some(TextField::Title),
                        "description" => field = Some(TextField::Description),
                        "link" => field = Some(TextField::Link),
                        "pubDate" => field = Some(TextField::PubDate),
                        "image" => field = Some(TextField::Image),
                        "enclosure" | "media:content" | "media:thumbnail" => {
                            current.take_media_reference(&e);
                        }
                        // Forward compatible: unrecognized elements are skipped
                        _ => {}
                    }
                }
            }
            Event::Empty(e) => {
                if !root_seen {
                    root_seen = true;
                    check_root(&e)?;
                } else if in_item {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if matches!(
                        name.as_str(),
                        "enclosure" | "media:content" | "media:thumbnail"
                    ) {
                        current.take_media_reference(&e);
                    }
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                field = None;

                if in_item && e.name().as_ref() == b"item" {
                    in_item = false;
                    if let Some(item) = std::mem::take(&mut current).finish() {
                        items.push(item);
                    }
                }
            }
            Event::Text(e) => {
                if in_item && let Some(f) = field {
                    let raw = e.unescape()?;
                    current.append(f, &decode_entities(&raw));
                }
            }
            Event::CData(e) => {
                if in_item && let Some(f) = field {
                    let raw = String::from_utf8_lossy(&e);
                    current.append(f, &decode_entities(&raw));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !root_seen {
        return Err(ParseError::NoRootElement);
    }
    if depth > 0 {
        return Err(ParseError::UnexpectedEof { open: depth });
    }

    Ok(items)
}

/// Text-bearing elements recognized within an `<item>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextField {
    Title,
    Description,
    Link,
    PubDate,
    Image,
}

/// Accumulator for the item currently being parsed
#[derive(Debug, Default)]
struct ItemBuilder {
    title: String,
    description: String,
    link: String,
    pub_date: String,
    image_url: Option<Url>,
}

impl ItemBuilder {
    fn append(&mut self, field: TextField, text: &str) {
        match field {
            TextField::Title => self.title.push_str(text),
            TextField::Description => self.description.push_str(text),
            TextField::Link => self.link.push_str(text),
            TextField::PubDate => self.pub_date.push_str(text),
            TextField::Image => {
                // A media reference from an earlier element wins
                if self.image_url.is_none() {
                    self.image_url = Url::parse(text.trim()).ok();
                }
            }
        }
    }

    /// Record a media reference carried in attributes (`enclosure`,
    /// `media:content`, `media:thumbnail`). The first usable reference wins;
    /// enclosures that declare a non-image MIME type are not thumbnails.
    fn take_media_reference(&mut self, element: &BytesStart<'_>) {
        if self.image_url.is_some() {
            return;
        }

        let mut url = None;
        let mut mime_type = None;

        for attr in element.attributes().flatten() {
            match attr.key.as_ref() {
                b"url" | b"href" => url = Some(String::from_utf8_lossy(&attr.value).to_string()),
                b"type" => mime_type = Some(String::from_utf8_lossy(&attr.value).to_string()),
                _ => {}
            }
        }

        if let Some(mime) = mime_type
            && !mime.starts_with("image/")
        {
            return;
        }

        self.image_url = url.and_then(|u| Url::parse(u.trim()).ok());
    }

    /// Close out the item. Returns `None` (and logs) when the accumulated
    /// record has no usable link; everything else about the item may be
    /// missing or empty.
    fn finish(self) -> Option<FeedItem> {
        let link = self.link.trim();
        if link.is_empty() {
            tracing::warn!(title = %self.title, "dropping feed item without a link");
            return None;
        }

        let link = match Url::parse(link) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(title = %self.title, link = %link, error = %e,
                    "dropping feed item with unparseable link");
                return None;
            }
        };

        Some(FeedItem {
            title: self.title,
            description: self.description,
            image_url: self.image_url,
            pub_date: parse_pub_date(self.pub_date.trim()),
            link,
        })
    }
}

/// Verify the document root looks like an RSS feed
fn check_root(root: &BytesStart<'_>) -> Result<(), ParseError> {
    let name = String::from_utf8_lossy(root.name().as_ref()).to_string();
    match name.as_str() {
        "rss" | "rdf:RDF" => Ok(()),
        _ => Err(ParseError::InvalidRoot { found: name }),
    }
}

/// Decode HTML entities left over after XML unescaping.
///
/// Feeds frequently double-encode: the XML layer yields `&amp;` which still
/// has to collapse to `&` before display.
fn decode_entities(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// Parse an RSS publication date, RFC 2822 first
fn parse_pub_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    if date_str.is_empty() {
        return None;
    }

    DateTime::parse_from_rfc2822(date_str)
        .ok()
        .or_else(|| parse_relaxed_date(date_str))
}

/// Try common date formats that don't strictly conform to RFC 2822
fn parse_relaxed_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];

    formats
        .iter()
        .find_map(|format| DateTime::parse_from_str(date_str, format).ok())
}
