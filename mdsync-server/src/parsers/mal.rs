//! MyAnimeList XML export decoder

use super::ParseError;
use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;

const TITLE_TAG: &[u8] = b"manga_title";

/// Text of every `<manga_title>` element in document order
pub fn parse(data: &[u8]) -> Result<Vec<String>, ParseError> {
    let mut reader = XmlReader::from_reader(data);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut titles = Vec::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == TITLE_TAG => {
                current = Some(String::new());
            }
            Event::Text(t) => {
                if let Some(title) = current.as_mut() {
                    let text = t.unescape()?;
                    title.push_str(&text);
                }
            }
            Event::CData(c) => {
                if let Some(title) = current.as_mut() {
                    let raw = c.into_inner();
                    let text = std::str::from_utf8(&raw)
                        .map_err(|e| ParseError::Encoding(e.to_string()))?;
                    title.push_str(text);
                }
            }
            Event::End(e) if e.local_name().as_ref() == TITLE_TAG => {
                if let Some(title) = current.take() {
                    let title = title.trim();
                    if !title.is_empty() {
                        titles.push(title.to_string());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(titles)
}
