//! quick-xml helpers shared by the tuner and Neutrino files.
//!
//! Reading goes through [`sanitize`] first: Neutrino writes bare `&` into
//! attribute values, which no conforming parser accepts.

use std::borrow::Cow;

use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::{Error, Result};

/// Attribute list with no entries, for elements that carry none.
pub const NO_ATTRS: &[(&str, &str)] = &[];

/// Rewrites bare `&` to `&amp;` and control characters to spaces.
///
/// Input that needs no change is returned borrowed.
pub fn sanitize(text: &str) -> Cow<'_, str> {
    let bytes = text.as_bytes();
    let needs_work = bytes.iter().enumerate().any(|(i, &b)| {
        (b == b'&' && !is_valid_entity_start(&bytes[i..])) || is_replaced_control(b)
    });
    if !needs_work {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 16);
    for (i, c) in text.char_indices() {
        match c {
            '&' if !is_valid_entity_start(&bytes[i..]) => out.push_str("&amp;"),
            c if c.is_ascii() && is_replaced_control(c as u8) => out.push(' '),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn is_replaced_control(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F | 0x7F)
}

/// True when bytes starting with `&` look like a complete entity.
fn is_valid_entity_start(bytes: &[u8]) -> bool {
    if bytes.len() < 3 {
        return false;
    }
    let numeric = bytes[1] == b'#';
    let mut end = if numeric { 2 } else { 1 };
    if numeric && matches!(bytes.get(2), Some(b'x') | Some(b'X')) {
        end += 1;
    }
    let start = end;
    while end < bytes.len() && end < 12 {
        match bytes[end] {
            b';' => return end > start,
            b'0'..=b'9' => end += 1,
            b'a'..=b'z' | b'A'..=b'Z' if !numeric || start == 3 => end += 1,
            _ => return false,
        }
    }
    false
}

/// 1-based line of a byte offset.
pub fn line_of(text: &str, pos: usize) -> usize {
    let end = pos.min(text.len());
    text.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}

/// Escapes an attribute value for output.
pub fn escape_attr(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<', '>', '"']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn decode_value(raw: &[u8]) -> String {
    let raw = String::from_utf8_lossy(raw);
    match quick_xml::escape::unescape(&raw) {
        Ok(value) => value.into_owned(),
        Err(_) => raw.into_owned(),
    }
}

/// Every attribute of an element, decoded, in document order.
pub fn attributes(e: &BytesStart) -> Vec<(String, String)> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .map(|attr| {
            (
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                decode_value(&attr.value),
            )
        })
        .collect()
}

/// Looks up one attribute of a decoded list.
pub fn get<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Removes and returns one attribute of a decoded list.
pub fn take(attrs: &mut Vec<(String, String)>, name: &str) -> Option<String> {
    let pos = attrs.iter().position(|(key, _)| key == name)?;
    Some(attrs.remove(pos).1)
}

pub fn element_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// Raw text of a comment event.
pub fn comment_text(e: &BytesText) -> String {
    String::from_utf8_lossy(e).into_owned()
}

/// Line-per-element XML writer with fixed indentation.
pub struct XmlOut {
    writer: Writer<Vec<u8>>,
    indent: &'static str,
    file: String,
}

impl XmlOut {
    pub fn new(file: &str, indent: &'static str) -> Self {
        Self {
            writer: Writer::new(Vec::with_capacity(64 * 1024)),
            indent,
            file: file.to_string(),
        }
    }

    fn emit(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| Error::format(self.file.clone(), e.to_string()))
    }

    fn pad(&mut self, depth: usize) -> Result<()> {
        if depth > 0 {
            let pad = self.indent.repeat(depth);
            self.emit(Event::Text(BytesText::from_escaped(pad)))?;
        }
        Ok(())
    }

    fn newline(&mut self) -> Result<()> {
        self.emit(Event::Text(BytesText::from_escaped("\n")))
    }

    fn start<'a, K: AsRef<str>, V: AsRef<str>>(name: &'a str, attrs: &[(K, V)]) -> BytesStart<'a> {
        let mut start = BytesStart::new(name);
        for (key, value) in attrs {
            let escaped = escape_attr(value.as_ref());
            start.push_attribute(Attribute::from((
                key.as_ref().as_bytes(),
                escaped.as_bytes(),
            )));
        }
        start
    }

    pub fn decl(&mut self) -> Result<()> {
        self.emit(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        self.newline()
    }

    /// Writes `<!--text-->` verbatim on its own line.
    pub fn comment(&mut self, text: &str) -> Result<()> {
        self.emit(Event::Comment(BytesText::from_escaped(text)))?;
        self.newline()
    }

    pub fn open<K: AsRef<str>, V: AsRef<str>>(
        &mut self,
        depth: usize,
        name: &str,
        attrs: &[(K, V)],
    ) -> Result<()> {
        self.pad(depth)?;
        self.emit(Event::Start(Self::start(name, attrs)))?;
        self.newline()
    }

    pub fn empty<K: AsRef<str>, V: AsRef<str>>(
        &mut self,
        depth: usize,
        name: &str,
        attrs: &[(K, V)],
    ) -> Result<()> {
        self.pad(depth)?;
        self.emit(Event::Empty(Self::start(name, attrs)))?;
        self.newline()
    }

    pub fn close(&mut self, depth: usize, name: &str) -> Result<()> {
        self.pad(depth)?;
        self.emit(Event::End(BytesEnd::new(name)))?;
        self.newline()
    }

    pub fn finish(self) -> String {
        String::from_utf8_lossy(&self.writer.into_inner()).into_owned()
    }
}
