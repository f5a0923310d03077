//! IPTV reference codec
//!
//! Enigma2 streams live in bouquets as one `#SERVICE` line:
//! `STREAM:FLAGS:TYPE:SSID:TSID:ONID:NS:0:0:0:URL:NAME`, URL colons escaped.
//! Neutrino WebTV entries are keyed by ten `::`-joined attribute values.

use crate::codec::{self, FieldError};

/// Stream types naming the receiver's player backend.
pub const STREAM_TYPES: [u32; 6] = [1, 4097, 5001, 5002, 8193, 8739];

/// Stream types that mark a bouquet line as IPTV on their own.
const PLAYER_TYPES: [u32; 5] = [4097, 5001, 5002, 8193, 8739];

pub const DEFAULT_STREAM_TYPE: u32 = 4097;

/// True when a `#SERVICE` body denotes a stream rather than a DVB service.
pub fn is_iptv_line(line: &str) -> bool {
    let mut fields = line.split(':');
    let stream = fields.next().and_then(|f| f.trim().parse::<u32>().ok());
    if stream.is_some_and(|s| PLAYER_TYPES.contains(&s)) {
        return true;
    }
    line.split(':')
        .nth(10)
        .map(|url| {
            let url = url.to_ascii_lowercase();
            url.starts_with("http") || url.starts_with("rtsp")
        })
        .unwrap_or(false)
}

/// Decoded stream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IptvReference {
    /// First ten fields as written.
    head: Vec<String>,
    /// URL still percent-encoded, as it appears in the line.
    pub encoded_url: String,
    pub name: Option<String>,
}

/// Identity bits that a reassignment may rewrite (fields 2 to 6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferenceBits {
    pub service_type: u32,
    pub ssid: u32,
    pub tsid: u32,
    pub onid: u32,
    pub namespace: u32,
}

impl IptvReference {
    pub fn parse(line: &str) -> Result<Self, FieldError> {
        let parts: Vec<&str> = line.splitn(12, ':').collect();
        if parts.len() < 11 {
            return Err(FieldError {
                field: "stream url",
                offset: line.len(),
            });
        }
        let mut offset = 0;
        for (i, field) in parts.iter().take(10).enumerate() {
            let ok = if i == 0 {
                field.parse::<u32>().is_ok()
            } else {
                u32::from_str_radix(field, 16).is_ok()
            };
            if !ok {
                return Err(FieldError {
                    field: "stream reference",
                    offset,
                });
            }
            offset += field.len() + 1;
        }
        Ok(Self {
            head: parts[..10].iter().map(|f| f.to_string()).collect(),
            encoded_url: parts[10].to_string(),
            name: parts.get(11).map(|n| n.to_string()),
        })
    }

    /// New stream line with all identity fields zero and service type 1.
    pub fn new(stream_type: u32, url: &str, name: &str) -> Self {
        let mut head = vec!["0".to_string(); 10];
        head[0] = stream_type.to_string();
        head[2] = "1".to_string();
        Self {
            head,
            encoded_url: codec::encode_url(url),
            name: Some(name.to_string()),
        }
    }

    pub fn stream_type(&self) -> u32 {
        self.head[0].parse().unwrap_or(DEFAULT_STREAM_TYPE)
    }

    pub fn url(&self) -> String {
        codec::decode_url(&self.encoded_url)
    }

    /// Fields 0 to 9, the part a picon id is derived from.
    pub fn data_id(&self) -> String {
        self.head.join(":")
    }

    pub fn bits(&self) -> ReferenceBits {
        let hex = |i: usize| u32::from_str_radix(&self.head[i], 16).unwrap_or(0);
        ReferenceBits {
            service_type: hex(2),
            ssid: hex(3),
            tsid: hex(4),
            onid: hex(5),
            namespace: hex(6),
        }
    }

    pub fn set_bits(&mut self, bits: ReferenceBits) {
        self.head[2] = format!("{:X}", bits.service_type);
        self.head[3] = format!("{:X}", bits.ssid);
        self.head[4] = format!("{:X}", bits.tsid);
        self.head[5] = format!("{:X}", bits.onid);
        self.head[6] = format!("{:X}", bits.namespace);
    }

    pub fn set_stream_type(&mut self, stream_type: u32) {
        self.head[0] = stream_type.to_string();
    }

    /// The `#SERVICE` body this reference is written as.
    pub fn to_line(&self) -> String {
        match &self.name {
            Some(name) => format!("{}:{}:{}", self.data_id(), self.encoded_url, name),
            None => format!("{}:{}", self.data_id(), self.encoded_url),
        }
    }
}

/// Data id of a stream line, falling back to the whole line when it does
/// not decode.
pub fn data_id_of_line(line: &str) -> String {
    IptvReference::parse(line)
        .map(|r| r.data_id())
        .unwrap_or_else(|_| line.to_string())
}

pub const WEBTV_FIELD_COUNT: usize = 10;

/// Attribute names of a Neutrino WebTV entry in fav id order.
pub const WEBTV_FIELDS: [&str; WEBTV_FIELD_COUNT] = [
    "url",
    "description",
    "urlkey",
    "account",
    "user",
    "password",
    "type",
    "icon",
    "icon_b",
    "group",
];

/// Neutrino WebTV attribute set. `None` stands for an absent attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebTvFields {
    pub values: [Option<String>; WEBTV_FIELD_COUNT],
}

impl WebTvFields {
    /// Splits a `::`-joined fav id. A wrong field count returns the count found.
    pub fn from_fav_id(fav_id: &str) -> Result<Self, usize> {
        let parts: Vec<&str> = fav_id.split("::").collect();
        if parts.len() != WEBTV_FIELD_COUNT {
            return Err(parts.len());
        }
        let mut fields = WebTvFields::default();
        for (slot, part) in fields.values.iter_mut().zip(parts) {
            *slot = (part != "None").then(|| part.to_string());
        }
        Ok(fields)
    }

    pub fn to_fav_id(&self) -> String {
        self.values
            .iter()
            .map(|v| v.as_deref().unwrap_or("None"))
            .collect::<Vec<_>>()
            .join("::")
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let i = WEBTV_FIELDS.iter().position(|f| *f == name)?;
        self.values[i].as_deref()
    }

    pub fn set(&mut self, name: &str, value: Option<String>) {
        if let Some(i) = WEBTV_FIELDS.iter().position(|f| *f == name) {
            self.values[i] = value;
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.get("url")
    }

    pub fn group(&self) -> Option<&str> {
        self.get("group")
    }
}
