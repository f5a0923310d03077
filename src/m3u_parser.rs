//! M3U playlist import and export

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::config::EditorConfig;
use crate::error::{InvariantViolation, Result};
use crate::iptv::{IptvReference, WebTvFields, DEFAULT_STREAM_TYPE};
use crate::model::Model;
use crate::models::{BouquetEntry, BouquetId, SettingsKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct M3uChannel {
    pub name: String,
    pub url: String,
    pub group: Option<String>,
    pub tvg_id: Option<String>,
    pub tvg_logo: Option<String>,
    pub tvg_name: Option<String>, // Alternate name for EPG matching
}

/// Parse M3U content and extract channels
pub fn parse_m3u(content: &str) -> Vec<M3uChannel> {
    let mut channels = Vec::new();
    let mut current_attrs: HashMap<String, String> = HashMap::new();
    let mut current_name: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();

        if let Some(info_part) = line.strip_prefix("#EXTINF:") {
            current_attrs.clear();
            extract_attrs(info_part, &mut current_attrs);

            // Channel name follows the last comma
            current_name = info_part
                .rfind(',')
                .map(|comma_pos| info_part[comma_pos + 1..].trim().to_string());
        } else if !line.is_empty() && !line.starts_with('#') {
            // URL line; one per EXTINF, anything else is skipped
            if let Some(name) = current_name.take() {
                channels.push(M3uChannel {
                    name,
                    url: line.to_string(),
                    group: current_attrs.get("group-title").cloned(),
                    tvg_id: current_attrs.get("tvg-id").cloned(),
                    tvg_logo: current_attrs.get("tvg-logo").cloned(),
                    tvg_name: current_attrs.get("tvg-name").cloned(),
                });
            } else {
                log::debug!("m3u: url without #EXTINF skipped: {}", line);
            }
        }
    }

    channels
}

/// Extract attributes from EXTINF line - handles quoted and unquoted values
fn extract_attrs(info: &str, attrs: &mut HashMap<String, String>) {
    let mut chars = info.chars().peekable();

    // Duration ("-1", "0") comes first
    while chars
        .peek()
        .is_some_and(|c| c.is_ascii_digit() || *c == '-' || *c == '.')
    {
        chars.next();
    }

    while chars.peek().is_some() {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == '"') {
            chars.next();
        }

        // Collect key until '='
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                chars.next();
                break;
            }
            if c == ',' {
                // No more attributes, rest is channel name
                return;
            }
            key.push(c);
            chars.next();
        }

        let key = key.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }

        match chars.peek() {
            Some('"') => {
                chars.next();
                let mut value = String::new();
                while let Some(c) = chars.next() {
                    if c == '"' {
                        break;
                    }
                    if c == '\\' && chars.peek() == Some(&'"') {
                        chars.next();
                        value.push('"');
                        continue;
                    }
                    value.push(c);
                }
                attrs.insert(key, value);
            }
            Some(_) => {
                // Unquoted value - read until space or comma
                let mut value = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == ',' {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                if !value.is_empty() {
                    attrs.insert(key, value);
                }
            }
            None => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    pub stream_type: u32,
    /// Insert a marker before each run of channels sharing a `group-title`.
    pub group_markers: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            stream_type: DEFAULT_STREAM_TYPE,
            group_markers: false,
        }
    }
}

impl From<&EditorConfig> for ImportOptions {
    fn from(config: &EditorConfig) -> Self {
        Self {
            stream_type: config.default_stream_type,
            group_markers: config.markers_for_m3u_groups,
        }
    }
}

/// Appends every channel of `content` to a bouquet. Returns the fav ids
/// in playlist order.
pub fn import(model: &mut Model, bouquet: BouquetId, content: &str, options: &ImportOptions) -> Result<Vec<String>> {
    let channels = parse_m3u(content);
    let markers = options.group_markers && model.kind == SettingsKind::Enigma2;
    let mut last_group: Option<&str> = None;
    let mut added = Vec::with_capacity(channels.len());
    for channel in &channels {
        let group = channel.group.as_deref();
        if markers && group.is_some() && group != last_group {
            model.add_marker(bouquet, group.unwrap_or_default(), None)?;
        }
        last_group = group;
        added.push(model.add_iptv(bouquet, &channel.name, &channel.url, options.stream_type, None)?);
    }
    log::info!("m3u: imported {} channels", added.len());
    Ok(added)
}

/// Playlist of a bouquet. DVB services are played through `stream_host`
/// and left out when it is empty.
pub fn export(model: &Model, bouquet: BouquetId, stream_host: &str) -> Result<String> {
    let bouquet = model
        .bouquet(bouquet)
        .ok_or(InvariantViolation::MissingBouquet(bouquet))?;
    let mut text = String::from("#EXTM3U\n");
    for entry in &bouquet.entries {
        entry.visit(&mut |e| {
            let Some((tvg_id, url)) = playable(model, e, stream_host) else {
                return;
            };
            let logo = e
                .fav_id()
                .and_then(|f| model.service(f))
                .map(|s| s.picon_id().to_string())
                .unwrap_or_default();
            let _ = writeln!(
                text,
                "#EXTINF:-1 tvg-id=\"{}\" tvg-logo=\"{}\",{}",
                tvg_id,
                logo,
                model.entry_name(e)
            );
            text.push_str("#EXTVLCOPT:http-reconnect=true\n");
            let _ = writeln!(text, "{}", url);
        });
    }
    Ok(text)
}

/// `(tvg-id, url)` of an entry that can be played.
fn playable(model: &Model, entry: &BouquetEntry, stream_host: &str) -> Option<(String, String)> {
    match entry {
        BouquetEntry::Iptv(i) => match model.kind {
            SettingsKind::Enigma2 => {
                let reference = IptvReference::parse(&i.fav_id).ok()?;
                Some((reference.data_id(), reference.url()))
            }
            SettingsKind::Neutrino => {
                let fields = WebTvFields::from_fav_id(&i.fav_id).ok()?;
                Some((String::new(), fields.url()?.to_string()))
            }
        },
        BouquetEntry::Service(s) if !stream_host.is_empty() => {
            let reference = model.service(&s.fav_id)?.bouquet_reference();
            Some((reference.clone(), format!("http://{}:8001/{}:", stream_host, reference)))
        }
        _ => None,
    }
}

#[cfg(test)]
#[path = "m3u_parser_tests.rs"]
mod tests;
