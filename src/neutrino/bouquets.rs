//! Neutrino bouquet files.
//!
//! `bouquets.xml` (providers) and `ubouquets.xml` (user favourites) hold
//! `<Bouquet>` elements with `<S>` children; `webtv.xml` holds `<webtv>`
//! stream elements.

use std::path::Path;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::{fav_id, read_text, Attrs, NeutrinoLayout, BOUQUETS_XML, INDENT, UBOUQUETS_XML, WEBTV_XML};
use crate::error::{Diagnostics, Error, Result};
use crate::iptv::{IptvReference, WebTvFields, WEBTV_FIELDS, WEBTV_FIELD_COUNT};
use crate::lamedb::ServiceTable;
use crate::models::{
    BqType, Bouquet, BouquetEntry, BouquetRoot, IdAllocator, IptvRef, RootKind, Service, ServiceRef,
    ServiceType, TransponderType,
};
use crate::xml::{self, XmlOut};

/// Bouquet file of a root.
pub fn file_of(kind: RootKind) -> &'static str {
    match kind {
        RootKind::Providers => BOUQUETS_XML,
        RootKind::WebTv => WEBTV_XML,
        _ => UBOUQUETS_XML,
    }
}

/// XML attribute carrying a WebTV field.
fn xml_name(field: &str) -> &str {
    match field {
        "group" => "genre",
        other => other,
    }
}

fn field_index(attr: &str) -> Option<usize> {
    let field = match attr {
        "genre" => "group",
        other => other,
    };
    WEBTV_FIELDS.iter().position(|f| *f == field)
}

fn is_flag_set(attrs: &[(String, String)], name: &str) -> bool {
    xml::get(attrs, name).is_some_and(|v| v.trim() == "1")
}

/// Loads the three bouquet files into Providers, TV and WebTV roots.
pub fn load(
    dir: &Path,
    services: &mut ServiceTable,
    layout: &mut NeutrinoLayout,
    ids: &mut IdAllocator,
    diagnostics: &mut Diagnostics,
) -> Vec<BouquetRoot> {
    let mut roots = Vec::new();
    for kind in [RootKind::Providers, RootKind::Tv, RootKind::WebTv] {
        let file = file_of(kind);
        let mut root = BouquetRoot::new(kind);
        if let Some(text) = read_text(dir, file, diagnostics) {
            layout.bouquet_files.push(file.to_string());
            let parsed = if kind == RootKind::WebTv {
                parse_webtv(&text, services, ids, diagnostics)
            } else {
                parse_bouquets(file, &text, kind, services, ids, diagnostics)
            };
            match parsed {
                Ok(bouquets) => root.bouquets = bouquets,
                Err(e) => diagnostics.error(&e),
            }
        }
        roots.push(root);
    }
    roots
}

fn read_error(file: &str, text: &str, pos: u64, e: quick_xml::Error) -> Error {
    let line = xml::line_of(text, pos as usize);
    Error::format(file, format!("line {}: {}", line, e))
}

/// Parses `bouquets.xml` or `ubouquets.xml`.
pub fn parse_bouquets(
    file: &str,
    text: &str,
    kind: RootKind,
    services: &ServiceTable,
    ids: &mut IdAllocator,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<Bouquet>> {
    let text = xml::sanitize(text);
    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(true);
    let mut bouquets: Vec<Bouquet> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| read_error(file, &text, reader.buffer_position(), e))?;
        let line = xml::line_of(&text, reader.buffer_position() as usize);
        let start = match &event {
            Event::Start(e) | Event::Empty(e) => e,
            Event::Eof => break,
            _ => continue,
        };
        let attrs = xml::attributes(start);
        match start.name().as_ref() {
            b"Bouquet" => {
                let name = xml::get(&attrs, "name").unwrap_or_default().to_string();
                let mut bouquet = Bouquet::new(ids.next_id(), name, kind.bouquet_type());
                bouquet.hidden = is_flag_set(&attrs, "hidden");
                bouquet.locked = is_flag_set(&attrs, "locked");
                bouquet.attrs = attrs;
                bouquets.push(bouquet);
            }
            b"S" => {
                let Some(bouquet) = bouquets.last_mut() else {
                    diagnostics.parse(file, line, "service outside a bouquet");
                    continue;
                };
                let keys = (xml::get(&attrs, "t"), xml::get(&attrs, "on"), xml::get(&attrs, "i"));
                let (Some(tsid), Some(onid), Some(ssid)) = keys else {
                    diagnostics.parse(file, line, "service without t/on/i attributes");
                    continue;
                };
                let fav = fav_id(tsid, onid, ssid);
                if !services.contains(&fav) {
                    diagnostics.parse(file, line, format!("service {} is not in {}", fav, super::SERVICES_XML));
                    continue;
                }
                let mut entry = ServiceRef::new(fav);
                entry.attrs = attrs;
                bouquet.entries.push(BouquetEntry::Service(entry));
            }
            _ => {}
        }
    }
    log::debug!("{}: {} bouquets", file, bouquets.len());
    Ok(bouquets)
}

/// Parses `webtv.xml` into a single bouquet and registers every stream as
/// an IPTV service.
pub fn parse_webtv(
    text: &str,
    services: &mut ServiceTable,
    ids: &mut IdAllocator,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<Bouquet>> {
    let text = xml::sanitize(text);
    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(true);
    let mut bouquet = Bouquet::new(ids.next_id(), "WebTV", BqType::WebTv);
    bouquet.file = Some(WEBTV_XML.to_string());

    loop {
        let event = reader
            .read_event()
            .map_err(|e| read_error(WEBTV_XML, &text, reader.buffer_position(), e))?;
        let line = xml::line_of(&text, reader.buffer_position() as usize);
        let start = match &event {
            Event::Start(e) | Event::Empty(e) => e,
            Event::Eof => break,
            _ => continue,
        };
        if start.name().as_ref() != b"webtv" {
            continue;
        }
        let attrs = xml::attributes(start);
        let mut fields = WebTvFields::default();
        for (key, value) in &attrs {
            if let Some(i) = field_index(key) {
                fields.values[i] = Some(value.clone());
            }
        }
        if fields.url().is_none() {
            diagnostics.parse(WEBTV_XML, line, "stream without url");
            continue;
        }
        let fav = fields.to_fav_id();
        if let Err(count) = WebTvFields::from_fav_id(&fav) {
            diagnostics.notice(
                WEBTV_XML,
                Some(line),
                format!("stream attributes split into {} fields, kept verbatim", count),
            );
        }
        let title = xml::get(&attrs, "title").unwrap_or_default().to_string();
        if !services.contains(&fav) {
            services.insert(Service::new(
                fav.clone(),
                fav.clone(),
                title.clone(),
                ServiceType::Iptv,
                TransponderType::Satellite,
            ));
        }
        let mut entry = IptvRef::new(fav, title);
        entry.attrs = attrs;
        bouquet.entries.push(BouquetEntry::Iptv(entry));
    }
    Ok(vec![bouquet])
}

fn set_attr(attrs: &mut Attrs, name: &str, value: String) {
    match attrs.iter_mut().find(|(k, _)| k == name) {
        Some((_, v)) => *v = value,
        None => attrs.push((name.to_string(), value)),
    }
}

fn flag(on: bool) -> String {
    let value = if on { "1" } else { "0" };
    value.to_string()
}

fn bouquet_attrs(bouquet: &Bouquet) -> Attrs {
    let mut attrs = bouquet.attrs.clone();
    set_attr(&mut attrs, "name", bouquet.name.clone());
    set_attr(&mut attrs, "hidden", flag(bouquet.hidden));
    set_attr(&mut attrs, "locked", flag(bouquet.locked));
    attrs
}

/// `<S>` attributes of an entry; entries created in memory are rebuilt
/// from the service.
fn entry_attrs(entry: &ServiceRef, service: &Service) -> Attrs {
    let mut attrs = entry.attrs.clone();
    if attrs.is_empty() {
        let ids: Vec<&str> = entry.fav_id.split(':').collect();
        if let [tsid, onid, ssid] = ids[..] {
            attrs.push(("i".to_string(), format!("{:0>4}", ssid)));
            attrs.push(("n".to_string(), service.name.clone()));
            attrs.push(("t".to_string(), format!("{:0>4}", tsid)));
            attrs.push(("on".to_string(), format!("{:0>4}", onid)));
            if let Some(position) = service.position {
                attrs.push(("s".to_string(), position.to_string()));
            }
        }
        return attrs;
    }
    set_attr(&mut attrs, "n", service.name.clone());
    attrs
}

/// `<webtv>` attributes: stored order first, then fields added since.
fn webtv_attrs(entry: &IptvRef) -> Attrs {
    let Ok(fields) = WebTvFields::from_fav_id(&entry.fav_id) else {
        if !entry.attrs.is_empty() {
            let mut attrs = entry.attrs.clone();
            set_attr(&mut attrs, "title", entry.name.clone());
            return attrs;
        }
        // Enigma2 stream line added to a Neutrino model.
        let url = IptvReference::parse(&entry.fav_id)
            .map(|r| r.url())
            .unwrap_or_else(|_| entry.fav_id.clone());
        return vec![
            ("title".to_string(), entry.name.clone()),
            ("url".to_string(), url),
        ];
    };

    let mut attrs = Vec::new();
    let mut written = [false; WEBTV_FIELD_COUNT];
    let mut has_title = false;
    for (key, value) in &entry.attrs {
        if key == "title" {
            has_title = true;
            attrs.push((key.clone(), entry.name.clone()));
        } else if let Some(i) = field_index(key) {
            written[i] = true;
            if let Some(v) = &fields.values[i] {
                attrs.push((key.clone(), v.clone()));
            }
        } else {
            attrs.push((key.clone(), value.clone()));
        }
    }
    if !has_title {
        attrs.insert(0, ("title".to_string(), entry.name.clone()));
    }
    for (i, field) in WEBTV_FIELDS.iter().enumerate() {
        if let (false, Some(v)) = (written[i], &fields.values[i]) {
            attrs.push((xml_name(field).to_string(), v.clone()));
        }
    }
    attrs
}

fn write_zapit(file: &str, root: &BouquetRoot, services: &ServiceTable) -> Result<String> {
    let mut out = XmlOut::new(file, INDENT);
    out.decl()?;
    out.open(0, "zapit", xml::NO_ATTRS)?;
    for bouquet in &root.bouquets {
        out.open(1, "Bouquet", &bouquet_attrs(bouquet))?;
        for entry in &bouquet.entries {
            match entry {
                BouquetEntry::Service(s) => {
                    if let Some(service) = services.get(&s.fav_id) {
                        out.empty(2, "S", &entry_attrs(s, service))?;
                    }
                }
                other => log::debug!(
                    "{}: {} entries are not stored, skipped",
                    file,
                    other.service_type().label()
                ),
            }
        }
        out.close(1, "Bouquet")?;
    }
    out.close(0, "zapit")?;
    Ok(out.finish())
}

fn write_webtv(root: &BouquetRoot) -> Result<String> {
    let mut out = XmlOut::new(WEBTV_XML, INDENT);
    out.decl()?;
    out.open(0, "webtvs", xml::NO_ATTRS)?;
    for bouquet in &root.bouquets {
        for entry in &bouquet.entries {
            if let BouquetEntry::Iptv(i) = entry {
                out.empty(1, "webtv", &webtv_attrs(i))?;
            }
        }
    }
    out.close(0, "webtvs")?;
    Ok(out.finish())
}

/// Renders every root that was loaded from disk or has bouquets now.
pub fn render(
    roots: &[BouquetRoot],
    services: &ServiceTable,
    layout: &NeutrinoLayout,
) -> Result<Vec<(String, String)>> {
    let mut files = Vec::new();
    for root in roots {
        let file = file_of(root.kind);
        let loaded = layout.bouquet_files.iter().any(|f| f == file);
        if !loaded && root.bouquets.is_empty() {
            continue;
        }
        let text = match root.kind {
            RootKind::WebTv => write_webtv(root)?,
            _ => write_zapit(file, root, services)?,
        };
        files.push((file.to_string(), text));
    }
    Ok(files)
}
