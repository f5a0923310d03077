//! `services.xml`: `<zapit>` / `<sat|terrestrial|cable>` / `<TS>` / `<S>`.

use std::path::Path;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::{fav_id, read_text, Attrs, ContainerLayout, NeutrinoLayout, TsLayout, INDENT, SERVICES_XML};
use crate::error::{Diagnostics, Error, Result};
use crate::lamedb::ServiceTable;
use crate::models::{Service, ServiceType, TransponderType};
use crate::xml::{self, XmlOut};

fn container_type(tag: &str) -> TransponderType {
    match tag {
        "terrestrial" => TransponderType::Terrestrial,
        "cable" => TransponderType::Cable,
        _ => TransponderType::Satellite,
    }
}

fn hex(attrs: &[(String, String)], name: &str) -> std::result::Result<u32, String> {
    let value = xml::get(attrs, name).ok_or_else(|| format!("missing {}", name))?;
    u32::from_str_radix(value.trim(), 16).map_err(|_| format!("bad {} value {:?}", name, value))
}

/// Builds a service from an `<S>` element and its enclosing `<TS>`.
fn build_service(
    attrs: Attrs,
    ts: &[(String, String)],
    transponder_type: TransponderType,
    position: Option<i32>,
) -> std::result::Result<Service, String> {
    let ssid = hex(&attrs, "i")?;
    let tsid = hex(ts, "id")?;
    let onid = hex(ts, "on")?;
    let type_code = xml::get(&attrs, "t")
        .and_then(|t| u32::from_str_radix(t.trim(), 16).ok())
        .unwrap_or(1);
    let namespace = position.map(|p| ((p as u32) & 0xFFFF) << 16).unwrap_or(0);
    let data_id = format!(
        "{:04x}:{:08x}:{:04x}:{:04x}:{}:0",
        ssid, namespace, tsid, onid, type_code
    );
    let fav = fav_id(&format!("{:x}", tsid), &format!("{:x}", onid), &format!("{:x}", ssid));
    let name = xml::get(&attrs, "n").unwrap_or_default().to_string();

    let mut service = Service::new(
        fav,
        data_id,
        name,
        ServiceType::from_dvb_code(&type_code.to_string()),
        transponder_type,
    );
    service.position = position;
    service.attrs = attrs;
    Ok(service)
}

/// Parses `services.xml`. Malformed XML refuses the whole file.
pub fn parse(file: &str, text: &str, diagnostics: &mut Diagnostics) -> Result<(ServiceTable, NeutrinoLayout)> {
    let text = xml::sanitize(text);
    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(true);

    let mut table = ServiceTable::new();
    let mut layout = NeutrinoLayout::default();

    loop {
        let event = reader.read_event().map_err(|e| {
            let line = xml::line_of(&text, reader.buffer_position() as usize);
            Error::format(file, format!("line {}: {}", line, e))
        })?;
        let line = xml::line_of(&text, reader.buffer_position() as usize);
        let (start, self_closing) = match &event {
            Event::Start(e) => (Some(e), false),
            Event::Empty(e) => (Some(e), true),
            Event::Eof => break,
            _ => (None, false),
        };
        let Some(e) = start else {
            continue;
        };
        let attrs = xml::attributes(e);
        match e.name().as_ref() {
            b"zapit" => layout.api = attrs,
            b"sat" | b"terrestrial" | b"cable" => layout.containers.push(ContainerLayout {
                tag: xml::element_name(e),
                attrs,
                transponders: Vec::new(),
                self_closing,
            }),
            b"TS" => match layout.containers.last_mut() {
                Some(container) => container.transponders.push(TsLayout {
                    attrs,
                    services: Vec::new(),
                    self_closing,
                }),
                None => diagnostics.parse(file, line, "transponder outside a satellite or region"),
            },
            b"S" => {
                let Some(container) = layout.containers.last_mut() else {
                    diagnostics.parse(file, line, "service outside a transponder");
                    continue;
                };
                let transponder_type = container_type(&container.tag);
                let position = xml::get(&container.attrs, "position").and_then(|p| p.trim().parse().ok());
                let Some(ts) = container.transponders.last_mut() else {
                    diagnostics.parse(file, line, "service outside a transponder");
                    continue;
                };
                match build_service(attrs, &ts.attrs, transponder_type, position) {
                    Ok(service) => {
                        ts.services.push(service.fav_id.clone());
                        table.insert(service);
                    }
                    Err(reason) => diagnostics.parse(file, line, reason),
                }
            }
            other => log::debug!(
                "{}:{}: skipping <{}>",
                file,
                line,
                String::from_utf8_lossy(other)
            ),
        }
    }
    log::info!("{}: {} services", file, table.len());
    Ok((table, layout))
}

/// Loads `services.xml`; a refused file leaves an empty table.
pub fn load(dir: &Path, diagnostics: &mut Diagnostics) -> (ServiceTable, NeutrinoLayout) {
    let Some(text) = read_text(dir, SERVICES_XML, diagnostics) else {
        return (ServiceTable::new(), NeutrinoLayout::default());
    };
    match parse(SERVICES_XML, &text, diagnostics) {
        Ok(parsed) => parsed,
        Err(e) => {
            diagnostics.error(&e);
            (ServiceTable::new(), NeutrinoLayout::default())
        }
    }
}

/// Attributes of an `<S>` element with the current service name.
fn service_attrs(service: &Service) -> Attrs {
    let mut attrs = service.attrs.clone();
    match attrs.iter_mut().find(|(k, _)| k == "n") {
        Some((_, name)) => *name = service.name.clone(),
        None => attrs.insert(attrs.len().min(1), ("n".to_string(), service.name.clone())),
    }
    attrs
}

/// Writes `services.xml` in the layout it was read with. Services deleted
/// since are left out.
pub fn write(table: &ServiceTable, layout: &NeutrinoLayout) -> Result<String> {
    let mut out = XmlOut::new(SERVICES_XML, INDENT);
    out.decl()?;
    out.open(0, "zapit", &layout.api)?;
    for container in &layout.containers {
        if container.self_closing && container.transponders.is_empty() {
            out.empty(1, &container.tag, &container.attrs)?;
            continue;
        }
        out.open(1, &container.tag, &container.attrs)?;
        for ts in &container.transponders {
            let services: Vec<&Service> = ts.services.iter().filter_map(|f| table.get(f)).collect();
            if ts.self_closing && services.is_empty() {
                out.empty(2, "TS", &ts.attrs)?;
                continue;
            }
            out.open(2, "TS", &ts.attrs)?;
            for service in services {
                out.empty(3, "S", &service_attrs(service))?;
            }
            out.close(2, "TS")?;
        }
        out.close(1, &container.tag)?;
    }
    out.close(0, "zapit")?;
    Ok(out.finish())
}
