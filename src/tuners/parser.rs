//! Tolerant readers for the tuner XML families.

use std::str::FromStr;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::{
    CableProvider, CableTransponder, SatTransponder, Satellite, TerTransponder, TerrestrialRegion,
    TunerFile, CABLES_XML, SATELLITES_XML, TERRESTRIAL_XML,
};
use crate::error::{Diagnostics, Error, Result};
use crate::xml;

type Attrs = Vec<(String, String)>;

/// Container element with its transponder children, attributes undecoded.
struct RawContainer {
    line: usize,
    attrs: Attrs,
    children: Vec<(usize, Attrs)>,
}

/// Walks `<root><container ...><transponder .../></container></root>`.
fn read_raw(file: &str, text: &str, container: &str) -> Result<(Option<String>, Vec<RawContainer>)> {
    let text = xml::sanitize(text);
    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(true);

    let mut comment = None;
    let mut seen_element = false;
    let mut containers: Vec<RawContainer> = Vec::new();
    let mut current: Option<RawContainer> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            let line = xml::line_of(&text, reader.buffer_position() as usize);
            Error::format(file, format!("line {}: {}", line, e))
        })?;
        let line = xml::line_of(&text, reader.buffer_position() as usize);
        let (start, is_empty) = match &event {
            Event::Start(e) => (Some(e), false),
            Event::Empty(e) => (Some(e), true),
            _ => (None, false),
        };
        if let Some(e) = start {
            seen_element = true;
            if e.name().as_ref() == container.as_bytes() {
                if let Some(done) = current.take() {
                    containers.push(done);
                }
                let raw = RawContainer {
                    line,
                    attrs: xml::attributes(e),
                    children: Vec::new(),
                };
                if is_empty {
                    containers.push(raw);
                } else {
                    current = Some(raw);
                }
            } else if e.name().as_ref() == b"transponder" {
                if let Some(raw) = current.as_mut() {
                    raw.children.push((line, xml::attributes(e)));
                }
            }
            continue;
        }
        match event {
            Event::Comment(e) if !seen_element && comment.is_none() => {
                comment = Some(xml::comment_text(&e));
            }
            Event::End(e) if e.name().as_ref() == container.as_bytes() => {
                if let Some(done) = current.take() {
                    containers.push(done);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if let Some(done) = current.take() {
        containers.push(done);
    }
    Ok((comment, containers))
}

/// Takes an attribute out of the list and parses it.
fn num<T: FromStr>(attrs: &mut Attrs, name: &str) -> std::result::Result<Option<T>, String> {
    match xml::take(attrs, name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("bad {} value {:?}", name, value)),
    }
}

fn required<T: FromStr>(attrs: &mut Attrs, name: &str) -> std::result::Result<T, String> {
    num(attrs, name)?.ok_or_else(|| format!("missing {}", name))
}

fn sat_transponder(mut a: Attrs) -> std::result::Result<SatTransponder, String> {
    Ok(SatTransponder {
        frequency: required(&mut a, "frequency")?,
        symbol_rate: required(&mut a, "symbol_rate")?,
        polarization: num(&mut a, "polarization")?.unwrap_or(0),
        fec_inner: num(&mut a, "fec_inner")?.unwrap_or(0),
        system: num(&mut a, "system")?,
        modulation: num(&mut a, "modulation")?,
        rolloff: num(&mut a, "rolloff")?,
        pilot: num(&mut a, "pilot")?,
        inversion: num(&mut a, "inversion")?,
        pls_mode: num(&mut a, "pls_mode")?,
        pls_code: num(&mut a, "pls_code")?,
        is_id: num(&mut a, "is_id")?,
        t2mi_plp_id: num(&mut a, "t2mi_plp_id")?,
        t2mi_pid: num(&mut a, "t2mi_pid")?,
        extra: a,
    })
}

fn ter_transponder(mut a: Attrs) -> std::result::Result<TerTransponder, String> {
    Ok(TerTransponder {
        centre_frequency: required(&mut a, "centre_frequency")?,
        system: num(&mut a, "system")?,
        bandwidth: num(&mut a, "bandwidth")?,
        constellation: num(&mut a, "constellation")?,
        code_rate_hp: num(&mut a, "code_rate_hp")?,
        code_rate_lp: num(&mut a, "code_rate_lp")?,
        guard_interval: num(&mut a, "guard_interval")?,
        transmission_mode: num(&mut a, "transmission_mode")?,
        hierarchy_information: num(&mut a, "hierarchy_information")?,
        inversion: num(&mut a, "inversion")?,
        plp_id: num(&mut a, "plp_id")?,
        extra: a,
    })
}

fn cable_transponder(mut a: Attrs) -> std::result::Result<CableTransponder, String> {
    Ok(CableTransponder {
        frequency: required(&mut a, "frequency")?,
        symbol_rate: required(&mut a, "symbol_rate")?,
        modulation: num(&mut a, "modulation")?,
        fec_inner: num(&mut a, "fec_inner")?,
        system: num(&mut a, "system")?,
        extra: a,
    })
}

/// Converts children one by one; a bad transponder is dropped with a diagnostic.
fn children<T>(
    file: &str,
    raw: Vec<(usize, Attrs)>,
    convert: fn(Attrs) -> std::result::Result<T, String>,
    diagnostics: &mut Diagnostics,
) -> Vec<T> {
    let mut out = Vec::with_capacity(raw.len());
    for (line, attrs) in raw {
        match convert(attrs) {
            Ok(tp) => out.push(tp),
            Err(reason) => diagnostics.parse(file, line, reason),
        }
    }
    out
}

fn sat_head(attrs: &mut Attrs) -> std::result::Result<(u32, i32), String> {
    Ok((
        num(attrs, "flags")?.unwrap_or(0),
        num(attrs, "position")?.unwrap_or(0),
    ))
}

pub fn parse_satellites(text: &str, diagnostics: &mut Diagnostics) -> Result<TunerFile<Satellite>> {
    let (comment, raw) = read_raw(SATELLITES_XML, text, "sat")?;
    let mut entries = Vec::with_capacity(raw.len());
    for mut container in raw {
        let (flags, position) = match sat_head(&mut container.attrs) {
            Ok(head) => head,
            Err(reason) => {
                diagnostics.parse(SATELLITES_XML, container.line, reason);
                continue;
            }
        };
        let name = xml::take(&mut container.attrs, "name").unwrap_or_default();
        entries.push(Satellite {
            name,
            flags,
            position,
            transponders: children(SATELLITES_XML, container.children, sat_transponder, diagnostics),
            extra: container.attrs,
        });
    }
    log::debug!("{}: {} satellites", SATELLITES_XML, entries.len());
    Ok(TunerFile { comment, entries })
}

pub fn parse_terrestrial(
    text: &str,
    diagnostics: &mut Diagnostics,
) -> Result<TunerFile<TerrestrialRegion>> {
    let (comment, raw) = read_raw(TERRESTRIAL_XML, text, "terrestrial")?;
    let mut entries = Vec::with_capacity(raw.len());
    for mut container in raw {
        let flags = match num(&mut container.attrs, "flags") {
            Ok(flags) => flags,
            Err(reason) => {
                diagnostics.parse(TERRESTRIAL_XML, container.line, reason);
                continue;
            }
        };
        entries.push(TerrestrialRegion {
            name: xml::take(&mut container.attrs, "name").unwrap_or_default(),
            flags,
            countrycode: xml::take(&mut container.attrs, "countrycode"),
            transponders: children(TERRESTRIAL_XML, container.children, ter_transponder, diagnostics),
            extra: container.attrs,
        });
    }
    log::debug!("{}: {} regions", TERRESTRIAL_XML, entries.len());
    Ok(TunerFile { comment, entries })
}

pub fn parse_cables(text: &str, diagnostics: &mut Diagnostics) -> Result<TunerFile<CableProvider>> {
    let (comment, raw) = read_raw(CABLES_XML, text, "cable")?;
    let mut entries = Vec::with_capacity(raw.len());
    for mut container in raw {
        let flags = match num(&mut container.attrs, "flags") {
            Ok(flags) => flags,
            Err(reason) => {
                diagnostics.parse(CABLES_XML, container.line, reason);
                continue;
            }
        };
        entries.push(CableProvider {
            name: xml::take(&mut container.attrs, "name").unwrap_or_default(),
            flags,
            satfeed: xml::take(&mut container.attrs, "satfeed"),
            countrycode: xml::take(&mut container.attrs, "countrycode"),
            transponders: children(CABLES_XML, container.children, cable_transponder, diagnostics),
            extra: container.attrs,
        });
    }
    log::debug!("{}: {} providers", CABLES_XML, entries.len());
    Ok(TunerFile { comment, entries })
}
