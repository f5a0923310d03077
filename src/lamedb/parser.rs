//! lamedb reader for versions 3, 4 and 5.

use std::sync::Arc;

use super::{LamedbVersion, ServiceTable};
use crate::codec;
use crate::error::{Diagnostics, Error, Result};
use crate::models::{Service, ServiceType, TransponderType};

/// Parses a whole lamedb file. Bad records become diagnostics; a bad
/// header or layout refuses the file.
pub fn parse(file: &str, text: &str, diagnostics: &mut Diagnostics) -> Result<ServiceTable> {
    let lines: Vec<&str> = text.lines().collect();
    let header = lines.first().copied().unwrap_or("");
    let version = parse_header(file, header)?;

    let mut table = ServiceTable::new();
    table.source_version = Some(version);
    match version {
        LamedbVersion::V5 => parse_v5(file, &lines, &mut table, diagnostics),
        _ => parse_v4(file, version, text, &lines, &mut table, diagnostics)?,
    }
    Ok(table)
}

fn parse_header(file: &str, header: &str) -> Result<LamedbVersion> {
    let number = header
        .trim_end()
        .strip_prefix("eDVB services /")
        .and_then(|rest| rest.strip_suffix('/'))
        .ok_or_else(|| Error::format(file, format!("bad header {:?}", header)))?;
    number
        .parse::<u8>()
        .ok()
        .and_then(LamedbVersion::from_number)
        .ok_or_else(|| Error::UnsupportedVersion {
            file: file.to_string(),
            found: number.to_string(),
        })
}

/// Cursor over the line list with 1-based line numbers for diagnostics.
struct Lines<'a> {
    lines: &'a [&'a str],
    pos: usize,
}

impl<'a> Lines<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<&'a str> {
        self.lines.get(self.pos + offset).copied()
    }

    fn next(&mut self) -> Option<&'a str> {
        let line = self.peek();
        self.pos += 1;
        line
    }

    fn line_no(&self) -> usize {
        self.pos + 1
    }

    fn expect(&mut self, file: &str, marker: &str) -> Result<()> {
        match self.next() {
            Some(line) if line.trim_end() == marker => Ok(()),
            other => Err(Error::format(
                file,
                format!("line {}: expected {:?}, found {:?}", self.pos, marker, other.unwrap_or("")),
            )),
        }
    }
}

fn parse_v4(
    file: &str,
    version: LamedbVersion,
    text: &str,
    lines: &[&str],
    table: &mut ServiceTable,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let mut cur = Lines { lines, pos: 1 };
    cur.expect(file, "transponders")?;

    loop {
        let line_no = cur.line_no();
        let Some(key) = cur.next() else {
            diagnostics.parse(file, line_no, "transponders section not terminated");
            return Ok(());
        };
        if key.trim_end() == "end" {
            break;
        }
        let mut body = Vec::new();
        loop {
            match cur.next() {
                Some(line) if line.trim_end() == "/" => break,
                Some(line) => body.push(line.trim_start_matches('\t')),
                None => break,
            }
        }
        let normalized_key = match normalize_key(key.trim(), version) {
            Some(k) => k,
            None => {
                diagnostics.parse(file, line_no, format!("bad transponder key {:?}", key));
                continue;
            }
        };
        if body.is_empty() {
            diagnostics.parse(file, line_no, format!("transponder {} has no parameters", key));
            continue;
        }
        let body = if version == LamedbVersion::V3 {
            body.iter()
                .map(|line| normalize_v3_params(line))
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            body.join("\n")
        };
        table.transponders.insert(normalized_key, Arc::from(body));
    }

    cur.expect(file, "services")?;
    loop {
        let line_no = cur.line_no();
        let Some(data_id) = cur.peek() else {
            diagnostics.parse(file, line_no, "services section not terminated");
            table.footer = Some(String::new());
            return Ok(());
        };
        if data_id.trim_end() == "end" {
            cur.next();
            break;
        }
        let (Some(name), Some(_)) = (cur.peek_at(1), cur.peek_at(2)) else {
            diagnostics.parse(file, line_no, "truncated service record");
            table.footer = Some(String::new());
            return Ok(());
        };
        let mut name = name.to_string();
        let mut flags_at = 2;
        // A name with an embedded newline pushes the flags line down.
        while let (Some(candidate), Some(following)) = (cur.peek_at(flags_at), cur.peek_at(flags_at + 1)) {
            if candidate.starts_with("p:") || !following.starts_with("p:") {
                break;
            }
            name.push('\n');
            name.push_str(candidate);
            flags_at += 1;
        }
        let flags_cas = cur.peek_at(flags_at).unwrap_or("");
        cur.pos += flags_at + 1;

        let data_id = if version == LamedbVersion::V3 {
            normalize_v3_data_id(data_id.trim())
        } else {
            data_id.trim().to_string()
        };
        match build_service(&data_id, &name, flags_cas, table) {
            Ok(service) => table.insert(service),
            Err(reason) => diagnostics.parse(file, line_no, reason),
        }
    }

    let rest = &lines[cur.pos.min(lines.len())..];
    let footer = if rest.is_empty() {
        String::new()
    } else if text.ends_with('\n') {
        format!("{}\n", rest.join("\n"))
    } else {
        rest.join("\n")
    };
    table.footer = Some(footer);
    Ok(())
}

fn parse_v5(file: &str, lines: &[&str], table: &mut ServiceTable, diagnostics: &mut Diagnostics) {
    let mut comments = Vec::new();
    let mut pending = Vec::new();
    for (i, line) in lines.iter().enumerate().skip(1) {
        let line_no = i + 1;
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with('#') {
            comments.push(line.to_string());
        } else if let Some(rest) = line.strip_prefix("t:") {
            let Some((key, params)) = rest.split_once(',') else {
                diagnostics.parse(file, line_no, "transponder line without parameters");
                continue;
            };
            let Some(key) = normalize_key(key, LamedbVersion::V5) else {
                diagnostics.parse(file, line_no, format!("bad transponder key {:?}", key));
                continue;
            };
            let body = params.replacen(':', " ", 1);
            table.transponders.insert(key, Arc::from(body));
        } else if let Some(rest) = line.strip_prefix("s:") {
            // Services may precede their transponder; link them afterwards.
            pending.push((line_no, rest));
        } else {
            diagnostics.parse(file, line_no, format!("unknown record {:?}", line));
        }
    }

    for (line_no, rest) in pending {
        match split_v5_service(rest) {
            Some((data_id, name, flags)) => {
                let flags_cas = if flags.is_empty() {
                    "p:".to_string()
                } else if flags.starts_with("p:") {
                    flags.to_string()
                } else {
                    format!("p:,{}", flags)
                };
                match build_service(data_id, name, &flags_cas, table) {
                    Ok(service) => table.insert(service),
                    Err(reason) => diagnostics.parse(file, line_no, reason),
                }
            }
            None => diagnostics.parse(file, line_no, "bad service record"),
        }
    }
    table.comments = Some(comments);
}

/// `data_id,"name",flags` -> parts. The name runs to the last quote.
fn split_v5_service(rest: &str) -> Option<(&str, &str, &str)> {
    let (data_id, tail) = rest.split_once(',')?;
    let tail = tail.strip_prefix('"')?;
    let close = tail.rfind('"')?;
    let name = &tail[..close];
    let flags = tail[close + 1..].strip_prefix(',').unwrap_or(&tail[close + 1..]);
    Some((data_id, name, flags))
}

/// Lowercases a `nsp:tsid:onid` key. v3 keys are zero-padded to full width.
fn normalize_key(key: &str, version: LamedbVersion) -> Option<String> {
    let fields: Vec<&str> = key.split(':').collect();
    if fields.len() != 3 || fields.iter().any(|f| u32::from_str_radix(f, 16).is_err()) {
        return None;
    }
    if version != LamedbVersion::V3 {
        return Some(key.to_string());
    }
    Some(format!(
        "{:0>8}:{:0>4}:{:0>4}",
        fields[0].to_lowercase(),
        fields[1].to_lowercase(),
        fields[2].to_lowercase()
    ))
}

fn normalize_v3_data_id(data_id: &str) -> String {
    let widths = [4, 8, 4, 4];
    data_id
        .split(':')
        .enumerate()
        .map(|(i, field)| match widths.get(i) {
            Some(&width) => format!("{:0>width$}", field.to_lowercase(), width = width),
            None => field.to_string(),
        })
        .collect::<Vec<_>>()
        .join(":")
}

/// Pads v3 transponder parameters to the v4 field count.
///
/// Satellites gain system DVB-S, modulation QPSK, rolloff 0.35 and pilot auto.
fn normalize_v3_params(line: &str) -> String {
    let Some((tag, params)) = line.split_once(' ') else {
        return line.to_string();
    };
    let mut fields: Vec<String> = params.split(':').map(str::to_string).collect();
    match tag {
        "s" => {
            fields.resize(fields.len().max(7), "0".to_string());
            for (i, default) in ["0", "1", "0", "2"].iter().enumerate() {
                if fields.len() <= 7 + i {
                    fields.push(default.to_string());
                }
            }
        }
        "t" => fields.resize(fields.len().max(11), "0".to_string()),
        "c" => fields.resize(fields.len().max(7), "0".to_string()),
        _ => {}
    }
    format!("{} {}", tag, fields.join(":"))
}

fn transponder_type_of(namespace: u32, body: Option<&str>) -> TransponderType {
    if let Some(tag) = body.and_then(|b| b.get(..1)).and_then(TransponderType::from_tag) {
        return tag;
    }
    match namespace >> 16 {
        0xEEEE => TransponderType::Terrestrial,
        0xFFFF => TransponderType::Cable,
        _ => TransponderType::Satellite,
    }
}

/// Builds a service from one record, linking it to its transponder.
fn build_service(
    data_id: &str,
    name: &str,
    flags_cas: &str,
    table: &ServiceTable,
) -> std::result::Result<Service, String> {
    let fields: Vec<&str> = data_id.split(':').collect();
    if fields.len() < 6 {
        return Err(format!("data id {:?} has {} fields", data_id, fields.len()));
    }
    let fav_id = codec::fav_id_from_data_id(data_id).map_err(|e| format!("{}: {}", data_id, e))?;
    let namespace = u32::from_str_radix(fields[1], 16).unwrap_or(0);
    let key = format!("{}:{}:{}", fields[1], fields[2], fields[3]);
    let transponder = table.transponders.get(&key).cloned();
    let transponder_type = transponder_type_of(namespace, transponder.as_deref());

    let mut service = Service::new(
        fav_id,
        data_id,
        name,
        ServiceType::from_dvb_code(fields[4]),
        transponder_type,
    );
    service.package = codec::package_of(flags_cas).to_string();
    service.flags_cas = flags_cas.to_string();
    if transponder_type == TransponderType::Satellite {
        service.position = Some(codec::position_from_namespace(namespace));
    }
    service.transponder = transponder;
    Ok(service)
}
