//! Enigma2 bouquet reader.

use std::collections::HashSet;
use std::path::Path;

use super::{
    bouquet_file_of, file_stem, MAX_DEPTH, TYPE_ALT, TYPE_BOUQUET, TYPE_DEFAULT, TYPE_HIDDEN_BOUQUET,
    TYPE_MARKER, TYPE_SPACE,
};
use crate::error::{Diagnostics, Error, InvariantViolation};
use crate::iptv;
use crate::lamedb::ServiceTable;
use crate::models::{
    AltGroup, AltMember, BqType, Bouquet, BouquetEntry, BouquetRoot, IdAllocator, IptvRef, Marker,
    RootKind, Service, ServiceRef, ServiceType, SubBouquet, TransponderType,
};

/// Shared state of one load.
struct Ctx<'a> {
    dir: &'a Path,
    services: &'a mut ServiceTable,
    diagnostics: &'a mut Diagnostics,
    /// Files on the current inclusion chain.
    visited: HashSet<String>,
}

/// Where a bouquet body is being read.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Scope {
    Bouquet { depth: usize },
    Alternatives,
}

/// Loads `bouquets.tv` and `bouquets.radio` with every file they reference.
///
/// IPTV entries are registered in `services` so that every entry holding a
/// fav id resolves in the service table.
pub fn load(
    dir: &Path,
    services: &mut ServiceTable,
    ids: &mut IdAllocator,
    diagnostics: &mut Diagnostics,
) -> Vec<BouquetRoot> {
    let mut ctx = Ctx {
        dir,
        services,
        diagnostics,
        visited: HashSet::new(),
    };
    [RootKind::Tv, RootKind::Radio]
        .into_iter()
        .map(|kind| load_root(&mut ctx, kind, ids))
        .collect()
}

fn read_file(ctx: &mut Ctx, file: &str) -> Option<String> {
    let path = ctx.dir.join(file);
    if !path.is_file() {
        return None;
    }
    match std::fs::read(&path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            ctx.diagnostics.error(&Error::io(path, e));
            None
        }
    }
}

/// Body of a `#SERVICE` line; both `#SERVICE x` and `#SERVICE: x` occur.
fn service_body(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("#SERVICE")?;
    let rest = rest.strip_prefix(':').unwrap_or(rest);
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

fn load_root(ctx: &mut Ctx, kind: RootKind, ids: &mut IdAllocator) -> BouquetRoot {
    let mut root = BouquetRoot::new(kind);
    let file = kind.root_file();
    let Some(text) = read_file(ctx, file) else {
        log::info!("{} not present", file);
        return root;
    };

    let mut last_marker: Option<usize> = None;
    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        if let Some(name) = line.strip_prefix("#NAME ") {
            root.name = name.to_string();
            continue;
        }
        if let Some(desc) = line.strip_prefix("#DESCRIPTION") {
            let desc = desc.trim_start_matches([' ', ':']);
            if let Some(idx) = last_marker.take() {
                if root.bouquets[idx].name.is_empty() {
                    root.bouquets[idx].name = desc.to_string();
                }
            }
            continue;
        }
        let Some(body) = service_body(line) else {
            if !line.trim().is_empty() {
                ctx.diagnostics.parse(file, line_no, format!("unexpected line {:?}", line));
            }
            continue;
        };
        last_marker = None;
        let fields: Vec<&str> = body.split(':').collect();
        match fields.get(1).copied() {
            Some(TYPE_MARKER) => {
                let text = fields.get(11..).map(|rest| rest.join(":")).unwrap_or_default();
                let marker = Bouquet::new(ids.next_id(), text, BqType::Marker);
                root.bouquets.push(marker);
                last_marker = Some(root.bouquets.len() - 1);
            }
            Some(TYPE_BOUQUET) | Some(TYPE_HIDDEN_BOUQUET) => {
                let Some(bq_file) = bouquet_file_of(body) else {
                    ctx.diagnostics.parse(file, line_no, "bouquet line without file name");
                    continue;
                };
                let hidden = fields[1] == TYPE_HIDDEN_BOUQUET;
                let bouquet = load_bouquet(ctx, &root, bq_file, kind, hidden, ids);
                root.bouquets.push(bouquet);
            }
            _ => ctx
                .diagnostics
                .parse(file, line_no, format!("unsupported root entry {:?}", body)),
        }
    }
    log::debug!("{}: {} bouquets", file, root.bouquets.len());
    root
}

fn load_bouquet(
    ctx: &mut Ctx,
    root: &BouquetRoot,
    file: &str,
    kind: RootKind,
    hidden: bool,
    ids: &mut IdAllocator,
) -> Bouquet {
    let mut bouquet = Bouquet::new(ids.next_id(), String::new(), kind.bouquet_type());
    bouquet.file = Some(file.to_string());
    bouquet.hidden = hidden;

    match read_file(ctx, file) {
        Some(text) => {
            let (name, entries) = parse_bouquet_text(ctx, file, &text, Scope::Bouquet { depth: 0 });
            bouquet.name = root.unique_name(&name);
            bouquet.entries = entries;
        }
        None => {
            ctx.diagnostics
                .notice(file, None, "referenced bouquet file is missing");
            bouquet.name = root.unique_name(&format!("{} [empty]", file_stem(file)));
        }
    }
    bouquet
}

/// Applies a `#DESCRIPTION` line to the entry it follows.
fn attach_description(services: &mut ServiceTable, entry: &mut BouquetEntry, desc: &str) {
    match entry {
        BouquetEntry::Service(s) => s.description = Some(desc.to_string()),
        BouquetEntry::Iptv(i) => {
            i.description = Some(desc.to_string());
            if i.name.is_empty() {
                i.name = desc.to_string();
                if let Some(service) = services.get_mut(&i.fav_id) {
                    service.name = desc.to_string();
                }
            }
        }
        BouquetEntry::Marker(m) if m.text.is_empty() => m.text = desc.to_string(),
        BouquetEntry::Alt(alt) if alt.name.is_empty() => alt.name = desc.to_string(),
        BouquetEntry::SubBouquet(sub) => sub.description = Some(desc.to_string()),
        _ => {}
    }
}

/// Parses one bouquet file body into its name and entries.
fn parse_bouquet_text(
    ctx: &mut Ctx,
    file: &str,
    text: &str,
    scope: Scope,
) -> (String, Vec<BouquetEntry>) {
    let mut name = String::new();
    let mut entries: Vec<BouquetEntry> = Vec::new();
    let mut can_describe = false;

    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        if let Some(n) = line.strip_prefix("#NAME") {
            name = n.trim_start().to_string();
            continue;
        }
        if let Some(desc) = line.strip_prefix("#DESCRIPTION") {
            let desc = desc.strip_prefix(':').unwrap_or(desc);
            let desc = desc.strip_prefix(' ').unwrap_or(desc);
            match entries.last_mut() {
                Some(entry) if can_describe => attach_description(ctx.services, entry, desc),
                _ => ctx.diagnostics.notice(file, Some(line_no), "description without entry"),
            }
            can_describe = false;
            continue;
        }
        let Some(body) = service_body(line) else {
            if !line.trim().is_empty() {
                ctx.diagnostics.parse(file, line_no, format!("unexpected line {:?}", line));
            }
            continue;
        };
        can_describe = false;
        let Some(entry) = parse_entry(ctx, file, line_no, body, scope) else {
            continue;
        };
        if scope == Scope::Alternatives
            && !matches!(entry, BouquetEntry::Service(_) | BouquetEntry::Iptv(_))
        {
            let what = format!("{:?}", entry.service_type());
            ctx.diagnostics.parse(
                file,
                line_no,
                InvariantViolation::NestedAlternatives(what).to_string(),
            );
            continue;
        }
        entries.push(entry);
        can_describe = true;
    }
    (name, entries)
}

fn parse_entry(
    ctx: &mut Ctx,
    file: &str,
    line_no: usize,
    body: &str,
    scope: Scope,
) -> Option<BouquetEntry> {
    if iptv::is_iptv_line(body) {
        return Some(BouquetEntry::Iptv(register_iptv(ctx, body)));
    }
    let fields: Vec<&str> = body.split(':').collect();
    if fields.len() < 10 {
        ctx.diagnostics
            .parse(file, line_no, format!("reference has {} fields", fields.len()));
        return None;
    }
    match fields[1] {
        TYPE_MARKER => Some(BouquetEntry::Marker(Marker {
            text: fields.get(11..).map(|rest| rest.join(":")).unwrap_or_default(),
            number: u32::from_str_radix(fields[2], 16).unwrap_or(0),
        })),
        TYPE_SPACE => Some(BouquetEntry::Space),
        TYPE_ALT => {
            let Some(alt_file) = bouquet_file_of(body) else {
                ctx.diagnostics.parse(file, line_no, "alternatives without file name");
                return None;
            };
            if scope == Scope::Alternatives {
                // Reported by the caller; do not follow the nested file.
                return Some(BouquetEntry::Alt(AltGroup {
                    alt_id: file_stem(alt_file).to_string(),
                    name: String::new(),
                    members: Vec::new(),
                }));
            }
            Some(BouquetEntry::Alt(load_alternatives(ctx, alt_file)))
        }
        TYPE_BOUQUET | TYPE_HIDDEN_BOUQUET => {
            let Some(sub_file) = bouquet_file_of(body) else {
                ctx.diagnostics.parse(file, line_no, "sub-bouquet without file name");
                return None;
            };
            let depth = match scope {
                Scope::Bouquet { depth } => depth,
                Scope::Alternatives => MAX_DEPTH,
            };
            let hidden = fields[1] == TYPE_HIDDEN_BOUQUET;
            load_sub_bouquet(ctx, file, line_no, sub_file, hidden, depth)
        }
        _ => {
            let service_ref = parse_service_ref(&fields);
            if !ctx.services.contains(&service_ref.fav_id) {
                ctx.diagnostics.parse(
                    file,
                    line_no,
                    format!("service {} is not in the service table", service_ref.fav_id),
                );
                return None;
            }
            if fields[1] != TYPE_DEFAULT {
                log::debug!("{}:{}: service flags {} kept verbatim", file, line_no, fields[1]);
            }
            Some(BouquetEntry::Service(service_ref))
        }
    }
}

/// Splits `REF(10):PATH:NAME` into a service reference.
fn parse_service_ref(fields: &[&str]) -> ServiceRef {
    let mut service_ref = ServiceRef::new(fields[3..7].join(":").to_uppercase());
    service_ref.reference = fields[..10].join(":");
    service_ref.path = fields.get(10).map(|p| p.to_string());
    service_ref.extra_name = fields
        .get(11..)
        .map(|rest| rest.join(":"))
        .filter(|name| !name.is_empty());
    service_ref
}

/// Adds a stream entry to the service table and returns its bouquet entry.
fn register_iptv(ctx: &mut Ctx, line: &str) -> IptvRef {
    let name = iptv::IptvReference::parse(line)
        .ok()
        .and_then(|r| r.name)
        .unwrap_or_default();
    if !ctx.services.contains(line) {
        let service = Service::new(
            line,
            iptv::data_id_of_line(line),
            name.clone(),
            ServiceType::Iptv,
            TransponderType::Satellite,
        );
        ctx.services.insert(service);
    }
    IptvRef::new(line, name)
}

fn load_alternatives(ctx: &mut Ctx, file: &str) -> AltGroup {
    let mut group = AltGroup {
        alt_id: file_stem(file).to_string(),
        name: String::new(),
        members: Vec::new(),
    };
    let Some(text) = read_file(ctx, file) else {
        ctx.diagnostics.notice(file, None, "alternatives file is missing");
        return group;
    };
    let (name, entries) = parse_bouquet_text(ctx, file, &text, Scope::Alternatives);
    group.name = name;
    for entry in entries {
        match entry {
            BouquetEntry::Service(s) => group.members.push(AltMember::Service(s)),
            BouquetEntry::Iptv(i) => {
                ctx.diagnostics.notice(
                    file,
                    None,
                    format!("stream {} inside alternatives kept", i.fav_id),
                );
                group.members.push(AltMember::Iptv(i));
            }
            _ => {}
        }
    }
    group
}

fn load_sub_bouquet(
    ctx: &mut Ctx,
    parent: &str,
    line_no: usize,
    file: &str,
    hidden: bool,
    depth: usize,
) -> Option<BouquetEntry> {
    if depth >= MAX_DEPTH || ctx.visited.contains(file) {
        ctx.diagnostics.parse(
            parent,
            line_no,
            format!("sub-bouquet {} nested too deep or cyclic", file),
        );
        return None;
    }
    ctx.visited.insert(file.to_string());
    let (name, entries) = match read_file(ctx, file) {
        Some(text) => parse_bouquet_text(ctx, file, &text, Scope::Bouquet { depth: depth + 1 }),
        None => {
            ctx.diagnostics.notice(file, None, "sub-bouquet file is missing");
            (format!("{} [empty]", file_stem(file)), Vec::new())
        }
    };
    ctx.visited.remove(file);
    Some(BouquetEntry::SubBouquet(SubBouquet {
        name,
        file: Some(file.to_string()),
        hidden,
        description: None,
        entries,
    }))
}
