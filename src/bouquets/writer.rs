//! Enigma2 bouquet writer.
//!
//! File names are settled here: missing or duplicate names are allocated,
//! alternatives ids are made unique over the whole pass and markers are
//! renumbered from 1.

use std::collections::HashSet;
use std::fmt::Write as _;

use super::{bouquet_header, safe_file_name, TYPE_ALT};
use crate::codec;
use crate::lamedb::ServiceTable;
use crate::models::{
    AltMember, BqType, Bouquet, BouquetEntry, BouquetId, BouquetRoot, IptvRef, RootKind, ServiceRef,
};

/// Output of one write pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    /// `(file name, contents)` in write order.
    pub files: Vec<(String, String)>,
    /// Header lines of locked bouquets, for the blacklist.
    pub locked_headers: Vec<String>,
    /// File name each top-level bouquet was written to.
    pub assigned: Vec<(BouquetId, String)>,
}

struct Pass<'a> {
    services: &'a ServiceTable,
    force_bq_names: bool,
    used_files: HashSet<String>,
    used_alt_ids: HashSet<String>,
    marker_no: u32,
    out: Rendered,
}

/// Renders the Enigma2 roots (TV and radio) into files.
pub fn render(roots: &[BouquetRoot], services: &ServiceTable, force_bq_names: bool) -> Rendered {
    let mut pass = Pass {
        services,
        force_bq_names,
        used_files: HashSet::new(),
        used_alt_ids: HashSet::new(),
        marker_no: 0,
        out: Rendered::default(),
    };
    let enigma_roots: Vec<&BouquetRoot> = roots
        .iter()
        .filter(|r| matches!(r.kind, RootKind::Tv | RootKind::Radio))
        .collect();

    // Names read from disk are claimed first so new bouquets cannot take them.
    let files = claim_files(&mut pass, &enigma_roots);
    for root in enigma_roots {
        write_root(&mut pass, root, &files);
    }
    pass.out
}

/// Decides the backing file of every top-level bouquet.
fn claim_files(pass: &mut Pass, roots: &[&BouquetRoot]) -> Vec<(BouquetId, String)> {
    let mut files = Vec::new();
    let mut pending = Vec::new();
    for root in roots {
        for bouquet in root.bouquets.iter().filter(|b| b.kind != BqType::Marker) {
            match &bouquet.file {
                Some(file) if pass.used_files.insert(file.clone()) => {
                    files.push((bouquet.id, file.clone()))
                }
                _ => pending.push((bouquet, root.kind)),
            }
        }
    }
    for (bouquet, kind) in pending {
        let ext = kind.bouquet_type().extension();
        let file = if pass.force_bq_names && !bouquet.name.trim().is_empty() {
            named_file(pass, &bouquet.name, ext)
        } else {
            numbered_file(pass, "userbouquet", ext)
        };
        files.push((bouquet.id, file));
    }
    files
}

/// `userbouquet.<safe name>.<ext>`, suffixed until unique.
fn named_file(pass: &mut Pass, name: &str, ext: &str) -> String {
    let base = safe_file_name(name);
    let mut candidate = format!("userbouquet.{}.{}", base, ext);
    let mut n = 1;
    while pass.used_files.contains(&candidate) {
        candidate = format!("userbouquet.{}_{}.{}", base, n, ext);
        n += 1;
    }
    pass.used_files.insert(candidate.clone());
    candidate
}

/// `<prefix>.deNN.<ext>` with the smallest free NN.
fn numbered_file(pass: &mut Pass, prefix: &str, ext: &str) -> String {
    let mut n = 1;
    loop {
        let candidate = format!("{}.de{:02}.{}", prefix, n, ext);
        if pass.used_files.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Keeps a free alternatives id or allocates the smallest free `deNN`.
fn alt_id(pass: &mut Pass, wanted: &str) -> String {
    if !wanted.is_empty() && pass.used_alt_ids.insert(wanted.to_string()) {
        return wanted.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("de{:02}", n);
        if pass.used_alt_ids.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn write_root(pass: &mut Pass, root: &BouquetRoot, files: &[(BouquetId, String)]) {
    let mut text = format!("#NAME {}\n", root.name);
    let digit = root.kind.reference_digit();
    for bouquet in &root.bouquets {
        if bouquet.kind == BqType::Marker {
            pass.marker_no += 1;
            marker_lines(&mut text, pass.marker_no, &bouquet.name);
            continue;
        }
        let Some((_, file)) = files.iter().find(|(id, _)| *id == bouquet.id) else {
            continue;
        };
        let header = bouquet_header(bouquet.hidden, digit, file);
        let _ = writeln!(text, "#SERVICE {}", header);
        if bouquet.locked {
            pass.out.locked_headers.push(header);
        }
        let body = bouquet_file(pass, bouquet, root.kind);
        pass.out.files.push((file.clone(), body));
        pass.out.assigned.push((bouquet.id, file.clone()));
    }
    pass.out.files.push((root.kind.root_file().to_string(), text));
}

fn marker_lines(text: &mut String, number: u32, label: &str) {
    let _ = writeln!(text, "#SERVICE 1:64:{:X}:0:0:0:0:0:0:0::{}", number, label);
    let _ = writeln!(text, "#DESCRIPTION {}", label);
}

fn bouquet_file(pass: &mut Pass, bouquet: &Bouquet, kind: RootKind) -> String {
    let mut text = format!("#NAME {}\n", bouquet.name);
    for entry in &bouquet.entries {
        entry_lines(pass, &mut text, entry, kind);
    }
    text
}

fn entry_lines(pass: &mut Pass, text: &mut String, entry: &BouquetEntry, kind: RootKind) {
    match entry {
        BouquetEntry::Service(s) => service_lines(pass.services, text, s),
        BouquetEntry::Iptv(i) => iptv_lines(text, i),
        BouquetEntry::Marker(m) => {
            pass.marker_no += 1;
            marker_lines(text, pass.marker_no, &m.text);
        }
        BouquetEntry::Space => {
            pass.marker_no += 1;
            let _ = writeln!(text, "#SERVICE 1:832:D:{:X}:0:0:0:0:0:0:", pass.marker_no);
        }
        BouquetEntry::Alt(alt) => {
            let ext = kind.bouquet_type().extension();
            let id = alt_id(pass, &alt.alt_id);
            let file = format!("alternatives.{}.{}", id, ext);
            let _ = writeln!(
                text,
                "#SERVICE 1:{}:{}:0:0:0:0:0:0:0:FROM BOUQUET \"{}\" ORDER BY bouquet",
                TYPE_ALT,
                kind.reference_digit(),
                file
            );
            let mut body = format!("#NAME {}\n", alt.name);
            for member in &alt.members {
                match member {
                    AltMember::Service(s) => service_lines(pass.services, &mut body, s),
                    AltMember::Iptv(i) => iptv_lines(&mut body, i),
                }
            }
            pass.used_files.insert(file.clone());
            pass.out.files.push((file, body));
        }
        BouquetEntry::SubBouquet(sub) => {
            let ext = kind.bouquet_type().extension();
            let file = match &sub.file {
                Some(f) if pass.used_files.insert(f.clone()) => f.clone(),
                _ => numbered_file(pass, "subbouquet", ext),
            };
            let header = bouquet_header(sub.hidden, kind.reference_digit(), &file);
            let _ = writeln!(text, "#SERVICE {}", header);
            if let Some(desc) = &sub.description {
                let _ = writeln!(text, "#DESCRIPTION {}", desc);
            }
            let mut body = format!("#NAME {}\n", sub.name);
            for inner in &sub.entries {
                entry_lines(pass, &mut body, inner, kind);
            }
            pass.out.files.push((file, body));
        }
    }
}

/// Reference of an entry created in memory, derived from the service table.
fn fresh_reference(services: &ServiceTable, fav_id: &str) -> String {
    match services.get(fav_id) {
        Some(service) => service.bouquet_reference(),
        None => codec::bouquet_reference(fav_id, 1),
    }
}

fn service_lines(services: &ServiceTable, text: &mut String, s: &ServiceRef) {
    let (reference, path) = if s.reference.is_empty() {
        (fresh_reference(services, &s.fav_id), Some(""))
    } else {
        (s.reference.clone(), s.path.as_deref())
    };
    text.push_str("#SERVICE ");
    text.push_str(&reference);
    if path.is_some() || s.extra_name.is_some() {
        text.push(':');
        text.push_str(path.unwrap_or(""));
    }
    if let Some(name) = &s.extra_name {
        text.push(':');
        text.push_str(name);
    }
    text.push('\n');
    if let Some(desc) = &s.description {
        let _ = writeln!(text, "#DESCRIPTION {}", desc);
    }
}

fn iptv_lines(text: &mut String, i: &IptvRef) {
    let _ = writeln!(text, "#SERVICE {}", i.fav_id);
    if let Some(desc) = &i.description {
        let _ = writeln!(text, "#DESCRIPTION {}", desc);
    }
}
