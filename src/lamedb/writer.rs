//! lamedb emitters. Transponders go out sorted by key, services in table order.

use std::fmt::Write as _;

use super::{ServiceTable, DEFAULT_FOOTER};

const V5_COMMENTS: [&str; 2] = [
    "# Transponders: t:dvbnamespace:transport_stream_id:original_network_id,FEPARMS",
    "# Services: s:service_id:dvbnamespace:transport_stream_id:original_network_id:service_type:service_number:source_id,\"service_name\"[,p:provider_name][,c:cached_pid]*[,C:cached_capid]*[,f:flags]",
];

fn sorted_transponders(table: &ServiceTable) -> Vec<(&String, &str)> {
    let mut transponders: Vec<(&String, &str)> = table
        .transponders
        .iter()
        .map(|(key, body)| (key, body.as_ref()))
        .collect();
    transponders.sort_by(|a, b| a.0.cmp(b.0));
    transponders
}

pub fn write_v4(table: &ServiceTable) -> String {
    let mut out = String::with_capacity(64 * 1024);
    out.push_str("eDVB services /4/\ntransponders\n");
    for (key, body) in sorted_transponders(table) {
        out.push_str(key);
        out.push('\n');
        for line in body.lines() {
            out.push('\t');
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("/\n");
    }
    out.push_str("end\nservices\n");
    for service in table.iter().filter(|s| !s.is_iptv()) {
        let _ = writeln!(out, "{}\n{}\n{}", service.data_id(), service.name, service.flags_cas);
    }
    out.push_str("end\n");
    out.push_str(table.footer.as_deref().unwrap_or(DEFAULT_FOOTER));
    out
}

/// Flags as written in v5: a bare `p:` is left out.
fn v5_flags(flags_cas: &str) -> &str {
    if flags_cas == "p:" {
        ""
    } else {
        flags_cas.strip_prefix("p:,").unwrap_or(flags_cas)
    }
}

pub fn write_v5(table: &ServiceTable) -> String {
    let mut out = String::with_capacity(64 * 1024);
    out.push_str("eDVB services /5/\n");
    match &table.comments {
        Some(comments) => comments.iter().for_each(|c| {
            out.push_str(c);
            out.push('\n');
        }),
        None => V5_COMMENTS.iter().for_each(|c| {
            out.push_str(c);
            out.push('\n');
        }),
    }
    for (key, body) in sorted_transponders(table) {
        let first = body.lines().next().unwrap_or("");
        let _ = writeln!(out, "t:{},{}", key, first.replacen(' ', ":", 1));
    }
    for service in table.iter().filter(|s| !s.is_iptv()) {
        let _ = write!(out, "s:{},\"{}\"", service.data_id(), service.name);
        let flags = v5_flags(&service.flags_cas);
        if !flags.is_empty() {
            out.push(',');
            out.push_str(flags);
        }
        out.push('\n');
    }
    out
}
