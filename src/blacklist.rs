//! Parental lock list (`blacklist`) and stream relay list
//! (`whitelist_streamrelay`).

use std::fs;
use std::path::Path;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::bouquets::bouquet_file_of;
use crate::error::{Diagnostics, Error};
use crate::iptv;
use crate::lamedb::ServiceTable;
use crate::models::{BouquetRoot, Service};

pub const BLACKLIST: &str = "blacklist";
pub const STREAM_RELAY: &str = "whitelist_streamrelay";

/// What a save does with one of these files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileAction {
    Write(String),
    Delete,
    Skip,
}

/// Fav id a blacklist or relay line refers to: the line itself for streams,
/// reference fields 3 to 6 otherwise.
pub fn fav_id_of(line: &str) -> Option<String> {
    if iptv::is_iptv_line(line) {
        return Some(line.to_string());
    }
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 10 {
        return None;
    }
    Some(fields[3..7].join(":").to_uppercase())
}

fn read_lines(dir: &Path, file: &str, diagnostics: &mut Diagnostics) -> Vec<String> {
    let path = dir.join(file);
    if !path.is_file() {
        return Vec::new();
    }
    match fs::read(&path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes)
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .filter(|l| !l.trim().is_empty())
            .collect(),
        Err(e) => {
            diagnostics.error(&Error::io(path, e));
            Vec::new()
        }
    }
}

/// Locked services, in file order. Locked bouquets are kept on the bouquets
/// themselves and merged back in when the file is written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Blacklist {
    entries: IndexSet<String>,
    /// Locked bouquet file to the service line its header followed on load.
    #[serde(skip)]
    anchors: IndexMap<String, Option<String>>,
    /// The file existed on load; an emptied list still truncates it.
    #[serde(skip)]
    existed: bool,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(dir: &Path, diagnostics: &mut Diagnostics) -> Self {
        let existed = dir.join(BLACKLIST).is_file();
        let entries = read_lines(dir, BLACKLIST, diagnostics).into_iter().collect();
        Self {
            entries,
            anchors: IndexMap::new(),
            existed,
        }
    }

    /// Moves bouquet headers onto their bouquets and drops lines that refer
    /// to nothing loaded.
    pub fn reconcile(
        &mut self,
        roots: &mut [BouquetRoot],
        services: &ServiceTable,
        diagnostics: &mut Diagnostics,
    ) {
        let mut kept: IndexSet<String> = IndexSet::with_capacity(self.entries.len());
        self.anchors.clear();
        for line in self.entries.drain(..) {
            if let Some(file) = bouquet_file_of(&line) {
                let bouquet = roots
                    .iter_mut()
                    .flat_map(|r| r.bouquets.iter_mut())
                    .find(|b| b.file.as_deref() == Some(file));
                match bouquet {
                    Some(b) => {
                        b.locked = true;
                        self.anchors
                            .insert(file.to_string(), kept.last().cloned());
                    }
                    None => diagnostics.notice(
                        BLACKLIST,
                        None,
                        format!("locked bouquet {} not found, dropped", file),
                    ),
                }
                continue;
            }
            match fav_id_of(&line) {
                Some(fav_id) if services.contains(&fav_id) => {
                    kept.insert(line);
                }
                _ => diagnostics.notice(
                    BLACKLIST,
                    None,
                    format!("{} does not match a service, dropped", line),
                ),
            }
        }
        self.entries = kept;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn is_locked(&self, fav_id: &str) -> bool {
        self.entries
            .iter()
            .any(|line| fav_id_of(line).as_deref() == Some(fav_id))
    }

    /// Adds the service's reference line. Returns false when already locked.
    pub fn lock(&mut self, service: &Service) -> bool {
        if self.is_locked(&service.fav_id) {
            return false;
        }
        let line = if service.is_iptv() {
            service.fav_id.clone()
        } else {
            format!("{}:", service.bouquet_reference())
        };
        self.entries.insert(line)
    }

    /// Removes every line referring to `fav_id`. Returns true when one was removed.
    pub fn unlock(&mut self, fav_id: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|line| fav_id_of(line).as_deref() != Some(fav_id));
        before != self.entries.len()
    }

    /// Rewrites lines of `old` for a service now keyed `new`.
    pub fn rekey(&mut self, old: &str, service: &Service) {
        if self.unlock(old) {
            self.lock(service);
        }
    }

    /// File contents. Headers of locked bouquets go back after the service
    /// line they followed on load; new ones go last.
    pub fn render(&self, locked_headers: &[String]) -> FileAction {
        let mut headers: IndexMap<&str, &str> = IndexMap::new();
        let mut loose = Vec::new();
        for header in locked_headers {
            match bouquet_file_of(header) {
                Some(file) => {
                    headers.insert(file, header.as_str());
                }
                None => loose.push(header.as_str()),
            }
        }

        let mut lines = Vec::with_capacity(self.entries.len() + locked_headers.len());
        self.take_anchored(None, &mut headers, &mut lines);
        for entry in &self.entries {
            lines.push(entry.as_str());
            self.take_anchored(Some(entry), &mut headers, &mut lines);
        }
        lines.extend(headers.values());
        lines.extend(loose);

        let mut text = String::new();
        for line in lines {
            text.push_str(line);
            text.push('\n');
        }
        if text.is_empty() && !self.existed {
            FileAction::Skip
        } else {
            FileAction::Write(text)
        }
    }
}

impl Blacklist {
    fn take_anchored<'a>(
        &self,
        after: Option<&str>,
        headers: &mut IndexMap<&'a str, &'a str>,
        lines: &mut Vec<&'a str>,
    ) {
        for (file, anchor) in &self.anchors {
            if anchor.as_deref() == after {
                if let Some(header) = headers.shift_remove(file.as_str()) {
                    lines.push(header);
                }
            }
        }
    }
}

/// Key of a relay record: the fav id for plain references, the line with
/// `%3A` normalised for anything longer.
pub fn relay_key(line: &str) -> String {
    let trimmed = line.strip_suffix(':').unwrap_or(line);
    if trimmed.split(':').count() == 10 {
        if let Some(fav_id) = fav_id_of(trimmed) {
            return fav_id;
        }
    }
    line.replace("%3a", "%3A")
}

/// Services relayed through the receiver's stream relay, key to original line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamRelay {
    entries: IndexMap<String, String>,
}

impl StreamRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(dir: &Path, diagnostics: &mut Diagnostics) -> Self {
        let entries = read_lines(dir, STREAM_RELAY, diagnostics)
            .into_iter()
            .map(|line| (relay_key(&line), line))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn contains(&self, fav_id: &str) -> bool {
        self.entries.contains_key(&relay_key(fav_id))
    }

    /// Adds or removes a service. Returns true when the table changed.
    pub fn set(&mut self, service: &Service, on: bool) -> bool {
        let line = if service.is_iptv() {
            service.fav_id.clone()
        } else {
            format!("{}:", service.bouquet_reference())
        };
        let key = relay_key(&line);
        if on {
            if self.entries.contains_key(&key) {
                return false;
            }
            self.entries.insert(key, line);
            true
        } else {
            self.entries.shift_remove(&key).is_some()
        }
    }

    pub fn remove(&mut self, fav_id: &str) -> bool {
        self.entries.shift_remove(&relay_key(fav_id)).is_some()
    }

    /// Each record followed by a blank line; an empty table removes the file.
    pub fn render(&self) -> FileAction {
        if self.entries.is_empty() {
            return FileAction::Delete;
        }
        let mut text = String::new();
        for line in self.entries.values() {
            text.push_str(line);
            text.push_str("\n\n");
        }
        FileAction::Write(text)
    }
}
