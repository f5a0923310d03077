//! Enigma2 service database (`lamedb`, `lamedb5`).
//!
//! v3, v4 and v5 are read by one parser into the v4 shape. v3 is never
//! written back; saving picks v4 or v5.

pub mod parser;
pub mod writer;

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{Diagnostics, Error, InvariantViolation, Result};
use crate::models::{Service, TransponderParams};

pub const LAMEDB: &str = "lamedb";
pub const LAMEDB5: &str = "lamedb5";

/// Footer the receiver writes after the services section.
pub const DEFAULT_FOOTER: &str = "Have a lot of bugs!\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LamedbVersion {
    V3,
    V4,
    V5,
}

impl LamedbVersion {
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            3 => Some(LamedbVersion::V3),
            4 => Some(LamedbVersion::V4),
            5 => Some(LamedbVersion::V5),
            _ => None,
        }
    }

    /// File name used when writing this version. v3 is written as v4.
    pub fn file_name(&self) -> &'static str {
        match self {
            LamedbVersion::V5 => LAMEDB5,
            _ => LAMEDB,
        }
    }
}

/// Service table keyed by fav id, plus the transponders the services sit on.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceTable {
    /// `nsp:tsid:onid` key to the v4 parameter text (`s 11727000:...`).
    pub transponders: IndexMap<String, Arc<str>>,
    pub services: IndexMap<String, Service>,
    /// Text after the final `end`, written back verbatim in v4.
    pub footer: Option<String>,
    /// `#` lines of a v5 file.
    pub comments: Option<Vec<String>>,
    pub source_version: Option<LamedbVersion>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn get(&self, fav_id: &str) -> Option<&Service> {
        self.services.get(fav_id)
    }

    pub fn get_mut(&mut self, fav_id: &str) -> Option<&mut Service> {
        self.services.get_mut(fav_id)
    }

    pub fn contains(&self, fav_id: &str) -> bool {
        self.services.contains_key(fav_id)
    }

    /// Inserts a service. An existing fav id is overwritten in place.
    pub fn insert(&mut self, service: Service) {
        if self.services.contains_key(&service.fav_id) {
            log::debug!("duplicate service {} overwritten", service.fav_id);
        }
        self.services.insert(service.fav_id.clone(), service);
    }

    /// Inserts a service that must not exist yet.
    pub fn insert_new(&mut self, service: Service) -> Result<()> {
        if self.services.contains_key(&service.fav_id) {
            return Err(InvariantViolation::DuplicateFavId(service.fav_id).into());
        }
        self.services.insert(service.fav_id.clone(), service);
        Ok(())
    }

    pub fn remove(&mut self, fav_id: &str) -> Option<Service> {
        self.services.shift_remove(fav_id)
    }

    pub fn rename(&mut self, fav_id: &str, name: &str) -> Result<()> {
        let service = self
            .services
            .get_mut(fav_id)
            .ok_or_else(|| InvariantViolation::MissingReference(fav_id.to_string()))?;
        service.name = name.to_string();
        Ok(())
    }

    /// Replaces the service stored under `fav_id`, keeping its position.
    /// The replacement may carry a different fav id as long as it is free.
    pub fn replace(&mut self, fav_id: &str, service: Service) -> Result<()> {
        let index = self
            .services
            .get_index_of(fav_id)
            .ok_or_else(|| InvariantViolation::MissingReference(fav_id.to_string()))?;
        if service.fav_id != fav_id && self.services.contains_key(&service.fav_id) {
            return Err(InvariantViolation::DuplicateFavId(service.fav_id).into());
        }
        self.services.shift_remove_index(index);
        self.services.shift_insert(index, service.fav_id.clone(), service);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    /// Decoded parameters of the transponder a service sits on.
    pub fn transponder_params(&self, service: &Service) -> Option<TransponderParams> {
        service.transponder.as_deref().and_then(decode_transponder)
    }
}

/// Reads the service database in `dir`.
///
/// `lamedb` is preferred unless v5 is asked for and `lamedb5` exists. A
/// missing database yields an empty table.
pub fn load(dir: &Path, prefer: LamedbVersion, diagnostics: &mut Diagnostics) -> ServiceTable {
    let v4 = dir.join(LAMEDB);
    let v5 = dir.join(LAMEDB5);
    let path = if (prefer == LamedbVersion::V5 && v5.is_file()) || !v4.is_file() {
        v5
    } else {
        v4
    };
    if !path.is_file() {
        log::info!("no service database in {}", dir.display());
        return ServiceTable::new();
    }
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let text = match std::fs::read(&path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            diagnostics.error(&Error::io(&path, e));
            return ServiceTable::new();
        }
    };
    match parser::parse(&file, &text, diagnostics) {
        Ok(table) => {
            log::info!(
                "{}: {} transponders, {} services",
                file,
                table.transponders.len(),
                table.services.len()
            );
            table
        }
        Err(e) => {
            diagnostics.error(&e);
            ServiceTable::new()
        }
    }
}

/// Renders the table as `(file name, contents)` for the requested version.
pub fn render(table: &ServiceTable, version: LamedbVersion) -> (String, String) {
    let text = match version {
        LamedbVersion::V5 => writer::write_v5(table),
        _ => writer::write_v4(table),
    };
    (version.file_name().to_string(), text)
}

fn int<T: std::str::FromStr>(fields: &[&str], i: usize) -> Option<T> {
    fields.get(i).and_then(|f| f.trim().parse().ok())
}

/// Decodes v4 transponder parameter text (`s 11727000:27500000:...`).
pub fn decode_transponder(body: &str) -> Option<TransponderParams> {
    let first = body.lines().next()?;
    let (tag, params) = first.split_once(' ')?;
    let f: Vec<&str> = params.split(':').collect();
    match tag {
        "s" => {
            let position: i32 = int(&f, 4)?;
            Some(TransponderParams::Satellite {
                frequency: int(&f, 0)?,
                symbol_rate: int(&f, 1)?,
                polarization: int(&f, 2)?,
                fec: int(&f, 3)?,
                position: if position > 1800 { position - 3600 } else { position },
                inversion: int(&f, 5).unwrap_or(2),
                flags: int(&f, 6).unwrap_or(0),
                system: int(&f, 7).unwrap_or(0),
                modulation: int(&f, 8).unwrap_or(1),
                rolloff: int(&f, 9).unwrap_or(0),
                pilot: int(&f, 10).unwrap_or(2),
                is_id: int(&f, 11),
                pls_code: int(&f, 12),
                pls_mode: int(&f, 13),
                t2mi_plp_id: int(&f, 14),
            })
        }
        "t" => Some(TransponderParams::Terrestrial {
            frequency: int(&f, 0)?,
            bandwidth: int(&f, 1)?,
            code_rate_hp: int(&f, 2)?,
            code_rate_lp: int(&f, 3)?,
            constellation: int(&f, 4)?,
            transmission_mode: int(&f, 5)?,
            guard_interval: int(&f, 6)?,
            hierarchy: int(&f, 7)?,
            inversion: int(&f, 8).unwrap_or(2),
            flags: int(&f, 9).unwrap_or(0),
            system: int(&f, 10).unwrap_or(0),
            plp_id: int(&f, 11),
        }),
        "c" => Some(TransponderParams::Cable {
            frequency: int(&f, 0)?,
            symbol_rate: int(&f, 1)?,
            inversion: int(&f, 2).unwrap_or(2),
            modulation: int(&f, 3).unwrap_or(0),
            fec: int(&f, 4).unwrap_or(0),
            flags: int(&f, 5).unwrap_or(0),
            system: int(&f, 6).unwrap_or(0),
        }),
        "a" => Some(TransponderParams::Atsc {
            frequency: int(&f, 0)?,
            inversion: int(&f, 1).unwrap_or(2),
            modulation: int(&f, 2).unwrap_or(0),
            flags: int(&f, 3).unwrap_or(0),
            system: int(&f, 4).unwrap_or(0),
        }),
        _ => None,
    }
}

#[cfg(test)]
#[path = "lamedb_tests.rs"]
mod tests;
