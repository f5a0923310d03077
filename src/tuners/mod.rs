//! Tuner descriptors: `satellites.xml`, `terrestrial.xml` and `cables.xml`.

pub mod parser;
pub mod writer;

use std::path::Path;

use serde::Serialize;

use crate::codec;
use crate::error::{Diagnostics, Error, Result};

pub const SATELLITES_XML: &str = "satellites.xml";
pub const TERRESTRIAL_XML: &str = "terrestrial.xml";
pub const CABLES_XML: &str = "cables.xml";

/// Satellite transponder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SatTransponder {
    pub frequency: u32,
    pub symbol_rate: u32,
    pub polarization: u8,
    pub fec_inner: u8,
    pub system: Option<u8>,
    pub modulation: Option<u8>,
    pub rolloff: Option<u8>,
    pub pilot: Option<u8>,
    pub inversion: Option<u8>,
    pub pls_mode: Option<u8>,
    pub pls_code: Option<u32>,
    pub is_id: Option<i32>,
    pub t2mi_plp_id: Option<i32>,
    pub t2mi_pid: Option<u32>,
    /// Attributes this editor does not know, kept in document order.
    pub extra: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Satellite {
    pub name: String,
    pub flags: u32,
    /// Signed tenths of a degree, West negative.
    pub position: i32,
    pub transponders: Vec<SatTransponder>,
    pub extra: Vec<(String, String)>,
}

impl Satellite {
    pub fn position_string(&self) -> String {
        codec::position_string(self.position)
    }
}

/// Terrestrial multiplex
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TerTransponder {
    pub centre_frequency: u32,
    pub system: Option<u8>,
    pub bandwidth: Option<u8>,
    pub constellation: Option<u8>,
    pub code_rate_hp: Option<u8>,
    pub code_rate_lp: Option<u8>,
    pub guard_interval: Option<u8>,
    pub transmission_mode: Option<u8>,
    pub hierarchy_information: Option<u8>,
    pub inversion: Option<u8>,
    pub plp_id: Option<i32>,
    pub extra: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TerrestrialRegion {
    pub name: String,
    pub flags: Option<u32>,
    pub countrycode: Option<String>,
    pub transponders: Vec<TerTransponder>,
    pub extra: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CableTransponder {
    pub frequency: u32,
    pub symbol_rate: u32,
    pub modulation: Option<u8>,
    pub fec_inner: Option<u8>,
    pub system: Option<u8>,
    pub extra: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CableProvider {
    pub name: String,
    pub flags: Option<u32>,
    pub satfeed: Option<String>,
    pub countrycode: Option<String>,
    pub transponders: Vec<CableTransponder>,
    pub extra: Vec<(String, String)>,
}

/// One tuner file: the leading comment block and its containers in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunerFile<T> {
    /// Comment text between `<!--` and `-->`, when the input had one.
    pub comment: Option<String>,
    pub entries: Vec<T>,
}

impl<T> Default for TunerFile<T> {
    fn default() -> Self {
        Self {
            comment: None,
            entries: Vec::new(),
        }
    }
}

/// Tuner files present in a settings directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tuners {
    pub satellites: Option<TunerFile<Satellite>>,
    pub terrestrial: Option<TunerFile<TerrestrialRegion>>,
    pub cables: Option<TunerFile<CableProvider>>,
}

impl Tuners {
    /// Loads whichever tuner files exist in `dir`. A refused file is
    /// recorded and left out.
    pub fn load(dir: &Path, diagnostics: &mut Diagnostics) -> Self {
        let mut tuners = Tuners::default();
        if let Some(text) = read_optional(dir, SATELLITES_XML, diagnostics) {
            tuners.satellites = refuse_on_error(parser::parse_satellites(&text, diagnostics), diagnostics);
        }
        if let Some(text) = read_optional(dir, TERRESTRIAL_XML, diagnostics) {
            tuners.terrestrial = refuse_on_error(parser::parse_terrestrial(&text, diagnostics), diagnostics);
        }
        if let Some(text) = read_optional(dir, CABLES_XML, diagnostics) {
            tuners.cables = refuse_on_error(parser::parse_cables(&text, diagnostics), diagnostics);
        }
        tuners
    }

    /// Renders every loaded file as `(file name, contents)`.
    pub fn render(&self) -> Result<Vec<(String, String)>> {
        let mut files = Vec::new();
        if let Some(sats) = &self.satellites {
            files.push((SATELLITES_XML.to_string(), writer::write_satellites(sats)?));
        }
        if let Some(regions) = &self.terrestrial {
            files.push((TERRESTRIAL_XML.to_string(), writer::write_terrestrial(regions)?));
        }
        if let Some(providers) = &self.cables {
            files.push((CABLES_XML.to_string(), writer::write_cables(providers)?));
        }
        Ok(files)
    }

    pub fn is_empty(&self) -> bool {
        self.satellites.is_none() && self.terrestrial.is_none() && self.cables.is_none()
    }
}

fn read_optional(dir: &Path, name: &str, diagnostics: &mut Diagnostics) -> Option<String> {
    let path = dir.join(name);
    if !path.is_file() {
        return None;
    }
    match std::fs::read(&path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            diagnostics.error(&Error::io(path, e));
            None
        }
    }
}

fn refuse_on_error<T>(parsed: Result<TunerFile<T>>, diagnostics: &mut Diagnostics) -> Option<TunerFile<T>> {
    match parsed {
        Ok(file) => Some(file),
        Err(e) => {
            diagnostics.error(&e);
            None
        }
    }
}

#[cfg(test)]
#[path = "tuners_tests.rs"]
mod tests;
