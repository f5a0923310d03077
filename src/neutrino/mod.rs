//! Neutrino settings: `services.xml`, `bouquets.xml`, `ubouquets.xml` and
//! `webtv.xml`.

pub mod bouquets;
pub mod services;

use std::path::Path;

use serde::Serialize;

use crate::codec::display_hex;
use crate::error::{Diagnostics, Error};

pub const SERVICES_XML: &str = "services.xml";
pub const BOUQUETS_XML: &str = "bouquets.xml";
pub const UBOUQUETS_XML: &str = "ubouquets.xml";
pub const WEBTV_XML: &str = "webtv.xml";

pub const INDENT: &str = "\t";

type Attrs = Vec<(String, String)>;

/// Fav id of a Neutrino service: `tsid:onid:ssid`, hex without leading zeros.
pub fn fav_id(tsid: &str, onid: &str, ssid: &str) -> String {
    format!(
        "{}:{}:{}",
        display_hex(tsid.trim()),
        display_hex(onid.trim()),
        display_hex(ssid.trim())
    )
    .to_lowercase()
}

/// `<TS>` element with the fav ids of the services it holds, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TsLayout {
    pub attrs: Attrs,
    pub services: Vec<String>,
    pub self_closing: bool,
}

/// `<sat>`, `<terrestrial>` or `<cable>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerLayout {
    pub tag: String,
    pub attrs: Attrs,
    pub transponders: Vec<TsLayout>,
    pub self_closing: bool,
}

/// Element structure of the Neutrino files, kept so they are written back
/// in the shape they were read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NeutrinoLayout {
    /// Attributes of the `<zapit>` root of `services.xml`.
    pub api: Attrs,
    pub containers: Vec<ContainerLayout>,
    /// Bouquet files that were present on load.
    pub bouquet_files: Vec<String>,
}

/// True for a Neutrino settings directory.
pub fn is_neutrino_dir(dir: &Path) -> bool {
    dir.join(SERVICES_XML).is_file() && !dir.join(crate::lamedb::LAMEDB).is_file()
}

pub(crate) fn read_text(dir: &Path, file: &str, diagnostics: &mut Diagnostics) -> Option<String> {
    let path = dir.join(file);
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

#[cfg(test)]
#[path = "neutrino_tests.rs"]
mod tests;
