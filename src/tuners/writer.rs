//! Emitters for the tuner XML families.

use super::{
    CableProvider, CableTransponder, SatTransponder, Satellite, TerTransponder, TerrestrialRegion,
    TunerFile, CABLES_XML, SATELLITES_XML, TERRESTRIAL_XML,
};
use crate::error::Result;
use crate::xml::XmlOut;

const SATELLITES_COMMENT: &str = "
    satellites.xml
    sat flags: 1 = network scan, 2 = use BAT, 4 = use ONIT, 8 = skip known NIT, 16 = reserved
    polarization: 0 = horizontal, 1 = vertical, 2 = circular left, 3 = circular right
    fec_inner: 0 = auto, 1 = 1/2, 2 = 2/3, 3 = 3/4, 4 = 5/6, 5 = 7/8, 6 = 8/9, 7 = 3/5, 8 = 4/5, 9 = 9/10, 15 = none
    system: 0 = DVB-S, 1 = DVB-S2
    modulation: 0 = auto, 1 = QPSK, 2 = 8PSK, 3 = QAM16, 4 = 16APSK, 5 = 32APSK
    pls_mode: 0 = root, 1 = gold, 2 = combo
";

const TERRESTRIAL_COMMENT: &str = "
  terrestrial.xml
  centre_frequency in Hz
  system: 0 = DVB-T, 1 = DVB-T2
  bandwidth: 0 = 8 MHz, 1 = 7 MHz, 2 = 6 MHz, 3 = auto, 4 = 5 MHz, 5 = 1.712 MHz, 6 = 10 MHz
  constellation: 0 = QPSK, 1 = QAM16, 2 = QAM64, 3 = auto, 4 = QAM256
";

const CABLES_COMMENT: &str = "
  cables.xml
  frequency in kHz, symbol_rate in symbols per second
  modulation: 0 = auto, 1 = QAM16, 2 = QAM32, 3 = QAM64, 4 = QAM128, 5 = QAM256
  fec_inner: 0 = auto, 1 = 1/2, 2 = 2/3, 3 = 3/4, 4 = 5/6, 5 = 7/8, 6 = 8/9, 15 = none
";

/// Attribute list builder that skips unset optional values.
#[derive(Default)]
struct Attrs(Vec<(String, String)>);

impl Attrs {
    fn set(mut self, name: &str, value: impl ToString) -> Self {
        self.0.push((name.to_string(), value.to_string()));
        self
    }

    fn opt<T: ToString>(self, name: &str, value: &Option<T>) -> Self {
        match value {
            Some(v) => self.set(name, v.to_string()),
            None => self,
        }
    }

    fn extra(mut self, extra: &[(String, String)]) -> Self {
        self.0.extend(extra.iter().cloned());
        self
    }
}

fn sat_transponder(tp: &SatTransponder) -> Attrs {
    Attrs::default()
        .set("frequency", tp.frequency)
        .set("symbol_rate", tp.symbol_rate)
        .set("polarization", tp.polarization)
        .set("fec_inner", tp.fec_inner)
        .opt("system", &tp.system)
        .opt("modulation", &tp.modulation)
        .opt("rolloff", &tp.rolloff)
        .opt("pilot", &tp.pilot)
        .opt("inversion", &tp.inversion)
        .opt("pls_mode", &tp.pls_mode)
        .opt("pls_code", &tp.pls_code)
        .opt("is_id", &tp.is_id)
        .opt("t2mi_plp_id", &tp.t2mi_plp_id)
        .opt("t2mi_pid", &tp.t2mi_pid)
        .extra(&tp.extra)
}

fn ter_transponder(tp: &TerTransponder) -> Attrs {
    Attrs::default()
        .set("centre_frequency", tp.centre_frequency)
        .opt("system", &tp.system)
        .opt("bandwidth", &tp.bandwidth)
        .opt("constellation", &tp.constellation)
        .opt("code_rate_hp", &tp.code_rate_hp)
        .opt("code_rate_lp", &tp.code_rate_lp)
        .opt("guard_interval", &tp.guard_interval)
        .opt("transmission_mode", &tp.transmission_mode)
        .opt("hierarchy_information", &tp.hierarchy_information)
        .opt("inversion", &tp.inversion)
        .opt("plp_id", &tp.plp_id)
        .extra(&tp.extra)
}

fn cable_transponder(tp: &CableTransponder) -> Attrs {
    Attrs::default()
        .set("frequency", tp.frequency)
        .set("symbol_rate", tp.symbol_rate)
        .opt("modulation", &tp.modulation)
        .opt("fec_inner", &tp.fec_inner)
        .opt("system", &tp.system)
        .extra(&tp.extra)
}

fn begin(file: &str, indent: &'static str, comment: &Option<String>, template: &str) -> Result<XmlOut> {
    let mut out = XmlOut::new(file, indent);
    out.decl()?;
    out.comment(comment.as_deref().unwrap_or(template))?;
    Ok(out)
}

/// Writes one container element; containers without transponders stay open/close pairs.
fn container(out: &mut XmlOut, name: &str, attrs: Attrs, children: Vec<Attrs>) -> Result<()> {
    out.open(1, name, &attrs.0)?;
    for child in children {
        out.empty(2, "transponder", &child.0)?;
    }
    out.close(1, name)
}

pub fn write_satellites(file: &TunerFile<Satellite>) -> Result<String> {
    let mut out = begin(SATELLITES_XML, "    ", &file.comment, SATELLITES_COMMENT)?;
    out.open(0, "satellites", crate::xml::NO_ATTRS)?;
    for sat in &file.entries {
        let attrs = Attrs::default()
            .set("name", &sat.name)
            .set("flags", sat.flags)
            .set("position", sat.position)
            .extra(&sat.extra);
        container(&mut out, "sat", attrs, sat.transponders.iter().map(sat_transponder).collect())?;
    }
    out.close(0, "satellites")?;
    Ok(out.finish())
}

pub fn write_terrestrial(file: &TunerFile<TerrestrialRegion>) -> Result<String> {
    let mut out = begin(TERRESTRIAL_XML, "  ", &file.comment, TERRESTRIAL_COMMENT)?;
    out.open(0, "locations", crate::xml::NO_ATTRS)?;
    for region in &file.entries {
        let attrs = Attrs::default()
            .set("name", &region.name)
            .opt("flags", &region.flags)
            .opt("countrycode", &region.countrycode)
            .extra(&region.extra);
        container(
            &mut out,
            "terrestrial",
            attrs,
            region.transponders.iter().map(ter_transponder).collect(),
        )?;
    }
    out.close(0, "locations")?;
    Ok(out.finish())
}

pub fn write_cables(file: &TunerFile<CableProvider>) -> Result<String> {
    let mut out = begin(CABLES_XML, "  ", &file.comment, CABLES_COMMENT)?;
    out.open(0, "cables", crate::xml::NO_ATTRS)?;
    for provider in &file.entries {
        let attrs = Attrs::default()
            .set("name", &provider.name)
            .opt("flags", &provider.flags)
            .opt("satfeed", &provider.satfeed)
            .opt("countrycode", &provider.countrycode)
            .extra(&provider.extra);
        container(
            &mut out,
            "cable",
            attrs,
            provider.transponders.iter().map(cable_transponder).collect(),
        )?;
    }
    out.close(0, "cables")?;
    Ok(out.finish())
}
