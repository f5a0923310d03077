//! Data models for the settings editor

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::codec;

/// Service kind as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServiceType {
    Tv,
    TvHd,
    TvUhd,
    TvH264,
    Radio,
    Data,
    Iptv,
    Marker,
    Space,
    Alt,
    Bouquet,
    Unknown,
}

impl ServiceType {
    /// Maps the decimal lamedb service type code.
    pub fn from_dvb_code(code: &str) -> Self {
        match code.trim().parse::<i32>() {
            Ok(1) => ServiceType::Tv,
            Ok(2) | Ok(10) => ServiceType::Radio,
            Ok(17) | Ok(31) => ServiceType::TvUhd,
            Ok(22) => ServiceType::TvH264,
            Ok(25) => ServiceType::TvHd,
            Ok(_) => ServiceType::Data,
            Err(_) => ServiceType::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ServiceType::Tv => "TV",
            ServiceType::TvHd => "TV (HD)",
            ServiceType::TvUhd => "TV (UHD)",
            ServiceType::TvH264 => "TV (H264)",
            ServiceType::Radio => "Radio",
            ServiceType::Data => "Data",
            ServiceType::Iptv => "IPTV",
            ServiceType::Marker => "Marker",
            ServiceType::Space => "Space",
            ServiceType::Alt => "Alternatives",
            ServiceType::Bouquet => "Bouquet",
            ServiceType::Unknown => "Unknown",
        }
    }

    pub fn is_radio(&self) -> bool {
        matches!(self, ServiceType::Radio)
    }
}

/// Delivery system of a transponder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransponderType {
    Satellite,
    Terrestrial,
    Cable,
    Atsc,
}

impl TransponderType {
    /// One-letter tag used in lamedb (`s`, `t`, `c`, `a`).
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "s" => Some(TransponderType::Satellite),
            "t" => Some(TransponderType::Terrestrial),
            "c" => Some(TransponderType::Cable),
            "a" => Some(TransponderType::Atsc),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            TransponderType::Satellite => "s",
            TransponderType::Terrestrial => "t",
            TransponderType::Cable => "c",
            TransponderType::Atsc => "a",
        }
    }
}

/// A tuned program.
///
/// `picon_id` is derived from `data_id` and only changes through
/// [`Service::set_data_id`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Service {
    pub fav_id: String,
    data_id: String,
    picon_id: String,
    pub name: String,
    pub package: String,
    pub service_type: ServiceType,
    pub transponder_type: TransponderType,
    /// Full textual form of the transponder, shared with the service table.
    pub transponder: Option<Arc<str>>,
    /// Orbital position in tenths of a degree, when known.
    pub position: Option<i32>,
    /// Comma separated `p:`/`c:`/`C:`/`f:` items.
    pub flags_cas: String,
    /// Extra attributes of formats that carry them (Neutrino `S` element).
    pub attrs: Vec<(String, String)>,
}

impl Service {
    pub fn new(
        fav_id: impl Into<String>,
        data_id: impl Into<String>,
        name: impl Into<String>,
        service_type: ServiceType,
        transponder_type: TransponderType,
    ) -> Self {
        let data_id = data_id.into();
        Self {
            fav_id: fav_id.into(),
            picon_id: codec::picon_id_from_data_id(&data_id),
            data_id,
            name: name.into(),
            package: String::new(),
            service_type,
            transponder_type,
            transponder: None,
            position: None,
            flags_cas: String::new(),
            attrs: Vec::new(),
        }
    }

    pub fn data_id(&self) -> &str {
        &self.data_id
    }

    pub fn picon_id(&self) -> &str {
        &self.picon_id
    }

    /// Replaces the data id and re-derives the picon id with it.
    pub fn set_data_id(&mut self, data_id: impl Into<String>) {
        self.data_id = data_id.into();
        self.picon_id = codec::picon_id_from_data_id(&self.data_id);
    }

    pub fn flags(&self) -> codec::Flags {
        codec::flags_of(&self.flags_cas)
    }

    pub fn set_flags(&mut self, flags: codec::Flags) {
        self.flags_cas = codec::with_flags(&self.flags_cas, flags);
    }

    pub fn is_hidden(&self) -> bool {
        self.flags().is_hide()
    }

    pub fn is_scrambled(&self) -> bool {
        codec::is_scrambled(&self.flags_cas)
    }

    pub fn is_iptv(&self) -> bool {
        self.service_type == ServiceType::Iptv
    }

    /// Decimal service type code stored in the data id (field 4).
    pub fn type_code(&self) -> u32 {
        self.data_id
            .split(':')
            .nth(4)
            .and_then(|code| code.parse().ok())
            .unwrap_or(1)
    }

    /// Reference used in bouquets and the blacklist (without trailing colon).
    pub fn bouquet_reference(&self) -> String {
        if self.is_iptv() {
            self.fav_id.clone()
        } else {
            codec::bouquet_reference(&self.fav_id, self.type_code())
        }
    }

    /// Picon file names to try, best match first.
    pub fn picon_candidates(&self) -> Vec<String> {
        let mut candidates = vec![self.picon_id.clone()];
        // Picon packs name files after the reference with its first field set to 1.
        let reference = self.bouquet_reference();
        let fields: Vec<&str> = reference.split(':').take(10).collect();
        if fields.len() == 10 {
            let by_reference = format!("1_{}.png", fields[1..].join("_"));
            if !candidates.contains(&by_reference) {
                candidates.push(by_reference);
            }
        }
        candidates.push(codec::picon_name_from_service_name(&self.name));
        candidates
    }
}

/// Decoded lamedb transponder parameters, for display and filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TransponderParams {
    Satellite {
        frequency: u32,
        symbol_rate: u32,
        polarization: u8,
        fec: u8,
        position: i32,
        inversion: u8,
        flags: u32,
        system: u8,
        modulation: u8,
        rolloff: u8,
        pilot: u8,
        is_id: Option<i32>,
        pls_code: Option<u32>,
        pls_mode: Option<u8>,
        t2mi_plp_id: Option<i32>,
    },
    Terrestrial {
        frequency: u32,
        bandwidth: u8,
        code_rate_hp: u8,
        code_rate_lp: u8,
        constellation: u8,
        transmission_mode: u8,
        guard_interval: u8,
        hierarchy: u8,
        inversion: u8,
        flags: u32,
        system: u8,
        plp_id: Option<i32>,
    },
    Cable {
        frequency: u32,
        symbol_rate: u32,
        inversion: u8,
        modulation: u8,
        fec: u8,
        flags: u32,
        system: u8,
    },
    Atsc {
        frequency: u32,
        inversion: u8,
        modulation: u8,
        flags: u32,
        system: u8,
    },
}

impl TransponderParams {
    pub fn transponder_type(&self) -> TransponderType {
        match self {
            TransponderParams::Satellite { .. } => TransponderType::Satellite,
            TransponderParams::Terrestrial { .. } => TransponderType::Terrestrial,
            TransponderParams::Cable { .. } => TransponderType::Cable,
            TransponderParams::Atsc { .. } => TransponderType::Atsc,
        }
    }

    pub fn frequency(&self) -> u32 {
        match self {
            TransponderParams::Satellite { frequency, .. }
            | TransponderParams::Terrestrial { frequency, .. }
            | TransponderParams::Cable { frequency, .. }
            | TransponderParams::Atsc { frequency, .. } => *frequency,
        }
    }

    pub fn polarization_label(&self) -> Option<&'static str> {
        match self {
            TransponderParams::Satellite { polarization, .. } => Some(match polarization {
                0 => "H",
                1 => "V",
                2 => "L",
                3 => "R",
                _ => "?",
            }),
            _ => None,
        }
    }
}

/// In-memory bouquet identifier, stable for the lifetime of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BouquetId(pub u32);

impl fmt::Display for BouquetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out bouquet ids in increasing order.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    last: u32,
}

impl IdAllocator {
    pub fn next_id(&mut self) -> BouquetId {
        self.last += 1;
        BouquetId(self.last)
    }
}

/// Bouquet type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BqType {
    Tv,
    Radio,
    WebTv,
    /// Sub-bouquet or Neutrino provider bouquet.
    Bouquet,
    /// Top-level marker inside `bouquets.tv` / `bouquets.radio`.
    Marker,
}

impl BqType {
    pub fn label(&self) -> &'static str {
        match self {
            BqType::Tv => "tv",
            BqType::Radio => "radio",
            BqType::WebTv => "webtv",
            BqType::Bouquet => "bouquet",
            BqType::Marker => "marker",
        }
    }

    /// File extension of Enigma2 bouquet files.
    pub fn extension(&self) -> &'static str {
        match self {
            BqType::Radio => "radio",
            _ => "tv",
        }
    }
}

/// Bouquet tree roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RootKind {
    Tv,
    Radio,
    WebTv,
    /// Neutrino `bouquets.xml`.
    Providers,
}

impl RootKind {
    pub fn label(&self) -> &'static str {
        match self {
            RootKind::Tv => "tv",
            RootKind::Radio => "radio",
            RootKind::WebTv => "webtv",
            RootKind::Providers => "providers",
        }
    }

    pub fn bouquet_type(&self) -> BqType {
        match self {
            RootKind::Tv => BqType::Tv,
            RootKind::Radio => BqType::Radio,
            RootKind::WebTv => BqType::WebTv,
            RootKind::Providers => BqType::Bouquet,
        }
    }

    /// Enigma2 root file name.
    pub fn root_file(&self) -> &'static str {
        match self {
            RootKind::Radio => "bouquets.radio",
            _ => "bouquets.tv",
        }
    }

    /// Digit used in the third position of `#SERVICE 1:7:<n>:...` headers.
    pub fn reference_digit(&self) -> u8 {
        match self {
            RootKind::Radio => 2,
            _ => 1,
        }
    }
}

/// Bouquet entry pointing at a service of the service table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRef {
    pub fav_id: String,
    /// First ten reference positions as read; empty for entries created in memory.
    pub reference: String,
    /// Eleventh position (path), normally empty; `None` when the line had ten fields.
    pub path: Option<String>,
    /// Bouquet-local display name overriding the service name.
    pub extra_name: Option<String>,
    pub description: Option<String>,
    /// Raw attributes of Neutrino `S` elements.
    pub attrs: Vec<(String, String)>,
}

impl ServiceRef {
    pub fn new(fav_id: impl Into<String>) -> Self {
        Self {
            fav_id: fav_id.into(),
            reference: String::new(),
            path: None,
            extra_name: None,
            description: None,
            attrs: Vec::new(),
        }
    }
}

/// Self-contained stream entry. `fav_id` is the full `#SERVICE` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IptvRef {
    pub fav_id: String,
    pub name: String,
    pub description: Option<String>,
    /// Raw attributes of Neutrino `webtv` elements, in document order.
    pub attrs: Vec<(String, String)>,
}

impl IptvRef {
    pub fn new(fav_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            fav_id: fav_id.into(),
            name: name.into(),
            description: None,
            attrs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Marker {
    pub text: String,
    pub number: u32,
}

/// Member of an alternatives group. Nested groups are not representable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AltMember {
    Service(ServiceRef),
    Iptv(IptvRef),
}

impl AltMember {
    pub fn fav_id(&self) -> &str {
        match self {
            AltMember::Service(s) => &s.fav_id,
            AltMember::Iptv(i) => &i.fav_id,
        }
    }

    pub fn into_entry(self) -> BouquetEntry {
        match self {
            AltMember::Service(s) => BouquetEntry::Service(s),
            AltMember::Iptv(i) => BouquetEntry::Iptv(i),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AltGroup {
    /// File id, the `deNN` in `alternatives.deNN.tv`.
    pub alt_id: String,
    pub name: String,
    pub members: Vec<AltMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubBouquet {
    pub name: String,
    pub file: Option<String>,
    /// Header type 519 instead of 7.
    pub hidden: bool,
    pub description: Option<String>,
    pub entries: Vec<BouquetEntry>,
}

/// One ordered bouquet position
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BouquetEntry {
    Service(ServiceRef),
    Iptv(IptvRef),
    Marker(Marker),
    Space,
    Alt(AltGroup),
    SubBouquet(SubBouquet),
}

impl BouquetEntry {
    /// Fav id of entries that reference the service table.
    pub fn fav_id(&self) -> Option<&str> {
        match self {
            BouquetEntry::Service(s) => Some(&s.fav_id),
            BouquetEntry::Iptv(i) => Some(&i.fav_id),
            _ => None,
        }
    }

    pub fn service_type(&self) -> ServiceType {
        match self {
            BouquetEntry::Service(_) => ServiceType::Unknown,
            BouquetEntry::Iptv(_) => ServiceType::Iptv,
            BouquetEntry::Marker(_) => ServiceType::Marker,
            BouquetEntry::Space => ServiceType::Space,
            BouquetEntry::Alt(_) => ServiceType::Alt,
            BouquetEntry::SubBouquet(_) => ServiceType::Bouquet,
        }
    }

    /// Calls `f` for this entry and every entry nested below it.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a BouquetEntry)) {
        f(self);
        if let BouquetEntry::SubBouquet(sub) = self {
            for entry in &sub.entries {
                entry.visit(f);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bouquet {
    pub id: BouquetId,
    pub name: String,
    pub kind: BqType,
    /// Backing file name, e.g. `userbouquet.favourites.tv`.
    pub file: Option<String>,
    pub locked: bool,
    pub hidden: bool,
    pub entries: Vec<BouquetEntry>,
    /// Extra attributes of Neutrino `Bouquet` elements.
    pub attrs: Vec<(String, String)>,
}

impl Bouquet {
    pub fn new(id: BouquetId, name: impl Into<String>, kind: BqType) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            file: None,
            locked: false,
            hidden: false,
            entries: Vec::new(),
            attrs: Vec::new(),
        }
    }

    /// Bouquet-local names overriding service names, by fav id.
    pub fn extra_names(&self) -> Vec<(&str, &str)> {
        let mut names = Vec::new();
        for entry in &self.entries {
            entry.visit(&mut |e| {
                if let BouquetEntry::Service(s) = e {
                    if let Some(name) = &s.extra_name {
                        names.push((s.fav_id.as_str(), name.as_str()));
                    }
                }
            });
        }
        names
    }

    pub fn contains(&self, fav_id: &str) -> bool {
        let mut found = false;
        for entry in &self.entries {
            entry.visit(&mut |e| {
                if e.fav_id() == Some(fav_id) {
                    found = true;
                }
                if let BouquetEntry::Alt(alt) = e {
                    found |= alt.members.iter().any(|m| m.fav_id() == fav_id);
                }
            });
        }
        found
    }
}

/// Per-type bouquet root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BouquetRoot {
    pub kind: RootKind,
    pub name: String,
    pub bouquets: Vec<Bouquet>,
}

impl BouquetRoot {
    pub fn new(kind: RootKind) -> Self {
        let name = match kind {
            RootKind::Tv => "User - bouquets (TV)",
            RootKind::Radio => "User - bouquets (Radio)",
            RootKind::WebTv => "WebTV",
            RootKind::Providers => "Providers",
        };
        Self {
            kind,
            name: name.to_string(),
            bouquets: Vec::new(),
        }
    }

    /// Gives a duplicate display name a numeric suffix (`" 1"`, `" 2"`, ...).
    pub fn unique_name(&self, name: &str) -> String {
        let taken = |candidate: &str| self.bouquets.iter().any(|b| b.name == candidate);
        if !taken(name) {
            return name.to_string();
        }
        (1..)
            .map(|n| format!("{} {}", name, n))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| name.to_string())
    }
}

/// Settings flavour of a loaded directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SettingsKind {
    Enigma2,
    Neutrino,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_codes() {
        assert_eq!(ServiceType::from_dvb_code("1"), ServiceType::Tv);
        assert_eq!(ServiceType::from_dvb_code("25"), ServiceType::TvHd);
        assert_eq!(ServiceType::from_dvb_code("-2"), ServiceType::Data);
        assert_eq!(ServiceType::from_dvb_code("x"), ServiceType::Unknown);
    }

    #[test]
    fn test_picon_follows_data_id() {
        let mut srv = Service::new(
            "1:71:2:C00000",
            "0001:00c00000:0071:0002:1:0",
            "Demo",
            ServiceType::Tv,
            TransponderType::Satellite,
        );
        assert_eq!(srv.picon_id(), "0001_00c00000_0071_0002_1_0.png");
        assert_eq!(
            srv.picon_candidates(),
            vec![
                "0001_00c00000_0071_0002_1_0.png".to_string(),
                "1_0_1_1_71_2_C00000_0_0_0.png".to_string(),
                "demo.png".to_string()
            ]
        );

        srv.set_data_id("4097:0:1:5:0:0:0:0:0:0");
        assert_eq!(srv.picon_id(), "4097_0_1_5_0_0_0_0_0_0.png");

        let stream = Service::new(
            "4097:0:1:5:0:0:0:0:0:0:http%3a//h/s:Stream",
            "4097:0:1:5:0:0:0:0:0:0",
            "Stream",
            ServiceType::Iptv,
            TransponderType::Satellite,
        );
        assert_eq!(
            stream.picon_candidates(),
            vec![
                "4097_0_1_5_0_0_0_0_0_0.png".to_string(),
                "1_0_1_5_0_0_0_0_0_0.png".to_string(),
                "stream.png".to_string()
            ]
        );
    }

    #[test]
    fn test_unique_bouquet_names() {
        let mut root = BouquetRoot::new(RootKind::Tv);
        root.bouquets.push(Bouquet::new(BouquetId(1), "News", BqType::Tv));
        assert_eq!(root.unique_name("News"), "News 1");
        root.bouquets.push(Bouquet::new(BouquetId(2), "News 1", BqType::Tv));
        assert_eq!(root.unique_name("News"), "News 2");
        assert_eq!(root.unique_name("Sport"), "Sport");
    }
}
