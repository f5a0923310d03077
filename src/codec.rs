//! Primitive field codecs
//!
//! Flag bitmaps, service references, picon names and orbital positions.
//! Everything here is pure; no I/O.

use thiserror::Error;

/// A malformed hex or decimal field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed {field} at offset {offset}")]
pub struct FieldError {
    pub field: &'static str,
    pub offset: usize,
}

/// Single service flag bits carried in the `f:` item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Flag {
    /// Do not update the service parameters on rescan.
    Keep = 1 << 0,
    Hide = 1 << 1,
    /// Always use the cached PIDs.
    Pids = 1 << 2,
    Lock = 1 << 3,
    /// Marked as new by the last scan.
    New = 1 << 5,
}

/// Flag bitmap with per-bit testers and setters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(pub u32);

impl Flags {
    pub fn contains(self, flag: Flag) -> bool {
        self.0 & flag as u32 != 0
    }

    pub fn set(&mut self, flag: Flag, on: bool) {
        if on {
            self.0 |= flag as u32;
        } else {
            self.0 &= !(flag as u32);
        }
    }

    pub fn is_keep(self) -> bool {
        self.contains(Flag::Keep)
    }

    pub fn is_hide(self) -> bool {
        self.contains(Flag::Hide)
    }

    pub fn is_pids(self) -> bool {
        self.contains(Flag::Pids)
    }

    pub fn is_lock(self) -> bool {
        self.contains(Flag::Lock)
    }

    pub fn is_new(self) -> bool {
        self.contains(Flag::New)
    }
}

/// Parses an `f:NN` flag item. NN is decimal when all digits, hex otherwise.
pub fn parse_flag(text: &str) -> Result<u32, FieldError> {
    if text.len() < 3 {
        return Ok(0);
    }
    let value = text.get(2..).ok_or(FieldError {
        field: "flags",
        offset: 2,
    })?;
    let parsed = if value.bytes().all(|b| b.is_ascii_digit()) {
        value.parse::<u32>()
    } else {
        u32::from_str_radix(value, 16)
    };
    parsed.map_err(|_| FieldError {
        field: "flags",
        offset: 2,
    })
}

/// Inverse of [`parse_flag`] for the decimal shape.
pub fn emit_flag(value: u32) -> String {
    format!("f:{}", value)
}

/// Flag bitmap of a `flags_cas` string, 0 when no `f:` item is present.
pub fn flags_of(flags_cas: &str) -> Flags {
    flags_cas
        .split(',')
        .find(|item| item.starts_with("f:"))
        .and_then(|item| parse_flag(item).ok())
        .map(Flags)
        .unwrap_or_default()
}

/// Rewrites the `f:` item of `flags_cas`. A zero bitmap drops the item.
pub fn with_flags(flags_cas: &str, flags: Flags) -> String {
    let mut items: Vec<String> = flags_cas
        .split(',')
        .filter(|item| !item.is_empty() && !item.starts_with("f:"))
        .map(str::to_string)
        .collect();
    if flags.0 != 0 {
        items.push(emit_flag(flags.0));
    }
    items.join(",")
}

/// Package (`p:` item) of a `flags_cas` string.
pub fn package_of(flags_cas: &str) -> &str {
    flags_cas
        .split(',')
        .find_map(|item| item.strip_prefix("p:"))
        .unwrap_or("")
}

/// True when the record carries a CAS id (`C:` item).
pub fn is_scrambled(flags_cas: &str) -> bool {
    flags_cas.split(',').any(|item| item.starts_with("C:"))
}

const REFERENCE_FIELDS: [&str; 10] = [
    "reference type",
    "reference flags",
    "service type",
    "service id",
    "transport stream id",
    "original network id",
    "namespace",
    "parent service id",
    "parent transport stream id",
    "reserved field",
];

/// Decoded colon-delimited service reference.
///
/// The first two positions are decimal (`1:0`, `4097:0`, `1:134`), the
/// remaining eight are hex.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceParts {
    pub ref_type: u32,
    pub flags: u32,
    pub service_type: u32,
    pub ssid: u32,
    pub tsid: u32,
    pub onid: u32,
    pub namespace: u32,
    pub parent_ssid: u32,
    pub parent_tsid: u32,
    pub reserved: u32,
    pub path: String,
    pub name: String,
}

pub fn parse_reference(text: &str) -> Result<ReferenceParts, FieldError> {
    let mut numbers = [0u32; 10];
    let mut offset = 0;
    let mut fields = text.split(':');

    for (i, field_name) in REFERENCE_FIELDS.iter().enumerate() {
        let field = fields.next().ok_or(FieldError {
            field: field_name,
            offset,
        })?;
        numbers[i] = if i < 2 {
            field.parse::<u32>()
        } else {
            u32::from_str_radix(field, 16)
        }
        .map_err(|_| FieldError {
            field: field_name,
            offset,
        })?;
        offset += field.len() + 1;
    }

    let path = fields.next().unwrap_or("").to_string();
    let name = fields.collect::<Vec<_>>().join(":");

    Ok(ReferenceParts {
        ref_type: numbers[0],
        flags: numbers[1],
        service_type: numbers[2],
        ssid: numbers[3],
        tsid: numbers[4],
        onid: numbers[5],
        namespace: numbers[6],
        parent_ssid: numbers[7],
        parent_tsid: numbers[8],
        reserved: numbers[9],
        path,
        name,
    })
}

impl ReferenceParts {
    /// The ten numeric positions in receiver form (`1:0:19:283D:3FB:1:C00000:0:0:0`).
    pub fn base(&self) -> String {
        format!(
            "{}:{}:{:X}:{:X}:{:X}:{:X}:{:X}:{:X}:{:X}:{:X}",
            self.ref_type,
            self.flags,
            self.service_type,
            self.ssid,
            self.tsid,
            self.onid,
            self.namespace,
            self.parent_ssid,
            self.parent_tsid,
            self.reserved
        )
    }

    /// Same as [`base`](Self::base) but with the id positions zero-padded.
    pub fn padded(&self) -> String {
        format!(
            "{}:{}:{:X}:{:04X}:{:04X}:{:04X}:{:04X}:{:X}:{:X}:{:X}",
            self.ref_type,
            self.flags,
            self.service_type,
            self.ssid,
            self.tsid,
            self.onid,
            self.namespace,
            self.parent_ssid,
            self.parent_tsid,
            self.reserved
        )
    }

    /// Inverse of [`parse_reference`]: base, path and optional name.
    pub fn to_reference_string(&self) -> String {
        let mut out = format!("{}:{}", self.base(), self.path);
        if !self.name.is_empty() {
            out.push(':');
            out.push_str(&self.name);
        }
        out
    }

    /// `ssid:tsid:onid:namespace` as used for fav ids and stream relay keys.
    pub fn fav_id(&self) -> String {
        format!(
            "{:X}:{:X}:{:X}:{:X}",
            self.ssid, self.tsid, self.onid, self.namespace
        )
    }
}

/// Strips leading zeros for display, keeping at least `"0"`.
pub fn display_hex(field: &str) -> &str {
    let stripped = field.trim_start_matches('0');
    if stripped.is_empty() {
        "0"
    } else {
        stripped
    }
}

pub fn hex_field(text: &str, field: &'static str, offset: usize) -> Result<u32, FieldError> {
    u32::from_str_radix(text, 16).map_err(|_| FieldError { field, offset })
}

/// Fav id of a lamedb data id (`ssid:ns:tsid:onid:type:num`): `SSID:TSID:ONID:NS`.
pub fn fav_id_from_data_id(data_id: &str) -> Result<String, FieldError> {
    let fields: Vec<&str> = data_id.split(':').collect();
    if fields.len() < 4 {
        return Err(FieldError {
            field: "data id",
            offset: data_id.len(),
        });
    }
    let mut offset = 0;
    for (i, field) in fields.iter().take(4).enumerate() {
        hex_field(field, ["service id", "namespace", "transport stream id", "original network id"][i], offset)?;
        offset += field.len() + 1;
    }
    Ok(format!(
        "{}:{}:{}:{}",
        display_hex(fields[0]),
        display_hex(fields[2]),
        display_hex(fields[3]),
        display_hex(fields[1])
    )
    .to_uppercase())
}

/// Data id for a fav id and a decimal service type code.
pub fn data_id_from_fav_id(fav_id: &str, service_type: u32) -> Result<String, FieldError> {
    let fields: Vec<&str> = fav_id.split(':').collect();
    if fields.len() != 4 {
        return Err(FieldError {
            field: "fav id",
            offset: fav_id.len(),
        });
    }
    let mut values = [0u32; 4];
    let mut offset = 0;
    for (i, field) in fields.iter().enumerate() {
        values[i] = hex_field(field, "fav id", offset)?;
        offset += field.len() + 1;
    }
    Ok(format!(
        "{:04x}:{:08x}:{:04x}:{:04x}:{}:0",
        values[0], values[3], values[1], values[2], service_type
    ))
}

/// Bouquet reference of a DVB service: `1:0:<type>:<fav_id>:0:0:0`.
///
/// The lamedb type code is decimal while the reference is hex, so 22 turns
/// into `16` and 25 into `19`.
pub fn bouquet_reference(fav_id: &str, service_type_code: u32) -> String {
    format!("1:0:{:X}:{}:0:0:0", service_type_code, fav_id)
}

pub fn picon_id_from_data_id(data_id: &str) -> String {
    format!("{}.png", data_id.replace(':', "_"))
}

/// Name-based picon fallback: lowercase alphanumerics only.
pub fn picon_name_from_service_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect();
    format!("{}.png", cleaned)
}

/// `192` -> `"19.2E"`, `-300` -> `"30.0W"`.
pub fn position_string(tenths: i32) -> String {
    let side = if tenths < 0 { "W" } else { "E" };
    format!("{:.1}{}", tenths.unsigned_abs() as f64 / 10.0, side)
}

/// Inverse of [`position_string`].
pub fn parse_position(text: &str) -> Option<i32> {
    let text = text.trim();
    let (number, west) = if let Some(n) = text.strip_suffix(['W', 'w']) {
        (n, true)
    } else if let Some(n) = text.strip_suffix(['E', 'e']) {
        (n, false)
    } else {
        (text, false)
    };
    let value: f64 = number.trim().parse().ok()?;
    let tenths = (value * 10.0).round() as i32;
    Some(if west { -tenths } else { tenths })
}

/// Orbital position encoded in the upper 16 bits of a DVB namespace.
pub fn position_from_namespace(namespace: u32) -> i32 {
    let pos = (namespace >> 16) as i32;
    if pos > 1800 {
        pos - 3600
    } else {
        pos
    }
}

/// Percent-escapes the colons of a stream URL (`:` -> `%3a`).
pub fn encode_url(url: &str) -> String {
    url.replace(':', "%3a")
}

/// Reverses [`encode_url`], accepting either case.
pub fn decode_url(url: &str) -> String {
    url.replace("%3a", ":").replace("%3A", ":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag_decimal_and_hex() {
        assert_eq!(parse_flag("f:40").unwrap(), 40);
        assert_eq!(parse_flag("f:0a").unwrap(), 10);
        assert_eq!(parse_flag("f:").unwrap(), 0);
        assert_eq!(parse_flag("f").unwrap(), 0);
        assert!(parse_flag("fé").is_err());
        assert!(parse_flag("f:é").is_err());
        assert!(parse_flag("f:zz").is_err());
    }

    #[test]
    fn test_flag_bits() {
        let flags = Flags(parse_flag("f:40").unwrap());
        assert!(flags.is_new());
        assert!(flags.is_lock());
        assert!(!flags.is_hide());

        let mut flags = Flags(0);
        flags.set(Flag::Hide, true);
        assert_eq!(flags.0, 2);
        flags.set(Flag::Hide, false);
        assert_eq!(flags.0, 0);
    }

    #[test]
    fn test_emit_flag_inverse() {
        for text in ["f:40", "f:2", "f:0", "f:123"] {
            assert_eq!(emit_flag(parse_flag(text).unwrap()), text);
        }
    }

    #[test]
    fn test_with_flags_keeps_other_items() {
        let updated = with_flags("p:ORF,c:000100,f:2", Flags(3));
        assert_eq!(updated, "p:ORF,c:000100,f:3");
        assert_eq!(with_flags("p:ORF,f:2", Flags(0)), "p:ORF");
        assert_eq!(package_of("p:ORF,C:0d05"), "ORF");
        assert!(is_scrambled("p:ORF,C:0d05"));
    }

    #[test]
    fn test_reference_round_trip() {
        let text = "1:0:19:283D:3FB:1:C00000:0:0:0:";
        let parts = parse_reference(text).unwrap();
        assert_eq!(parts.service_type, 0x19);
        assert_eq!(parts.ssid, 0x283D);
        assert_eq!(parts.namespace, 0xC00000);
        assert_eq!(parts.to_reference_string(), text);
        assert_eq!(parts.fav_id(), "283D:3FB:1:C00000");
        assert_eq!(parts.padded(), "1:0:19:283D:03FB:0001:C00000:0:0:0");
    }

    #[test]
    fn test_reference_errors_report_offset() {
        let err = parse_reference("1:0:1:XYZ:1:1:0:0:0:0").unwrap_err();
        assert_eq!(err.field, "service id");
        assert_eq!(err.offset, 6);
        assert!(parse_reference("1:0:1").is_err());
    }

    #[test]
    fn test_display_hex() {
        assert_eq!(display_hex("0071"), "71");
        assert_eq!(display_hex("0000"), "0");
    }

    #[test]
    fn test_fav_id_and_data_id() {
        let fav = fav_id_from_data_id("0001:00c00000:0071:0002:1:0").unwrap();
        assert_eq!(fav, "1:71:2:C00000");
        assert_eq!(
            data_id_from_fav_id(&fav, 1).unwrap(),
            "0001:00c00000:0071:0002:1:0"
        );
    }

    #[test]
    fn test_bouquet_reference_normalises_type() {
        assert_eq!(bouquet_reference("1:71:2:C00000", 25), "1:0:19:1:71:2:C00000:0:0:0");
        assert_eq!(bouquet_reference("1:71:2:C00000", 22), "1:0:16:1:71:2:C00000:0:0:0");
        assert_eq!(bouquet_reference("1:71:2:C00000", 1), "1:0:1:1:71:2:C00000:0:0:0");
    }

    #[test]
    fn test_picon_names() {
        assert_eq!(
            picon_id_from_data_id("1:0:1:283D:3FB:1:C00000:0:0:0"),
            "1_0_1_283D_3FB_1_C00000_0_0_0.png"
        );
        assert_eq!(picon_name_from_service_name("Das Erste HD!"), "daserstehd.png");
    }

    #[test]
    fn test_positions() {
        assert_eq!(position_string(192), "19.2E");
        assert_eq!(position_string(-300), "30.0W");
        assert_eq!(parse_position("30.0W"), Some(-300));
        assert_eq!(position_from_namespace(0x00C00000), 192);
        assert_eq!(position_from_namespace(0x0CE40000), -300);
        assert_eq!(position_from_namespace(0x0DFC0000), -20);
    }

    #[test]
    fn test_url_escaping() {
        assert_eq!(encode_url("http://host/s.m3u8"), "http%3a//host/s.m3u8");
        assert_eq!(decode_url("http%3A//host"), "http://host");
    }
}
