//! Enigma2 bouquet files: `bouquets.tv`, `bouquets.radio` and the
//! `userbouquet.*`, `subbouquet.*` and `alternatives.*` files they pull in.

pub mod reader;
pub mod writer;

use std::sync::LazyLock;

use regex::Regex;

/// Service type codes of the second reference field.
pub const TYPE_DEFAULT: &str = "0";
pub const TYPE_BOUQUET: &str = "7";
pub const TYPE_MARKER: &str = "64";
pub const TYPE_ALT: &str = "134";
pub const TYPE_HIDDEN_BOUQUET: &str = "519";
pub const TYPE_SPACE: &str = "832";

/// Sub-bouquets nest one level on the receiver; deeper chains are cut here.
pub const MAX_DEPTH: usize = 2;

static FROM_BOUQUET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"FROM BOUQUET "(.*?)""#).unwrap_or_else(|_| unreachable!())
});

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w_()]+").unwrap_or_else(|_| unreachable!()));

/// File name inside `FROM BOUQUET "..."`.
pub fn bouquet_file_of(line: &str) -> Option<&str> {
    FROM_BOUQUET
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Middle part of `userbouquet.<middle>.tv`.
pub fn file_stem(file: &str) -> &str {
    let without_ext = file.rsplit_once('.').map(|(head, _)| head).unwrap_or(file);
    without_ext
        .split_once('.')
        .map(|(_, middle)| middle)
        .unwrap_or(without_ext)
}

/// File-safe form of a display name for `userbouquet.<name>.tv`.
pub fn safe_file_name(name: &str) -> String {
    UNSAFE_NAME_CHARS.replace_all(name, "_").into_owned()
}

/// Header line (without `#SERVICE `) that pulls a bouquet file into a root.
pub fn bouquet_header(hidden: bool, reference_digit: u8, file: &str) -> String {
    let kind = if hidden { TYPE_HIDDEN_BOUQUET } else { TYPE_BOUQUET };
    format!(
        "1:{}:{}:0:0:0:0:0:0:0:FROM BOUQUET \"{}\" ORDER BY bouquet",
        kind, reference_digit, file
    )
}

/// True for files the bouquet writer owns and may delete when unreferenced.
pub fn is_bouquet_file(name: &str) -> bool {
    let owned_prefix = ["userbouquet.", "subbouquet.", "alternatives."]
        .iter()
        .any(|p| name.starts_with(p));
    owned_prefix && (name.ends_with(".tv") || name.ends_with(".radio"))
}

#[cfg(test)]
#[path = "bouquets_tests.rs"]
mod tests;
