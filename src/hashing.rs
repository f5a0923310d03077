//! Change detection over the loaded settings.
//!
//! The hash covers what the user can see: services, bouquets and lock
//! state. Values a save may reassign (file names, marker numbers,
//! alternatives ids, reference padding) are left out so that a
//! load, save and load again gives the same hash.

use sha2::{Digest, Sha256};

use crate::blacklist::{Blacklist, StreamRelay};
use crate::lamedb::ServiceTable;
use crate::models::{AltMember, BouquetEntry, BouquetRoot};

fn feed(hasher: &mut Sha256, part: &str) {
    hasher.update(part.as_bytes());
    hasher.update([0u8]);
}

fn finish(hasher: Sha256) -> u64 {
    let result = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&result[..8]);
    u64::from_le_bytes(bytes)
}

fn digest(parts: &[&str]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        feed(&mut hasher, part);
    }
    finish(hasher)
}

/// Order-insensitive image of the service table and lock lists.
fn services_hash(services: &ServiceTable, blacklist: &Blacklist, relay: &StreamRelay) -> u64 {
    let mut hash = 0u64;
    for s in services.iter() {
        hash ^= digest(&["service", &s.fav_id, s.data_id(), &s.name, &s.package, &s.flags_cas]);
    }
    for line in blacklist.iter() {
        hash ^= digest(&["blacklist", line]);
    }
    for (key, _) in relay.iter() {
        hash ^= digest(&["relay", key]);
    }
    hash
}

/// Order-insensitive image of bouquet identities.
fn bouquet_keys_hash(roots: &[BouquetRoot]) -> u64 {
    let mut hash = 0u64;
    for root in roots {
        for b in &root.bouquets {
            let flags = format!("{}{}", u8::from(b.locked), u8::from(b.hidden));
            hash ^= digest(&[root.kind.label(), &b.name, b.kind.label(), &flags]);
        }
    }
    hash
}

fn feed_entry(hasher: &mut Sha256, entry: &BouquetEntry) {
    match entry {
        BouquetEntry::Service(s) => {
            feed(hasher, "S");
            feed(hasher, &s.fav_id);
            feed(hasher, s.extra_name.as_deref().unwrap_or(""));
            feed(hasher, s.description.as_deref().unwrap_or(""));
        }
        BouquetEntry::Iptv(i) => {
            feed(hasher, "I");
            feed(hasher, &i.fav_id);
            feed(hasher, &i.name);
            feed(hasher, i.description.as_deref().unwrap_or(""));
        }
        BouquetEntry::Marker(m) => {
            feed(hasher, "M");
            feed(hasher, &m.text);
        }
        BouquetEntry::Space => feed(hasher, "_"),
        BouquetEntry::Alt(alt) => {
            feed(hasher, "A");
            feed(hasher, &alt.name);
            for member in &alt.members {
                match member {
                    AltMember::Service(s) => feed(hasher, &s.fav_id),
                    AltMember::Iptv(i) => feed(hasher, &i.fav_id),
                }
            }
            feed(hasher, "/A");
        }
        BouquetEntry::SubBouquet(sub) => {
            feed(hasher, "B");
            feed(hasher, &sub.name);
            feed(hasher, if sub.hidden { "h" } else { "" });
            feed(hasher, sub.description.as_deref().unwrap_or(""));
            for inner in &sub.entries {
                feed_entry(hasher, inner);
            }
            feed(hasher, "/B");
        }
    }
}

/// Order-sensitive image of bouquet contents.
fn contents_hash(roots: &[BouquetRoot]) -> u64 {
    let mut hasher = Sha256::new();
    for root in roots {
        feed(&mut hasher, root.kind.label());
        feed(&mut hasher, &root.name);
        for b in &root.bouquets {
            feed(&mut hasher, &b.name);
            for entry in &b.entries {
                feed_entry(&mut hasher, entry);
            }
            feed(&mut hasher, "/bouquet");
        }
    }
    finish(hasher)
}

pub fn data_hash(
    services: &ServiceTable,
    roots: &[BouquetRoot],
    blacklist: &Blacklist,
    relay: &StreamRelay,
) -> u64 {
    services_hash(services, blacklist, relay) ^ bouquet_keys_hash(roots) ^ contents_hash(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BqType, Bouquet, BouquetId, Marker, RootKind, ServiceRef};

    fn roots() -> Vec<BouquetRoot> {
        let mut root = BouquetRoot::new(RootKind::Tv);
        let mut b = Bouquet::new(BouquetId(1), "News", BqType::Tv);
        b.entries.push(BouquetEntry::Service(ServiceRef::new("1:71:2:C00000")));
        b.entries.push(BouquetEntry::Marker(Marker {
            text: "Top".to_string(),
            number: 1,
        }));
        root.bouquets.push(b);
        vec![root]
    }

    fn hash(roots: &[BouquetRoot]) -> u64 {
        data_hash(&ServiceTable::new(), roots, &Blacklist::new(), &StreamRelay::new())
    }

    #[test]
    fn test_assigned_values_do_not_count() {
        let a = roots();
        let mut b = roots();
        b[0].bouquets[0].file = Some("userbouquet.de01.tv".to_string());
        b[0].bouquets[0].id = BouquetId(7);
        if let BouquetEntry::Marker(m) = &mut b[0].bouquets[0].entries[1] {
            m.number = 9;
        }
        if let BouquetEntry::Service(s) = &mut b[0].bouquets[0].entries[0] {
            s.reference = "1:0:1:1:71:2:C00000:0:0:0".to_string();
            s.path = Some(String::new());
        }
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn test_visible_edits_change_hash() {
        let base = hash(&roots());

        let mut reordered = roots();
        reordered[0].bouquets[0].entries.reverse();
        assert_ne!(hash(&reordered), base);

        let mut locked = roots();
        locked[0].bouquets[0].locked = true;
        assert_ne!(hash(&locked), base);

        let mut renamed = roots();
        if let BouquetEntry::Service(s) = &mut renamed[0].bouquets[0].entries[0] {
            s.extra_name = Some("Local".to_string());
        }
        assert_ne!(hash(&renamed), base);
    }
}
