//! Cross-reference mutations.
//!
//! Every operation checks its preconditions before touching the model, so
//! a rejected call leaves everything as it was. The service table, the
//! bouquets, the blacklist and the stream relay list are kept in step.

use std::collections::HashSet;

use crate::codec::Flag;
use crate::error::{InvariantViolation, Result};
use crate::iptv::{IptvReference, ReferenceBits, WebTvFields};
use crate::model::Model;
use crate::models::{
    AltGroup, AltMember, BqType, Bouquet, BouquetEntry, BouquetId, IptvRef, Marker, RootKind,
    Service, ServiceRef, ServiceType, SettingsKind, TransponderType,
};

/// A bouquet position that refers to the service table.
enum RefMut<'a> {
    Service(&'a mut ServiceRef),
    Iptv(&'a mut IptvRef),
}

fn visit_refs(entries: &mut [BouquetEntry], f: &mut dyn FnMut(RefMut<'_>)) {
    for entry in entries {
        match entry {
            BouquetEntry::Service(s) => f(RefMut::Service(s)),
            BouquetEntry::Iptv(i) => f(RefMut::Iptv(i)),
            BouquetEntry::Alt(alt) => {
                for member in &mut alt.members {
                    match member {
                        AltMember::Service(s) => f(RefMut::Service(s)),
                        AltMember::Iptv(i) => f(RefMut::Iptv(i)),
                    }
                }
            }
            BouquetEntry::SubBouquet(sub) => visit_refs(&mut sub.entries, f),
            BouquetEntry::Marker(_) | BouquetEntry::Space => {}
        }
    }
}

/// Removes every reference to `fav_id`; returns how many went.
fn strip(entries: &mut Vec<BouquetEntry>, fav_id: &str) -> usize {
    let before = entries.len();
    entries.retain(|e| e.fav_id() != Some(fav_id));
    let mut removed = before - entries.len();
    for entry in entries.iter_mut() {
        match entry {
            BouquetEntry::Alt(alt) => {
                let before = alt.members.len();
                alt.members.retain(|m| m.fav_id() != fav_id);
                removed += before - alt.members.len();
            }
            BouquetEntry::SubBouquet(sub) => removed += strip(&mut sub.entries, fav_id),
            _ => {}
        }
    }
    removed
}

/// First alternatives group that would lose all of its members.
fn emptied_group(entries: &[BouquetEntry], gone: &HashSet<&str>) -> Option<String> {
    entries.iter().find_map(|entry| match entry {
        BouquetEntry::Alt(alt)
            if !alt.members.is_empty() && alt.members.iter().all(|m| gone.contains(m.fav_id())) =>
        {
            Some(alt.alt_id.clone())
        }
        BouquetEntry::SubBouquet(sub) => emptied_group(&sub.entries, gone),
        _ => None,
    })
}

fn collect_alt_ids(entries: &[BouquetEntry], ids: &mut HashSet<String>) {
    for entry in entries {
        match entry {
            BouquetEntry::Alt(alt) => {
                ids.insert(alt.alt_id.clone());
            }
            BouquetEntry::SubBouquet(sub) => collect_alt_ids(&sub.entries, ids),
            _ => {}
        }
    }
}

fn collect_streams(entries: &[BouquetEntry], used: &mut HashSet<String>) {
    for entry in entries {
        match entry {
            BouquetEntry::Iptv(i) => {
                used.insert(i.fav_id.clone());
            }
            BouquetEntry::Alt(alt) => {
                for member in &alt.members {
                    if let AltMember::Iptv(i) = member {
                        used.insert(i.fav_id.clone());
                    }
                }
            }
            BouquetEntry::SubBouquet(sub) => collect_streams(&sub.entries, used),
            _ => {}
        }
    }
}

/// Finds the alternatives group `alt_id` and hands it to `f` together with
/// the list holding it and its index there.
fn with_group<T>(
    entries: &mut Vec<BouquetEntry>,
    alt_id: &str,
    f: &mut dyn FnMut(&mut Vec<BouquetEntry>, usize) -> T,
) -> Option<T> {
    let index = entries
        .iter()
        .position(|e| matches!(e, BouquetEntry::Alt(alt) if alt.alt_id == alt_id));
    if let Some(index) = index {
        return Some(f(entries, index));
    }
    for entry in entries.iter_mut() {
        if let BouquetEntry::SubBouquet(sub) = entry {
            if let Some(found) = with_group(&mut sub.entries, alt_id, &mut *f) {
                return Some(found);
            }
        }
    }
    None
}

fn check_index(index: usize, len: usize) -> Result<()> {
    if index >= len {
        return Err(InvariantViolation::IndexOutOfRange { index, len }.into());
    }
    Ok(())
}

fn insert_at(entries: &mut Vec<BouquetEntry>, at: Option<usize>, new: Vec<BouquetEntry>) -> Result<()> {
    let at = at.unwrap_or(entries.len());
    if at > entries.len() {
        return Err(InvariantViolation::IndexOutOfRange {
            index: at,
            len: entries.len(),
        }
        .into());
    }
    entries.splice(at..at, new);
    Ok(())
}

fn missing(fav_id: &str) -> InvariantViolation {
    InvariantViolation::MissingReference(fav_id.to_string())
}

fn unsupported(what: &str) -> InvariantViolation {
    InvariantViolation::Unsupported(what.to_string())
}

impl Model {
    fn each_ref(&mut self, f: &mut dyn FnMut(RefMut<'_>)) {
        for root in &mut self.roots {
            for bouquet in &mut root.bouquets {
                visit_refs(&mut bouquet.entries, f);
            }
        }
    }

    fn all_alt_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        for (_, bouquet) in self.bouquets() {
            collect_alt_ids(&bouquet.entries, &mut ids);
        }
        ids
    }

    /// Smallest `deNN` not used by any alternatives group.
    fn next_alt_id(&self) -> String {
        let taken = self.all_alt_ids();
        (1..)
            .map(|n| format!("de{:02}", n))
            .find(|id| !taken.contains(id))
            .unwrap_or_default()
    }

    fn require_enigma(&self, what: &str) -> Result<()> {
        match self.kind {
            SettingsKind::Enigma2 => Ok(()),
            SettingsKind::Neutrino => Err(unsupported(what).into()),
        }
    }

    fn root_of(&self, id: BouquetId) -> Result<RootKind> {
        self.locate(id)
            .map(|(ri, _)| self.roots[ri].kind)
            .ok_or_else(|| InvariantViolation::MissingBouquet(id).into())
    }

    /// Bouquet that takes entries, i.e. not a top-level marker.
    fn entry_bouquet(&mut self, id: BouquetId) -> Result<&mut Bouquet> {
        let bouquet = self.require_bouquet(id)?;
        if bouquet.kind == BqType::Marker {
            return Err(unsupported("entries in a marker").into());
        }
        Ok(bouquet)
    }

    /// Bouquet entry for a service of the table.
    fn entry_for(&self, service: &Service) -> BouquetEntry {
        if service.is_iptv() {
            let mut entry = IptvRef::new(service.fav_id.clone(), service.name.clone());
            if self.kind == SettingsKind::Enigma2 {
                entry.description = Some(service.name.clone());
            }
            BouquetEntry::Iptv(entry)
        } else {
            BouquetEntry::Service(ServiceRef::new(service.fav_id.clone()))
        }
    }

    /// Drops stream services no bouquet refers to any more.
    fn prune_streams(&mut self) {
        let mut used = HashSet::new();
        for (_, bouquet) in self.bouquets() {
            collect_streams(&bouquet.entries, &mut used);
        }
        let orphans: Vec<String> = self
            .services
            .iter()
            .filter(|s| s.is_iptv() && !used.contains(&s.fav_id))
            .map(|s| s.fav_id.clone())
            .collect();
        for fav_id in orphans {
            log::debug!("stream {} no longer referenced", fav_id);
            self.services.remove(&fav_id);
            self.blacklist.unlock(&fav_id);
            self.stream_relay.remove(&fav_id);
        }
    }

    /// Moves a stream service to a new key and fixes every holder of the old one.
    fn rekey_stream(&mut self, old: &str, line: String, data_id: String, name: Option<&str>) -> Result<()> {
        let mut service = self.services.get(old).cloned().ok_or_else(|| missing(old))?;
        if line != old && self.services.contains(&line) {
            return Err(InvariantViolation::DuplicateFavId(line).into());
        }
        service.fav_id = line.clone();
        service.set_data_id(data_id);
        if let Some(name) = name {
            service.name = name.to_string();
        }
        self.services.replace(old, service.clone())?;
        self.each_ref(&mut |r| {
            if let RefMut::Iptv(i) = r {
                if i.fav_id == old {
                    i.fav_id = line.clone();
                    if let Some(name) = name {
                        i.name = name.to_string();
                        if i.description.is_some() {
                            i.description = Some(name.to_string());
                        }
                    }
                }
            }
        });
        self.blacklist.rekey(old, &service);
        if self.stream_relay.remove(old) {
            self.stream_relay.set(&service, true);
        }
        Ok(())
    }

    /// Renames a service. Bouquet-local names equal to the new name are
    /// dropped; others stay.
    pub fn rename_service(&mut self, fav_id: &str, new_name: &str) -> Result<()> {
        let service = self.services.get(fav_id).ok_or_else(|| missing(fav_id))?;
        if service.is_iptv() {
            if let Ok(mut reference) = IptvReference::parse(fav_id) {
                reference.name = Some(new_name.to_string());
                let data_id = reference.data_id();
                return self.rekey_stream(fav_id, reference.to_line(), data_id, Some(new_name));
            }
            self.services.rename(fav_id, new_name)?;
            self.each_ref(&mut |r| {
                if let RefMut::Iptv(i) = r {
                    if i.fav_id == fav_id {
                        i.name = new_name.to_string();
                    }
                }
            });
            return Ok(());
        }
        self.services.rename(fav_id, new_name)?;
        self.each_ref(&mut |r| {
            if let RefMut::Service(s) = r {
                if s.fav_id == fav_id && s.extra_name.as_deref() == Some(new_name) {
                    s.extra_name = None;
                }
            }
        });
        Ok(())
    }

    /// Rewrites the identity fields of a stream reference. Returns the new
    /// fav id; the picon id follows the new data id.
    pub fn reassign_iptv_reference(&mut self, fav_id: &str, bits: ReferenceBits) -> Result<String> {
        let service = self.services.get(fav_id).ok_or_else(|| missing(fav_id))?;
        if !service.is_iptv() {
            return Err(InvariantViolation::InvalidReference(fav_id.to_string()).into());
        }
        let mut reference = IptvReference::parse(fav_id)
            .map_err(|e| InvariantViolation::InvalidReference(e.to_string()))?;
        reference.set_bits(bits);
        let line = reference.to_line();
        self.rekey_stream(fav_id, line.clone(), reference.data_id(), None)?;
        Ok(line)
    }

    pub fn move_bouquet_entries(&mut self, bouquet_id: BouquetId, from: usize, to: usize) -> Result<()> {
        let bouquet = self.require_bouquet(bouquet_id)?;
        let len = bouquet.entries.len();
        check_index(from, len)?;
        check_index(to, len)?;
        let entry = bouquet.entries.remove(from);
        bouquet.entries.insert(to, entry);
        Ok(())
    }

    /// Wraps the entry of `fav_id` in `bouquet_id` into a new alternatives
    /// group. Returns the group id.
    pub fn add_alternatives(&mut self, fav_id: &str, bouquet_id: BouquetId) -> Result<String> {
        self.require_enigma("alternatives")?;
        let alt_id = self.next_alt_id();
        let bouquet = self
            .bouquet(bouquet_id)
            .ok_or(InvariantViolation::MissingBouquet(bouquet_id))?;
        let index = bouquet
            .entries
            .iter()
            .position(|e| e.fav_id() == Some(fav_id))
            .ok_or_else(|| missing(fav_id))?;
        let name = self.entry_name(&bouquet.entries[index]);

        let bouquet = self.require_bouquet(bouquet_id)?;
        let member = match bouquet.entries.remove(index) {
            BouquetEntry::Service(s) => AltMember::Service(s),
            BouquetEntry::Iptv(i) => AltMember::Iptv(i),
            other => {
                bouquet.entries.insert(index, other);
                return Err(missing(fav_id).into());
            }
        };
        let group = AltGroup {
            alt_id: alt_id.clone(),
            name,
            members: vec![member],
        };
        bouquet.entries.insert(index, BouquetEntry::Alt(group));
        Ok(alt_id)
    }

    /// Appends a service to an existing alternatives group.
    pub fn add_to_alternatives(&mut self, alt_id: &str, fav_id: &str) -> Result<()> {
        let Some(service) = self.services.get(fav_id) else {
            if self.all_alt_ids().contains(fav_id) {
                return Err(InvariantViolation::NestedAlternatives(fav_id.to_string()).into());
            }
            return Err(missing(fav_id).into());
        };
        let member = match self.entry_for(service) {
            BouquetEntry::Service(s) => AltMember::Service(s),
            BouquetEntry::Iptv(i) => AltMember::Iptv(i),
            other => {
                let what = other.service_type().label().to_string();
                return Err(InvariantViolation::NestedAlternatives(what).into());
            }
        };
        let mut member = Some(member);
        let found = self.roots.iter_mut().flat_map(|r| r.bouquets.iter_mut()).any(|b| {
            with_group(&mut b.entries, alt_id, &mut |entries, index| {
                if let (BouquetEntry::Alt(alt), Some(m)) = (&mut entries[index], member.take()) {
                    if !alt.members.iter().any(|x| x.fav_id() == m.fav_id()) {
                        alt.members.push(m);
                    }
                }
            })
            .is_some()
        });
        if !found {
            return Err(missing(alt_id).into());
        }
        Ok(())
    }

    /// Removes one member of a group; the last member cannot be removed.
    pub fn remove_from_alternatives(&mut self, alt_id: &str, fav_id: &str) -> Result<()> {
        let mut outcome: Option<Result<()>> = None;
        for bouquet in self.roots.iter_mut().flat_map(|r| r.bouquets.iter_mut()) {
            outcome = with_group::<Result<()>>(&mut bouquet.entries, alt_id, &mut |entries, index| {
                let BouquetEntry::Alt(alt) = &mut entries[index] else {
                    return Err(missing(alt_id).into());
                };
                let Some(pos) = alt.members.iter().position(|m| m.fav_id() == fav_id) else {
                    return Err(missing(fav_id).into());
                };
                if alt.members.len() == 1 {
                    return Err(InvariantViolation::EmptyAlternatives(alt_id.to_string()).into());
                }
                alt.members.remove(pos);
                Ok(())
            });
            if outcome.is_some() {
                break;
            }
        }
        outcome.unwrap_or_else(|| Err(missing(alt_id).into()))?;
        self.prune_streams();
        Ok(())
    }

    /// Dissolves a group, putting its first member back in its place. An
    /// empty group just goes.
    pub fn delete_alt_group(&mut self, alt_id: &str) -> Result<()> {
        let found = self.roots.iter_mut().flat_map(|r| r.bouquets.iter_mut()).any(|b| {
            with_group(&mut b.entries, alt_id, &mut |entries, index| {
                let BouquetEntry::Alt(alt) = entries.remove(index) else {
                    return;
                };
                if let Some(first) = alt.members.into_iter().next() {
                    entries.insert(index, first.into_entry());
                }
            })
            .is_some()
        });
        if !found {
            return Err(missing(alt_id).into());
        }
        self.prune_streams();
        Ok(())
    }

    /// Services whose removal would leave an alternatives group empty are
    /// rejected; nothing is deleted then.
    pub fn check_deletable(&self, fav_ids: &[&str]) -> Result<()> {
        for fav_id in fav_ids {
            if !self.services.contains(fav_id) {
                return Err(missing(fav_id).into());
            }
        }
        let gone: HashSet<&str> = fav_ids.iter().copied().collect();
        for (_, bouquet) in self.bouquets() {
            if let Some(alt_id) = emptied_group(&bouquet.entries, &gone) {
                return Err(InvariantViolation::EmptyAlternatives(alt_id).into());
            }
        }
        Ok(())
    }

    /// Deletes services everywhere: table, bouquets, blacklist and relay list.
    pub fn delete_services(&mut self, fav_ids: &[&str]) -> Result<Vec<Service>> {
        self.check_deletable(fav_ids)?;
        let mut removed = Vec::with_capacity(fav_ids.len());
        for fav_id in fav_ids {
            let mut entries = 0;
            for bouquet in self.roots.iter_mut().flat_map(|r| r.bouquets.iter_mut()) {
                entries += strip(&mut bouquet.entries, fav_id);
            }
            self.blacklist.unlock(fav_id);
            self.stream_relay.remove(fav_id);
            if let Some(service) = self.services.remove(fav_id) {
                log::debug!("deleted {} with {} bouquet entries", fav_id, entries);
                removed.push(service);
            }
        }
        Ok(removed)
    }

    pub fn delete_service(&mut self, fav_id: &str) -> Result<Service> {
        self.delete_services(&[fav_id])?
            .pop()
            .ok_or_else(|| missing(fav_id).into())
    }

    /// New empty bouquet at the end of a root. Returns its id.
    pub fn add_bouquet(&mut self, root: RootKind, name: &str) -> Result<BouquetId> {
        let id = self.ids.next_id();
        let root = self
            .root_mut(root)
            .ok_or_else(|| unsupported(&format!("{} bouquets", root.label())))?;
        let bouquet = Bouquet::new(id, root.unique_name(name), root.kind.bouquet_type());
        root.bouquets.push(bouquet);
        Ok(id)
    }

    pub fn remove_bouquet(&mut self, id: BouquetId) -> Result<Bouquet> {
        let (ri, bi) = self.locate(id).ok_or(InvariantViolation::MissingBouquet(id))?;
        let bouquet = self.roots[ri].bouquets.remove(bi);
        self.prune_streams();
        Ok(bouquet)
    }

    /// Renames a bouquet; a name taken by a sibling gets a numeric suffix.
    /// Returns the name set.
    pub fn rename_bouquet(&mut self, id: BouquetId, name: &str) -> Result<String> {
        let (ri, bi) = self.locate(id).ok_or(InvariantViolation::MissingBouquet(id))?;
        let root = &mut self.roots[ri];
        if root.bouquets[bi].name == name {
            return Ok(name.to_string());
        }
        let unique = root.unique_name(name);
        root.bouquets[bi].name = unique.clone();
        Ok(unique)
    }

    pub fn set_bouquet_locked(&mut self, id: BouquetId, locked: bool) -> Result<()> {
        self.require_bouquet(id)?.locked = locked;
        Ok(())
    }

    pub fn set_bouquet_hidden(&mut self, id: BouquetId, hidden: bool) -> Result<()> {
        self.require_bouquet(id)?.hidden = hidden;
        Ok(())
    }

    /// Adds services of the table at `at` (end when `None`). Returns how
    /// many entries were added.
    pub fn add_services(&mut self, id: BouquetId, fav_ids: &[&str], at: Option<usize>) -> Result<usize> {
        let webtv = self.root_of(id)? == RootKind::WebTv;
        let mut entries = Vec::with_capacity(fav_ids.len());
        for fav_id in fav_ids {
            let service = self.services.get(fav_id).ok_or_else(|| missing(fav_id))?;
            if self.kind == SettingsKind::Neutrino && service.is_iptv() != webtv {
                return Err(unsupported(&format!("{} in this bouquet", service.service_type.label())).into());
            }
            entries.push(self.entry_for(service));
        }
        let count = entries.len();
        insert_at(&mut self.entry_bouquet(id)?.entries, at, entries)?;
        Ok(count)
    }

    pub fn add_marker(&mut self, id: BouquetId, text: &str, at: Option<usize>) -> Result<()> {
        self.require_enigma("markers")?;
        let marker = BouquetEntry::Marker(Marker {
            text: text.to_string(),
            number: 0,
        });
        insert_at(&mut self.entry_bouquet(id)?.entries, at, vec![marker])
    }

    pub fn add_space(&mut self, id: BouquetId, at: Option<usize>) -> Result<()> {
        self.require_enigma("spacers")?;
        insert_at(&mut self.entry_bouquet(id)?.entries, at, vec![BouquetEntry::Space])
    }

    /// Adds a stream and registers it in the service table. Returns its fav id.
    pub fn add_iptv(
        &mut self,
        id: BouquetId,
        name: &str,
        url: &str,
        stream_type: u32,
        at: Option<usize>,
    ) -> Result<String> {
        let root = self.root_of(id)?;
        let fav_id = match self.kind {
            SettingsKind::Enigma2 => IptvReference::new(stream_type, url, name).to_line(),
            SettingsKind::Neutrino if root == RootKind::WebTv => {
                let mut fields = WebTvFields::default();
                fields.set("url", Some(url.to_string()));
                fields.to_fav_id()
            }
            SettingsKind::Neutrino => return Err(unsupported("streams outside WebTV").into()),
        };
        self.entry_bouquet(id)?;
        if !self.services.contains(&fav_id) {
            let data_id = match IptvReference::parse(&fav_id) {
                Ok(reference) => reference.data_id(),
                Err(_) => fav_id.clone(),
            };
            self.services.insert(Service::new(
                fav_id.clone(),
                data_id,
                name,
                ServiceType::Iptv,
                TransponderType::Satellite,
            ));
        }
        let mut entry = IptvRef::new(fav_id.clone(), name);
        if self.kind == SettingsKind::Enigma2 {
            entry.description = Some(name.to_string());
        }
        insert_at(&mut self.entry_bouquet(id)?.entries, at, vec![BouquetEntry::Iptv(entry)])?;
        Ok(fav_id)
    }

    /// Removes top-level entries by index and returns them in index order.
    pub fn remove_entries(&mut self, id: BouquetId, indices: &[usize]) -> Result<Vec<BouquetEntry>> {
        let bouquet = self.require_bouquet(id)?;
        let len = bouquet.entries.len();
        for &index in indices {
            check_index(index, len)?;
        }
        let mut sorted: Vec<usize> = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut removed: Vec<BouquetEntry> = sorted
            .iter()
            .rev()
            .map(|&index| bouquet.entries.remove(index))
            .collect();
        removed.reverse();
        self.prune_streams();
        Ok(removed)
    }

    /// Sets or clears the bouquet-local name of a service entry. A name
    /// equal to the service name clears the override.
    pub fn set_extra_name(&mut self, id: BouquetId, index: usize, name: Option<&str>) -> Result<()> {
        self.require_enigma("bouquet-local names")?;
        let bouquet = self.bouquet(id).ok_or(InvariantViolation::MissingBouquet(id))?;
        check_index(index, bouquet.entries.len())?;
        let service_name = bouquet.entries[index]
            .fav_id()
            .and_then(|fav| self.services.get(fav))
            .map(|s| s.name.clone());
        let name = name.filter(|n| Some(*n) != service_name.as_deref());
        match &mut self.require_bouquet(id)?.entries[index] {
            BouquetEntry::Service(s) => {
                s.extra_name = name.map(str::to_string);
                s.description = s.extra_name.clone();
            }
            BouquetEntry::Iptv(i) => {
                i.description = Some(name.unwrap_or(i.name.as_str()).to_string());
            }
            other => {
                let what = other.service_type().label().to_string();
                return Err(InvariantViolation::InvalidReference(what).into());
            }
        }
        Ok(())
    }

    /// Adds or removes a service from the stream relay list. Returns true
    /// when the list changed.
    pub fn set_stream_relay(&mut self, fav_id: &str, on: bool) -> Result<bool> {
        self.require_enigma("stream relay")?;
        let service = self.services.get(fav_id).ok_or_else(|| missing(fav_id))?;
        Ok(self.stream_relay.set(service, on))
    }

    /// Parental lock: blacklist line and the lock flag bit move together.
    pub fn set_service_locked(&mut self, fav_id: &str, locked: bool) -> Result<()> {
        self.require_enigma("service locks")?;
        let service = self.services.get_mut(fav_id).ok_or_else(|| missing(fav_id))?;
        if !service.is_iptv() {
            let mut flags = service.flags();
            flags.set(Flag::Lock, locked);
            service.set_flags(flags);
        }
        let service = service.clone();
        if locked {
            self.blacklist.lock(&service);
        } else {
            self.blacklist.unlock(fav_id);
        }
        Ok(())
    }

    pub fn set_service_hidden(&mut self, fav_id: &str, hidden: bool) -> Result<()> {
        self.require_enigma("hidden services")?;
        let service = self.services.get_mut(fav_id).ok_or_else(|| missing(fav_id))?;
        if service.is_iptv() {
            return Err(unsupported("hidden streams").into());
        }
        let mut flags = service.flags();
        flags.set(Flag::Hide, hidden);
        service.set_flags(flags);
        Ok(())
    }
}

#[cfg(test)]
#[path = "xref_tests.rs"]
mod tests;
