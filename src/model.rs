//! The loaded settings of one receiver.

use std::path::Path;

use serde::Serialize;

use crate::blacklist::{Blacklist, FileAction, StreamRelay, BLACKLIST, STREAM_RELAY};
use crate::bouquets;
use crate::config::SaveOptions;
use crate::error::{Diagnostics, InvariantViolation, Result};
use crate::hashing;
use crate::lamedb::{self, LamedbVersion, ServiceTable};
use crate::models::{
    Bouquet, BouquetEntry, BouquetId, BouquetRoot, IdAllocator, RootKind, Service, SettingsKind,
};
use crate::neutrino::{self, NeutrinoLayout};
use crate::tuners::Tuners;

/// Everything a save writes, staged in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    /// `(file name, contents)` to write.
    pub files: Vec<(String, String)>,
    /// Files to remove from the target.
    pub remove: Vec<String>,
    /// File name each top-level Enigma2 bouquet was written to.
    pub assigned: Vec<(BouquetId, String)>,
}

impl Output {
    /// True when `name` is written by this output.
    pub fn writes(&self, name: &str) -> bool {
        self.files.iter().any(|(f, _)| f == name)
    }
}

/// File families in the order a load reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Tuners,
    Services,
    Bouquets,
    /// Blacklist and stream relay list; they refer to bouquets and services.
    Lists,
}

impl LoadStage {
    pub const ALL: [LoadStage; 4] = [
        LoadStage::Tuners,
        LoadStage::Services,
        LoadStage::Bouquets,
        LoadStage::Lists,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            LoadStage::Tuners => "tuners",
            LoadStage::Services => "services",
            LoadStage::Bouquets => "bouquets",
            LoadStage::Lists => "lists",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Model {
    pub kind: SettingsKind,
    pub services: ServiceTable,
    pub roots: Vec<BouquetRoot>,
    pub blacklist: Blacklist,
    pub stream_relay: StreamRelay,
    pub tuners: Tuners,
    #[serde(skip)]
    pub neutrino: NeutrinoLayout,
    #[serde(skip)]
    pub ids: IdAllocator,
    #[serde(skip)]
    snapshot: u64,
}

impl Model {
    /// Empty settings with the roots of `kind`.
    pub fn new(kind: SettingsKind) -> Self {
        let roots = match kind {
            SettingsKind::Enigma2 => vec![BouquetRoot::new(RootKind::Tv), BouquetRoot::new(RootKind::Radio)],
            SettingsKind::Neutrino => vec![
                BouquetRoot::new(RootKind::Providers),
                BouquetRoot::new(RootKind::Tv),
                BouquetRoot::new(RootKind::WebTv),
            ],
        };
        let mut model = Self {
            kind,
            services: ServiceTable::new(),
            roots,
            blacklist: Blacklist::new(),
            stream_relay: StreamRelay::new(),
            tuners: Tuners::default(),
            neutrino: NeutrinoLayout::default(),
            ids: IdAllocator::default(),
            snapshot: 0,
        };
        model.mark_saved();
        model
    }

    /// Flavour of the settings stored in `dir`.
    pub fn detect_kind(dir: &Path) -> SettingsKind {
        if neutrino::is_neutrino_dir(dir) {
            SettingsKind::Neutrino
        } else {
            SettingsKind::Enigma2
        }
    }

    /// Reads a settings directory. Bad entries and refused files end up in
    /// the diagnostics, never in an error.
    pub fn load(dir: &Path, prefer: LamedbVersion) -> (Self, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let mut model = Self::new(Self::detect_kind(dir));
        log::info!("loading {:?} settings from {}", model.kind, dir.display());
        for stage in LoadStage::ALL {
            model.load_stage(dir, stage, prefer, &mut diagnostics);
        }
        model.mark_saved();
        (model, diagnostics)
    }

    /// Reads one family of files. Stages run in [`LoadStage::ALL`] order.
    pub fn load_stage(
        &mut self,
        dir: &Path,
        stage: LoadStage,
        prefer: LamedbVersion,
        diagnostics: &mut Diagnostics,
    ) {
        match (stage, self.kind) {
            (LoadStage::Tuners, _) => self.tuners = Tuners::load(dir, diagnostics),
            (LoadStage::Services, SettingsKind::Enigma2) => {
                self.services = lamedb::load(dir, prefer, diagnostics);
            }
            (LoadStage::Services, SettingsKind::Neutrino) => {
                let (services, layout) = neutrino::services::load(dir, diagnostics);
                self.services = services;
                self.neutrino = layout;
            }
            (LoadStage::Bouquets, SettingsKind::Enigma2) => {
                self.roots = bouquets::reader::load(dir, &mut self.services, &mut self.ids, diagnostics);
            }
            (LoadStage::Bouquets, SettingsKind::Neutrino) => {
                self.roots = neutrino::bouquets::load(
                    dir,
                    &mut self.services,
                    &mut self.neutrino,
                    &mut self.ids,
                    diagnostics,
                );
            }
            (LoadStage::Lists, SettingsKind::Enigma2) => {
                self.blacklist = Blacklist::load(dir, diagnostics);
                self.blacklist.reconcile(&mut self.roots, &self.services, diagnostics);
                self.stream_relay = StreamRelay::load(dir, diagnostics);
            }
            (LoadStage::Lists, SettingsKind::Neutrino) => {}
        }
    }

    pub fn data_hash(&self) -> u64 {
        hashing::data_hash(&self.services, &self.roots, &self.blacklist, &self.stream_relay)
    }

    pub fn is_dirty(&self) -> bool {
        self.snapshot != self.data_hash()
    }

    /// Takes the current state as the saved one.
    pub fn mark_saved(&mut self) {
        self.snapshot = self.data_hash();
    }

    pub fn root(&self, kind: RootKind) -> Option<&BouquetRoot> {
        self.roots.iter().find(|r| r.kind == kind)
    }

    pub fn root_mut(&mut self, kind: RootKind) -> Option<&mut BouquetRoot> {
        self.roots.iter_mut().find(|r| r.kind == kind)
    }

    /// Every top-level bouquet with the kind of its root.
    pub fn bouquets(&self) -> impl Iterator<Item = (RootKind, &Bouquet)> {
        self.roots
            .iter()
            .flat_map(|r| r.bouquets.iter().map(move |b| (r.kind, b)))
    }

    /// Root and position of a bouquet.
    pub fn locate(&self, id: BouquetId) -> Option<(usize, usize)> {
        self.roots.iter().enumerate().find_map(|(ri, r)| {
            r.bouquets
                .iter()
                .position(|b| b.id == id)
                .map(|bi| (ri, bi))
        })
    }

    pub fn bouquet(&self, id: BouquetId) -> Option<&Bouquet> {
        let (ri, bi) = self.locate(id)?;
        Some(&self.roots[ri].bouquets[bi])
    }

    pub fn bouquet_mut(&mut self, id: BouquetId) -> Option<&mut Bouquet> {
        let (ri, bi) = self.locate(id)?;
        Some(&mut self.roots[ri].bouquets[bi])
    }

    /// Like [`bouquet_mut`](Self::bouquet_mut) but as a `MissingBouquet` rejection.
    pub fn require_bouquet(&mut self, id: BouquetId) -> std::result::Result<&mut Bouquet, InvariantViolation> {
        self.bouquet_mut(id).ok_or(InvariantViolation::MissingBouquet(id))
    }

    pub fn service(&self, fav_id: &str) -> Option<&Service> {
        self.services.get(fav_id)
    }

    /// Display name of an entry: bouquet-local name first, then the service name.
    pub fn entry_name(&self, entry: &BouquetEntry) -> String {
        match entry {
            BouquetEntry::Service(s) => s
                .extra_name
                .clone()
                .or_else(|| self.services.get(&s.fav_id).map(|srv| srv.name.clone()))
                .unwrap_or_default(),
            BouquetEntry::Iptv(i) => i.description.clone().unwrap_or_else(|| i.name.clone()),
            BouquetEntry::Marker(m) => m.text.clone(),
            BouquetEntry::Space => String::new(),
            BouquetEntry::Alt(alt) => alt.name.clone(),
            BouquetEntry::SubBouquet(sub) => sub.name.clone(),
        }
    }

    /// True when the service is on the blacklist or carries the lock flag.
    pub fn is_locked(&self, fav_id: &str) -> bool {
        self.blacklist.is_locked(fav_id)
            || self.services.get(fav_id).is_some_and(|s| s.flags().is_lock())
    }

    /// Renders every file family for a save.
    pub fn render(&self, options: &SaveOptions) -> Result<Output> {
        let mut out = Output::default();
        out.files.extend(self.tuners.render()?);
        match self.kind {
            SettingsKind::Enigma2 => {
                let version = match options.lamedb_version {
                    LamedbVersion::V5 => LamedbVersion::V5,
                    _ => LamedbVersion::V4,
                };
                out.files.push(lamedb::render(&self.services, version));

                let rendered = bouquets::writer::render(&self.roots, &self.services, options.force_bq_names);
                out.files.extend(rendered.files);
                out.assigned = rendered.assigned;

                match self.blacklist.render(&rendered.locked_headers) {
                    FileAction::Write(text) => out.files.push((BLACKLIST.to_string(), text)),
                    FileAction::Delete => out.remove.push(BLACKLIST.to_string()),
                    FileAction::Skip => {}
                }
                match self.stream_relay.render() {
                    FileAction::Write(text) => out.files.push((STREAM_RELAY.to_string(), text)),
                    FileAction::Delete => out.remove.push(STREAM_RELAY.to_string()),
                    FileAction::Skip => {}
                }
            }
            SettingsKind::Neutrino => {
                let services = neutrino::services::write(&self.services, &self.neutrino)?;
                out.files.push((neutrino::SERVICES_XML.to_string(), services));
                out.files
                    .extend(neutrino::bouquets::render(&self.roots, &self.services, &self.neutrino)?);
            }
        }
        Ok(out)
    }

    /// Records the file names a save settled on.
    pub fn apply_assigned(&mut self, assigned: &[(BouquetId, String)]) {
        for (id, file) in assigned {
            if let Some(bouquet) = self.bouquet_mut(*id) {
                bouquet.file = Some(file.clone());
            }
        }
    }
}
