//! Long operations as pollable jobs.
//!
//! A job does a bounded amount of work per [`Job::step`] and then yields a
//! [`Progress`] token, so a host can redraw between steps. Cancellation is
//! cooperative: the next step after [`CancelToken::cancel`] returns
//! [`Error::Cancelled`] and throws the partial work away. A finished job
//! behaves as cancelled when stepped again.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use indexmap::IndexSet;
use tempfile::TempDir;

use crate::archive;
use crate::bouquets::is_bouquet_file;
use crate::config::{SaveOptions, MAX_BATCH, MIN_BATCH};
use crate::error::{Diagnostics, Error, Result};
use crate::lamedb::LamedbVersion;
use crate::model::{LoadStage, Model, Output};
use crate::models::{BouquetEntry, Service, ServiceType, SettingsKind, TransponderType};

/// Directory inside the staging area holding the files a commit replaces.
const PARKED_DIR: &str = ".parked";

/// Shared flag a host sets to stop a running job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub stage: &'static str,
    pub done: usize,
    pub total: usize,
}

impl Progress {
    fn new(stage: &'static str, done: usize, total: usize) -> Self {
        Self { stage, done, total }
    }
}

pub enum Step<T> {
    Yield(Progress),
    Done(T),
}

pub trait Job {
    type Output;

    fn step(&mut self) -> Result<Step<Self::Output>>;
}

pub type ProgressCallback<'a> = &'a mut dyn FnMut(&Progress);

/// Steps a job to completion, reporting every yield.
pub fn drive<J: Job>(job: &mut J, on_progress: ProgressCallback<'_>) -> Result<J::Output> {
    loop {
        match job.step()? {
            Step::Yield(progress) => on_progress(&progress),
            Step::Done(output) => return Ok(output),
        }
    }
}

/// Steps a job to completion without reporting.
pub fn run<J: Job>(job: &mut J) -> Result<J::Output> {
    drive(job, &mut |_| {})
}

fn clamp_batch(batch: usize) -> usize {
    batch.clamp(MIN_BATCH, MAX_BATCH)
}

fn not_found(path: &Path) -> Error {
    Error::io(path, io::Error::new(io::ErrorKind::NotFound, "no such file or directory"))
}

/// Loads a settings directory or archive one file family per step.
pub struct LoadJob {
    source: PathBuf,
    prefer: LamedbVersion,
    cancel: CancelToken,
    extracted: Option<TempDir>,
    dir: Option<PathBuf>,
    model: Option<Model>,
    diagnostics: Diagnostics,
    next: usize,
    finished: bool,
}

impl LoadJob {
    pub fn new(source: impl Into<PathBuf>, prefer: LamedbVersion, cancel: CancelToken) -> Self {
        Self {
            source: source.into(),
            prefer,
            cancel,
            extracted: None,
            dir: None,
            model: None,
            diagnostics: Diagnostics::new(),
            next: 0,
            finished: false,
        }
    }

    fn open(&mut self) -> Result<PathBuf> {
        if self.source.is_dir() {
            return Ok(self.source.clone());
        }
        if !self.source.is_file() {
            return Err(not_found(&self.source));
        }
        let extracted = archive::extract(&self.source)?;
        let dir = archive::settings_root(extracted.path());
        self.extracted = Some(extracted);
        Ok(dir)
    }
}

impl Job for LoadJob {
    type Output = (Model, Diagnostics);

    fn step(&mut self) -> Result<Step<Self::Output>> {
        let total = LoadStage::ALL.len();
        if self.finished || self.cancel.is_cancelled() {
            self.extracted = None;
            self.model = None;
            return Err(Error::Cancelled);
        }
        let Some(dir) = self.dir.clone() else {
            let dir = self.open()?;
            self.model = Some(Model::new(Model::detect_kind(&dir)));
            self.dir = Some(dir);
            return Ok(Step::Yield(Progress::new("open", 0, total)));
        };
        let model = match self.model.as_mut() {
            Some(model) => model,
            None => return Err(Error::Cancelled),
        };
        if let Some(stage) = LoadStage::ALL.get(self.next).copied() {
            model.load_stage(&dir, stage, self.prefer, &mut self.diagnostics);
            self.next += 1;
            return Ok(Step::Yield(Progress::new(stage.label(), self.next, total)));
        }
        model.mark_saved();
        self.finished = true;
        // Dropping the handle deletes the extracted copy.
        self.extracted = None;
        let model = self.model.take().ok_or(Error::Cancelled)?;
        let diagnostics = std::mem::take(&mut self.diagnostics);
        log::info!(
            "{}: {} services, {} diagnostics",
            self.source.display(),
            model.services.len(),
            diagnostics.len()
        );
        Ok(Step::Done((model, diagnostics)))
    }
}

/// What a finished save did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub written: Vec<String>,
    pub removed: Vec<String>,
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveStage {
    Render,
    Stage,
    Backup,
    Commit,
    Finished,
}

/// Saves a model: render, stage every file in a temporary directory inside
/// the target, back the target up, then rename the staged files into place.
///
/// Nothing in the target changes before the commit step, and the commit
/// step does not look at the cancel token.
pub struct SaveJob<'a> {
    model: &'a mut Model,
    target: PathBuf,
    options: SaveOptions,
    cancel: CancelToken,
    batch: usize,
    stage: SaveStage,
    output: Output,
    staging: Option<TempDir>,
    staged: usize,
    backup: Option<PathBuf>,
}

impl<'a> SaveJob<'a> {
    pub fn new(
        model: &'a mut Model,
        target: impl Into<PathBuf>,
        options: SaveOptions,
        cancel: CancelToken,
    ) -> Self {
        Self {
            model,
            target: target.into(),
            options,
            cancel,
            batch: MIN_BATCH,
            stage: SaveStage::Render,
            output: Output::default(),
            staging: None,
            staged: 0,
            backup: None,
        }
    }

    /// Files staged per step.
    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    fn staging_dir(&self) -> Result<&Path> {
        self.staging
            .as_ref()
            .map(TempDir::path)
            .ok_or(Error::Cancelled)
    }

    fn render(&mut self) -> Result<Step<SaveReport>> {
        self.output = self.model.render(&self.options)?;
        fs::create_dir_all(&self.target).map_err(|e| Error::io(&self.target, e))?;
        let staging = tempfile::Builder::new()
            .prefix(".stb-staging-")
            .tempdir_in(&self.target)
            .map_err(|e| Error::io(&self.target, e))?;
        self.staging = Some(staging);
        self.stage = SaveStage::Stage;
        Ok(Step::Yield(Progress::new("render", 0, self.output.files.len())))
    }

    fn stage_files(&mut self) -> Result<Step<SaveReport>> {
        let staging = self.staging_dir()?.to_path_buf();
        let end = (self.staged + self.batch).min(self.output.files.len());
        for (name, text) in &self.output.files[self.staged..end] {
            let path = staging.join(name);
            fs::write(&path, text).map_err(|e| Error::io(&path, e))?;
        }
        self.staged = end;
        if self.staged == self.output.files.len() {
            self.stage = SaveStage::Backup;
        }
        Ok(Step::Yield(Progress::new("stage", self.staged, self.output.files.len())))
    }

    fn backup(&mut self) -> Result<Step<SaveReport>> {
        self.stage = SaveStage::Commit;
        let staging = self.staging_dir()?.to_path_buf();
        let has_content = fs::read_dir(&self.target)
            .map_err(|e| Error::io(&self.target, e))?
            .filter_map(|e| e.ok())
            .any(|e| e.path() != staging);
        if self.options.backup_before_save && has_content {
            let dest = backup_path(&self.target, self.options.backup_dir.as_deref());
            copy_dir(&self.target, &dest, &staging)?;
            log::info!("backup of {} in {}", self.target.display(), dest.display());
            self.backup = Some(dest);
        }
        Ok(Step::Yield(Progress::new("backup", 1, 1)))
    }

    fn commit(&mut self) -> Result<Step<SaveReport>> {
        let staging = self.staging_dir()?.to_path_buf();
        let parked = staging.join(PARKED_DIR);
        fs::create_dir_all(&parked).map_err(|e| Error::io(&parked, e))?;
        let mut report = SaveReport {
            backup: self.backup.take(),
            ..SaveReport::default()
        };
        let mut journal = Vec::new();
        if let Err(e) = self.swap_in(&staging, &parked, &mut journal, &mut report) {
            log::warn!("save into {} failed, restoring: {}", self.target.display(), e);
            roll_back(&journal);
            return Err(e);
        }

        self.staging = None;
        self.model.apply_assigned(&self.output.assigned);
        self.model.mark_saved();
        self.stage = SaveStage::Finished;
        log::info!(
            "saved {} files to {} ({} removed)",
            report.written.len(),
            self.target.display(),
            report.removed.len()
        );
        Ok(Step::Done(report))
    }
}

impl SaveJob<'_> {
    /// Moves staged files into the target and drops files no longer written.
    /// Every replaced or dropped file is parked first and listed in `journal`.
    fn swap_in(
        &self,
        staging: &Path,
        parked: &Path,
        journal: &mut Vec<(PathBuf, Option<PathBuf>)>,
        report: &mut SaveReport,
    ) -> Result<()> {
        for (name, _) in &self.output.files {
            let to = self.target.join(name);
            let aside = park(&to, parked, name)?;
            journal.push((to.clone(), aside));
            fs::rename(staging.join(name), &to).map_err(|e| Error::io(&to, e))?;
            report.written.push(name.clone());
        }

        let mut gone: Vec<String> = self.output.remove.clone();
        gone.extend(stale_files(&self.target, self.model.kind, &self.output)?);
        for name in gone {
            let path = self.target.join(&name);
            if path.is_file() {
                let aside = park(&path, parked, &name)?;
                journal.push((path.clone(), aside));
                log::debug!("removed {}", path.display());
                report.removed.push(name);
            }
        }
        Ok(())
    }
}

/// Moves an existing file into `parked`. Returns where it went.
fn park(path: &Path, parked: &Path, name: &str) -> Result<Option<PathBuf>> {
    if !path.is_file() {
        return Ok(None);
    }
    let aside = parked.join(name);
    fs::rename(path, &aside).map_err(|e| Error::io(path, e))?;
    Ok(Some(aside))
}

/// Undoes a partial commit, newest change first.
fn roll_back(journal: &[(PathBuf, Option<PathBuf>)]) {
    for (path, aside) in journal.iter().rev() {
        if path.is_file() {
            if let Err(e) = fs::remove_file(path) {
                log::warn!("could not remove {}: {}", path.display(), e);
            }
        }
        if let Some(aside) = aside {
            if let Err(e) = fs::rename(aside, path) {
                log::warn!("could not restore {}: {}", path.display(), e);
            }
        }
    }
}

impl Job for SaveJob<'_> {
    type Output = SaveReport;

    fn step(&mut self) -> Result<Step<SaveReport>> {
        let cancelled = self.stage != SaveStage::Commit && self.cancel.is_cancelled();
        if cancelled || self.stage == SaveStage::Finished {
            self.staging = None;
            return Err(Error::Cancelled);
        }
        let step = match self.stage {
            SaveStage::Render => self.render(),
            SaveStage::Stage => self.stage_files(),
            SaveStage::Backup => self.backup(),
            SaveStage::Commit => self.commit(),
            SaveStage::Finished => Err(Error::Cancelled),
        };
        if step.is_err() {
            self.staging = None;
            self.stage = SaveStage::Finished;
        }
        step
    }
}

/// Enigma2 bouquet files in `target` that `output` no longer writes.
pub fn stale_files(target: &Path, kind: SettingsKind, output: &Output) -> Result<Vec<String>> {
    if kind != SettingsKind::Enigma2 || !target.is_dir() {
        return Ok(Vec::new());
    }
    let mut stale = Vec::new();
    let entries = fs::read_dir(target).map_err(|e| Error::io(target, e))?;
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_bouquet_file(&name) && !output.writes(&name) && entry.path().is_file() {
            stale.push(name);
        }
    }
    stale.sort();
    Ok(stale)
}

/// `<dir>_backup_<YYYYmmdd_HHMMSS>` next to `target`, or inside `base` when set.
pub fn backup_path(target: &Path, base: Option<&Path>) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "settings".to_string());
    let parent = match base {
        Some(base) => base.to_path_buf(),
        None => target.parent().map(Path::to_path_buf).unwrap_or_else(|| target.to_path_buf()),
    };
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let first = parent.join(format!("{}_backup_{}", name, stamp));
    let mut candidate = first.clone();
    let mut n = 1;
    while candidate.exists() {
        candidate = PathBuf::from(format!("{}_{}", first.display(), n));
        n += 1;
    }
    candidate
}

fn copy_dir(from: &Path, to: &Path, skip: &Path) -> Result<()> {
    fs::create_dir_all(to).map_err(|e| Error::io(to, e))?;
    for entry in fs::read_dir(from).map_err(|e| Error::io(from, e))? {
        let entry = entry.map_err(|e| Error::io(from, e))?;
        let path = entry.path();
        if path == skip {
            continue;
        }
        let dest = to.join(entry.file_name());
        if path.is_dir() {
            copy_dir(&path, &dest, skip)?;
        } else {
            fs::copy(&path, &dest).map_err(|e| Error::io(&path, e))?;
        }
    }
    Ok(())
}

/// Deletes services in batches. Cancelling restores the model as it was.
pub struct DeleteJob<'a> {
    model: &'a mut Model,
    original: Option<Model>,
    fav_ids: Vec<String>,
    cursor: usize,
    batch: usize,
    cancel: CancelToken,
    removed: usize,
}

impl<'a> DeleteJob<'a> {
    /// Checks the whole set first; a set that would empty an alternatives
    /// group is refused before anything is deleted.
    pub fn new(
        model: &'a mut Model,
        fav_ids: &[&str],
        batch: usize,
        cancel: CancelToken,
    ) -> Result<Self> {
        let fav_ids: IndexSet<String> = fav_ids.iter().map(|f| f.to_string()).collect();
        let refs: Vec<&str> = fav_ids.iter().map(String::as_str).collect();
        model.check_deletable(&refs)?;
        Ok(Self {
            original: Some(model.clone()),
            model,
            fav_ids: fav_ids.into_iter().collect(),
            cursor: 0,
            batch: clamp_batch(batch),
            cancel,
            removed: 0,
        })
    }

    fn restore(&mut self) {
        if let Some(original) = self.original.take() {
            *self.model = original;
        }
    }
}

impl Job for DeleteJob<'_> {
    type Output = usize;

    fn step(&mut self) -> Result<Step<usize>> {
        if self.original.is_none() || self.cancel.is_cancelled() {
            self.restore();
            return Err(Error::Cancelled);
        }
        let end = (self.cursor + self.batch).min(self.fav_ids.len());
        let batch: Vec<&str> = self.fav_ids[self.cursor..end].iter().map(String::as_str).collect();
        match self.model.delete_services(&batch) {
            Ok(removed) => self.removed += removed.len(),
            Err(e) => {
                self.restore();
                return Err(e);
            }
        }
        self.cursor = end;
        if self.cursor == self.fav_ids.len() {
            self.original = None;
            return Ok(Step::Done(self.removed));
        }
        Ok(Step::Yield(Progress::new("delete", self.cursor, self.fav_ids.len())))
    }
}

/// Criteria of the service list filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceFilter {
    /// Case-insensitive substring of the name or the fav id.
    pub text: Option<String>,
    pub service_type: Option<ServiceType>,
    pub transponder_type: Option<TransponderType>,
    pub position: Option<i32>,
    pub package: Option<String>,
    pub scrambled: Option<bool>,
    pub hidden: Option<bool>,
    pub locked: Option<bool>,
    /// Only services no bouquet refers to.
    pub unused: bool,
}

impl ServiceFilter {
    pub fn matches(&self, model: &Model, service: &Service, used: &HashSet<String>) -> bool {
        if let Some(text) = &self.text {
            let text = text.to_lowercase();
            if !service.name.to_lowercase().contains(&text)
                && !service.fav_id.to_lowercase().contains(&text)
            {
                return false;
            }
        }
        let checks = [
            self.service_type.map_or(true, |t| t == service.service_type),
            self.transponder_type.map_or(true, |t| t == service.transponder_type),
            self.position.map_or(true, |p| service.position == Some(p)),
            self.package.as_deref().map_or(true, |p| service.package == p),
            self.scrambled.map_or(true, |s| s == service.is_scrambled()),
            self.hidden.map_or(true, |h| h == service.is_hidden()),
            self.locked.map_or(true, |l| l == model.is_locked(&service.fav_id)),
            !self.unused || !used.contains(&service.fav_id),
        ];
        checks.iter().all(|ok| *ok)
    }
}

/// Fav ids held by any bouquet, alternatives included.
fn used_fav_ids(model: &Model) -> HashSet<String> {
    let mut used = HashSet::new();
    for (_, bouquet) in model.bouquets() {
        for entry in &bouquet.entries {
            entry.visit(&mut |e| {
                if let Some(fav_id) = e.fav_id() {
                    used.insert(fav_id.to_string());
                }
                if let BouquetEntry::Alt(alt) = e {
                    used.extend(alt.members.iter().map(|m| m.fav_id().to_string()));
                }
            });
        }
    }
    used
}

/// Runs a filter over the service table in batches. Yields fav ids in
/// table order.
pub struct FilterJob<'a> {
    model: &'a Model,
    filter: ServiceFilter,
    cancel: CancelToken,
    batch: usize,
    cursor: usize,
    used: Option<HashSet<String>>,
    matched: Vec<String>,
    finished: bool,
}

impl<'a> FilterJob<'a> {
    pub fn new(model: &'a Model, filter: ServiceFilter, batch: usize, cancel: CancelToken) -> Self {
        Self {
            model,
            filter,
            cancel,
            batch: clamp_batch(batch),
            cursor: 0,
            used: None,
            matched: Vec::new(),
            finished: false,
        }
    }
}

impl Job for FilterJob<'_> {
    type Output = Vec<String>;

    fn step(&mut self) -> Result<Step<Vec<String>>> {
        if self.finished || self.cancel.is_cancelled() {
            self.matched.clear();
            return Err(Error::Cancelled);
        }
        let total = self.model.services.len();
        let Some(used) = &self.used else {
            self.used = Some(if self.filter.unused {
                used_fav_ids(self.model)
            } else {
                HashSet::new()
            });
            return Ok(Step::Yield(Progress::new("filter", 0, total)));
        };
        let end = (self.cursor + self.batch).min(total);
        for service in self.model.services.iter().skip(self.cursor).take(end - self.cursor) {
            if self.filter.matches(self.model, service, used) {
                self.matched.push(service.fav_id.clone());
            }
        }
        self.cursor = end;
        if self.cursor == total {
            self.finished = true;
            return Ok(Step::Done(std::mem::take(&mut self.matched)));
        }
        Ok(Step::Yield(Progress::new("filter", self.cursor, total)))
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
