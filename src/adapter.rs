//! Narrow surface a host shell drives: open, save, queries and bulk jobs.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::config::SaveOptions;
use crate::error::{Diagnostics, Result};
use crate::jobs::{
    self, CancelToken, DeleteJob, FilterJob, LoadJob, ProgressCallback, SaveJob, SaveReport,
    ServiceFilter,
};
use crate::lamedb::LamedbVersion;
use crate::model::Model;
use crate::models::{Bouquet, RootKind, Service};

/// Loads a settings directory or a `.zip`/`.tar`/`.tar.gz` archive of one.
pub fn open(path: &Path, prefer: LamedbVersion) -> Result<(Model, Diagnostics)> {
    open_with(path, prefer, &CancelToken::new(), &mut |_| {})
}

pub fn open_with(
    path: &Path,
    prefer: LamedbVersion,
    cancel: &CancelToken,
    on_progress: ProgressCallback<'_>,
) -> Result<(Model, Diagnostics)> {
    let mut job = LoadJob::new(path, prefer, cancel.clone());
    jobs::drive(&mut job, on_progress)
}

/// Writes the model into `dir`. The directory is only touched once every
/// file rendered and staged.
pub fn save(dir: &Path, model: &mut Model, options: &SaveOptions) -> Result<SaveReport> {
    save_with(dir, model, options, &CancelToken::new(), &mut |_| {})
}

pub fn save_with(
    dir: &Path,
    model: &mut Model,
    options: &SaveOptions,
    cancel: &CancelToken,
    on_progress: ProgressCallback<'_>,
) -> Result<SaveReport> {
    let mut job = SaveJob::new(model, dir, options.clone(), cancel.clone());
    jobs::drive(&mut job, on_progress)
}

pub fn services(model: &Model) -> impl Iterator<Item = &Service> {
    model.services.iter()
}

pub fn bouquets(model: &Model) -> impl Iterator<Item = (RootKind, &Bouquet)> {
    model.bouquets()
}

/// Blacklist lines in file order.
pub fn blacklist(model: &Model) -> impl Iterator<Item = &str> {
    model.blacklist.iter()
}

pub fn find<'m>(model: &'m Model, predicate: impl Fn(&Service) -> bool) -> Vec<&'m Service> {
    model.services.iter().filter(|s| predicate(*s)).collect()
}

/// Deletes services everywhere in batches of `batch` (clamped to 100..=500).
/// A cancelled run leaves the model as it was.
pub fn delete_many(
    model: &mut Model,
    fav_ids: &[&str],
    batch: usize,
    cancel: &CancelToken,
    on_progress: ProgressCallback<'_>,
) -> Result<usize> {
    let mut job = DeleteJob::new(model, fav_ids, batch, cancel.clone())?;
    jobs::drive(&mut job, on_progress)
}

/// Fav ids of the services matching `filter`, in table order.
pub fn filter_changed(
    model: &Model,
    filter: &ServiceFilter,
    batch: usize,
    cancel: &CancelToken,
    on_progress: ProgressCallback<'_>,
) -> Result<Vec<String>> {
    let mut job = FilterJob::new(model, filter.clone(), batch, cancel.clone());
    jobs::drive(&mut job, on_progress)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileChange {
    Added,
    Modified,
    Removed,
}

/// What a save into `dir` would change, per file name.
pub fn diff_summary(dir: &Path, model: &Model, options: &SaveOptions) -> Result<Vec<(String, FileChange)>> {
    let output = model.render(options)?;
    let mut changes = Vec::new();
    for (name, text) in &output.files {
        match fs::read(dir.join(name)) {
            Ok(old) if old == text.as_bytes() => {}
            Ok(_) => changes.push((name.clone(), FileChange::Modified)),
            Err(_) => changes.push((name.clone(), FileChange::Added)),
        }
    }
    for name in &output.remove {
        if dir.join(name).is_file() {
            changes.push((name.clone(), FileChange::Removed));
        }
    }
    for name in jobs::stale_files(dir, model.kind, &output)? {
        changes.push((name, FileChange::Removed));
    }
    Ok(changes)
}

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;
