// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Chute packages: a tar archive with a `paradrop.yaml` at its top level

use rand::Rng;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::{debug, info, warn};

use crate::errors::ChuteError;
use crate::model::Chute;

/// Name of the chute description in a package
pub const MANIFEST: &str = "paradrop.yaml";

/// Relative, and never escaping the directory it is resolved against
fn is_safe(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn unique_dir(parent: &Path, stem: &str) -> PathBuf {
    loop {
        let suffix: u32 = rand::rng().random();
        let candidate = parent.join(format!("{stem}-{suffix:08x}"));
        if !candidate.exists() {
            return candidate;
        }
    }
}

fn unpack(reader: impl Read, dest: &Path) -> Result<(), ChuteError> {
    let mut archive = Archive::new(reader);
    for entry in archive.entries().map_err(ChuteError::Tar)? {
        let mut entry = entry.map_err(ChuteError::Tar)?;
        let path = entry.path().map_err(ChuteError::Tar)?.into_owned();
        if !is_safe(&path) {
            return Err(ChuteError::UnsafePath(path.display().to_string()));
        }
        let kind = entry.header().entry_type();
        if matches!(kind, EntryType::Symlink | EntryType::Link) {
            let target = entry
                .link_name()
                .map_err(ChuteError::Tar)?
                .map(std::borrow::Cow::into_owned)
                .unwrap_or_default();
            if !is_safe(&target) {
                return Err(ChuteError::UnsafePath(format!(
                    "{} -> {}",
                    path.display(),
                    target.display()
                )));
            }
        }
        if !matches!(
            kind,
            EntryType::Regular | EntryType::Directory | EntryType::Symlink | EntryType::Link
        ) {
            debug!("Skipping {} of type {kind:?}", path.display());
            continue;
        }
        if !entry.unpack_in(dest).map_err(ChuteError::Tar)? {
            return Err(ChuteError::UnsafePath(path.display().to_string()));
        }
    }
    Ok(())
}

fn load_manifest(dir: &Path) -> Result<Chute, ChuteError> {
    let path = dir.join(MANIFEST);
    if !path.is_file() {
        return Err(ChuteError::MissingManifest);
    }
    let text = std::fs::read_to_string(&path).map_err(ChuteError::io(&path))?;
    let chute = Chute::from_yaml(&text)?;
    chute.validate()?;
    Ok(chute)
}

/// Extract a package under `sources_dir` and return the chute it describes, with
/// `source_dir` pointing at the extracted tree. Nothing is left behind on failure.
pub fn extract_package(reader: impl Read, sources_dir: &Path) -> Result<Chute, ChuteError> {
    std::fs::create_dir_all(sources_dir).map_err(ChuteError::io(sources_dir))?;
    let staging = unique_dir(sources_dir, ".upload");
    std::fs::create_dir(&staging).map_err(ChuteError::io(&staging))?;

    let result = unpack(reader, &staging).and_then(|()| load_manifest(&staging));
    let mut chute = match result {
        Ok(chute) => chute,
        Err(e) => {
            if let Err(err) = std::fs::remove_dir_all(&staging) {
                warn!("Failed to clean up {}: {err}", staging.display());
            }
            return Err(e);
        }
    };
    let dest = unique_dir(sources_dir, &chute.name);
    std::fs::rename(&staging, &dest).map_err(ChuteError::io(&dest))?;
    info!("Extracted package of chute {} to {}", chute.name, dest.display());
    chute.source_dir = Some(dest);
    Ok(chute)
}
