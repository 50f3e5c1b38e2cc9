// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The catalog of installed chutes.
//!
//! Only the update worker writes the catalog. Readers (the API) load a snapshot without
//! locking and may see a slightly stale view.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::ChuteError;
use crate::model::Chute;

const FORMAT_VERSION: u32 = 1;

pub type ChuteMap = BTreeMap<String, Arc<Chute>>;

#[derive(Serialize)]
struct CatalogFileOut<'a> {
    version: u32,
    chutes: BTreeMap<&'a str, &'a Chute>,
}

#[derive(Deserialize)]
struct CatalogFileIn {
    version: u32,
    chutes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug)]
pub struct ChuteCatalog {
    path: PathBuf,
    chutes: ArcSwap<ChuteMap>,
    dirty: AtomicBool,
}

/// Decode the entries of a catalog file, dropping those that do not decode
fn decode(text: &str) -> Result<ChuteMap, ChuteError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let entries = if value.get("version").is_some() {
        let file: CatalogFileIn = serde_json::from_value(value)?;
        if file.version > FORMAT_VERSION {
            warn!("Catalog format version {} is newer than {FORMAT_VERSION}", file.version);
        }
        file.chutes
    } else {
        info!("Migrating catalog from unversioned format");
        serde_json::from_value(value)?
    };
    let mut chutes = ChuteMap::new();
    for (name, entry) in entries {
        match serde_json::from_value::<Chute>(entry) {
            Ok(chute) if chute.name == name => {
                chutes.insert(name, Arc::new(chute));
            }
            Ok(chute) => warn!("Dropping catalog entry {name}: it describes chute {}", chute.name),
            Err(e) => warn!("Dropping corrupt catalog entry {name}: {e}"),
        }
    }
    Ok(chutes)
}

impl ChuteCatalog {
    /// Load the catalog persisted at `path`. A missing file is an empty catalog.
    pub fn load(path: &Path) -> Result<Self, ChuteError> {
        let chutes = match std::fs::read_to_string(path) {
            Ok(text) => decode(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ChuteMap::new(),
            Err(err) => {
                return Err(ChuteError::Io {
                    path: path.to_path_buf(),
                    err,
                });
            }
        };
        debug!("Loaded {} chutes from {}", chutes.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            chutes: ArcSwap::from_pointee(chutes),
            dirty: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Chute>> {
        self.chutes.load().get(name).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<Arc<Chute>> {
        self.chutes.load().values().cloned().collect()
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<ChuteMap> {
        self.chutes.load_full()
    }

    fn save(&self) -> Result<(), ChuteError> {
        let chutes = self.chutes.load();
        let out = CatalogFileOut {
            version: FORMAT_VERSION,
            chutes: chutes.iter().map(|(k, v)| (k.as_str(), v.as_ref())).collect(),
        };
        let data = serde_json::to_vec_pretty(&out)?;
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(ChuteError::io(dir))?;
        }
        let tmp = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp).map_err(ChuteError::io(&tmp))?;
        file.write_all(&data).map_err(ChuteError::io(&tmp))?;
        file.sync_all().map_err(ChuteError::io(&tmp))?;
        std::fs::rename(&tmp, &self.path).map_err(ChuteError::io(&self.path))?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    fn save_or_mark(&self) -> Result<(), ChuteError> {
        self.save().inspect_err(|e| {
            self.dirty.store(true, Ordering::Release);
            error!("Failed to save chute catalog: {e}");
        })
    }

    /// Insert or replace a chute and write the catalog through
    pub fn commit(&self, chute: Chute) -> Result<(), ChuteError> {
        let name = chute.name.clone();
        let chute = Arc::new(chute);
        self.chutes.rcu(|current| {
            let mut next = ChuteMap::clone(current);
            next.insert(name.clone(), chute.clone());
            next
        });
        debug!("Committed chute {name}");
        self.save_or_mark()
    }

    /// Remove a chute, returning it if it was present
    pub fn remove(&self, name: &str) -> Result<Option<Arc<Chute>>, ChuteError> {
        let Some(old) = self.get(name) else {
            return Ok(None);
        };
        self.chutes.rcu(|current| {
            let mut next = ChuteMap::clone(current);
            next.remove(name);
            next
        });
        debug!("Removed chute {name}");
        self.save_or_mark()?;
        Ok(Some(old))
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Save if dirty. Returns whether a save happened.
    pub fn flush(&self) -> Result<bool, ChuteError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        self.save_or_mark()?;
        Ok(true)
    }

    /// Flush periodically until the task is aborted
    pub fn spawn_flusher(catalog: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = catalog.flush() {
                    warn!("Periodic catalog flush failed: {e}");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChuteState;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    fn chute(name: &str) -> Chute {
        let mut chute = Chute::named(name);
        chute.version = Some("1".to_string());
        chute.state = ChuteState::Running;
        chute
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ChuteCatalog::load(&dir.path().join("chutes")).expect("Should succeed");
        assert!(catalog.list().is_empty());
    }

    #[test]
    fn commit_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chutes");
        let catalog = ChuteCatalog::load(&path).unwrap();
        let before = catalog.snapshot();
        catalog.commit(chute("hello")).expect("Should succeed");
        // earlier snapshots are unaffected
        assert!(before.is_empty());

        let reloaded = ChuteCatalog::load(&path).unwrap();
        let hello = reloaded.get("hello").expect("persisted");
        assert_eq!(hello.state, ChuteState::Running);

        let removed = reloaded.remove("hello").unwrap();
        assert!(removed.is_some());
        assert!(reloaded.remove("hello").unwrap().is_none());
        assert!(ChuteCatalog::load(&path).unwrap().get("hello").is_none());
    }

    #[test]
    #[traced_test]
    fn corrupt_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chutes");
        std::fs::write(
            &path,
            r#"{"version": 1, "chutes": {"good": {"name": "good", "state": "stopped"}, "bad": {"state": 42}}}"#,
        )
        .unwrap();
        let catalog = ChuteCatalog::load(&path).unwrap();
        assert!(catalog.get("good").is_some());
        assert!(catalog.get("bad").is_none());
        assert!(logs_contain("Dropping corrupt catalog entry bad"));
    }

    #[test]
    fn legacy_format_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chutes");
        std::fs::write(&path, r#"{"old": {"name": "old", "version": 3}}"#).unwrap();
        let catalog = ChuteCatalog::load(&path).unwrap();
        assert_eq!(catalog.get("old").unwrap().version.as_deref(), Some("3"));
    }

    #[test]
    fn flush_only_when_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ChuteCatalog::load(&dir.path().join("chutes")).unwrap();
        assert!(!catalog.flush().unwrap());
        catalog.mark_dirty();
        assert!(catalog.flush().unwrap());
        assert!(!catalog.is_dirty());
        assert!(catalog.path().is_file());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_flusher() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(ChuteCatalog::load(&dir.path().join("chutes")).unwrap());
        let task = ChuteCatalog::spawn_flusher(catalog.clone(), Duration::from_secs(30));
        catalog.mark_dirty();
        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert!(!catalog.is_dirty());
        task.abort();
    }
}
