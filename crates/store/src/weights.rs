//! Append-only weight vector history with optimistic commits.

use std::collections::BTreeMap;
use std::fs::{self, create_dir_all, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;

use chrono::{NaiveDate, Utc};
use common::{Category, Error, Factor, Result, WeightVector};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifacts::{write_atomic, ArtifactKind};

/// Every committed vector for one category, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightHistory {
    pub category: Category,
    #[serde(default)]
    pub versions: Vec<WeightVector>,
}

impl WeightHistory {
    fn empty(category: Category) -> Self {
        Self {
            category,
            versions: Vec::new(),
        }
    }

    pub fn latest(&self) -> Option<&WeightVector> {
        self.versions.last()
    }

    pub fn latest_version(&self) -> u64 {
        self.latest().map(|w| w.version).unwrap_or(0)
    }
}

/// The only shared mutable resource of a cycle. Commits hold an exclusive
/// lock on `<category>.lock` across read, version check and write, so they
/// are serialised across processes as well as threads.
#[derive(Debug)]
pub struct WeightStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl WeightStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join(ArtifactKind::WeightHistory.dir_name());
        create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path(&self, category: Category) -> PathBuf {
        self.dir.join(format!("{}.json", category.as_str()))
    }

    fn lock_file(&self, category: Category) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(format!("{}.lock", category.as_str())))?;
        file.lock_exclusive()?;
        Ok(file)
    }

    /// Load the full history. An unreadable or invalid file is fatal.
    pub fn history(&self, category: Category) -> Result<WeightHistory> {
        let path = self.path(category);
        if !path.exists() {
            return Ok(WeightHistory::empty(category));
        }
        let raw = fs::read(&path)?;
        let history: WeightHistory = serde_json::from_slice(&raw).map_err(|e| {
            Error::StoreCorrupted(format!("{}: {}", path.display(), e))
        })?;
        if history.category != category {
            return Err(Error::StoreCorrupted(format!(
                "{} holds {} weights",
                path.display(),
                history.category
            )));
        }
        let mut last_version = 0;
        for wv in &history.versions {
            if !wv.is_normalized() || wv.version <= last_version {
                return Err(Error::StoreCorrupted(format!(
                    "{}: invalid version {} (sum={:.6})",
                    path.display(),
                    wv.version,
                    wv.sum()
                )));
            }
            last_version = wv.version;
        }
        Ok(history)
    }

    pub fn current(&self, category: Category) -> Result<Option<WeightVector>> {
        Ok(self.history(category)?.latest().cloned())
    }

    /// The vector committed with `effective_date == date`, if any.
    pub fn committed_for(&self, category: Category, date: NaiveDate) -> Result<Option<WeightVector>> {
        Ok(self
            .history(category)?
            .versions
            .into_iter()
            .rev()
            .find(|w| w.effective_date == date))
    }

    /// Append a new version if the stored latest version still equals
    /// `expected_version`; otherwise fail with `VersionConflict`.
    pub fn commit(
        &self,
        category: Category,
        weights: BTreeMap<Factor, f64>,
        effective_date: NaiveDate,
        expected_version: u64,
    ) -> Result<WeightVector> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::Other("weight store lock poisoned".into()))?;
        let lock = self.lock_file(category)?;
        let committed = self.commit_locked(category, weights, effective_date, expected_version);
        if let Err(e) = FileExt::unlock(&lock) {
            warn!("Failed to release {} weight lock: {}", category, e);
        }
        committed
    }

    fn commit_locked(
        &self,
        category: Category,
        weights: BTreeMap<Factor, f64>,
        effective_date: NaiveDate,
        expected_version: u64,
    ) -> Result<WeightVector> {

        let mut history = self.history(category)?;
        let found = history.latest_version();
        if found != expected_version {
            return Err(Error::VersionConflict {
                expected: expected_version,
                found,
            });
        }

        let vector = WeightVector {
            category,
            version: found + 1,
            effective_date,
            committed_at: Utc::now(),
            weights,
        };
        if !vector.is_normalized() {
            return Err(Error::WeightNormalization(format!(
                "refusing to commit {} weights summing to {:.6}",
                category,
                vector.sum()
            )));
        }

        history.versions.push(vector.clone());
        let data = serde_json::to_vec_pretty(&history)?;
        write_atomic(&self.path(category), &data)?;

        info!(
            "Committed {} weights v{} effective {}",
            category, vector.version, effective_date
        );
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, d).unwrap()
    }

    fn weights(price: f64, form: f64) -> BTreeMap<Factor, f64> {
        [(Factor::Price, price), (Factor::Form, form)].into_iter().collect()
    }

    #[test]
    fn test_commit_appends_versions() {
        let tmp = tempfile::tempdir().unwrap();
        let store = WeightStore::open(tmp.path()).unwrap();

        let v1 = store
            .commit(Category::BoatRacing, weights(0.5, 0.5), date(8), 0)
            .unwrap();
        let v2 = store
            .commit(Category::BoatRacing, weights(0.6, 0.4), date(9), 1)
            .unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);

        let history = store.history(Category::BoatRacing).unwrap();
        assert_eq!(history.versions.len(), 2);
        assert_eq!(store.current(Category::BoatRacing).unwrap().unwrap().version, 2);
        assert_eq!(
            store
                .committed_for(Category::BoatRacing, date(8))
                .unwrap()
                .unwrap()
                .version,
            1
        );
    }

    #[test]
    fn test_stale_expected_version_conflicts() {
        let tmp = tempfile::tempdir().unwrap();
        let store = WeightStore::open(tmp.path()).unwrap();
        store
            .commit(Category::HorseRacing, weights(0.5, 0.5), date(8), 0)
            .unwrap();

        let err = store
            .commit(Category::HorseRacing, weights(0.7, 0.3), date(9), 0)
            .unwrap_err();
        assert!(matches!(err, Error::VersionConflict { expected: 0, found: 1 }));
        assert_eq!(store.history(Category::HorseRacing).unwrap().versions.len(), 1);
    }

    #[test]
    fn test_unnormalized_commit_rejected_and_store_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let store = WeightStore::open(tmp.path()).unwrap();
        let err = store
            .commit(Category::AutoRacing, weights(0.9, 0.9), date(8), 0)
            .unwrap_err();
        assert!(matches!(err, Error::WeightNormalization(_)));
        assert!(store.current(Category::AutoRacing).unwrap().is_none());
    }

    #[test]
    fn test_separate_store_instances_cannot_lose_updates() {
        let tmp = tempfile::tempdir().unwrap();
        let first = WeightStore::open(tmp.path()).unwrap();
        let second = WeightStore::open(tmp.path()).unwrap();

        first
            .commit(Category::HorseRacing, weights(0.5, 0.5), date(8), 0)
            .unwrap();
        let err = second
            .commit(Category::HorseRacing, weights(0.6, 0.4), date(8), 0)
            .unwrap_err();
        assert!(matches!(err, Error::VersionConflict { expected: 0, found: 1 }));

        second
            .commit(Category::HorseRacing, weights(0.6, 0.4), date(9), 1)
            .unwrap();
        let versions: Vec<u64> = first
            .history(Category::HorseRacing)
            .unwrap()
            .versions
            .iter()
            .map(|w| w.version)
            .collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn test_racing_commits_from_many_stores_keep_one_winner() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let dir = dir.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let store = WeightStore::open(&dir).unwrap();
                    let price = 0.5 + i as f64 * 0.01;
                    barrier.wait();
                    store.commit(Category::BoatRacing, weights(price, 1.0 - price), date(8), 0)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, Error::VersionConflict { .. })));
        let store = WeightStore::open(&dir).unwrap();
        assert_eq!(store.history(Category::BoatRacing).unwrap().versions.len(), 1);
        let leftovers = fs::read_dir(dir.join(ArtifactKind::WeightHistory.dir_name()))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_corrupted_history_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = WeightStore::open(tmp.path()).unwrap();
        fs::write(store.path(Category::HorseRacing), b"{not json").unwrap();
        let err = store.history(Category::HorseRacing).unwrap_err();
        assert!(err.is_fatal(), "expected fatal, got {err}");
    }
}
